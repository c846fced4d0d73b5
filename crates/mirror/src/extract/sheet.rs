//! Tabular text rendering for CSV content

use csv::ReaderBuilder;

/// A table ready to be rendered as text
pub(super) struct Table {
    pub format: String,
    pub source_url: Option<String>,
    /// Extra metadata lines after the format and URL
    pub details: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// What the description calls the container ("CSV file", "Excel file")
    pub kind: String,
    /// Appended to the description's first sentence, e.g. ` in sheet 'Q1'`
    pub location: String,
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

impl Table {
    pub(super) fn render(&self) -> String {
        let width = self.headers.len();
        let header_list = self.headers.join(", ");

        let mut metadata = vec![format!("Format: {}", self.format)];
        if let Some(url) = &self.source_url {
            metadata.push(format!("URL: {}", url));
        }
        metadata.extend(self.details.iter().cloned());
        metadata.push(format!("Rows: {}", self.rows.len()));
        metadata.push(format!("Columns: {} ({})", width, header_list));

        let mut data = vec![
            self.headers
                .iter()
                .map(|h| escape_cell(h))
                .collect::<Vec<_>>()
                .join("|"),
        ];
        for row in &self.rows {
            let cells: Vec<String> = (0..width)
                .map(|i| row.get(i).map(|v| escape_cell(v)).unwrap_or_default())
                .collect();
            data.push(cells.join("|"));
        }

        let description = format!(
            "This {} contains {} records with {} columns{}.\nThe columns are: {}.",
            self.kind,
            self.rows.len(),
            width,
            self.location,
            header_list
        );

        [
            "## METADATA ##".to_string(),
            metadata.join("\n"),
            "## END METADATA ##".to_string(),
            "## DATA ##".to_string(),
            data.join("\n"),
            "## END DATA ##".to_string(),
            "## DESCRIPTION ##".to_string(),
            description,
            "## END DESCRIPTION ##".to_string(),
        ]
        .join("\n\n")
    }
}

/// Decode as UTF-8, falling back to Latin-1
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Render CSV content (including Google Sheets exports) as a text table
pub(super) fn extract_csv(bytes: &[u8], source_url: Option<&str>) -> String {
    let content = decode(bytes);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        match record {
            Ok(record) => rows.push(record.iter().map(str::to_string).collect()),
            Err(e) => {
                log::warn!("Stopped reading CSV at record {}: {}", idx + 1, e);
                break;
            }
        }
    }

    if rows.is_empty() {
        return "CSV file appears to be empty.".to_string();
    }

    let headers = rows.remove(0);
    Table {
        format: "CSV".to_string(),
        source_url: source_url.map(str::to_string),
        details: Vec::new(),
        headers,
        rows,
        kind: "CSV file".to_string(),
        location: String::new(),
    }
    .render()
}
