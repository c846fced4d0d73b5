//! Excel (XLSX) extraction, first worksheet only

use anyhow::{Context, Result};

use super::docx::read_zip_entry;
use super::sheet::Table;
use super::xml::{XmlEvent, XmlEvents, attribute, decode_entities};

const FIRST_SHEET: &str = "xl/worksheets/sheet1.xml";

/// Column count of an XLSX sheet (`A` through `XFD`)
const MAX_COLUMNS: usize = 16_384;

pub(super) fn extract(bytes: &[u8], source_url: Option<&str>) -> Result<String> {
    let shared = match read_zip_entry(bytes, "xl/sharedStrings.xml")? {
        Some(xml) => shared_strings(&xml),
        None => Vec::new(),
    };
    let sheet_names = match read_zip_entry(bytes, "xl/workbook.xml")? {
        Some(xml) => sheet_names(&xml),
        None => Vec::new(),
    };
    let sheet_xml = read_zip_entry(bytes, FIRST_SHEET)?.context("first worksheet missing")?;

    let mut rows = sheet_rows(&sheet_xml, &shared);
    if rows.is_empty() {
        return Ok("Excel file appears to be empty.".to_string());
    }

    let first = rows.remove(0);
    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(first.len());
    let headers = (0..width)
        .map(|i| match first.get(i) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => format!("Column_{}", i + 1),
        })
        .collect();

    let active = sheet_names
        .first()
        .cloned()
        .unwrap_or_else(|| "Sheet1".to_string());

    Ok(Table {
        format: "Excel (XLSX)".to_string(),
        source_url: source_url.map(str::to_string),
        details: vec![
            format!("Sheets: {}", sheet_names.join(", ")),
            format!("Active Sheet: {}", active),
        ],
        headers,
        rows,
        kind: "Excel file".to_string(),
        location: format!(" in sheet '{}'", active),
    }
    .render())
}

/// Shared string table; rich-text runs are concatenated
fn shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    for event in XmlEvents::new(xml) {
        match event {
            XmlEvent::Start { name: "si", .. } => current.clear(),
            XmlEvent::End("si") => strings.push(std::mem::take(&mut current)),
            XmlEvent::Start { name: "t", self_closing: false, .. } => in_text = true,
            XmlEvent::End("t") => in_text = false,
            XmlEvent::Text(text) if in_text => current.push_str(&decode_entities(text)),
            _ => {}
        }
    }
    strings
}

fn sheet_names(xml: &str) -> Vec<String> {
    XmlEvents::new(xml)
        .filter_map(|event| match event {
            XmlEvent::Start { name: "sheet", attrs, .. } => {
                attribute(attrs, "name").map(decode_entities)
            }
            _ => None,
        })
        .collect()
}

/// Zero-based column index from a cell reference like `AB12`.
///
/// Columns past `XFD` are not valid in a sheet and yield `None`.
fn column_index(reference: &str) -> Option<usize> {
    let mut index = 0usize;
    let mut letters = 0;
    for c in reference.chars().take_while(char::is_ascii_alphabetic) {
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
        if index > MAX_COLUMNS {
            return None;
        }
        letters += 1;
    }
    if letters == 0 {
        return None;
    }
    Some(index - 1)
}

/// Floats without scientific notation or trailing zeros
fn format_number(raw: &str) -> String {
    match raw.parse::<f64>() {
        Ok(value) if value.fract() != 0.0 => {
            let formatted = format!("{:.6}", value);
            formatted.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        Ok(value) if value.is_finite() && value.abs() < 1e15 => format!("{}", value as i64),
        _ => raw.to_string(),
    }
}

#[derive(Default)]
struct Cell {
    column: Option<usize>,
    kind: String,
    value: String,
}

impl Cell {
    fn resolve(self, shared: &[String]) -> String {
        match self.kind.as_str() {
            "s" => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i).cloned())
                .unwrap_or_default(),
            "b" if self.value.trim() == "1" => "TRUE".to_string(),
            "b" => "FALSE".to_string(),
            "inlineStr" | "str" | "e" => self.value,
            _ if self.value.is_empty() => String::new(),
            _ => format_number(self.value.trim()),
        }
    }
}

fn sheet_rows(xml: &str, shared: &[String]) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<Cell> = None;
    let mut in_value = false;

    for event in XmlEvents::new(xml) {
        match event {
            XmlEvent::Start { name: "row", self_closing, .. } => {
                row.clear();
                if self_closing {
                    rows.push(Vec::new());
                }
            }
            XmlEvent::End("row") => rows.push(std::mem::take(&mut row)),
            XmlEvent::Start { name: "c", attrs, self_closing } => {
                let started = Cell {
                    column: attribute(attrs, "r").and_then(column_index),
                    kind: attribute(attrs, "t").unwrap_or("n").to_string(),
                    value: String::new(),
                };
                if self_closing {
                    place(&mut row, started, shared);
                } else {
                    cell = Some(started);
                }
            }
            XmlEvent::End("c") => {
                if let Some(done) = cell.take() {
                    place(&mut row, done, shared);
                }
            }
            XmlEvent::Start { name: "v" | "t", self_closing: false, .. } => in_value = true,
            XmlEvent::End("v" | "t") => in_value = false,
            XmlEvent::Text(text) if in_value => {
                if let Some(cell) = cell.as_mut() {
                    cell.value.push_str(&decode_entities(text));
                }
            }
            _ => {}
        }
    }

    while rows.last().is_some_and(|r| r.iter().all(String::is_empty)) {
        rows.pop();
    }
    rows
}

fn place(row: &mut Vec<String>, cell: Cell, shared: &[String]) {
    let column = cell.column.unwrap_or(row.len());
    if column >= MAX_COLUMNS {
        log::debug!("Dropping cell beyond column {}", MAX_COLUMNS);
        return;
    }
    let value = cell.resolve(shared);
    if row.len() <= column {
        row.resize(column + 1, String::new());
    }
    row[column] = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::docx::tests::zip_bytes;

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AB12"), Some(27));
        assert_eq!(column_index("12"), None);
        assert_eq!(column_index("XFD1"), Some(MAX_COLUMNS - 1));
        assert_eq!(column_index("XFE1"), None);
        assert_eq!(column_index("ZZZZZZ1"), None);
        assert_eq!(column_index("ZZZZZZZZZZZZZZZ1"), None);
    }

    #[test]
    fn test_out_of_range_cell_reference_is_placed_in_order() {
        let sheet = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>Name</t></is></c><c r="ZZZZZZZZZZZZZZZ1" t="inlineStr"><is><t>bogus</t></is></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>Ada</t></is></c><c r="ZZZZZZ2"><v>1</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_bytes(&[("xl/worksheets/sheet1.xml", sheet)]);

        let text = extract(&bytes, None).unwrap();

        assert!(text.contains("Columns: 2 (Name, bogus)"), "{}", text);
        assert!(text.contains("Ada|1"), "{}", text);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number("3"), "3");
        assert_eq!(format_number("2.5000"), "2.5");
        assert_eq!(format_number("0.1234567"), "0.123457");
        assert_eq!(format_number("abc"), "abc");
    }

    #[test]
    fn test_workbook_first_sheet() {
        let workbook = r#"<workbook><sheets><sheet name="Budget" sheetId="1"/><sheet name="Notes" sheetId="2"/></sheets></workbook>"#;
        let shared = r#"<sst><si><t>Item</t></si><si><t>Cost</t></si><si><r><t>Pens</t></r><r><t> &amp; ink</t></r></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="D1" t="inlineStr"><is><t>Paid</t></is></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>12.50</v></c><c r="D2" t="b"><v>1</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_bytes(&[
            ("xl/workbook.xml", workbook),
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);

        let text = extract(&bytes, None).unwrap();

        assert!(text.contains("Format: Excel (XLSX)\nSheets: Budget, Notes\nActive Sheet: Budget\nRows: 1\nColumns: 4 (Item, Cost, Column_3, Paid)"));
        assert!(text.contains("Item|Cost|Column_3|Paid\nPens & ink|12.5||TRUE"));
        assert!(text.contains("in sheet 'Budget'"));
    }

    #[test]
    fn test_empty_workbook() {
        let bytes = zip_bytes(&[("xl/worksheets/sheet1.xml", "<worksheet><sheetData/></worksheet>")]);
        assert_eq!(extract(&bytes, None).unwrap(), "Excel file appears to be empty.");
    }
}
