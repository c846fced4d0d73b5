//! Merged text artifacts
//!
//! Writes every active document into one or more markdown parts, each capped
//! by bytes and by words. A document is never split across parts.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::MergeLimits;
use crate::models::timestamp::format_timestamp;
use crate::models::{Database, Document};
use crate::sync::timing::format_hms;

/// Summary written at the top of every part
#[derive(Debug, Clone)]
pub struct RunHeader {
    pub generated_at: DateTime<Utc>,
    pub duration: Duration,
    pub total_documents: usize,
    pub active_documents: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
}

impl RunHeader {
    pub fn render(&self) -> String {
        format!(
            "Sync Completed - Generated on {}\nOperation took {}\n\nTotal documents: {}\nActive documents: {}\nFiles updated in this sync: {}\nFiles deleted in this sync: {}\n",
            format_timestamp(&self.generated_at),
            format_hms(self.duration),
            self.total_documents,
            self.active_documents,
            self.files_updated,
            self.files_deleted
        )
    }
}

/// One written part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub path: PathBuf,
    pub bytes: usize,
    pub words: usize,
    pub documents: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Parts in order, numbered from 1
    pub parts: Vec<PartInfo>,
}

impl MergeReport {
    pub fn total_bytes(&self) -> usize {
        self.parts.iter().map(|p| p.bytes).sum()
    }

    pub fn total_words(&self) -> usize {
        self.parts.iter().map(|p| p.words).sum()
    }
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Render the block for the `index`-th document (1-based)
fn render_document(index: usize, doc: &Document) -> String {
    format!(
        "\n```START OF FILE {index} ```\n## METADATA ##\nTitle: {}\nURL: {}\nLast Modified: {}\n{}\n```END OF FILE {index} ```\n",
        doc.name,
        doc.url,
        format_timestamp(&doc.modified_time),
        doc.content(),
    )
}

struct OpenPart {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes: usize,
    words: usize,
    documents: usize,
}

impl OpenPart {
    fn fits(&self, limits: &MergeLimits, bytes: usize, words: usize) -> bool {
        self.bytes + bytes <= limits.max_bytes && self.words + words <= limits.max_words
    }

    fn append(&mut self, block: &str, words: usize) -> Result<()> {
        self.writer
            .write_all(block.as_bytes())
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        self.bytes += block.len();
        self.words += words;
        self.documents += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<PartInfo> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(PartInfo {
            path: self.path,
            bytes: self.bytes,
            words: self.words,
            documents: self.documents,
        })
    }
}

/// Writes `<date>_<name>_part<N>.md` files into an output directory
pub struct MergeWriter {
    output_dir: PathBuf,
    name: String,
    limits: MergeLimits,
    date: NaiveDate,
}

impl MergeWriter {
    pub fn new(output_dir: impl Into<PathBuf>, name: impl Into<String>, limits: MergeLimits) -> Self {
        Self {
            output_dir: output_dir.into(),
            name: name.into(),
            limits,
            date: Local::now().date_naive(),
        }
    }

    /// Use a fixed date in part names
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    fn prefix(&self) -> String {
        format!("{}_{}_part", self.date.format("%Y-%m-%d"), self.name)
    }

    pub fn part_path(&self, number: usize) -> PathBuf {
        self.output_dir.join(format!("{}{}.md", self.prefix(), number))
    }

    fn open_part(&self, number: usize, header: &str) -> Result<OpenPart> {
        let path = self.part_path(number);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut part = OpenPart {
            path,
            writer: BufWriter::new(file),
            bytes: 0,
            words: 0,
            documents: 0,
        };
        part.writer
            .write_all(header.as_bytes())
            .with_context(|| format!("Failed to write {}", part.path.display()))?;
        part.bytes = header.len();
        part.words = count_words(header);
        Ok(part)
    }

    /// Write every active document of `db`, in key order, under `header`
    pub fn write(&self, db: &Database, header: &str) -> Result<MergeReport> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let mut parts = Vec::new();
        let mut current = self.open_part(1, header)?;

        for (index, doc) in db.active_documents().enumerate() {
            let block = render_document(index + 1, doc);
            let words = count_words(&block);

            if !current.fits(&self.limits, block.len(), words) {
                if current.documents > 0 {
                    log::info!(
                        "Part {} is full ({} bytes, {} words)",
                        parts.len() + 1,
                        current.bytes,
                        current.words
                    );
                    parts.push(current.finish()?);
                    current = self.open_part(parts.len() + 1, header)?;
                }
                if !current.fits(&self.limits, block.len(), words) {
                    log::warn!(
                        "{} exceeds the merge limits on its own ({} bytes, {} words); writing it alone",
                        doc.name,
                        block.len(),
                        words
                    );
                }
            }

            current.append(&block, words)?;
        }
        parts.push(current.finish()?);

        self.remove_stale_parts(parts.len())?;

        let report = MergeReport { parts };
        log::info!(
            "Wrote {} merged part(s), {} words total",
            report.parts.len(),
            report.total_words()
        );
        Ok(report)
    }

    /// Delete same-day parts with a number above `written`
    fn remove_stale_parts(&self, written: usize) -> Result<()> {
        let prefix = self.prefix();
        let entries = fs::read_dir(&self.output_dir)
            .with_context(|| format!("Failed to read {}", self.output_dir.display()))?;

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(number) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix(prefix.as_str()))
                .and_then(|n| n.strip_suffix(".md"))
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };
            if number > written {
                let path = entry.path();
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove stale part {}", path.display()))?;
                log::info!("Removed stale part {}", path.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::RemoteFile;
    use crate::models::DocumentId;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn doc(id: &str, content: &str) -> Document {
        let remote = RemoteFile {
            id: id.to_string(),
            name: format!("{}.txt", id),
            mime_type: "text/plain".to_string(),
            modified_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            created_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            web_view_link: None,
        };
        Document::from_remote(&remote, content.to_string(), Utc::now())
    }

    fn db_of(docs: &[(&str, &str)]) -> Database {
        let mut db = Database::new();
        for (id, content) in docs {
            db.upsert(doc(id, content));
        }
        db
    }

    fn writer(dir: &Path, limits: MergeLimits) -> MergeWriter {
        MergeWriter::new(dir, "Team", limits).with_date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    }

    fn block_size(index: usize, id: &str, content: &str) -> (usize, usize) {
        let block = render_document(index, &doc(id, content));
        (block.len(), count_words(&block))
    }

    #[test]
    fn test_run_header() {
        let header = RunHeader {
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            duration: Duration::from_secs(75),
            total_documents: 3,
            active_documents: 2,
            files_updated: 1,
            files_deleted: 1,
        };
        assert_eq!(
            header.render(),
            "Sync Completed - Generated on 2024-05-01T10:00:00.000Z\nOperation took 00:01:15\n\nTotal documents: 3\nActive documents: 2\nFiles updated in this sync: 1\nFiles deleted in this sync: 1\n"
        );
    }

    #[test]
    fn test_document_block_format() {
        let block = render_document(3, &doc("a", "hello world"));
        assert_eq!(
            block,
            "\n```START OF FILE 3 ```\n## METADATA ##\nTitle: a.txt\nURL: N/A\nLast Modified: 2024-01-02T00:00:00.000Z\nhello world\n```END OF FILE 3 ```\n"
        );
    }

    #[test]
    fn test_single_part_when_everything_fits() {
        let dir = TempDir::new().unwrap();
        let db = db_of(&[("a", "one"), ("b", "two")]);

        let report = writer(dir.path(), MergeLimits::default()).write(&db, "H\n").unwrap();

        assert_eq!(report.parts.len(), 1);
        let path = &report.parts[0].path;
        assert_eq!(path.file_name().unwrap(), "2024-05-01_Team_part1.md");
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("H\n\n```START OF FILE 1 ```"));
        assert!(text.contains("```END OF FILE 2 ```"));
        assert_eq!(report.parts[0].bytes, text.len());
        assert_eq!(report.parts[0].documents, 2);
    }

    #[test]
    fn test_caps_split_without_exceeding() {
        let dir = TempDir::new().unwrap();
        let docs = [("a", "alpha beta"), ("b", "gamma delta"), ("c", "epsilon zeta")];
        let db = db_of(&docs);
        let header = "H\n";

        // Room for exactly two blocks by words, plenty of bytes
        let (_, words_1) = block_size(1, "a", docs[0].1);
        let (_, words_2) = block_size(2, "b", docs[1].1);
        let word_cap = count_words(header) + words_1 + words_2;
        let limits = MergeLimits { max_bytes: 1_000_000, max_words: word_cap };

        let report = writer(dir.path(), limits).write(&db, header).unwrap();

        assert_eq!(report.parts.len(), 2);
        assert_eq!(report.parts[0].documents, 2);
        assert_eq!(report.parts[1].documents, 1);
        for part in &report.parts {
            assert!(part.words <= limits.max_words);
        }

        // Now by bytes: room for one block per part
        let (bytes_1, _) = block_size(1, "a", docs[0].1);
        let limits = MergeLimits { max_bytes: header.len() + bytes_1 + 5, max_words: 1_000_000 };
        let report = writer(dir.path(), limits).write(&db, header).unwrap();

        assert_eq!(report.parts.len(), 3);
        for part in &report.parts {
            assert_eq!(part.documents, 1);
            assert!(part.bytes <= limits.max_bytes);
        }
    }

    #[test]
    fn test_oversized_document_gets_its_own_part() {
        let dir = TempDir::new().unwrap();
        let big = vec!["word"; 300].join(" ");
        let db = db_of(&[("a", "small"), ("b", &big), ("c", "small too")]);
        let limits = MergeLimits { max_bytes: 1_000_000, max_words: 100 };

        let report = writer(dir.path(), limits).write(&db, "H\n").unwrap();

        let counts: Vec<usize> = report.parts.iter().map(|p| p.documents).collect();
        assert_eq!(counts, vec![1, 1, 1]);
        assert!(report.parts[1].words > 100);
    }

    #[test]
    fn test_deleted_documents_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut db = db_of(&[("a", "keep me"), ("b", "drop me")]);
        db.tombstone(&DocumentId::new("b"), Utc::now());

        let report = writer(dir.path(), MergeLimits::default()).write(&db, "H\n").unwrap();

        let text = fs::read_to_string(&report.parts[0].path).unwrap();
        assert!(text.contains("keep me"));
        assert!(!text.contains("drop me"));
    }

    #[test]
    fn test_empty_database_writes_header_only_part() {
        let dir = TempDir::new().unwrap();
        let report = writer(dir.path(), MergeLimits::default())
            .write(&Database::new(), "H\n")
            .unwrap();

        assert_eq!(report.parts.len(), 1);
        assert_eq!(report.parts[0].documents, 0);
        assert_eq!(fs::read_to_string(&report.parts[0].path).unwrap(), "H\n");
    }

    #[test]
    fn test_stale_parts_are_removed() {
        let dir = TempDir::new().unwrap();
        let w = writer(dir.path(), MergeLimits::default());
        fs::write(w.part_path(2), "old").unwrap();
        fs::write(w.part_path(3), "old").unwrap();
        let other_day = dir.path().join("2024-04-30_Team_part2.md");
        fs::write(&other_day, "keep").unwrap();

        w.write(&db_of(&[("a", "x")]), "H\n").unwrap();

        assert!(w.part_path(1).exists());
        assert!(!w.part_path(2).exists());
        assert!(!w.part_path(3).exists());
        assert!(other_day.exists());
    }
}
