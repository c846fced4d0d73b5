//! Word document text extraction

use anyhow::{Context, Result};
use std::io::{Cursor, Read};

use super::xml::{XmlEvent, XmlEvents, attribute, decode_entities};

/// Read one entry of a zip container as text
pub(super) fn read_zip_entry(bytes: &[u8], name: &str) -> Result<Option<String>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("not a zip container")?;
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("cannot open {}", name)),
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("cannot read {}", name))?;
    Ok(Some(content))
}

/// One line per paragraph, with tabs and breaks kept
pub(super) fn extract(bytes: &[u8]) -> Result<String> {
    let xml = read_zip_entry(bytes, "word/document.xml")?
        .context("word/document.xml missing")?;

    let mut out = String::new();
    let mut in_text = false;

    for event in XmlEvents::new(&xml) {
        match event {
            XmlEvent::Start { name: "w:t", self_closing: false, .. } => in_text = true,
            XmlEvent::End("w:t") => in_text = false,
            XmlEvent::Text(text) if in_text => out.push_str(&decode_entities(text)),
            // Tab stops in paragraph properties carry a position; tab runs do not
            XmlEvent::Start { name: "w:tab", attrs, .. } if attribute(attrs, "w:pos").is_none() => {
                out.push('\t')
            }
            XmlEvent::Start { name: "w:br" | "w:cr", .. } => out.push('\n'),
            XmlEvent::Start { name: "w:p", self_closing: true, .. } | XmlEvent::End("w:p") => {
                out.push('\n')
            }
            _ => {}
        }
    }

    Ok(out)
}
