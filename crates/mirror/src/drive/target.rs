//! Sync targets parsed from user-supplied Drive URLs

use std::fmt;
use url::Url;

/// Identifier Drive resolves to the signed-in user's own root folder
pub const PERSONAL_ROOT: &str = "root";

/// Directory name used when the whole store is mirrored
pub const WHOLE_STORE_NAME: &str = "personal_drive";

/// What part of the remote store a pass mirrors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    /// Every synced-type file the user can access
    WholeStore,
    /// A folder and all of its descendants
    Folder(String),
    /// A shared drive, crawled from its root
    SharedDrive(String),
    /// A single file (or a folder, if its metadata says so)
    File(String),
}

impl SyncTarget {
    /// Only whole-store passes see enough to infer deletions
    pub fn is_scoped(&self) -> bool {
        !matches!(self, SyncTarget::WholeStore)
    }

    /// The remote identifier the target is rooted at, if any
    pub fn root_id(&self) -> Option<&str> {
        match self {
            SyncTarget::WholeStore => None,
            SyncTarget::Folder(id) | SyncTarget::SharedDrive(id) | SyncTarget::File(id) => {
                Some(id)
            }
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTarget::WholeStore => write!(f, "whole drive"),
            SyncTarget::Folder(id) => write!(f, "folder {}", id),
            SyncTarget::SharedDrive(id) => write!(f, "shared drive {}", id),
            SyncTarget::File(id) => write!(f, "file {}", id),
        }
    }
}

/// Drive UI paths that look like ids but are not
const RESERVED_PATHS: &[&str] = &[
    "folders",
    "shared-drives",
    "shared-with-me",
    "recent",
    "starred",
    "trash",
    "computers",
    "search",
];

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse a Drive/Docs URL into a sync target.
///
/// Returns `None` for anything that does not name a file, folder or drive.
pub fn parse_store_url(input: &str) -> Option<SyncTarget> {
    let url = Url::parse(input.trim()).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();

    if matches!(segments.last(), Some(&"my-drive") | Some(&"home")) {
        return Some(SyncTarget::Folder(PERSONAL_ROOT.to_string()));
    }

    for pair in segments.windows(2) {
        let id = pair[1];
        if !is_valid_id(id) {
            continue;
        }
        match pair[0] {
            "folders" => return Some(SyncTarget::Folder(id.to_string())),
            "d" => return Some(SyncTarget::File(id.to_string())),
            _ => {}
        }
    }

    if let [.., "drive", id] = segments.as_slice()
        && is_valid_id(id)
        && !RESERVED_PATHS.contains(id)
    {
        return Some(SyncTarget::SharedDrive(id.to_string()));
    }

    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, id)| id.into_owned())
        .filter(|id| is_valid_id(id))
        .map(SyncTarget::File)
}

/// Make a display name safe to use as a directory or file name component
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .map(|c| if c == '.' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personal_drive_urls() {
        for url in [
            "https://drive.google.com/drive/my-drive",
            "https://drive.google.com/drive/u/1/my-drive",
            "https://drive.google.com/drive/home",
        ] {
            assert_eq!(
                parse_store_url(url),
                Some(SyncTarget::Folder(PERSONAL_ROOT.to_string())),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_folder_and_file_urls() {
        assert_eq!(
            parse_store_url("https://drive.google.com/drive/folders/1AbC_d-9?usp=sharing"),
            Some(SyncTarget::Folder("1AbC_d-9".to_string()))
        );
        assert_eq!(
            parse_store_url("https://drive.google.com/drive/u/0/folders/xyz"),
            Some(SyncTarget::Folder("xyz".to_string()))
        );
        assert_eq!(
            parse_store_url("https://docs.google.com/document/d/doc123/edit"),
            Some(SyncTarget::File("doc123".to_string()))
        );
        assert_eq!(
            parse_store_url("https://docs.google.com/spreadsheets/d/sheet9/edit#gid=0"),
            Some(SyncTarget::File("sheet9".to_string()))
        );
        assert_eq!(
            parse_store_url("https://drive.google.com/file/d/f-1/view"),
            Some(SyncTarget::File("f-1".to_string()))
        );
        assert_eq!(
            parse_store_url("https://drive.google.com/open?id=abc"),
            Some(SyncTarget::File("abc".to_string()))
        );
    }

    #[test]
    fn test_shared_drive_url() {
        assert_eq!(
            parse_store_url("https://drive.google.com/drive/0AbcShared"),
            Some(SyncTarget::SharedDrive("0AbcShared".to_string()))
        );
    }

    #[test]
    fn test_rejects_unknown_urls() {
        assert_eq!(parse_store_url("not a url"), None);
        assert_eq!(parse_store_url("https://example.com/"), None);
        assert_eq!(parse_store_url("https://drive.google.com/drive/folders/"), None);
        assert_eq!(parse_store_url("https://drive.google.com/open?id=bad$id"), None);
    }

    #[test]
    fn test_scoping() {
        assert!(!SyncTarget::WholeStore.is_scoped());
        assert!(SyncTarget::Folder("x".into()).is_scoped());
        assert_eq!(SyncTarget::File("f".into()).root_id(), Some("f"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Shared Drive - Q1/Q2: \"Plans\""), "Shared Drive - Q1Q2 Plans");
        assert_eq!(sanitize_name("report.v2"), "report_v2");
    }
}
