//! Drive v3 HTTP client
//!
//! Uses synchronous HTTP (ureq) so worker threads can call it directly.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::io::Read;
use url::Url;

use super::api::{About, FileList, NameOnly};
use super::{DriveAuth, Page, RemoteFile, RemoteFolder, RemoteStore, mime};

/// Failures the engine distinguishes when talking to Drive
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Rate limited by the remote store (HTTP {0})")]
    RateLimited(u16),
    #[error("{operation} failed with HTTP {status}")]
    Http { status: u16, operation: String },
}

/// Drive API client
pub struct DriveClient {
    auth: DriveAuth,
}

impl DriveClient {
    const BASE_URL: &'static str = "https://www.googleapis.com/drive/v3";

    const FILE_FIELDS: &'static str = "id, name, mimeType, modifiedTime, createdTime, webViewLink";

    const PAGE_SIZE: &'static str = "100";

    pub fn new(auth: DriveAuth) -> Self {
        Self { auth }
    }

    /// Build an endpoint URL from path segments and query parameters
    fn endpoint(segments: &[&str], params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(Self::BASE_URL).context("Invalid Drive base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Drive base URL cannot have path segments"))?
            .extend(segments);
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    fn get(&self, url: &Url, operation: &str) -> Result<ureq::http::Response<ureq::Body>> {
        let access_token = self.auth.get_access_token()?;

        ureq::get(url.as_str())
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| classify(e, operation))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url, operation: &str) -> Result<T> {
        let mut response = self.get(url, operation)?;
        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse {} response", operation))
    }

    fn file_query(parent: Option<&str>) -> String {
        let types = mime::SYNCED
            .iter()
            .map(|t| format!("mimeType='{}'", t))
            .collect::<Vec<_>>()
            .join(" or ");

        let mut query = format!("({}) and not name contains '.docm' and trashed=false", types);
        if let Some(parent) = parent {
            query.push_str(&format!(" and '{}' in parents", escape_query(parent)));
        }
        query
    }
}

/// Quote-escape a value embedded in a Drive search query
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn classify(err: ureq::Error, operation: &str) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(404) => DriveError::NotFound(operation.to_string()).into(),
        ureq::Error::StatusCode(status @ (403 | 429)) => DriveError::RateLimited(status).into(),
        ureq::Error::StatusCode(status) => DriveError::Http {
            status,
            operation: operation.to_string(),
        }
        .into(),
        other => anyhow::Error::new(other).context(format!("Failed to send {} request", operation)),
    }
}

impl RemoteStore for DriveClient {
    fn probe(&self) -> Result<()> {
        let url = Self::endpoint(&["about"], &[("fields", "user(displayName, emailAddress)")])?;
        let about: About = self.get_json(&url, "about")?;
        if let Some(user) = about.user {
            log::info!(
                "Connected to Drive as {}",
                user.email_address
                    .or(user.display_name)
                    .unwrap_or_else(|| "unknown user".to_string())
            );
        }
        Ok(())
    }

    fn list_child_folders(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<RemoteFolder>> {
        let query = format!(
            "'{}' in parents and mimeType='{}' and trashed=false",
            escape_query(folder_id),
            mime::FOLDER
        );
        let mut params = vec![
            ("q", query.as_str()),
            ("fields", "nextPageToken, files(id, name)"),
            ("pageSize", Self::PAGE_SIZE),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let url = Self::endpoint(&["files"], &params)?;
        let list: FileList<RemoteFolder> = self.get_json(&url, "list folders")?;
        Ok(list.into())
    }

    fn list_files(&self, parent: Option<&str>, page_token: Option<&str>) -> Result<Page<RemoteFile>> {
        let query = Self::file_query(parent);
        let fields = format!("nextPageToken, files({})", Self::FILE_FIELDS);
        let mut params = vec![
            ("q", query.as_str()),
            ("fields", fields.as_str()),
            ("pageSize", Self::PAGE_SIZE),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let url = Self::endpoint(&["files"], &params)?;
        let list: FileList<RemoteFile> = self.get_json(&url, "list files")?;
        Ok(list.into())
    }

    fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        let url = Self::endpoint(
            &["files", file_id],
            &[("fields", Self::FILE_FIELDS), ("supportsAllDrives", "true")],
        )?;
        self.get_json(&url, &format!("file {}", file_id))
    }

    fn open_download(&self, file: &RemoteFile) -> Result<Box<dyn Read + Send>> {
        let url = match mime::export_format(&file.mime_type) {
            Some(format) => Self::endpoint(&["files", file.id.as_str(), "export"], &[("mimeType", format)])?,
            None => Self::endpoint(
                &["files", file.id.as_str()],
                &[("alt", "media"), ("supportsAllDrives", "true")],
            )?,
        };

        let response = self.get(&url, &format!("download of {}", file.name))?;
        Ok(Box::new(response.into_body().into_reader()))
    }

    fn display_name(&self, id: &str) -> Result<String> {
        let drive_url = Self::endpoint(&["drives", id], &[("fields", "name")])?;
        match self.get_json::<NameOnly>(&drive_url, "shared drive") {
            Ok(drive) => return Ok(format!("Shared Drive - {}", drive.name)),
            Err(e) => log::debug!("{} is not a shared drive: {:#}", id, e),
        }

        let file_url = Self::endpoint(
            &["files", id],
            &[("fields", "name"), ("supportsAllDrives", "true")],
        )?;
        let file: NameOnly = self.get_json(&file_url, &format!("folder {}", id))?;
        Ok(file.name)
    }
}
