//! Drive OAuth2 authentication
//!
//! Authorization code flow with a loopback redirect. Tokens are persisted in
//! the config directory and cached in memory so concurrent workers do not
//! each hit the token endpoint.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Mutex;
use url::Url;

/// Seconds before expiry at which a token is treated as stale
const EXPIRY_MARGIN_SECS: i64 = 300;

/// OAuth2 token management for the Drive API
pub struct DriveAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
    cached: Mutex<Option<StoredToken>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > Utc::now().timestamp() + EXPIRY_MARGIN_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl TokenResponse {
    fn into_stored(self) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now().timestamp() + secs as i64),
        }
    }
}

impl DriveAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Read-only access is all a mirror needs
    const DRIVE_READONLY_SCOPE: &'static str = "https://www.googleapis.com/auth/drive.readonly";

    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        let token_path =
            config::config_path("drive-tokens.json").context("Could not determine config directory")?;

        Ok(Self::with_token_path(client_id, client_secret, token_path))
    }

    /// Use an explicit token file instead of the config directory
    pub fn with_token_path(client_id: String, client_secret: String, token_path: PathBuf) -> Self {
        Self {
            client_id,
            client_secret,
            token_path,
            cached: Mutex::new(None),
        }
    }

    /// Get a valid access token, refreshing or re-authenticating as needed.
    ///
    /// Callers are serialized so only one of them ever refreshes.
    pub fn get_access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());

        if cached.is_none() {
            *cached = self.load_token().ok();
        }

        if let Some(token) = cached.as_ref() {
            if token.is_fresh() {
                return Ok(token.access_token.clone());
            }

            if let Some(refresh_token) = token.refresh_token.clone() {
                match self.refresh_access_token(&refresh_token) {
                    Ok(fresh) => {
                        self.save_token(&fresh)?;
                        let access_token = fresh.access_token.clone();
                        *cached = Some(fresh);
                        return Ok(access_token);
                    }
                    Err(e) => log::warn!("Token refresh failed, re-authenticating: {:#}", e),
                }
            }
        }

        let fresh = self.authorization_code_auth()?.into_stored();
        self.save_token(&fresh)?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::DRIVE_READONLY_SCOPE),
        );

        println!("\n=== Google Drive Authentication Required ===");
        println!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            eprintln!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        let code = self.wait_for_callback(listener)?;

        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        log::info!("Drive authentication successful");
        Ok(token)
    }

    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut request_line = String::new();
        BufReader::new(&stream)
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let outcome = parse_callback(&request_line);

        let (status, body) = match outcome {
            Ok(_) => ("200 OK", "Authentication successful! You can close this window."),
            Err(_) => ("400 Bad Request", "Authentication failed. Please try again."),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        outcome
    }

    fn refresh_access_token(&self, refresh_token: &str) -> Result<StoredToken> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        let mut stored = token.into_stored();
        if stored.refresh_token.is_none() {
            stored.refresh_token = Some(refresh_token.to_string());
        }
        Ok(stored)
    }

    fn load_token(&self) -> Result<StoredToken> {
        config::load_json_file(&self.token_path)
    }

    fn save_token(&self, token: &StoredToken) -> Result<()> {
        config::save_json_file(&self.token_path, token)
    }

    /// Forget stored tokens so the next call re-authenticates
    pub fn logout(&self) -> Result<()> {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = None;
        if self.token_path.exists() {
            std::fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }
}

/// Pull the authorization code out of a callback request line.
///
/// Format: `GET /?code=AUTH_CODE&scope=... HTTP/1.1`
fn parse_callback(request_line: &str) -> Result<String> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed callback request")?;
    let url = Url::parse(&format!("http://localhost{}", target))
        .context("Malformed callback target")?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => anyhow::bail!("OAuth error: {}", value),
            "code" => code = Some(value.into_owned()),
            _ => {}
        }
    }

    code.context("No authorization code received")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_callback_code() {
        let line = "GET /?code=4%2F0Abc&scope=drive HTTP/1.1\r\n";
        assert_eq!(parse_callback(line).unwrap(), "4/0Abc");
    }

    #[test]
    fn test_parse_callback_error() {
        let err = parse_callback("GET /?error=access_denied HTTP/1.1").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_parse_callback_missing_code() {
        assert!(parse_callback("GET /favicon.ico HTTP/1.1").is_err());
        assert!(parse_callback("").is_err());
    }

    #[test]
    fn test_fresh_stored_token_is_served_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let token = StoredToken {
            access_token: "abc".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now().timestamp() + 3600),
        };
        config::save_json_file(&path, &token).unwrap();

        let auth = DriveAuth::with_token_path("id".into(), "secret".into(), path);
        assert_eq!(auth.get_access_token().unwrap(), "abc");
    }

    #[test]
    fn test_token_near_expiry_is_stale() {
        let token = StoredToken {
            access_token: "abc".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now().timestamp() + 60),
        };
        assert!(!token.is_fresh());
    }
}
