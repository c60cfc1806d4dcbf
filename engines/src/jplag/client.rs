//! HTTP client for the RPC engine: authenticated JSON endpoints for starting
//! an upload, streaming payload chunks, polling progress and fetching the
//! finished report files.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::EngineError;

/// Remote scan state as reported by the status endpoint. The numeric `state`
/// is a coarse phase code interpreted by the adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStatus {
    pub state: i32,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ManifestResponse {
    files: Vec<String>,
}

pub struct JplagClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl JplagClient {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Result<Self, EngineError> {
        let http = Client::builder()
            .user_agent("simscan-rpc/0.1")
            .gzip(true)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Registers a new scan and returns its submission token.
    pub async fn start_upload(
        &self,
        assignment_id: i64,
        language: &str,
    ) -> Result<String, EngineError> {
        let resp: StartResponse = self
            .http
            .post(self.url("/api/scans"))
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "assignment": assignment_id, "language": language }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.token)
    }

    /// Uploads one payload chunk. Chunks carry a sequence number so the
    /// server can detect gaps; `last` closes the upload.
    pub async fn continue_upload(
        &self,
        token: &str,
        seq: u32,
        chunk: Vec<u8>,
        last: bool,
    ) -> Result<(), EngineError> {
        self.http
            .put(self.url(&format!("/api/scans/{token}/chunks/{seq}")))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("last", last)])
            .body(chunk)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn status(&self, token: &str) -> Result<RemoteStatus, EngineError> {
        Ok(self
            .http
            .get(self.url(&format!("/api/scans/{token}/status")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Relative paths of all files making up the finished report.
    pub async fn manifest(&self, token: &str) -> Result<Vec<String>, EngineError> {
        let resp: ManifestResponse = self
            .http
            .get(self.url(&format!("/api/scans/{token}/report")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.files)
    }

    pub async fn fetch_file(&self, token: &str, name: &str) -> Result<String, EngineError> {
        Ok(self
            .http
            .get(self.url(&format!("/api/scans/{token}/report/{name}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    /// Drops the remote submission. The adapter calls this when a rescan
    /// abandons the token; failures are logged and not propagated further.
    pub async fn cancel(&self, token: &str) -> Result<(), EngineError> {
        self.http
            .delete(self.url(&format!("/api/scans/{token}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let c = JplagClient::new("http://jplag.example.org/", "u", "p").unwrap();
        assert_eq!(c.url("/api/scans"), "http://jplag.example.org/api/scans");
    }

    #[test]
    fn status_payload_defaults_missing_fields() {
        let s: RemoteStatus = serde_json::from_str(r#"{"state":150}"#).unwrap();
        assert_eq!(s.state, 150);
        assert_eq!(s.progress, 0);
        assert!(s.message.is_none());
    }
}
