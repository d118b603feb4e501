use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Failures that never reached a decoded backend answer.
///
/// `Display` is the text shown to the user after the `Error: ` prefix.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    pub filename: Option<String>,
    pub model: String,
}

/// Body of `POST /upload`. Error replies from the backend may omit `success`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct QueryResponse {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Accepted { filename: String },
    Rejected { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Answer(String),
    Failed(String),
}

impl UploadResponse {
    pub fn into_outcome(self) -> UploadOutcome {
        match (self.success, self.filename) {
            (true, Some(filename)) => UploadOutcome::Accepted { filename },
            (true, None) => UploadOutcome::Rejected {
                error: "upload response is missing the filename".to_string(),
            },
            (false, _) => UploadOutcome::Rejected {
                error: self.error.unwrap_or_else(|| "upload rejected".to_string()),
            },
        }
    }
}

impl QueryResponse {
    pub fn into_outcome(self) -> QueryOutcome {
        match self.response {
            Some(text) if !text.is_empty() => QueryOutcome::Answer(text),
            _ => QueryOutcome::Failed(
                self.error.unwrap_or_else(|| "empty response from server".to_string()),
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BackendClient {
    client: Client,
    base_url: Url,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        // Url::join drops the last path segment unless the base ends in '/'
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');

        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(&base)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sends the file as the single multipart part `file`.
    ///
    /// The body is decoded whatever the HTTP status: the backend answers 400
    /// and 500 with a JSON `error` as well.
    pub async fn upload(&self, path: &Path) -> Result<UploadOutcome, ApiError> {
        let url = self.base_url.join("upload")?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        tracing::debug!("Uploading {} ({} bytes) to {}", file_name, bytes.len(), url);

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let resp = self.client.post(url).multipart(form).send().await?;
        let status = resp.status();

        let body: UploadResponse = resp.json().await?;
        if !status.is_success() {
            tracing::warn!("Upload returned {}: {:?}", status, body.error);
        }
        Ok(body.into_outcome())
    }

    pub async fn query(&self, req: &QueryRequest) -> Result<QueryOutcome, ApiError> {
        let url = self.base_url.join("query")?;

        tracing::debug!(
            "Query for file {:?} with model '{}': {} chars",
            req.filename,
            req.model,
            req.query.len()
        );

        let resp = self.client.post(url).json(req).send().await?;
        let status = resp.status();

        let body: QueryResponse = resp.json().await?;
        if !status.is_success() {
            tracing::warn!("Query returned {}: {:?}", status, body.error);
        }
        Ok(body.into_outcome())
    }
}
