use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use tracing::{debug, warn};

use super::error::ApiError;
use super::models::{Job, PendingJob, PendingJobsResponse, StatusUpdate};
use crate::config::{Config, Credential};

/// The backend seen as a job queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Fetch up to `limit` PENDING jobs addressed to this agent
    ///
    /// Entries are decoded one by one; an entry that does not decode comes back as `Err`.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<PendingJob>, ApiError>;

    async fn update_status(&self, job_id: &str, update: &StatusUpdate) -> Result<(), ApiError>;
}

/// Source of server-rendered documents
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_pdf(&self, pdf_url: &str) -> Result<Vec<u8>, ApiError>;
}

const MAX_ERROR_BODY: usize = 200;

/// Authenticated HTTP client for the print job API
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    credential: Credential,
    agent_id: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.backend_url).map_err(|e| ApiError::Request {
            url: config.backend_url.clone(),
            message: e.to_string(),
        })?;

        let http = Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(config.http_timeout)
            .user_agent(concat!("print-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Request {
                url: config.backend_url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url,
            credential: config.credential.clone(),
            agent_id: config.agent_id.clone(),
        })
    }

    /// Build `{base}/seg/seg/...` with each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Request {
                url: self.base_url.to_string(),
                message: "backend URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Resolve a document path against the backend base URL
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Same scheme, host and port as the backend
    fn is_backend(&self, url: &Url) -> bool {
        url.origin() == self.base_url.origin()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Credential::None => request,
            Credential::ApiKey(key) => request.header("X-API-Key", key),
            Credential::Bearer(token) => request.bearer_auth(token),
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(ApiError::Status {
            url: url.to_string(),
            status,
            body,
        })
    }
}

#[async_trait]
impl JobQueue for ApiClient {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<PendingJob>, ApiError> {
        let mut url = self.endpoint(&["api", "print", "jobs", "pending"])?;
        url.query_pairs_mut()
            .append_pair("agentId", &self.agent_id)
            .append_pair("limit", &limit.to_string());
        let url = url.to_string();

        let response = self
            .send(&url, self.authorize(self.http.get(&url)))
            .await?;
        let body = response
            .json::<PendingJobsResponse>()
            .await
            .map_err(|e| ApiError::Decode {
                url: url.clone(),
                message: e.to_string(),
            })?;

        debug!("Fetched {} pending jobs", body.data.len());
        Ok(body.data.into_iter().map(Job::from_value).collect())
    }

    async fn update_status(&self, job_id: &str, update: &StatusUpdate) -> Result<(), ApiError> {
        let url = self
            .endpoint(&["api", "print", "jobs", job_id, "status"])?
            .to_string();

        debug!("Reporting job {} as {:?}", job_id, update.status);
        self.send(&url, self.authorize(self.http.put(&url).json(update)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentSource for ApiClient {
    async fn fetch_pdf(&self, pdf_url: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.resolve(pdf_url);
        let parsed = Url::parse(&url).map_err(|e| ApiError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let request = self.http.get(parsed.clone());
        let request = if self.is_backend(&parsed) {
            self.authorize(request)
        } else {
            warn!("PDF URL {} is not on the backend, fetching without credentials", url);
            request
        };
        let response = self.send(&url, request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(&url, e))?;

        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}
