//! Snapshot fetching from Model Garden.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use utoipa::ToSchema;

use crate::config::UpstreamConfig;
use crate::types::EntityKind;

/// Raw entity records of every collection, keyed by upstream collection name.
///
/// Records stay loosely typed here; they are parsed into typed requests one at a time by
/// the reconciler so that one malformed record cannot fail the whole snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Snapshot {
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub projects: Vec<Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub use_cases: Vec<Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub budgets: Vec<Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub models: Vec<Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub model_deployments: Vec<Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub pricing: Vec<Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub use_case_llm_models: Vec<Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub limits: Vec<Value>,
}

impl Snapshot {
    pub fn collection(&self, kind: EntityKind) -> &[Value] {
        match kind {
            EntityKind::Project => &self.projects,
            EntityKind::UseCase => &self.use_cases,
            EntityKind::Budget => &self.budgets,
            EntityKind::Model => &self.models,
            EntityKind::Deployment => &self.model_deployments,
            EntityKind::Pricing => &self.pricing,
            EntityKind::Subscription => &self.use_case_llm_models,
            EntityKind::Limit => &self.limits,
        }
    }

    pub fn collection_mut(&mut self, kind: EntityKind) -> &mut Vec<Value> {
        match kind {
            EntityKind::Project => &mut self.projects,
            EntityKind::UseCase => &mut self.use_cases,
            EntityKind::Budget => &mut self.budgets,
            EntityKind::Model => &mut self.models,
            EntityKind::Deployment => &mut self.model_deployments,
            EntityKind::Pricing => &mut self.pricing,
            EntityKind::Subscription => &mut self.use_case_llm_models,
            EntityKind::Limit => &mut self.limits,
        }
    }

    /// Total number of records across all collections
    pub fn len(&self) -> usize {
        EntityKind::SYNC_ORDER.iter().map(|kind| self.collection(*kind).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Serialize)]
struct FetchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_since: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),

    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("error decoding upstream snapshot: {0}")]
    Decode(#[source] serde_json::Error),
}

impl FetchError {
    /// Connect/timeout failures, 5xx and 429 are worth retrying; everything else is final
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            FetchError::Status { status, .. } => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
            FetchError::Url(_) | FetchError::Decode(_) => false,
        }
    }
}

/// Source of entity snapshots. `since = None` asks for everything; otherwise only records
/// changed at or after `since`.
#[async_trait]
pub trait FetchSnapshot: Send + Sync {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Snapshot, FetchError>;

    /// Whether the source currently answers its health endpoint
    async fn health_check(&self) -> bool;
}

/// HTTP client for the Model Garden sync API
pub struct ModelGardenClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl ModelGardenClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("mgsync/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        ensure_slash(&self.base_url).join(path)
    }

    async fn fetch_once(&self, url: &Url, body: &FetchRequest) -> Result<Snapshot, FetchError> {
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(FetchError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        let body_text = response.text().await.map_err(FetchError::Transport)?;
        serde_json::from_str::<Snapshot>(&body_text).map_err(|e| {
            debug!("Snapshot response body was: {}", body_text);
            FetchError::Decode(e)
        })
    }

    /// Delay before retry number `attempt + 1`
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the
/// last path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", url.path());
        new_url.set_path(&path);
        new_url
    }
}

#[async_trait]
impl FetchSnapshot for ModelGardenClient {
    #[instrument(skip(self), err)]
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Snapshot, FetchError> {
        let url = self.endpoint("model-garden/sync/all")?;
        let body = FetchRequest { updated_since: since };

        let mut attempt = 0;
        loop {
            match self.fetch_once(&url, &body).await {
                Ok(snapshot) => {
                    info!(
                        projects = snapshot.projects.len(),
                        use_cases = snapshot.use_cases.len(),
                        budgets = snapshot.budgets.len(),
                        models = snapshot.models.len(),
                        deployments = snapshot.model_deployments.len(),
                        pricing = snapshot.pricing.len(),
                        subscriptions = snapshot.use_case_llm_models.len(),
                        limits = snapshot.limits.len(),
                        "Fetched snapshot from Model Garden"
                    );
                    return Ok(snapshot);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Snapshot fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(url = %url, attempts = attempt + 1, error = %e, "Snapshot fetch failed");
                    return Err(e);
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        let url = match self.endpoint("health") {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Invalid upstream health url");
                return false;
            }
        };
        let mut request = self.client.get(url);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "Upstream health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Upstream health check failed");
                false
            }
        }
    }
}

/// A fixed snapshot, used where no upstream is reachable (tests, local runs)
pub struct StaticSnapshot {
    snapshot: Snapshot,
}

impl StaticSnapshot {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl FetchSnapshot for StaticSnapshot {
    async fn fetch(&self, _since: Option<DateTime<Utc>>) -> Result<Snapshot, FetchError> {
        debug!("Returning static snapshot with {} records", self.snapshot.len());
        Ok(self.snapshot.clone())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    fn client_for(server: &MockServer, max_retries: u32) -> ModelGardenClient {
        install_crypto_provider();
        let config = UpstreamConfig {
            base_url: format!("{}/api", server.uri()).parse().unwrap(),
            api_key: Some("secret".to_string()),
            timeout: Duration::from_secs(5),
            max_retries,
            retry_base_delay: Duration::from_millis(1),
        };
        ModelGardenClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_full_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/model-garden/sync/all"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [{"project_name": "Alpha", "project_code": "PRJ-1"}],
                "use_case_llm_models": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = client_for(&server, 0).fetch(None).await.unwrap();
        assert_eq!(snapshot.projects.len(), 1);
        assert!(snapshot.models.is_empty());
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_sends_updated_since() {
        let server = MockServer::start().await;
        let since: DateTime<Utc> = "2025-07-01T00:00:00Z".parse().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/model-garden/sync/all"))
            .and(body_json(json!({"updated_since": "2025-07-01T00:00:00Z"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = client_for(&server, 0).fetch(Some(since)).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server, 2).fetch(None).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": [{"model_name": "m"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = client_for(&server, 3).fetch(None).await.unwrap();
        assert_eq!(snapshot.models.len(), 1);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, 3).fetch(None).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bad token"));
    }

    #[tokio::test]
    async fn test_undecodable_body_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, 3).fetch(None).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(client_for(&server, 0).health_check().await);

        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&down)
            .await;
        assert!(!client_for(&down, 0).health_check().await);
    }

    #[test]
    fn test_backoff_doubles() {
        install_crypto_provider();
        let config = UpstreamConfig {
            base_url: "http://localhost".parse().unwrap(),
            api_key: None,
            timeout: Duration::from_secs(1),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        };
        let client = ModelGardenClient::new(&config).unwrap();
        assert_eq!(client.backoff(0), Duration::from_secs(1));
        assert_eq!(client.backoff(1), Duration::from_secs(2));
        assert_eq!(client.backoff(2), Duration::from_secs(4));
    }
}
