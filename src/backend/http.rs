//! reqwest-backed client for the panel REST API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::envelope::{normalize_bulk, normalize_item, normalize_list};
use super::sanitize_api_error;
use super::traits::{
    BackendError, BulkOutcome, BulkVerb, EntityAction, ListFilter, ReachabilityProbe,
    ResourceClient,
};
use crate::config::BackendConfig;
use crate::entity::{Entity, EntityKind};

/// Client for the panel control plane. Every request carries the bearer token and the
/// configured forwarded headers, and is bounded by the request timeout.
pub struct HttpResourceClient {
    base_url: Url,
    headers: HeaderMap,
    probe_paths: Vec<String>,
    probe_timeout: Duration,
    client: Client,
}

impl HttpResourceClient {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let token = config
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .context("backend.api_token is required")?;

        let base_url = Url::parse(config.base_url.trim())
            .with_context(|| format!("invalid backend.base_url: {}", config.base_url))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            bail!("backend.base_url must be an absolute http(s) URL");
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("backend.api_token contains characters not allowed in a header")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        for (name, value) in &config.forwarded_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid forwarded header name: {name}"))?;
            let header_value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for forwarded header {name}"))?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("failed to build backend HTTP client")?;

        Ok(Self {
            base_url,
            headers,
            probe_paths: config.probe_paths.clone(),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            client,
        })
    }

    /// `<base>/api/<plural>/<segments...>`. Each segment is percent-encoded on its own,
    /// so an id can never leave its collection.
    fn endpoint(&self, kind: EntityKind, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("api")
                .push(kind.plural())
                .extend(segments);
        }
        url
    }

    fn item_endpoint(&self, kind: EntityKind, id: &str, tail: &[&str]) -> Result<Url, BackendError> {
        if matches!(id.trim(), "" | "." | "..") {
            return Err(BackendError::Rejected(format!("invalid {kind} id: {id:?}")));
        }
        let mut segments = Vec::with_capacity(tail.len() + 1);
        segments.push(id);
        segments.extend_from_slice(tail);
        Ok(self.endpoint(kind, &segments))
    }

    /// Probe paths come from config and are joined verbatim under the base URL.
    fn probe_url(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn request(&self, method: Method, url: impl reqwest::IntoUrl) -> RequestBuilder {
        self.client
            .request(method, url)
            .headers(self.headers.clone())
    }

    /// Send a request and decode its JSON body, mapping failures onto `BackendError`.
    /// `target` is the entity a 404 refers to, if any.
    async fn execute(
        &self,
        builder: RequestBuilder,
        target: Option<(EntityKind, &str)>,
    ) -> Result<Value, BackendError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await.map_err(transport_error)?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| BackendError::Protocol(format!("invalid JSON body: {e}")));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read backend error body>".to_string());
        let sanitized = sanitize_api_error(&body);
        tracing::warn!(status = %status, body = %sanitized, "backend request failed");

        Err(match (status, target) {
            (StatusCode::NOT_FOUND, Some((kind, id))) => BackendError::NotFound {
                kind,
                id: id.to_string(),
            },
            (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::CONFLICT, _) => {
                BackendError::Rejected(sanitized)
            }
            _ => BackendError::Unavailable(format!("HTTP {status}")),
        })
    }

    async fn fetch_entity(
        &self,
        builder: RequestBuilder,
        kind: EntityKind,
        id: Option<&str>,
    ) -> Result<Entity, BackendError> {
        let body = self.execute(builder, id.map(|id| (kind, id))).await?;
        normalize_item(kind, &body).ok_or_else(|| {
            BackendError::Protocol(format!("response did not contain a {kind}"))
        })
    }

    async fn bulk_per_entity(
        &self,
        kind: EntityKind,
        verb: BulkVerb,
        ids: &[String],
    ) -> Result<BulkOutcome, BackendError> {
        let mut affected = 0usize;
        let mut failures = Vec::new();

        for id in ids {
            let result = match verb {
                BulkVerb::Enable => self.set_enabled(kind, id, true).await.map(|_| ()),
                BulkVerb::Disable => self.set_enabled(kind, id, false).await.map(|_| ()),
                BulkVerb::Delete => self.delete(kind, id).await,
                BulkVerb::ResetTraffic => self
                    .invoke(kind, id, EntityAction::ResetTraffic)
                    .await
                    .map(|_| ()),
                BulkVerb::ExtendExpiry { .. } => Err(BackendError::Rejected(format!(
                    "{kind} entities have no expiry"
                ))),
            };
            match result {
                Ok(()) => affected += 1,
                // Nothing below this point can succeed either.
                Err(err) if err.is_unavailable() && affected == 0 && failures.is_empty() => {
                    return Err(err)
                }
                Err(err) => {
                    tracing::warn!(kind = %kind, id = %id, error = %err, "bulk item failed");
                    failures.push(id.clone());
                }
            }
        }

        Ok(BulkOutcome {
            requested: ids.len(),
            affected: Some(affected),
            detail: (!failures.is_empty()).then(|| format!("{} failed", failures.len())),
        })
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Unavailable(sanitize_api_error(&err.to_string()))
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn list(&self, kind: EntityKind, filter: &ListFilter) -> Result<Vec<Entity>, BackendError> {
        let mut builder = self.request(Method::GET, self.endpoint(kind, &[]));
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            builder = builder.query(&[("search", search.trim())]);
        }
        let body = self.execute(builder, None).await?;
        Ok(normalize_list(kind, &body))
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Entity, BackendError> {
        let builder = self.request(Method::GET, self.item_endpoint(kind, id, &[])?);
        self.fetch_entity(builder, kind, Some(id)).await
    }

    async fn create(&self, kind: EntityKind, payload: Map<String, Value>) -> Result<Entity, BackendError> {
        let builder = self
            .request(Method::POST, self.endpoint(kind, &[]))
            .json(&payload);
        self.fetch_entity(builder, kind, None).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Entity, BackendError> {
        let builder = self
            .request(Method::PATCH, self.item_endpoint(kind, id, &[])?)
            .json(&patch);
        self.fetch_entity(builder, kind, Some(id)).await
    }

    async fn set_enabled(&self, kind: EntityKind, id: &str, enabled: bool) -> Result<Entity, BackendError> {
        let verb = if enabled { "enable" } else { "disable" };
        let url = self.item_endpoint(kind, id, &["actions", verb])?;
        let builder = self.request(Method::POST, url);
        self.fetch_entity(builder, kind, Some(id)).await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), BackendError> {
        let builder = self.request(Method::DELETE, self.item_endpoint(kind, id, &[])?);
        self.execute(builder, Some((kind, id))).await.map(|_| ())
    }

    async fn invoke(
        &self,
        kind: EntityKind,
        id: &str,
        action: EntityAction,
    ) -> Result<Option<Entity>, BackendError> {
        let url = self.item_endpoint(kind, id, &["actions", action.path_segment()])?;
        let body = self
            .execute(self.request(Method::POST, url), Some((kind, id)))
            .await?;
        Ok(if body.is_null() {
            None
        } else {
            normalize_item(kind, &body)
        })
    }

    async fn bulk(&self, kind: EntityKind, verb: BulkVerb, ids: &[String]) -> Result<BulkOutcome, BackendError> {
        if ids.is_empty() {
            return Ok(BulkOutcome {
                requested: 0,
                affected: Some(0),
                detail: None,
            });
        }
        if !kind.supports_batch() {
            return self.bulk_per_entity(kind, verb, ids).await;
        }

        let mut body = json!({ "uuids": ids });
        if let BulkVerb::ExtendExpiry { days } = verb {
            body["days"] = Value::from(days);
        }
        let url = self.endpoint(kind, &["bulk", verb.as_str()]);
        let response = self
            .execute(self.request(Method::POST, url).json(&body), None)
            .await?;
        Ok(normalize_bulk(&response, ids.len()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

impl HttpResourceClient {
    pub fn probe_paths(&self) -> &[String] {
        &self.probe_paths
    }

    /// Probe a single path with the short probe timeout.
    pub async fn probe_path(&self, path: &str) -> Result<(), BackendError> {
        let response = self
            .request(Method::GET, self.probe_url(path))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!("HTTP {}", response.status())))
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpResourceClient {
    /// Try each probe path in order; the first 2xx wins.
    async fn probe(&self) -> Result<(), BackendError> {
        let mut last_error = BackendError::Unavailable("no probe paths configured".into());
        for path in &self.probe_paths {
            match self.probe_path(path).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::debug!(path = %path, error = %err, "probe path failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}
