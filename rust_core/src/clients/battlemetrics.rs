//! BattleMetrics implementation of `TrackingApi`
//!
//! Player status comes from `/players/{id}?include=server`, session history
//! from the paginated `/sessions` endpoint. All requests go through the
//! circuit breaker and the retry policy.

use crate::circuit_breaker::{ApiCircuitBreaker, ApiCircuitBreakerConfig, CircuitState};
use crate::clients::retry::{execute_with_retry, RetryPolicy};
use crate::error::{Result, TrackerError};
use crate::models::Snapshot;
use crate::providers::{SessionRecord, TrackingApi};
use crate::watchlist::validate_entity_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.battlemetrics.com";

#[derive(Debug, Clone)]
pub struct BattleMetricsConfig {
    pub base_url: String,
    /// Optional API token, sent with session queries
    pub access_token: Option<String>,
    pub page_size: u32,
    /// Upper bound on pages followed per session query
    pub max_pages: u32,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub circuit_breaker: ApiCircuitBreakerConfig,
}

impl Default for BattleMetricsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            page_size: 90,
            max_pages: 50,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            circuit_breaker: ApiCircuitBreakerConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct BattleMetricsClient {
    client: Client,
    config: Arc<BattleMetricsConfig>,
    circuit_breaker: Arc<ApiCircuitBreaker>,
}

impl std::fmt::Debug for BattleMetricsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BattleMetricsClient")
            .field("base_url", &self.config.base_url)
            .field("authenticated", &self.config.access_token.is_some())
            .field("circuit_breaker_state", &self.circuit_breaker.state())
            .finish()
    }
}

/// One page of `/sessions` results.
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub records: Vec<SessionRecord>,
    pub next: Option<String>,
}

impl BattleMetricsClient {
    pub fn new(config: BattleMetricsConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(config.request_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            circuit_breaker: Arc::new(ApiCircuitBreaker::new(
                "battlemetrics",
                config.circuit_breaker.clone(),
            )),
            config: Arc::new(config),
        }
    }

    /// Check if the API is available (circuit breaker is not open)
    pub fn is_available(&self) -> bool {
        self.circuit_breaker.is_available()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    async fn get_json(&self, url: &str, entity_id: &str) -> Result<Value> {
        if !self.circuit_breaker.is_available() {
            return Err(TrackerError::Upstream(format!(
                "BattleMetrics circuit breaker is open (entity={})",
                entity_id
            )));
        }

        let label = redact_token(url);
        let result = execute_with_retry(&self.config.retry, &label, move || {
            self.fetch_json_once(url, entity_id)
        })
        .await;

        // An unknown id still means the API answered
        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(e) if e.is_not_found() || is_unauthorized(e) => {
                self.circuit_breaker.record_success()
            }
            Err(_) => self.circuit_breaker.record_failure(),
        }

        result
    }

    async fn fetch_json_once(&self, url: &str, entity_id: &str) -> Result<Value> {
        debug!("Requesting {}", redact_token(url));
        let resp = self.client.get(url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(TrackerError::NotFound(entity_id.to_string()));
        }

        let resp = resp.error_for_status()?;
        Ok(resp.json::<Value>().await?)
    }

    fn sessions_url(&self, entity_id: &str, with_token: bool) -> Result<String> {
        let page_size = self.config.page_size.to_string();
        let mut params = vec![
            ("include", "server"),
            ("page[size]", page_size.as_str()),
            ("filter[players]", entity_id),
        ];
        if let (true, Some(token)) = (with_token, self.config.access_token.as_deref()) {
            params.push(("access_token", token));
        }

        let url = Url::parse_with_params(&format!("{}/sessions", self.base_url()), &params)
            .map_err(|e| TrackerError::Configuration(format!("invalid API base url: {}", e)))?;
        Ok(url.to_string())
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn player_url(&self, entity_id: &str) -> Result<String> {
        let mut url = Url::parse(self.base_url())
            .map_err(|e| TrackerError::Configuration(format!("invalid API base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                TrackerError::Configuration("API base url cannot take a path".to_string())
            })?
            .pop_if_empty()
            .push("players")
            .push(entity_id);
        url.set_query(Some("include=server"));
        Ok(url.to_string())
    }

    /// Follow `links.next` until the pages run out, the page cap is hit, or a
    /// page holds only sessions that stopped before `since`. Sessions come
    /// back newest first.
    async fn fetch_session_pages(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
        with_token: bool,
    ) -> Result<Vec<SessionRecord>> {
        let mut records = Vec::new();
        let mut next = Some(self.sessions_url(entity_id, with_token)?);
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= self.config.max_pages {
                warn!(
                    "Stopping session fetch for {} after {} pages",
                    entity_id, pages
                );
                break;
            }
            pages += 1;

            let body = self.get_json(&url, entity_id).await?;
            let page = parse_session_page(&body)?;
            let token = self.config.access_token.as_deref().filter(|_| with_token);
            next = next_page_url(page.next, &page.records, since, token);
            records.extend(page.records);
        }

        debug!(
            "Fetched {} session records for {} ({} pages)",
            records.len(),
            entity_id,
            pages
        );
        Ok(records)
    }
}

#[async_trait]
impl TrackingApi for BattleMetricsClient {
    async fn get_status(&self, entity_id: &str) -> Result<Snapshot> {
        validate_entity_id(entity_id).map_err(|_| {
            TrackerError::InvalidRequest(format!("invalid player id {:?}", entity_id))
        })?;
        let url = self.player_url(entity_id)?;
        let body = self.get_json(&url, entity_id).await?;
        parse_player_status(entity_id, &body, Utc::now())
    }

    async fn get_sessions(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>> {
        let with_token = self.config.access_token.is_some();
        match self.fetch_session_pages(entity_id, since, with_token).await {
            Err(e) if with_token && is_unauthorized(&e) => {
                warn!(
                    "Access token rejected for {}, retrying sessions without it",
                    entity_id
                );
                self.fetch_session_pages(entity_id, since, false).await
            }
            other => other,
        }
    }

    fn provider_name(&self) -> &str {
        "battlemetrics"
    }
}

/// Where paging goes after one page: nowhere once every session on the page
/// stopped before `since`, otherwise the page's `links.next`. BattleMetrics
/// drops the token from pagination links, so it is appended again.
fn next_page_url(
    next: Option<String>,
    records: &[SessionRecord],
    since: DateTime<Utc>,
    token: Option<&str>,
) -> Option<String> {
    let exhausted = !records.is_empty()
        && records
            .iter()
            .all(|r| r.stop.map_or(false, |stop| stop < since));
    if exhausted {
        return None;
    }

    match (next, token) {
        (Some(link), Some(token)) if !link.contains("access_token=") => {
            let sep = if link.contains('?') { '&' } else { '?' };
            Some(format!("{}{}access_token={}", link, sep, token))
        }
        (link, _) => link,
    }
}

fn is_unauthorized(e: &TrackerError) -> bool {
    matches!(e, TrackerError::Http(err) if err.status() == Some(StatusCode::UNAUTHORIZED))
}

fn redact_token(url: &str) -> String {
    match url.find("access_token=") {
        Some(idx) => format!("{}access_token=<redacted>", &url[..idx]),
        None => url.to_string(),
    }
}

fn parse_timestamp(value: &Value, field: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| TrackerError::Upstream(format!("bad {} timestamp {:?}: {}", field, s, e))),
        other => Err(TrackerError::Upstream(format!(
            "bad {} timestamp: {}",
            field, other
        ))),
    }
}

/// Build a snapshot from a `/players/{id}?include=server` response.
///
/// The player is online when any included server reports `meta.online`.
/// If several do, the one seen most recently wins.
pub fn parse_player_status(
    entity_id: &str,
    body: &Value,
    observed_at: DateTime<Utc>,
) -> Result<Snapshot> {
    if !body["data"].is_object() {
        return Err(TrackerError::Upstream(format!(
            "player payload for {} has no data object",
            entity_id
        )));
    }

    let mut current: Option<(String, Option<DateTime<Utc>>)> = None;

    if let Some(included) = body["included"].as_array() {
        for item in included {
            if item["type"].as_str().map_or(false, |t| t != "server") {
                continue;
            }
            if !item["meta"]["online"].as_bool().unwrap_or(false) {
                continue;
            }
            let Some(server_id) = item["id"].as_str() else {
                continue;
            };
            let last_seen = parse_timestamp(&item["meta"]["lastSeen"], "lastSeen")
                .ok()
                .flatten();

            let newer = match &current {
                None => true,
                Some((_, seen)) => last_seen > *seen,
            };
            if newer {
                current = Some((server_id.to_string(), last_seen));
            }
        }
    }

    Ok(match current {
        Some((server_id, _)) => Snapshot::online(entity_id, server_id, observed_at),
        None => Snapshot::offline(entity_id, observed_at),
    })
}

/// Parse one page of a `/sessions?include=server` response.
pub fn parse_session_page(body: &Value) -> Result<SessionPage> {
    let data = body["data"]
        .as_array()
        .ok_or_else(|| TrackerError::Upstream("session payload has no data array".to_string()))?;

    let mut records = Vec::with_capacity(data.len());
    for session in data {
        let attributes = &session["attributes"];
        let start = parse_timestamp(&attributes["start"], "start")?.ok_or_else(|| {
            TrackerError::Upstream(format!("session {} has no start", session["id"]))
        })?;
        let stop = parse_timestamp(&attributes["stop"], "stop")?;
        let server_id = session["relationships"]["server"]["data"]["id"]
            .as_str()
            .ok_or_else(|| {
                TrackerError::Upstream(format!("session {} has no server", session["id"]))
            })?
            .to_string();

        records.push(SessionRecord {
            server_id,
            start,
            stop,
        });
    }

    let next = body["links"]["next"].as_str().map(str::to_string);
    Ok(SessionPage { records, next })
}
