//! Remote persistence service client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::due::DueCards;
use crate::error::RemoteError;
use crate::models::{CardResult, ChangeOperation, PendingChange, SessionId, StudySessionSummary};
use crate::util::{compact_text, is_http_url, normalize_text_option};
use crate::{Error, Result};

/// Body of `POST /v1/sessions/sync`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSyncPayload {
    pub session_id: SessionId,
    pub set_id: String,
    pub results: Vec<CardResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<StudySessionSummary>,
}

/// Server-side persistence the sync orchestrator reconciles against.
///
/// Both operations must be idempotent: the same session or change may be
/// delivered more than once.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Upsert a session and replace its results
    async fn sync_session(&self, payload: &SessionSyncPayload) -> std::result::Result<(), RemoteError>;

    /// Apply one queued entity mutation
    async fn apply_change(&self, change: &PendingChange) -> std::result::Result<(), RemoteError>;
}

/// `RemoteService` over HTTP + JSON.
#[derive(Clone)]
pub struct HttpRemoteService {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl fmt::Debug for HttpRemoteService {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpRemoteService")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteService {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::rejected(0, format!("cannot build URL from {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
    ) -> std::result::Result<(), RemoteError> {
        let mut request = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|error| RemoteError::transient(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    /// Fetch the due-card view the server aggregates for `profile_id`
    pub async fn due_cards(
        &self,
        profile_id: &str,
        tz_offset_minutes: i32,
    ) -> std::result::Result<DueCards, RemoteError> {
        let mut url = self.endpoint(&["v1", "profiles", profile_id, "due"])?;
        url.query_pairs_mut()
            .append_pair("tz_offset_minutes", &tz_offset_minutes.to_string());

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| RemoteError::transient(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        response
            .json::<DueCards>()
            .await
            .map_err(|error| RemoteError::rejected(status.as_u16(), format!("malformed due view: {error}")))
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn sync_session(&self, payload: &SessionSyncPayload) -> std::result::Result<(), RemoteError> {
        let url = self.endpoint(&["v1", "sessions", "sync"])?;
        let body = serde_json::to_value(payload)
            .map_err(|error| RemoteError::rejected(0, format!("unserializable session: {error}")))?;
        self.send(Method::POST, url, Some(&body)).await
    }

    async fn apply_change(&self, change: &PendingChange) -> std::result::Result<(), RemoteError> {
        let url = self.endpoint(&["v1", change.entity.resource(), change.entity_id.as_str()])?;
        match change.operation {
            ChangeOperation::Create => self.send(Method::POST, url, Some(&change.payload)).await,
            ChangeOperation::Update => self.send(Method::PATCH, url, Some(&change.payload)).await,
            ChangeOperation::Delete => self.send(Method::DELETE, url, None).await,
        }
    }
}

/// Map a non-success response onto the retry policy.
///
/// Server errors, timeouts and throttling may clear up; any other client
/// error means the payload itself was refused.
pub fn classify_failure(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::rejected(status.as_u16(), message)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<Url> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("endpoint must not be empty".to_string()))?;
    if !is_http_url(&endpoint) {
        return Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ));
    }
    Url::parse(endpoint.trim_end_matches('/'))
        .map_err(|error| Error::InvalidInput(format!("invalid endpoint '{endpoint}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use serde_json::json;

    fn service(base: &str) -> HttpRemoteService {
        HttpRemoteService::new(base, Some("secret".to_string()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert!(normalize_endpoint("https://api.example.com/".to_string()).is_ok());
    }

    #[test]
    fn server_errors_and_throttling_are_transient() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(classify_failure(status, "").is_retryable(), "{status}");
        }
    }

    #[test]
    fn client_errors_are_rejections() {
        let error = classify_failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error": "results must not be empty"}"#,
        );
        assert_eq!(
            error,
            RemoteError::rejected(422, "results must not be empty (422)")
        );
    }

    #[test]
    fn parse_api_error_falls_back_to_body_or_status() {
        assert_eq!(parse_api_error(StatusCode::BAD_REQUEST, ""), "HTTP 400");
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, "plain text"),
            "plain text (400)"
        );
    }

    #[test]
    fn endpoint_escapes_entity_ids() {
        let remote = service("https://api.example.com/base/");
        let url = remote.endpoint(&["v1", "cards", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/base/v1/cards/a%20b%2Fc");
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", service("https://api.example.com"));
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn session_payload_uses_camel_case() {
        let session_id = SessionId::new();
        let payload = SessionSyncPayload {
            session_id,
            set_id: "set-1".to_string(),
            results: vec![CardResult::new(session_id, "card-1", true, 2.0, None).unwrap()],
            summary: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["setId"], "set-1");
        assert_eq!(value["results"][0]["cardId"], "card-1");
        assert!(value.get("summary").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_service_is_transient() {
        let remote = HttpRemoteService::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let change = PendingChange::new(
            ChangeOperation::Create,
            EntityKind::Folder,
            "folder-1",
            json!({"name": "Languages"}),
        );
        let error = remote.apply_change(&change).await.unwrap_err();
        assert!(error.is_retryable());
    }
}
