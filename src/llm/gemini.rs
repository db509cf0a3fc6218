//! Gemini `generateContent` transport over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};

use crate::commit::prompt::PromptSpec;
use crate::config::Credentials;
use crate::error::{GenerationError, GenerationErrorKind};

use super::client::Transport;

const API_KEY_HEADER: &str = "x-goog-api-key";
const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";
const API_KEY_INVALID_REASON: &str = "API_KEY_INVALID";

/// Longest error text carried into a [`GenerationError`].
const MAX_ERROR_MESSAGE_CHARS: usize = 300;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<ResponseCandidate>>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(rename = "@type", default)]
    type_url: String,
    retry_delay: Option<String>,
    reason: Option<String>,
}

/// Production [`Transport`] talking to the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl GeminiTransport {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn call(
        &self,
        prompt: &PromptSpec,
        credentials: &Credentials,
    ) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: &prompt.text }],
            }],
        };

        let response = self
            .http
            .post(self.url())
            .header(API_KEY_HEADER, credentials.api_key())
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(classify_transport_error)?;

        if status.is_success() {
            extract_text(&body)
        } else {
            Err(classify(status, retry_after, &body))
        }
    }
}

/// Pull the generated text out of a successful response body.
///
/// Bodies that are not a JSON object are returned as-is. An error envelope
/// is classified like a failed response, and any other object without
/// `candidates` or `promptFeedback` is rejected.
fn extract_text(body: &str) -> Result<String, GenerationError> {
    let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str(body) else {
        return Ok(body.to_string());
    };

    if serde_json::from_value::<ErrorEnvelope>(value.clone()).is_ok() {
        return Err(classify(StatusCode::OK, None, body));
    }

    let response = match serde_json::from_value::<GenerateResponse>(value) {
        Ok(r) if r.candidates.is_some() || r.prompt_feedback.is_some() => r,
        _ => {
            return Err(GenerationError::new(
                GenerationErrorKind::Unknown,
                format!("Unexpected response from the model: {}", clip(body.trim())),
            ));
        }
    };

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::new(
            GenerationErrorKind::RequestRejected,
            format!("Prompt blocked by the model ({reason})"),
        ));
    }

    let Some(candidate) = response.candidates.into_iter().flatten().next() else {
        return Ok(String::new());
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() && candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(GenerationError::new(
            GenerationErrorKind::RequestRejected,
            "Response withheld by the model's safety filter",
        ));
    }

    Ok(text)
}

/// Map a non-success HTTP response to a [`GenerationError`].
fn classify(status: StatusCode, retry_after: Option<Duration>, body: &str) -> GenerationError {
    let api_error = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);

    let code = api_error
        .as_ref()
        .and_then(|e| e.code)
        .unwrap_or(status.as_u16());
    let api_status = api_error.as_ref().map_or("", |e| e.status.as_str());
    let message = match &api_error {
        Some(e) if !e.message.is_empty() => e.message.clone(),
        _ if body.trim().is_empty() => format!("HTTP {status}"),
        _ => body.trim().to_string(),
    };
    let details = api_error.as_ref().map_or(&[][..], |e| e.details.as_slice());

    let retry_hint = retry_after.or_else(|| {
        details
            .iter()
            .filter(|d| d.type_url == RETRY_INFO_TYPE)
            .find_map(|d| d.retry_delay.as_deref().and_then(parse_retry_delay))
    });
    let key_invalid = details
        .iter()
        .any(|d| d.reason.as_deref() == Some(API_KEY_INVALID_REASON))
        || message.to_lowercase().contains("api key not valid");

    let kind = match (code, api_status) {
        (401 | 403, _) | (_, "UNAUTHENTICATED" | "PERMISSION_DENIED") => {
            GenerationErrorKind::InvalidCredentials
        }
        _ if key_invalid => GenerationErrorKind::InvalidCredentials,
        (429, _) | (_, "RESOURCE_EXHAUSTED") => {
            if retry_hint.is_none() && message.to_lowercase().contains("quota") {
                GenerationErrorKind::QuotaExhausted
            } else {
                GenerationErrorKind::RateLimited
            }
        }
        (408, _) => GenerationErrorKind::Timeout,
        (400 | 413, _) | (_, "INVALID_ARGUMENT" | "FAILED_PRECONDITION") => {
            GenerationErrorKind::RequestRejected
        }
        (500..=599, _) => GenerationErrorKind::ServerError,
        _ => GenerationErrorKind::Unknown,
    };

    let retry_after = if kind.is_retryable() { retry_hint } else { None };
    GenerationError::new(kind, clip(&message)).with_retry_after(retry_after)
}

fn classify_transport_error(err: reqwest::Error) -> GenerationError {
    let kind = if err.is_timeout() {
        GenerationErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        GenerationErrorKind::ServerError
    } else {
        GenerationErrorKind::Unknown
    };
    GenerationError::new(kind, err.to_string())
}

/// `Retry-After` in delta-seconds. HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// `RetryInfo.retryDelay`, a protobuf duration such as `"30s"` or `"1.5s"`.
fn parse_retry_delay(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn clip(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return message.to_string();
    }
    let clipped: String = message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
    format!("{clipped}...")
}
