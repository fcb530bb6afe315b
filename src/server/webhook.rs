//! Webhook endpoint handler.
//!
//! Verifies the signature before touching the body, parses the event and
//! hands it to the sink. The response never waits for the event to be
//! handled; GitHub only needs to know the delivery arrived.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::webhooks::{ParseError, SignatureError, parse_webhook, verify_signature};

const HEADER_EVENT: &str = "x-github-event";
const HEADER_DELIVERY: &str = "x-github-delivery";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// `POST /webhook`.
///
/// Responds 202 for every authentic, well-formed delivery, including event
/// types the reconciler ignores.
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery_id = get_header(&headers, HEADER_DELIVERY)?;
    let signature = get_header(&headers, HEADER_SIGNATURE)?;

    if let Err(e) = verify_signature(&body, signature, app_state.webhook_secret()) {
        warn!(delivery_id, error = %e, "Rejected webhook");
        return Err(e.into());
    }

    let Some(event) = parse_webhook(event_type, &body)? else {
        debug!(delivery_id, event_type, "Ignoring unhandled event type");
        return Ok((StatusCode::ACCEPTED, "Ignored"));
    };

    info!(delivery_id, event_type, "Webhook accepted");
    app_state.sink().submit(event);
    Ok((StatusCode::ACCEPTED, "Accepted"))
}

fn get_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingHeader(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-GitHub-Event", "issues".parse().unwrap());

        assert_eq!(get_header(&headers, HEADER_EVENT).unwrap(), "issues");
        assert!(matches!(
            get_header(&headers, HEADER_DELIVERY),
            Err(WebhookError::MissingHeader(HEADER_DELIVERY))
        ));
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (WebhookError::MissingHeader(HEADER_SIGNATURE), StatusCode::BAD_REQUEST),
            (WebhookError::InvalidSignature(SignatureError::Mismatch), StatusCode::UNAUTHORIZED),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
