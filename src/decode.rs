use reqwest::{header, StatusCode};
use serde_json::Value as JsonValue;

use crate::{
    attempt::AttemptFailure,
    transport::TransportResponse,
    Payload, RequestError,
};

/// Reads and decodes a transport response.
///
/// `204 No Content` short-circuits before the body is read. Body read
/// failures are transport failures, not decode failures.
pub(crate) async fn decode_response<R: TransportResponse>(
    response: R,
) -> Result<Payload, AttemptFailure> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(Payload::Empty);
    }

    let content_type = response
        .header(header::CONTENT_TYPE.as_str())
        .map(str::to_owned);
    let body = response.text().await?;

    Ok(decode_text(status, content_type.as_deref(), &body)?)
}

/// Decodes a captured response into a payload or a classified error.
///
/// Pure: the same inputs always give the same result.
///
/// - `204` or an empty body gives [`Payload::Empty`] without parsing.
/// - A JSON content type is parsed; failure gives [`RequestError::Decode`].
/// - Any other content type gives the body verbatim as [`Payload::Text`].
/// - A non-2xx status wraps the decoded body in [`RequestError::Http`].
pub fn decode_text(
    status: StatusCode,
    content_type: Option<&str>,
    body: &str,
) -> Result<Payload, RequestError> {
    let payload = if status == StatusCode::NO_CONTENT {
        Payload::Empty
    } else {
        decode_body(content_type, body)?
    };

    if status.is_success() {
        Ok(payload)
    } else {
        Err(http_error(status, payload))
    }
}

/// Returns `true` for `application/json` and `+json` media types.
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

fn decode_body(content_type: Option<&str>, body: &str) -> Result<Payload, RequestError> {
    if body.is_empty() {
        return Ok(Payload::Empty);
    }

    if content_type.is_some_and(is_json_content_type) {
        return serde_json::from_str::<JsonValue>(body)
            .map(Payload::Json)
            .map_err(|_err| {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_err, body_len = body.len(), "response body is not valid JSON");
                RequestError::Decode
            });
    }

    Ok(Payload::Text(body.to_owned()))
}

fn http_error(status: StatusCode, body: Payload) -> RequestError {
    let message = error_message(&body)
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
    RequestError::Http {
        status: status.as_u16(),
        message,
        body,
    }
}

/// Prefers a non-blank string body, then a JSON `message` field.
fn error_message(body: &Payload) -> Option<String> {
    match body {
        Payload::Text(text) | Payload::Json(JsonValue::String(text)) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Payload::Json(JsonValue::Object(map)) => map
            .get("message")
            .and_then(JsonValue::as_str)
            .filter(|message| !message.trim().is_empty())
            .map(str::to_owned),
        _ => None,
    }
}
