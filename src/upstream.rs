//! Response handling shared by the upstream REST clients.

use crate::error::ServerError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode a successful JSON response, or turn an error response into
/// [`ServerError::Upstream`] carrying the upstream status and message.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    service: &'static str,
    response: reqwest::Response,
) -> Result<T, ServerError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ServerError::from_reqwest(service, e))?;

    if !status.is_success() {
        return Err(ServerError::upstream(
            service,
            Some(status.as_u16()),
            error_message(&body).unwrap_or_else(|| format!("HTTP {status}")),
        ));
    }

    serde_json::from_str(&body).map_err(|e| {
        ServerError::upstream(service, None, format!("unexpected response body: {e}"))
    })
}

/// Extract the message from BigQuery (`{"error": {"message": ...}}`) and
/// Tavily (`{"detail": {"error": ...}}`) style error payloads.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;

    let message = match value.get("error") {
        Some(Value::Object(error)) => error.get("message").and_then(Value::as_str),
        Some(Value::String(error)) => Some(error.as_str()),
        _ => None,
    }
    .or_else(|| value.get("detail").and_then(Value::as_str))
    .or_else(|| {
        value
            .get("detail")
            .and_then(|detail| detail.get("error"))
            .and_then(Value::as_str)
    })
    .or_else(|| value.get("message").and_then(Value::as_str))?;

    Some(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error": {"code": 400, "message": "Syntax error"}}"#).as_deref(),
            Some("Syntax error")
        );
        assert_eq!(
            error_message(r#"{"error": "Unauthorized"}"#).as_deref(),
            Some("Unauthorized")
        );
        assert_eq!(
            error_message(r#"{"detail": {"error": "Invalid API key"}}"#).as_deref(),
            Some("Invalid API key")
        );
        assert_eq!(
            error_message(r#"{"detail": "bad key"}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(error_message("<html>502</html>"), None);
    }
}
