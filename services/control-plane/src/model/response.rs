//! Uniform response envelope.

use serde::{Deserialize, Serialize};

/// Outcome classification carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Ok,
    InvalidRequest,
    AuthFailed,
    Error,
    Warning,
}

/// Envelope returned by every control-plane operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    pub code: ResponseCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T> Response<T> {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            result: None,
        }
    }

    pub fn ok(result: T) -> Self {
        Self {
            code: ResponseCode::Ok,
            message: None,
            result: Some(result),
        }
    }

    pub fn ok_message(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::Ok, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::InvalidRequest, message)
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::AuthFailed, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::Warning, message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_result(mut self, result: T) -> Self {
        self.result = Some(result);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_json() {
        let response = Response::ok(3u32).with_message("3 new tasks pending");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["code"], "OK");
        assert_eq!(json["result"], 3);

        let ack: Response<()> = Response::invalid_request("bad");
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["code"], "INVALID_REQUEST");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_missing_result_deserializes() {
        let response: Response<u32> =
            serde_json::from_str(r#"{"code":"WARNING","message":"partial"}"#).unwrap();
        assert_eq!(response.code, ResponseCode::Warning);
        assert_eq!(response.result, None);
        assert_eq!(response.message(), "partial");
    }
}
