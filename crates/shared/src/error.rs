use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            400 | 422 => Self::Validation,
            429 => Self::RateLimited,
            _ => Self::Internal,
        }
    }
}

/// Error body returned by the hosted backend.
///
/// The auth API reports `error_description`/`msg`, the data API reports
/// `message`; whichever is present becomes [`ApiError::message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_response_body(status: u16, body: &str) -> Self {
        let raw = serde_json::from_str::<RawErrorBody>(body).unwrap_or_default();
        let message = raw
            .message
            .or(raw.msg)
            .or(raw.error_description)
            .or(raw.error)
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    format!("http status {status}")
                } else {
                    trimmed.to_string()
                }
            });
        Self::new(ErrorCode::from_status(status), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_api_message_is_preferred() {
        let err = ApiError::from_response_body(
            403,
            r#"{"code":"42501","message":"new row violates row-level security policy"}"#,
        );
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert_eq!(err.message, "new row violates row-level security policy");
    }

    #[test]
    fn auth_api_description_is_used() {
        let err = ApiError::from_response_body(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#,
        );
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "Invalid Refresh Token");
    }

    #[test]
    fn non_json_body_falls_back_to_text_or_status() {
        assert_eq!(ApiError::from_response_body(502, "bad gateway").message, "bad gateway");
        assert_eq!(ApiError::from_response_body(500, "  ").message, "http status 500");
    }
}
