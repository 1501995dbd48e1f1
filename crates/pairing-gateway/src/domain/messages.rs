//! JSON bodies and fixed strings of the HTTP surface.
//!
//! Successful requests return the zip archive itself; every other outcome
//! returns an [`ApiResponse`]:
//!
//! ```json
//! {"success":false,"message":"Method not allowed, use GET"}
//! ```

use serde::{Deserialize, Serialize};

/// Returned with 400 when the `phone` parameter is missing.
pub const MISSING_PHONE_MESSAGE: &str = "Nomor telepon diperlukan. Gunakan format: ?phone=62...";

/// Returned with 405 for any method other than GET/HEAD.
pub const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed, use GET";

/// File name offered in `Content-Disposition`.
pub const ARCHIVE_FILE_NAME: &str = "sessions.zip";

/// `Content-Type` of a successful response.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_serializes_success_false() {
        let body = serde_json::to_value(ApiResponse::failure("nope")).unwrap();
        assert_eq!(body, json!({"success": false, "message": "nope"}));
    }

    #[test]
    fn test_missing_phone_message_mentions_query_format() {
        assert!(MISSING_PHONE_MESSAGE.contains("?phone=62"));
    }
}
