//! Error bodies returned by the namespace proxy
//!
//! The proxy answers failed calls with a JSON body in this shape. The client
//! folds it into the matching [`AppError`] variant so orchestrators see the
//! same taxonomy whatever collaborator failed.

use serde::Deserialize;
use strata_core::AppError;

/// Standard error body of the namespace proxy API
#[derive(Debug, Default, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

impl ErrorResponse {
    /// Parse an error body; anything that is not the JSON shape becomes the message.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| ErrorResponse {
            error: body.trim().to_string(),
            ..Default::default()
        })
    }

    pub fn message(&self) -> String {
        match &self.details {
            Some(details) if !details.is_empty() => format!("{}: {}", self.error, details),
            _ => self.error.clone(),
        }
    }

    /// Map an HTTP status and this body onto the orchestration taxonomy.
    pub fn into_app_error(self, status: u16, context: &str) -> AppError {
        status_to_error(status, context, self.message())
    }
}

/// Error for a failed proxy call with HTTP `status`.
pub fn status_to_error(status: u16, context: &str, message: String) -> AppError {
    let message = format!("{}: {}", context, message);
    match status {
        404 => AppError::NotFound(message),
        400 | 409 | 422 => AppError::InvalidRequest(message),
        401 | 403 => AppError::InvalidRequest(format!("Access denied, {}", message)),
        _ => AppError::Backend(format!("Namespace proxy returned {}, {}", status, message)),
    }
}
