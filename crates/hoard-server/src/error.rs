//! Error responses for the blob server.

use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Errors returned by blob-server handlers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Missing or wrong credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Malformed request (bad blob ref, bad form, bad multipart).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The uploaded bytes do not hash to the declared ref.
    #[error("corrupt blob: {0}")]
    CorruptBlob(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] hoard_store::StoreError),

    /// Index failure.
    #[error("index error: {0}")]
    Index(#[from] hoard_index::IndexError),
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::CorruptBlob(_) => StatusCode::BAD_REQUEST,
            Self::Storage(hoard_store::StoreError::Corrupt { .. }) => StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() }).to_string();

        let mut response = axum::response::Response::builder()
            .status(status)
            .header("content-type", "application/json");
        if status == StatusCode::UNAUTHORIZED {
            response = response.header("www-authenticate", "Basic realm=\"hoard\"");
        }
        response
            .body(axum::body::Body::from(body))
            .expect("static response builds")
    }
}
