//! HTTP blob server.
//!
//! Exposes the blob protocol over axum:
//!
//! - `POST /camli/stat` — form fields `blob1..blobN`, optional `maxwaitsec`
//! - `POST /camli/upload` — multipart/form-data, one part per blob named
//!   by its ref
//! - `GET /camli/{blobref}` — streaming fetch, 404 when absent
//! - `GET /camli/enumerate-blobs?after=&limit=` — paginated enumeration
//! - `POST /camli/remove` — form fields `blobN`, responds with the
//!   removed set
//!
//! Every route requires HTTP Basic auth; the password comparison is
//! constant-time. Received blobs are hash-verified before anything is
//! persisted, and optionally fed through the [`Indexer`].

mod error;
mod handlers;

pub use error::ServerError;

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use base64::Engine;
use hoard_index::Indexer;
use hoard_store::Storage;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Largest accepted blob upload: 32 MiB, far above the chunkers' maximums.
pub const MAX_UPLOAD_SIZE: u64 = 32 * 1024 * 1024;

/// Configuration for a [`BlobServer`].
pub struct BlobServerConfig {
    /// Blob persistence.
    pub storage: Arc<dyn Storage>,
    /// Optional receive-time indexer.
    pub indexer: Option<Arc<Indexer>>,
    /// Basic-auth credentials every request must carry.
    pub username: String,
    pub password: String,
    /// Externally visible base URL, used to advertise `uploadUrl` in stat
    /// responses. When `None`, clients fall back to `<server>/camli/upload`.
    pub base_url: Option<String>,
}

/// Shared state for all handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub storage: Arc<dyn Storage>,
    pub indexer: Option<Arc<Indexer>>,
    pub username: Arc<str>,
    pub password: Arc<str>,
    pub base_url: Option<Arc<str>>,
}

/// Basic-auth middleware with constant-time password comparison.
async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some((user, pass)) = header.and_then(decode_basic_credentials) else {
        warn!("request without valid basic auth");
        return Err(ServerError::Unauthorized);
    };

    let user_ok = user.as_bytes().ct_eq(state.username.as_bytes());
    let pass_ok = pass.as_bytes().ct_eq(state.password.as_bytes());
    if !bool::from(user_ok & pass_ok) {
        warn!(user, "rejected credentials");
        return Err(ServerError::Unauthorized);
    }

    Ok(next.run(request).await)
}

/// Parse `Basic <base64(user:pass)>` into its credentials.
fn decode_basic_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

/// The blob server.
pub struct BlobServer {
    router: Router,
}

impl BlobServer {
    pub fn new(config: BlobServerConfig) -> Self {
        let state = AppState {
            storage: config.storage,
            indexer: config.indexer,
            username: config.username.into(),
            password: config.password.into(),
            base_url: config.base_url.map(Into::into),
        };

        let router = Router::new()
            .route("/camli/stat", post(handlers::stat))
            .route("/camli/upload", post(handlers::upload))
            .route("/camli/uploadhelper", post(handlers::upload_helper))
            .route("/camli/enumerate-blobs", get(handlers::enumerate))
            .route("/camli/remove", post(handlers::remove))
            .route("/camli/{blobref}", get(handlers::fetch))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE as usize))
            .with_state(state);

        Self { router }
    }

    /// The inner router, for in-process tests.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on the given address until the task is dropped.
    pub async fn serve(self, addr: &str) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: tokio::net::TcpListener) -> Result<(), std::io::Error> {
        if let Ok(password) = std::env::var("CAMLI_ADVERTISED_PASSWORD") {
            info!(
                addr = %listener.local_addr()?,
                "blob server listening; advertised password is {password:?}"
            );
        } else {
            info!(addr = %listener.local_addr()?, "blob server listening");
        }
        axum::serve(listener, self.router).await
    }
}
