//! Database credential acquisition.

pub mod client_credentials;
pub mod token_cache;

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// How long before its literal expiry a token stops being presented. Keeps a
/// nearly-expired token from lapsing between the cache read and the database
/// handshake.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// A bearer credential issued for one authentication scope.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_on: Instant,
}

impl AccessToken {
    /// Whether the token is past, or within [`EXPIRY_MARGIN`] of, its expiry.
    pub fn is_expired(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN >= self.expires_on
    }
}

/// Acquires a fresh token from the identity provider. No caching here.
#[async_trait::async_trait]
pub trait TokenGenerator: Send + Sync {
    type Error: Send + Sync;

    async fn get_token(
        &self,
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, Self::Error>;
}
