//! Database connection provisioning.
//!
//! Connections to the managed PostgreSQL server authenticate either with the
//! static configured password or, in managed-identity deployments, with a
//! short-lived bearer token presented as the password. The token is cached
//! process-wide and refreshed lazily once it nears expiry.

pub mod auth;

use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use self::auth::token_cache::TokenCache;
use self::auth::TokenGenerator;

/// Connection settings fixed at provider construction.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    /// Scope the database token is requested for.
    pub token_scope: String,
    /// Token-based authentication instead of the static password.
    pub use_managed_identity: bool,
}

/// Parameters of one connection attempt: the static settings plus the
/// resolved credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl ConnectParams {
    fn pg_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
    }
}

/// Opens the actual database connection from assembled parameters.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    type Connection: Send;
    type Error: Send + Sync;

    async fn connect(&self, params: &ConnectParams) -> Result<Self::Connection, Self::Error>;
}

/// Production connector for the managed PostgreSQL server.
pub struct PgConnector;

#[async_trait::async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;
    type Error = sqlx::Error;

    async fn connect(&self, params: &ConnectParams) -> Result<PgConnection, sqlx::Error> {
        PgConnection::connect_with(&params.pg_options()).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error<AuthError, ConnectError> {
    #[error("token acquisition: {0}")]
    TokenAcquisition(#[source] AuthError),
    #[error("database connection: {0}")]
    Connection(#[source] ConnectError),
    #[error("connection attempt cancelled")]
    Cancelled,
}

/// Produces authenticated database connections on demand.
///
/// Callers on different tasks may share one provider; they coordinate only
/// through the injected [`TokenCache`]. Two callers racing an empty or
/// expired cache may both fetch a token and both write it; the duplicate
/// issuance is harmless and the last writer wins.
pub struct ConnectionProvider<Generator, Opener> {
    config: ConnectionConfig,
    generator: Generator,
    cache: Arc<TokenCache>,
    connector: Opener,
}

impl<Generator, Opener> ConnectionProvider<Generator, Opener>
where
    Generator: TokenGenerator,
    Opener: Connector,
{
    pub fn new(
        config: ConnectionConfig,
        generator: Generator,
        cache: Arc<TokenCache>,
        connector: Opener,
    ) -> Self {
        Self {
            config,
            generator,
            cache,
            connector,
        }
    }

    /// Open one authenticated connection. The caller owns it and closes it.
    ///
    /// Never retries and never falls back from token-based to static
    /// credentials; a failed token acquisition fails the attempt.
    pub async fn create_connection(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Opener::Connection, Error<Generator::Error, Opener::Error>> {
        let password = if self.config.use_managed_identity {
            self.token_password(cancel).await?
        } else {
            self.config.password.clone()
        };

        let params = self.connect_params(password);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = self.connector.connect(&params) => res.map_err(Error::Connection),
        }
    }

    /// Resolve the token to present as the connection password, reusing the
    /// cached one while it is still usable.
    async fn token_password(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, Error<Generator::Error, Opener::Error>> {
        if let Some(cached) = self.cache.read().await {
            if !cached.is_expired() {
                debug!(message = "Using cached database token", token_expires_on = ?cached.expires_on);
                return Ok(cached.access_token);
            }
            debug!(message = "Cached database token expired", token_expires_on = ?cached.expires_on);
        }

        info!(message = "Requesting new database token", scope = %self.config.token_scope);

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = self.generator.get_token(&self.config.token_scope, cancel) => res,
        };
        let token = match fetched {
            Ok(token) => token,
            // A fired cancellation may also surface as a generator error;
            // report the distinguished outcome either way.
            Err(_) if cancel.is_cancelled() => return Err(Error::Cancelled),
            Err(err) => return Err(Error::TokenAcquisition(err)),
        };

        debug!(message = "Got new database token", token_expires_on = ?token.expires_on);

        let password = token.access_token.clone();
        self.cache.write(token).await;
        Ok(password)
    }

    fn connect_params(&self, password: String) -> ConnectParams {
        ConnectParams {
            host: self.config.server.clone(),
            port: self.config.port,
            database: self.config.database.clone(),
            username: self.config.username.clone(),
            password,
        }
    }
}
