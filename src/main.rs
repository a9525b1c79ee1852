use std::sync::Arc;

use invoice_db::db::auth::client_credentials::{ClientCredentials, DEFAULT_AUTHORITY};
use invoice_db::db::auth::token_cache::TokenCache;
use invoice_db::db::{ConnectionConfig, ConnectionProvider, PgConnector};
use sqlx::Connection;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let reqwest_client = reqwest::Client::builder()
        .connection_verbose(true)
        .build()?;

    let use_managed_identity = matches!(
        std::env::var("DB_USE_MANAGED_IDENTITY").as_deref(),
        Ok("1") | Ok("true")
    );

    let config = ConnectionConfig {
        server: getenv("DB_SERVER"),
        database: getenv("DB_DATABASE"),
        username: getenv("DB_USERNAME"),
        password: std::env::var("DB_PASSWORD").unwrap_or_default(),
        port: std::env::var("DB_PORT")
            .map(|port| port.parse().expect("DB_PORT is not a port number"))
            .unwrap_or(5432),
        token_scope: std::env::var("DB_TOKEN_SCOPE")
            .unwrap_or_else(|_| "https://ossrdbms-aad.database.windows.net/.default".into()),
        use_managed_identity,
    };

    // The generator is only consulted in managed-identity mode.
    let generator = ClientCredentials {
        client: reqwest_client,
        client_id: getenv_if(use_managed_identity, "AZURE_CLIENT_ID"),
        client_secret: getenv_if(use_managed_identity, "AZURE_CLIENT_SECRET"),
        tenant_id: getenv_if(use_managed_identity, "AZURE_TENANT_ID"),
        authority: DEFAULT_AUTHORITY.to_owned(),
    };

    let cache = Arc::new(TokenCache::new());
    let provider = ConnectionProvider::new(config, generator, cache, PgConnector);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    info!(message = "Checking database connectivity", use_managed_identity);

    let mut conn = provider.create_connection(&cancel).await?;
    conn.ping().await?;
    conn.close().await?;

    info!(message = "Database connection verified");

    Ok(())
}

fn getenv(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| panic!("env var {} is not set", key))
}

fn getenv_if(required: bool, key: &str) -> String {
    if required {
        getenv(key)
    } else {
        std::env::var(key).unwrap_or_default()
    }
}
