// Connectivity pre-flight for `backup check`.
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

use crate::config::ConnectionConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens one connection and pings it. The error text is redacted before it
/// is logged or returned.
pub async fn check_db_connection(connection: &ConnectionConfig) -> Result<(), String> {
    let options = MySqlConnectOptions::new()
        .host(&connection.host)
        .port(connection.port)
        .username(&connection.user)
        .password(connection.credential.expose())
        .database(&connection.database);

    let attempt = async {
        let mut conn = options.connect().await?;
        conn.ping().await?;
        conn.close().await
    };

    let outcome = match timeout(CONNECT_TIMEOUT, attempt).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(connection.credential.redact(&e.to_string())),
        Err(_) => Err(format!(
            "no answer within {} seconds",
            CONNECT_TIMEOUT.as_secs()
        )),
    };

    match &outcome {
        Ok(()) => info!(
            host = %connection.host,
            port = connection.port,
            database = %connection.database,
            "✅ Successfully connected"
        ),
        Err(reason) => error!(
            host = %connection.host,
            port = connection.port,
            database = %connection.database,
            "❌ Failed to connect: {}", reason
        ),
    }
    outcome
}
