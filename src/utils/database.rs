// pgvault/src/utils/database.rs
use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::errors::{BackupError, Result};
use crate::utils::redact_url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Direct database access needed around the dump/restore tools.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Runs the identity query against the target database and returns its name.
    async fn current_database(&self) -> Result<String>;

    /// Drops the named database (terminating its sessions) and creates it again, empty.
    async fn recreate_database(&self, name: &str) -> Result<()>;
}

pub struct PgAdmin {
    database_url: String,
}

impl PgAdmin {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    async fn query_current_database(&self) -> Result<String> {
        let mut conn = PgConnection::connect(&self.database_url).await?;
        let name: String = sqlx::query_scalar("SELECT current_database()")
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(name)
    }
}

#[async_trait]
impl DatabaseAdmin for PgAdmin {
    async fn current_database(&self) -> Result<String> {
        match tokio::time::timeout(CONNECT_TIMEOUT, self.query_current_database()).await {
            Ok(Ok(name)) => {
                info!("Connected to {}", redact_url(&self.database_url));
                Ok(name)
            }
            Ok(Err(e)) => Err(BackupError::Connectivity(e.to_string())),
            Err(_) => Err(BackupError::Connectivity(format!(
                "no response within {} seconds",
                CONNECT_TIMEOUT.as_secs()
            ))),
        }
    }

    async fn recreate_database(&self, name: &str) -> Result<()> {
        if name.eq_ignore_ascii_case("postgres") {
            return Err(BackupError::Config(
                "refusing to drop the 'postgres' maintenance database".to_string(),
            ));
        }

        let mut admin_url = Url::parse(&self.database_url)?;
        let owner = admin_url.username().to_string();
        admin_url.set_path("/postgres");

        let mut conn = PgConnection::connect(admin_url.as_str())
            .await
            .map_err(|e| BackupError::Connectivity(e.to_string()))?;

        warn!("Dropping database '{}' before restore", name);
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(name)
        .execute(&mut conn)
        .await?;

        sqlx::query(&format!(
            r#"DROP DATABASE IF EXISTS {} WITH (FORCE)"#,
            quote_ident(name)
        ))
        .execute(&mut conn)
        .await?;

        let mut create_sql = format!("CREATE DATABASE {}", quote_ident(name));
        if !owner.is_empty() {
            create_sql.push_str(&format!(" OWNER {}", quote_ident(&owner)));
        }
        sqlx::query(&create_sql).execute(&mut conn).await?;
        conn.close().await?;

        info!("Database '{}' recreated", name);
        Ok(())
    }
}

/// Extracts the database name from a PostgreSQL connection URL.
pub fn database_name_from_url(db_url: &str) -> Option<String> {
    let parsed = Url::parse(db_url).ok()?;
    let path = parsed.path().trim_start_matches('/');
    (!path.is_empty()).then(|| path.to_string())
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
