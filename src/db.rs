use std::time::Duration;

use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, RuntimeErr};
use sea_orm_migration::MigratorTrait;

use crate::migration::Migrator;

pub type OrmConn = DatabaseConnection;

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<OrmConn> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    // Every pooled connection to an in-memory SQLite database would see its own
    // empty database, so those are pinned to a single connection.
    if database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory") {
        options.max_connections(1).min_connections(1);
    }
    let conn = Database::connect(options).await?;
    Ok(conn)
}

/// Bring the schema up to date.
pub async fn run_migrations(conn: &OrmConn) -> Result<()> {
    Migrator::up(conn, None).await?;
    Ok(())
}

/// Whether a storage error reflects contention that is worth retrying:
/// serialization failures and deadlocks on Postgres, a busy/locked database on
/// SQLite, or a pool that could not hand out a connection in time.
pub fn is_transient(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) => true,
        DbErr::Conn(RuntimeErr::SqlxError(err))
        | DbErr::Exec(RuntimeErr::SqlxError(err))
        | DbErr::Query(RuntimeErr::SqlxError(err)) => match err {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db_err) => matches!(
                db_err.code().as_deref(),
                Some("40001" | "40P01" | "5" | "6" | "517")
            ),
            _ => false,
        },
        _ => false,
    }
}
