mod models;
mod seeders;

pub use models::*;
pub use seeders::seed_admin_user;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Split a migration file into statements.
///
/// Comment lines are dropped before splitting on `;`, so a semicolon inside a
/// comment cannot cut a statement in two.
fn sql_statements(sql: &str) -> Vec<String> {
    let cleaned = sql
        .lines()
        .map(|line| match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");
    cleaned
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Execute a SQL migration file statement by statement
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql_statements(sql) {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

/// Open the store at `db_url`, creating the data directory for file databases.
pub async fn init(db_url: &str, data_dir: &Path) -> Result<DbPool> {
    if !db_url.contains(":memory:") {
        std::fs::create_dir_all(data_dir)?;
    }

    info!("Initializing database at {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: users, transactions, requests
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    info!("Migrations completed");
    Ok(())
}

/// Single-connection in-memory pool with the full schema.
///
/// The connection is never recycled, since dropping it discards the database.
#[cfg(test)]
pub async fn test_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_statements_are_not_comments() {
        let statements = sql_statements(include_str!("../../migrations/001_initial.sql"));
        assert!(statements.len() >= 3);
        assert!(statements.iter().all(|s| s.starts_with("CREATE")));
    }

    #[test]
    fn test_semicolon_in_comment_does_not_split() {
        let sql = "-- first; second\nCREATE TABLE a (id TEXT); -- trailing; note\nCREATE TABLE b (id TEXT);\n";
        let statements = sql_statements(sql);
        assert_eq!(
            statements,
            vec!["CREATE TABLE a (id TEXT)".to_string(), "CREATE TABLE b (id TEXT)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_file_database_initializes() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("t.db").display());
        let pool = init(&url, dir.path()).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        // Migrations are idempotent
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_balance_check_constraint() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO users (id, first_name, last_name, email, balance) VALUES ('u1', 'A', 'B', 'a@b.c', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query("UPDATE users SET balance = balance - 1 WHERE id = 'u1'")
            .execute(&pool)
            .await;
        assert!(result.is_err(), "negative balance must be rejected by the store");
    }
}
