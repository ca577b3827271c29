//! Database operations

use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

/// Initialize the database connection pool
pub async fn init(database_url: &str) -> Result<Pool<Sqlite>> {
    // Create database file if it doesn't exist
    if !sqlx::Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating database at {}", database_url);
        sqlx::Sqlite::create_database(database_url).await?;
    }

    // Create connection pool
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    // Run migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            last_seen INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            ciphertext BLOB NOT NULL,
            nonce BLOB NOT NULL,
            attachment TEXT,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Index for efficient conversation queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_pair
        ON messages(sender, recipient, created_at);
        "#,
    )
    .execute(pool)
    .await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Record (or refresh) a user identity seen at handshake time.
///
/// The roster read path serves from this table; the identity itself is
/// owned by the login service.
pub async fn upsert_user(
    pool: &Pool<Sqlite>,
    user_id: &str,
    username: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (id, username)
        VALUES (?1, ?2)
        ON CONFLICT(id) DO UPDATE SET
            username = excluded.username,
            last_seen = strftime('%s', 'now')
        "#,
    )
    .bind(user_id)
    .bind(username)
    .execute(pool)
    .await?;

    Ok(())
}

/// All known user identities as (id, username) pairs.
pub async fn list_users(pool: &Pool<Sqlite>) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as("SELECT id, username FROM users ORDER BY username ASC")
        .fetch_all(pool)
        .await
}

/// Persist one message record. Returns the row id, which becomes the
/// message's public identifier.
pub async fn insert_message(
    pool: &Pool<Sqlite>,
    sender: &str,
    recipient: &str,
    ciphertext: &[u8],
    nonce: &[u8],
    attachment: Option<&str>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO messages (sender, recipient, ciphertext, nonce, attachment)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(sender)
    .bind(recipient)
    .bind(ciphertext)
    .bind(nonce)
    .bind(attachment)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Full conversation between two participants, both directions, oldest
/// first. Ties on created_at fall back to insertion order.
///
/// Returns (id, sender, recipient, ciphertext, nonce, attachment, created_at).
pub async fn conversation(
    pool: &Pool<Sqlite>,
    a: &str,
    b: &str,
) -> Result<Vec<(i64, String, String, Vec<u8>, Vec<u8>, Option<String>, i64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, sender, recipient, ciphertext, nonce, attachment, created_at
        FROM messages
        WHERE (sender = ?1 AND recipient = ?2)
           OR (sender = ?2 AND recipient = ?1)
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(a)
    .bind(b)
    .fetch_all(pool)
    .await
}
