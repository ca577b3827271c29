//! Server integration tests
//!
//! These tests verify:
//! - Message persistence and conversation queries
//! - Conversation ordering guarantees
//! - Roster/user bookkeeping
//! - Offline persistence semantics

use sqlx::SqlitePool;
use std::sync::Arc;

// Helper function to create test database
async fn setup_test_db() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(":memory:")
        .await
        .expect("Failed to create test database");

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
    .execute(&pool)
    .await
    .unwrap();

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
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_pair
        ON messages(sender, recipient, created_at);
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

async fn insert_message_at(
    pool: &SqlitePool,
    sender: &str,
    recipient: &str,
    created_at: i64,
) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO messages (sender, recipient, ciphertext, nonce, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id
        "#,
    )
    .bind(sender)
    .bind(recipient)
    .bind(vec![0xEE; 32])
    .bind(vec![0x11; 12])
    .bind(created_at)
    .fetch_one(pool)
    .await
    .unwrap()
}

const CONVERSATION_SQL: &str = r#"
    SELECT id, sender, recipient, created_at
    FROM messages
    WHERE (sender = ?1 AND recipient = ?2)
       OR (sender = ?2 AND recipient = ?1)
    ORDER BY created_at ASC, id ASC
"#;

// ============================================================================
// User Bookkeeping Tests
// ============================================================================

#[tokio::test]
async fn test_user_upsert_is_idempotent() {
    let pool = setup_test_db().await;

    for username in ["alice", "alice", "alice-renamed"] {
        sqlx::query(
            r#"
            INSERT INTO users (id, username) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                last_seen = strftime('%s', 'now')
            "#,
        )
        .bind("u1")
        .bind(username)
        .execute(&pool)
        .await
        .unwrap();
    }

    let users: Vec<(String, String)> = sqlx::query_as("SELECT id, username FROM users")
        .fetch_all(&pool)
        .await
        .unwrap();

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].1, "alice-renamed");
}

// ============================================================================
// Message Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_message_storage_roundtrip() {
    let pool = setup_test_db().await;

    let ciphertext = vec![0xFF; 48];
    let nonce = vec![0xAB; 12];

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO messages (sender, recipient, ciphertext, nonce, attachment)
        VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id
        "#,
    )
    .bind("u1")
    .bind("u2")
    .bind(&ciphertext)
    .bind(&nonce)
    .bind("1700000000000-0.png")
    .fetch_one(&pool)
    .await
    .unwrap();

    assert!(id > 0);

    let row: (Vec<u8>, Vec<u8>, Option<String>) = sqlx::query_as(
        "SELECT ciphertext, nonce, attachment FROM messages WHERE id = ?1",
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(row.0, ciphertext);
    assert_eq!(row.1, nonce);
    assert_eq!(row.2.as_deref(), Some("1700000000000-0.png"));
}

#[tokio::test]
async fn test_conversation_covers_both_directions() {
    let pool = setup_test_db().await;

    insert_message_at(&pool, "u1", "u2", 1000).await;
    insert_message_at(&pool, "u2", "u1", 1001).await;

    let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(CONVERSATION_SQL)
        .bind("u1")
        .bind("u2")
        .fetch_all(&pool)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, "u1");
    assert_eq!(rows[1].1, "u2");

    // Same result regardless of argument order
    let swapped: Vec<(i64, String, String, i64)> = sqlx::query_as(CONVERSATION_SQL)
        .bind("u2")
        .bind("u1")
        .fetch_all(&pool)
        .await
        .unwrap();

    assert_eq!(rows, swapped);
}

#[tokio::test]
async fn test_conversation_excludes_other_pairs() {
    let pool = setup_test_db().await;

    insert_message_at(&pool, "u1", "u2", 1000).await;
    insert_message_at(&pool, "u1", "u3", 1001).await;
    insert_message_at(&pool, "u3", "u2", 1002).await;

    let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(CONVERSATION_SQL)
        .bind("u1")
        .bind("u2")
        .fetch_all(&pool)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].1.as_str(), rows[0].2.as_str()), ("u1", "u2"));
}

#[tokio::test]
async fn test_conversation_ordering_by_time_then_insertion() {
    let pool = setup_test_db().await;

    // Out-of-order inserts, including a created_at tie
    let late = insert_message_at(&pool, "u1", "u2", 2000).await;
    let tie_first = insert_message_at(&pool, "u2", "u1", 1000).await;
    let tie_second = insert_message_at(&pool, "u1", "u2", 1000).await;

    let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(CONVERSATION_SQL)
        .bind("u1")
        .bind("u2")
        .fetch_all(&pool)
        .await
        .unwrap();

    let ids: Vec<i64> = rows.iter().map(|r| r.0).collect();
    assert_eq!(ids, vec![tie_first, tie_second, late]);

    let times: Vec<i64> = rows.iter().map(|r| r.3).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_offline_message_retrievable_later() {
    let pool = setup_test_db().await;

    // Recipient has no live connection at send time; the record is simply
    // persisted and shows up on the next history fetch.
    insert_message_at(&pool, "u1", "offline-user", 1000).await;

    let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(CONVERSATION_SQL)
        .bind("offline-user")
        .bind("u1")
        .fetch_all(&pool)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].2, "offline-user");
}

// ============================================================================
// Concurrent Access Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_message_storage() {
    let pool = Arc::new(setup_test_db().await);

    let mut handles = vec![];
    for i in 0..10 {
        let pool_clone = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            sqlx::query(
                r#"
                INSERT INTO messages (sender, recipient, ciphertext, nonce)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind("u1")
            .bind("u2")
            .bind(vec![i as u8; 64])
            .bind(vec![0x22; 12])
            .execute(&*pool_clone)
            .await
            .unwrap();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE sender = ?1 AND recipient = ?2",
    )
    .bind("u1")
    .bind("u2")
    .fetch_one(&*pool)
    .await
    .unwrap();

    assert_eq!(count, 10);
}
