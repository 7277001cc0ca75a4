use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::DbPool;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("R2D2 Pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Builds the shared connection pool. Every connection enforces foreign keys
/// and waits at most `busy_timeout` for SQLite's write lock.
pub fn build_pool(db_path: &Path, busy_timeout: Duration) -> Result<DbPool, SetupError> {
    let busy_ms = busy_timeout.as_millis();
    let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA busy_timeout = {};",
            busy_ms
        ))
    });
    let pool = Pool::builder()
        .connection_timeout(busy_timeout.max(Duration::from_secs(1)))
        .build(manager)?;
    Ok(pool)
}

pub fn setup_content_db(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;
    create_tables(&tx)?;
    tx.commit()?;
    Ok(())
}

fn create_tables(tx: &Transaction) -> rusqlite::Result<()> {
    log::info!("Creating 'users' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin', 'moderator', 'author')),
            is_active INTEGER NOT NULL DEFAULT 1,
            last_login_time TEXT
        )",
        [],
    )?;

    log::info!("Creating 'categories' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    // The NOCASE uniqueness on tag names is what makes concurrent tag
    // creation safe; the lookup before insert is only a fast path.
    log::info!("Creating 'tags' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            slug TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    log::info!("Creating 'posts' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            excerpt TEXT,
            category_id INTEGER REFERENCES categories(id),
            author_id INTEGER NOT NULL REFERENCES users(id),
            featured_image TEXT,
            status TEXT NOT NULL DEFAULT 'draft' CHECK(status IN ('draft', 'published', 'archived')),
            published_at TEXT,
            meta_title TEXT,
            meta_description TEXT,
            views INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    log::info!("Creating 'post_tags' table...");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS post_tags (
            post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id),
            PRIMARY KEY (post_id, tag_id)
        )",
        [],
    )?;

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_posts_status_published ON posts(status, published_at);
         CREATE INDEX IF NOT EXISTS idx_posts_category ON posts(category_id);
         CREATE INDEX IF NOT EXISTS idx_post_tags_tag ON post_tags(tag_id);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_content_db(&mut conn).unwrap();
        setup_content_db(&mut conn).unwrap();
    }

    #[test]
    fn tag_names_are_unique_ignoring_case() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_content_db(&mut conn).unwrap();
        conn.execute("INSERT INTO tags (name, slug) VALUES ('Mystery', 'mystery')", []).unwrap();

        let err = conn
            .execute("INSERT INTO tags (name, slug) VALUES ('MYSTERY', 'mystery-2')", [])
            .unwrap_err();
        assert!(crate::models::db_operations::is_unique_violation(&err));
    }

    #[test]
    fn pool_connections_enforce_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = build_pool(&dir.path().join("content.db"), Duration::from_millis(500)).unwrap();
        let mut conn = pool.get().unwrap();
        setup_content_db(&mut conn).unwrap();

        let orphan = conn.execute(
            "INSERT INTO posts (title, slug, content, author_id, status, created_at, updated_at)
             VALUES ('t', 't', 'c', 42, 'draft', '2024-01-01', '2024-01-01')",
            [],
        );
        assert!(orphan.is_err());
    }
}
