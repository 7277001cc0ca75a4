use crate::models::Author;
use bcrypt::{hash, verify, BcryptError};
use chrono::Utc;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension};

pub const VALID_ROLES: [&str; 3] = ["admin", "moderator", "author"];

fn bcrypt_to_rusqlite_error(e: BcryptError) -> RusqliteError {
    RusqliteError::ToSqlConversionFailure(Box::new(e))
}

pub fn create_user(
    conn: &Connection,
    username: &str,
    password: &str,
    role: &str,
) -> Result<i64, RusqliteError> {
    let hashed_password = hash(password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
        params![username, hashed_password, role],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn read_all_users(conn: &Connection) -> Result<Vec<Author>, RusqliteError> {
    let mut stmt = conn.prepare("SELECT id, username, role, is_active, last_login_time FROM users ORDER BY id")?;
    let user_iter = stmt.query_map([], |row| {
        Ok(Author {
            id: row.get(0)?,
            username: row.get(1)?,
            role: row.get(2)?,
            is_active: row.get(3)?,
            last_login_time: row.get(4)?,
        })
    })?;
    user_iter.collect()
}

pub fn read_user_by_username(conn: &Connection, username: &str) -> Result<Option<Author>, RusqliteError> {
    conn.query_row(
        "SELECT id, username, role, is_active, last_login_time FROM users WHERE username = ?1",
        [username],
        |row| {
            Ok(Author {
                id: row.get(0)?,
                username: row.get(1)?,
                role: row.get(2)?,
                is_active: row.get(3)?,
                last_login_time: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Returns the author when the credentials match an active account.
pub fn verify_credentials(conn: &Connection, username: &str, password: &str) -> Option<Author> {
    let res: rusqlite::Result<String> = conn.query_row(
        "SELECT password_hash FROM users WHERE username = ?1 AND is_active = 1",
        [username],
        |row| row.get(0),
    );

    match res {
        Ok(hash) if verify(password, &hash).unwrap_or(false) => {
            read_user_by_username(conn, username).ok().flatten()
        }
        _ => None,
    }
}

pub fn update_password(conn: &Connection, username: &str, new_password: &str) -> Result<usize, RusqliteError> {
    let hashed_password = hash(new_password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE username = ?2",
        params![hashed_password, username],
    )
}

pub fn update_last_login_time(conn: &Connection, username: &str) -> Result<(), RusqliteError> {
    let now = Utc::now().to_rfc3339();
    conn.execute("UPDATE users SET last_login_time = ?1 WHERE username = ?2", params![now, username])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::db_setup;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        db_setup::setup_content_db(&mut conn).unwrap();
        conn
    }

    #[test]
    fn verifies_matching_password_only() {
        let conn = setup();
        create_user(&conn, "editor", "s3cret-pass", "moderator").unwrap();

        let author = verify_credentials(&conn, "editor", "s3cret-pass").unwrap();
        assert_eq!(author.role, "moderator");
        assert!(verify_credentials(&conn, "editor", "wrong").is_none());
        assert!(verify_credentials(&conn, "ghost", "s3cret-pass").is_none());
    }

    #[test]
    fn inactive_users_cannot_log_in() {
        let conn = setup();
        create_user(&conn, "former", "pass-word", "author").unwrap();
        conn.execute("UPDATE users SET is_active = 0 WHERE username = 'former'", []).unwrap();

        assert!(verify_credentials(&conn, "former", "pass-word").is_none());
    }

    #[test]
    fn rejects_unknown_roles() {
        let conn = setup();
        assert!(create_user(&conn, "root", "pass-word", "superuser").is_err());
    }
}
