use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::OptionalExt;
use crate::Database;
use crate::models::{UserRow, format_ts};

impl Database {
    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, full_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, email, password_hash, full_name, format_ts(Utc::now())],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Refresh tokens --

    pub fn store_refresh_token(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO refresh_tokens (token_hash, user_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (token_hash, user_id, format_ts(expires_at), format_ts(Utc::now())),
            )?;
            Ok(())
        })
    }

    /// Consume a refresh token. Returns the owner if the token exists, is not
    /// revoked and has not expired; the token is revoked either way.
    pub fn redeem_refresh_token(&self, token_hash: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let found: Option<(String, String, bool)> = tx
                .query_row(
                    "SELECT user_id, expires_at, revoked FROM refresh_tokens WHERE token_hash = ?1",
                    [token_hash],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let Some((user_id, expires_at, revoked)) = found else {
                return Ok(None);
            };

            tx.execute(
                "UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?1",
                [token_hash],
            )?;

            let valid = !revoked && expires_at > format_ts(Utc::now());
            let user = if valid {
                query_user(&tx, "id", &user_id)?
            } else {
                None
            };

            tx.commit()?;
            Ok(user)
        })
    }

    /// Revoke every outstanding refresh token of a user (sign-out).
    pub fn revoke_refresh_tokens(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ?1 AND revoked = 0",
                [user_id],
            )?;
            Ok(n)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, email, password, full_name, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                full_name: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}
