use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::policy::{Principal, Role};

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Inserts a principal row. The UNIQUE constraint on username is the
/// authority on duplicates; callers map the violation to a user-facing error.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password: &str,
    email: &str,
    role: Role,
) -> rusqlite::Result<String> {
    let user_id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().to_string();
    let hash = hash_password(&salt, password);
    conn.execute(
        "INSERT INTO users(id, username, password_hash, salt, email, role, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            username,
            &hash,
            &salt,
            email,
            role.as_str(),
            &Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(user_id)
}

pub fn verify_credentials(
    conn: &Connection,
    username: &str,
    password: &str,
) -> rusqlite::Result<Option<Principal>> {
    let row = conn
        .query_row(
            "SELECT id, username, password_hash, salt, role FROM users WHERE username = ?",
            [username],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((id, username, stored_hash, salt, role)) = row else {
        return Ok(None);
    };
    if hash_password(&salt, password) != stored_hash {
        return Ok(None);
    }
    let Some(role) = Role::parse(&role) else {
        return Ok(None);
    };
    Ok(Some(Principal {
        user_id: id,
        username,
        role,
    }))
}

pub fn create_session(conn: &Connection, user_id: &str) -> rusqlite::Result<String> {
    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES(?, ?, ?)",
        (&token, user_id, &Utc::now().to_rfc3339()),
    )?;
    Ok(token)
}

/// Deleting an absent token is a no-op; logout is idempotent.
pub fn destroy_session(conn: &Connection, token: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(())
}

pub fn session_principal(conn: &Connection, token: &str) -> rusqlite::Result<Option<Principal>> {
    let row = conn
        .query_row(
            "SELECT u.id, u.username, u.role
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?",
            [token],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    Ok(row.and_then(|(id, username, role)| {
        Role::parse(&role).map(|role| Principal {
            user_id: id,
            username,
            role,
        })
    }))
}

pub fn admin_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM users WHERE role = 'admin' LIMIT 1",
        [],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

pub fn user_id_for_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT id FROM users WHERE username = ?", [username], |r| {
        r.get(0)
    })
    .optional()
}
