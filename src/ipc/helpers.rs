use rusqlite::Connection;
use serde_json::json;

use crate::auth;
use crate::db;
use crate::ipc::error::err;
use crate::policy::{authorize, Denial, Operation, Principal};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<Denial> for HandlerErr {
    fn from(d: Denial) -> Self {
        HandlerErr {
            code: d.code,
            message: d.message,
            details: Some(json!({ "redirect": d.redirect })),
        }
    }
}

pub fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

/// Maps an INSERT/UPDATE failure, turning a uniqueness-constraint violation
/// into the user-facing duplicate error instead of a storage fault.
pub fn store_err(e: rusqlite::Error, table: &str) -> HandlerErr {
    if db::is_unique_violation(&e) {
        HandlerErr::with_details(
            "duplicate_value",
            "a record with one of these unique values already exists",
            json!({ "table": table }),
        )
    } else {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": table }))
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Absent, non-string and blank values all read as None.
pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolves the calling principal from `params.session`. A missing or stale
/// token reads as unauthenticated and is denied by the policy.
pub fn require_principal(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Principal, HandlerErr> {
    let principal = match params.get("session").and_then(|v| v.as_str()) {
        Some(token) => auth::session_principal(conn, token).map_err(db_err)?,
        None => None,
    };
    match principal {
        Some(p) => Ok(p),
        None => {
            // Reuse the policy's unauthenticated denial so the message and
            // redirect stay consistent across every endpoint.
            let d = authorize(None, &Operation::CreateOwn).unwrap_err();
            Err(d.into())
        }
    }
}
