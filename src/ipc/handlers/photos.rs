//! Profile photos are opaque binary payloads carried base64-encoded over the
//! JSON transport and stored as files under the workspace media directory.

use base64::Engine;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

use crate::directory;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, get_opt_str, get_required_str, require_principal, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, Operation};

const MEDIA_DIR: &str = "media/student_profiles";

fn photo_extension(filename: Option<&str>) -> String {
    filename
        .and_then(|f| f.rsplit('.').next())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

fn set_photo(
    conn: &Connection,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;

    let Some(student) = directory::load_student(conn, &student_id).map_err(db_err)? else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };
    // Uploading a photo edits the profile, so the update rule applies.
    authorize(
        Some(&principal),
        &Operation::Update {
            owner: student.user_id.as_deref(),
        },
    )?;

    let data = get_required_str(params, "dataBase64")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.as_bytes())
        .map_err(|e| HandlerErr::new("bad_params", format!("invalid base64 payload: {}", e)))?;
    if bytes.is_empty() {
        return Err(HandlerErr::new("bad_params", "empty photo payload"));
    }

    let ext = photo_extension(get_opt_str(params, "filename").as_deref());
    let rel_path = format!("{}/{}.{}", MEDIA_DIR, student.id, ext);
    let abs_path = workspace.join(&rel_path);
    if let Some(parent) = abs_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    }
    std::fs::write(&abs_path, &bytes).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

    // A re-upload with a different extension leaves the old file behind;
    // remove it once the new one is on disk.
    if let Some(old) = student.photo_path.as_deref() {
        if old != rel_path {
            let _ = std::fs::remove_file(workspace.join(old));
        }
    }

    conn.execute(
        "UPDATE students SET photo_path = ?, updated_at = ? WHERE id = ?",
        (&rel_path, &Utc::now().to_rfc3339(), &student.id),
    )
    .map_err(db_err)?;

    Ok(json!({ "photoPath": rel_path, "bytes": bytes.len() }))
}

fn get_photo(
    conn: &Connection,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;

    let Some(student) = directory::load_student(conn, &student_id).map_err(db_err)? else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };
    authorize(
        Some(&principal),
        &Operation::View {
            owner: student.user_id.as_deref(),
        },
    )?;

    let Some(rel_path) = student.photo_path.as_deref() else {
        return Err(HandlerErr::new("not_found", "no photo on file"));
    };
    let bytes = std::fs::read(workspace.join(rel_path))
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

    Ok(json!({
        "photoPath": rel_path,
        "dataBase64": base64::engine::general_purpose::STANDARD.encode(&bytes)
    }))
}

fn handle(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &Path, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_deref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, workspace, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.setPhoto" => Some(handle(state, req, set_photo)),
        "students.getPhoto" => Some(handle(state, req, get_photo)),
        _ => None,
    }
}
