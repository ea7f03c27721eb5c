use rusqlite::Connection;
use serde_json::json;

use crate::auth;
use crate::directory;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, get_required_str, require_principal, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::Role;

fn validate_registration(
    username: &str,
    password: &str,
    email: &str,
) -> Result<(), HandlerErr> {
    let mut fields = serde_json::Map::new();
    if username.trim().is_empty() {
        fields.insert("username".to_string(), json!("This field is required."));
    }
    if password.len() < 8 {
        fields.insert(
            "password".to_string(),
            json!("Password must be at least 8 characters."),
        );
    }
    if !email.contains('@') {
        fields.insert("email".to_string(), json!("Enter a valid email address."));
    }
    if fields.is_empty() {
        Ok(())
    } else {
        Err(HandlerErr::with_details(
            "validation_failed",
            "registration form has errors",
            json!({ "fields": fields }),
        ))
    }
}

fn create_account(
    conn: &Connection,
    params: &serde_json::Value,
    role: Role,
) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    let email = get_required_str(params, "email")?;
    validate_registration(&username, &password, &email)?;

    match auth::create_user(conn, username.trim(), &password, email.trim(), role) {
        Ok(user_id) => Ok(json!({
            "userId": user_id,
            "username": username.trim(),
            "role": role.as_str(),
            "message": format!("Account created for {}! Please login.", username.trim()),
            "redirect": "login"
        })),
        Err(e) if crate::db::is_unique_violation(&e) => Err(HandlerErr::with_details(
            "duplicate_value",
            "a user with that username already exists",
            json!({ "field": "username" }),
        )),
        Err(e) => Err(db_err(e)),
    }
}

/// Registration always produces a student principal; the role is fixed at
/// creation and no flow changes it afterwards.
fn register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    create_account(conn, params, Role::Student)
}

/// First-run admin provisioning. Admins are never created through
/// registration; this succeeds only while the workspace has no admin yet.
fn bootstrap_admin(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if auth::admin_exists(conn).map_err(db_err)? {
        return Err(HandlerErr::new(
            "admin_exists",
            "an admin account is already provisioned",
        ));
    }
    create_account(conn, params, Role::Admin)
}

fn login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;

    let principal = auth::verify_credentials(conn, username.trim(), &password).map_err(db_err)?;
    let Some(principal) = principal else {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "Invalid username or password.",
        ));
    };

    let session = auth::create_session(conn, &principal.user_id).map_err(db_err)?;
    let redirect = if principal.is_admin() {
        "adminDashboard"
    } else {
        "studentDashboard"
    };
    Ok(json!({
        "session": session,
        "userId": principal.user_id,
        "username": principal.username,
        "role": principal.role.as_str(),
        "redirect": redirect,
        "message": format!("Welcome back, {}!", principal.username)
    }))
}

fn logout(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session = get_required_str(params, "session")?;
    auth::destroy_session(conn, &session).map_err(db_err)?;
    Ok(json!({
        "redirect": "home",
        "message": "You have been logged out successfully."
    }))
}

fn dashboard(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;

    if principal.is_admin() {
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
            .map_err(db_err)?;
        return Ok(json!({
            "dashboard": "admin",
            "totalStudents": total
        }));
    }

    let profile = directory::profile_for_user(conn, &principal.user_id).map_err(db_err)?;
    Ok(json!({
        "dashboard": "student",
        "studentId": profile.map(|s| s.id)
    }))
}

fn handle(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "accounts.register" => Some(handle(state, req, register)),
        "accounts.bootstrapAdmin" => Some(handle(state, req, bootstrap_admin)),
        "accounts.login" => Some(handle(state, req, login)),
        "accounts.logout" => Some(handle(state, req, logout)),
        "accounts.dashboard" => Some(handle(state, req, dashboard)),
        _ => None,
    }
}
