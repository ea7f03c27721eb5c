use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::auth;
use crate::directory::{self, StudentQuery, StudentRow};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, get_opt_str, get_required_str, require_principal, store_err, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::{authorize, Operation};

const STATUSES: [&str; 4] = ["active", "inactive", "graduated", "suspended"];

/// Validated field set shared by create and update.
struct StudentForm {
    student_no: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    department: Option<String>,
    year_of_admission: Option<i64>,
    current_semester: i64,
    date_of_birth: Option<String>,
    address: Option<String>,
    status: String,
    gpa: Option<f64>,
}

fn parse_student_form(params: &serde_json::Value) -> Result<StudentForm, HandlerErr> {
    let Some(student) = params.get("student") else {
        return Err(HandlerErr::new("bad_params", "missing student"));
    };

    let mut fields = serde_json::Map::new();
    let mut required = |key: &str| -> String {
        match get_opt_str(student, key) {
            Some(v) => v,
            None => {
                fields.insert(key.to_string(), json!("This field is required."));
                String::new()
            }
        }
    };

    let student_no = required("studentNo");
    let first_name = required("firstName");
    let last_name = required("lastName");
    let email = required("email");

    if !email.is_empty() && !email.contains('@') {
        fields.insert("email".to_string(), json!("Enter a valid email address."));
    }

    let status = get_opt_str(student, "status").unwrap_or_else(|| "active".to_string());
    if !STATUSES.contains(&status.as_str()) {
        fields.insert(
            "status".to_string(),
            json!(format!("Status must be one of: {}.", STATUSES.join(", "))),
        );
    }

    let date_of_birth = get_opt_str(student, "dateOfBirth");
    if let Some(dob) = date_of_birth.as_deref() {
        if NaiveDate::parse_from_str(dob, "%Y-%m-%d").is_err() {
            fields.insert(
                "dateOfBirth".to_string(),
                json!("Enter a valid date in YYYY-MM-DD format."),
            );
        }
    }

    let year_of_admission = student.get("yearOfAdmission").and_then(|v| v.as_i64());
    if let Some(y) = year_of_admission {
        if y <= 0 {
            fields.insert(
                "yearOfAdmission".to_string(),
                json!("Enter a valid admission year."),
            );
        }
    }

    let current_semester = student
        .get("currentSemester")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    if current_semester <= 0 {
        fields.insert(
            "currentSemester".to_string(),
            json!("Semester must be a positive number."),
        );
    }

    if !fields.is_empty() {
        return Err(HandlerErr::with_details(
            "validation_failed",
            "student form has errors",
            json!({ "fields": fields }),
        ));
    }

    // GPA bounds are their own error kind so the client can flag the field
    // precisely; 0.00 and 4.00 are both valid.
    let gpa = student.get("gpa").and_then(|v| v.as_f64());
    if let Some(g) = gpa {
        if !(0.0..=4.0).contains(&g) {
            return Err(HandlerErr::with_details(
                "out_of_range",
                "GPA must be between 0.00 and 4.00.",
                json!({ "field": "gpa" }),
            ));
        }
    }

    Ok(StudentForm {
        student_no,
        first_name,
        last_name,
        email,
        phone: get_opt_str(student, "phone"),
        department: get_opt_str(student, "department"),
        year_of_admission,
        current_semester,
        date_of_birth,
        address: get_opt_str(student, "address"),
        status,
        gpa,
    })
}

fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "studentId": s.id,
        "userId": s.user_id,
        "studentNo": s.student_no,
        "firstName": s.first_name,
        "lastName": s.last_name,
        "fullName": format!("{} {}", s.first_name, s.last_name),
        "email": s.email,
        "phone": s.phone,
        "department": s.department,
        "yearOfAdmission": s.year_of_admission,
        "currentSemester": s.current_semester,
        "dateOfBirth": s.date_of_birth,
        "address": s.address,
        "status": s.status,
        "gpa": s.gpa,
        "photoPath": s.photo_path,
        "createdAt": s.created_at,
        "updatedAt": s.updated_at,
    })
}

/// Field-level duplicate pre-check. The UNIQUE constraints remain the
/// authority; this only exists to name the offending field in the response.
fn check_unique(
    conn: &Connection,
    column: &str,
    value: &str,
    exclude_id: Option<&str>,
    field: &str,
    message: &str,
) -> Result<(), HandlerErr> {
    let count: i64 = match exclude_id {
        Some(id) => conn
            .query_row(
                &format!("SELECT COUNT(*) FROM students WHERE {} = ? AND id != ?", column),
                [value, id],
                |r| r.get(0),
            )
            .map_err(db_err)?,
        None => conn
            .query_row(
                &format!("SELECT COUNT(*) FROM students WHERE {} = ?", column),
                [value],
                |r| r.get(0),
            )
            .map_err(db_err)?,
    };
    if count > 0 {
        return Err(HandlerErr::with_details(
            "duplicate_value",
            message,
            json!({ "field": field }),
        ));
    }
    Ok(())
}

fn insert_student(
    conn: &Connection,
    form: &StudentForm,
    user_id: Option<&str>,
) -> Result<String, HandlerErr> {
    check_unique(
        conn,
        "student_no",
        &form.student_no,
        None,
        "studentNo",
        "A student with this student ID already exists.",
    )?;
    check_unique(
        conn,
        "email",
        &form.email,
        None,
        "email",
        "A student with this email already exists.",
    )?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
            id, user_id, student_no, first_name, last_name, email, phone,
            department, year_of_admission, current_semester, date_of_birth,
            address, status, gpa, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &student_id,
            user_id,
            &form.student_no,
            &form.first_name,
            &form.last_name,
            &form.email,
            &form.phone,
            &form.department,
            form.year_of_admission,
            form.current_semester,
            &form.date_of_birth,
            &form.address,
            &form.status,
            form.gpa,
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| store_err(e, "students"))?;
    Ok(student_id)
}

fn update_student(
    conn: &Connection,
    student_id: &str,
    form: &StudentForm,
) -> Result<(), HandlerErr> {
    check_unique(
        conn,
        "student_no",
        &form.student_no,
        Some(student_id),
        "studentNo",
        "A student with this student ID already exists.",
    )?;
    check_unique(
        conn,
        "email",
        &form.email,
        Some(student_id),
        "email",
        "A student with this email already exists.",
    )?;

    conn.execute(
        "UPDATE students SET
            student_no = ?, first_name = ?, last_name = ?, email = ?, phone = ?,
            department = ?, year_of_admission = ?, current_semester = ?,
            date_of_birth = ?, address = ?, status = ?, gpa = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            &form.student_no,
            &form.first_name,
            &form.last_name,
            &form.email,
            &form.phone,
            &form.department,
            form.year_of_admission,
            form.current_semester,
            &form.date_of_birth,
            &form.address,
            &form.status,
            form.gpa,
            Utc::now().to_rfc3339(),
            student_id,
        ],
    )
    .map_err(|e| store_err(e, "students"))?;
    Ok(())
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;
    authorize(Some(&principal), &Operation::ListAll)?;

    let query = StudentQuery {
        search: get_opt_str(params, "search"),
        department: get_opt_str(params, "department"),
        status: get_opt_str(params, "status"),
        page: params.get("page").and_then(|v| v.as_i64()).unwrap_or(1),
        page_size: params
            .get("pageSize")
            .and_then(|v| v.as_i64())
            .unwrap_or(directory::DEFAULT_PAGE_SIZE),
    };

    let page = directory::query_students(conn, &query).map_err(db_err)?;
    Ok(json!({
        "students": page.rows.iter().map(student_json).collect::<Vec<_>>(),
        "total": page.total,
        "page": page.page,
        "pageCount": page.page_count,
    }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;
    authorize(Some(&principal), &Operation::CreateForOther)?;

    let form = parse_student_form(params)?;

    // Optional link to an existing principal; at most one profile per user.
    let user_id = match get_opt_str(params, "username") {
        Some(username) => {
            let Some(uid) = auth::user_id_for_username(conn, &username).map_err(db_err)? else {
                return Err(HandlerErr::new("not_found", "no user with that username"));
            };
            if directory::profile_for_user(conn, &uid).map_err(db_err)?.is_some() {
                return Err(HandlerErr::with_details(
                    "duplicate_value",
                    "that user already has a student profile",
                    json!({ "field": "username" }),
                ));
            }
            Some(uid)
        }
        None => None,
    };

    let student_id = insert_student(conn, &form, user_id.as_deref())?;
    Ok(json!({
        "studentId": student_id,
        "message": format!("Student {} {} created successfully!", form.first_name, form.last_name),
        "redirect": "studentList"
    }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
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

    Ok(json!({ "student": student_json(&student) }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;

    let Some(student) = directory::load_student(conn, &student_id).map_err(db_err)? else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };
    authorize(
        Some(&principal),
        &Operation::Update {
            owner: student.user_id.as_deref(),
        },
    )?;

    let form = parse_student_form(params)?;
    update_student(conn, &student_id, &form)?;

    // Admins go back to the directory; students stay on their own record.
    let redirect = if principal.is_admin() {
        "studentList"
    } else {
        "studentDetail"
    };
    Ok(json!({
        "studentId": student_id,
        "message": format!("Student {} {} updated successfully!", form.first_name, form.last_name),
        "redirect": redirect
    }))
}

fn students_delete(
    conn: &Connection,
    workspace: Option<&std::path::Path>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;
    authorize(Some(&principal), &Operation::Delete)?;

    let student_id = get_required_str(params, "studentId")?;
    let Some(student) = directory::load_student(conn, &student_id).map_err(db_err)? else {
        // Repeat deletes land here; report not-found rather than crashing.
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    conn.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(db_err)?;

    // Best-effort cleanup of the stored photo; the row is already gone.
    if let (Some(ws), Some(rel)) = (workspace, student.photo_path.as_deref()) {
        let _ = std::fs::remove_file(ws.join(rel));
    }

    Ok(json!({
        "deleted": true,
        "message": format!(
            "Student {} {} deleted successfully!",
            student.first_name, student.last_name
        ),
        "redirect": "studentList"
    }))
}

fn my_profile(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;

    match directory::profile_for_user(conn, &principal.user_id).map_err(db_err)? {
        Some(student) => Ok(json!({
            "studentId": student.id,
            "student": student_json(&student),
            "redirect": "studentDetail"
        })),
        None => Err(HandlerErr::with_details(
            "profile_missing",
            "Please complete your profile information.",
            json!({ "redirect": "createMyProfile" }),
        )),
    }
}

fn create_my_profile(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal = require_principal(conn, params)?;
    authorize(Some(&principal), &Operation::CreateOwn)?;

    // Second creation attempt redirects to the existing profile; it never
    // duplicates and is not an error.
    if let Some(existing) = directory::profile_for_user(conn, &principal.user_id).map_err(db_err)? {
        return Ok(json!({
            "alreadyExists": true,
            "studentId": existing.id,
            "message": "Your profile already exists.",
            "redirect": "studentDetail"
        }));
    }

    let form = parse_student_form(params)?;
    let student_id = insert_student(conn, &form, Some(&principal.user_id))?;
    Ok(json!({
        "alreadyExists": false,
        "studentId": student_id,
        "message": "Your profile has been created successfully!",
        "redirect": "studentDetail"
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

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let workspace = state.workspace.as_deref();
    match students_delete(conn, workspace, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle(state, req, students_list)),
        "students.create" => Some(handle(state, req, students_create)),
        "students.get" => Some(handle(state, req, students_get)),
        "students.update" => Some(handle(state, req, students_update)),
        "students.delete" => Some(handle_delete(state, req)),
        "students.myProfile" => Some(handle(state, req, my_profile)),
        "students.createMyProfile" => Some(handle(state, req, create_my_profile)),
        _ => None,
    }
}
