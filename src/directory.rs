//! Admin-facing student directory: filtering, ordering, pagination.
//!
//! Filters are carried in an explicit `StudentQuery` and compiled into one
//! WHERE clause; `query_students` is the single entry point and returns the
//! page rows together with the total match count.

use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

pub const DEFAULT_PAGE_SIZE: i64 = 10;

#[derive(Debug, Clone, Default)]
pub struct StudentQuery {
    /// Free text matched against first name, last name, student number and
    /// email (OR across fields, case-insensitive substring).
    pub search: Option<String>,
    /// Substring filter on department.
    pub department: Option<String>,
    /// Exact status filter.
    pub status: Option<String>,
    /// 1-based; clamped to the valid range rather than erroring.
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub user_id: Option<String>,
    pub student_no: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub year_of_admission: Option<i64>,
    pub current_semester: i64,
    pub date_of_birth: Option<String>,
    pub address: Option<String>,
    pub status: String,
    pub gpa: Option<f64>,
    pub photo_path: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

pub struct StudentPage {
    pub rows: Vec<StudentRow>,
    pub total: i64,
    pub page: i64,
    pub page_count: i64,
}

const STUDENT_COLUMNS: &str = "id, user_id, student_no, first_name, last_name, email, phone,
     department, year_of_admission, current_semester, date_of_birth, address,
     status, gpa, photo_path, created_at, updated_at";

fn row_to_student(r: &Row) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        student_no: r.get(2)?,
        first_name: r.get(3)?,
        last_name: r.get(4)?,
        email: r.get(5)?,
        phone: r.get(6)?,
        department: r.get(7)?,
        year_of_admission: r.get(8)?,
        current_semester: r.get(9)?,
        date_of_birth: r.get(10)?,
        address: r.get(11)?,
        status: r.get(12)?,
        gpa: r.get(13)?,
        photo_path: r.get(14)?,
        created_at: r.get(15)?,
        updated_at: r.get(16)?,
    })
}

fn build_where(q: &StudentQuery) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(search) = q.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        clauses.push(
            "(first_name LIKE ? OR last_name LIKE ? OR student_no LIKE ? OR email LIKE ?)"
                .to_string(),
        );
        for _ in 0..4 {
            binds.push(pattern.clone());
        }
    }
    if let Some(dept) = q.department.as_deref().filter(|s| !s.trim().is_empty()) {
        clauses.push("department LIKE ?".to_string());
        binds.push(format!("%{}%", dept.trim()));
    }
    if let Some(status) = q.status.as_deref().filter(|s| !s.trim().is_empty()) {
        clauses.push("status = ?".to_string());
        binds.push(status.trim().to_string());
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }
}

/// Clamps a requested 1-based page against the total row count. An empty
/// result set still has one (empty) valid page.
fn clamp_page(page: i64, total: i64, page_size: i64) -> (i64, i64) {
    let page_count = if total == 0 {
        1
    } else {
        (total + page_size - 1) / page_size
    };
    (page.clamp(1, page_count), page_count)
}

pub fn query_students(conn: &Connection, q: &StudentQuery) -> rusqlite::Result<StudentPage> {
    let page_size = if q.page_size > 0 {
        q.page_size
    } else {
        DEFAULT_PAGE_SIZE
    };
    let (where_sql, binds) = build_where(q);

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM students{}", where_sql),
        params_from_iter(binds.iter()),
        |r| r.get(0),
    )?;

    let (page, page_count) = clamp_page(q.page.max(0), total, page_size);
    let offset = (page - 1) * page_size;

    let sql = format!(
        "SELECT {} FROM students{} ORDER BY student_no LIMIT {} OFFSET {}",
        STUDENT_COLUMNS, where_sql, page_size, offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |r| row_to_student(r))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StudentPage {
        rows,
        total,
        page,
        page_count,
    })
}

pub fn load_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<StudentRow>> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [student_id],
        |r| row_to_student(r),
    )
    .optional()
}

pub fn profile_for_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<StudentRow>> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE user_id = ?", STUDENT_COLUMNS),
        [user_id],
        |r| row_to_student(r),
    )
    .optional()
}
