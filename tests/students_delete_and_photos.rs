use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

struct Client {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Client {
    fn start(workspace: &PathBuf) -> Client {
        let exe = env!("CARGO_BIN_EXE_studentd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn studentd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let mut client = Client {
            _child: child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        };
        client.ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        client
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn err(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert!(
            !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error body")
    }
}

fn admin_session(client: &mut Client) -> String {
    client.ok(
        "accounts.bootstrapAdmin",
        json!({ "username": "registrar", "password": "registrar-pass", "email": "reg@example.edu" }),
    );
    let login = client.ok(
        "accounts.login",
        json!({ "username": "registrar", "password": "registrar-pass" }),
    );
    login
        .get("session")
        .and_then(|v| v.as_str())
        .expect("admin session")
        .to_string()
}

fn student_session(client: &mut Client, username: &str) -> String {
    client.ok(
        "accounts.register",
        json!({
            "username": username,
            "password": "student-pass",
            "email": format!("{}@example.edu", username)
        }),
    );
    let login = client.ok(
        "accounts.login",
        json!({ "username": username, "password": "student-pass" }),
    );
    login
        .get("session")
        .and_then(|v| v.as_str())
        .expect("student session")
        .to_string()
}

fn create_student(client: &mut Client, admin: &str, no: &str) -> String {
    let created = client.ok(
        "students.create",
        json!({
            "session": admin,
            "student": {
                "studentNo": no,
                "firstName": "Test",
                "lastName": "Subject",
                "email": format!("{}@students.example.edu", no.to_lowercase())
            }
        }),
    );
    created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

// "hello studentd" in base64.
const PHOTO_B64: &str = "aGVsbG8gc3R1ZGVudGQ=";

#[test]
fn deleting_twice_reports_not_found_the_second_time() {
    let workspace = temp_dir("studentd-delete-twice");
    let mut client = Client::start(&workspace);
    let admin = admin_session(&mut client);
    let student_id = create_student(&mut client, &admin, "ST2024042");

    let deleted = client.ok(
        "students.delete",
        json!({ "session": admin, "studentId": student_id }),
    );
    assert_eq!(deleted.get("deleted").and_then(|v| v.as_bool()), Some(true));

    let error = client.err(
        "students.delete",
        json!({ "session": admin, "studentId": student_id }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));

    // And the record really is gone.
    let error = client.err(
        "students.get",
        json!({ "session": admin, "studentId": student_id }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));
}

#[test]
fn photo_round_trips_and_follows_the_update_policy() {
    let workspace = temp_dir("studentd-photos");
    let mut client = Client::start(&workspace);
    let admin = admin_session(&mut client);
    let mallory = student_session(&mut client, "mallory");

    let created = client.ok(
        "students.createMyProfile",
        json!({
            "session": mallory,
            "student": {
                "studentNo": "ST2024051",
                "firstName": "Mallory",
                "lastName": "Reyes",
                "email": "mallory@students.example.edu"
            }
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // No photo yet.
    let error = client.err(
        "students.getPhoto",
        json!({ "session": mallory, "studentId": student_id }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));

    // Owner uploads; the bytes land under the workspace media directory.
    let stored = client.ok(
        "students.setPhoto",
        json!({
            "session": mallory,
            "studentId": student_id,
            "filename": "portrait.PNG",
            "dataBase64": PHOTO_B64
        }),
    );
    let photo_path = stored
        .get("photoPath")
        .and_then(|v| v.as_str())
        .expect("photoPath");
    assert!(photo_path.starts_with("media/student_profiles/"));
    assert!(photo_path.ends_with(".png"));
    assert!(workspace.join(photo_path).is_file());

    // Owner and admin read the same bytes back.
    let fetched = client.ok(
        "students.getPhoto",
        json!({ "session": mallory, "studentId": student_id }),
    );
    assert_eq!(
        fetched.get("dataBase64").and_then(|v| v.as_str()),
        Some(PHOTO_B64)
    );
    client.ok(
        "students.getPhoto",
        json!({ "session": admin, "studentId": student_id }),
    );

    // A stranger gets the ownership denial.
    let oscar = student_session(&mut client, "oscar");
    let error = client.err(
        "students.getPhoto",
        json!({ "session": oscar, "studentId": student_id }),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("permission_denied")
    );
    let error = client.err(
        "students.setPhoto",
        json!({
            "session": oscar,
            "studentId": student_id,
            "filename": "spoof.png",
            "dataBase64": PHOTO_B64
        }),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("permission_denied")
    );
}

#[test]
fn garbage_photo_payloads_are_rejected() {
    let workspace = temp_dir("studentd-photos-garbage");
    let mut client = Client::start(&workspace);
    let admin = admin_session(&mut client);
    let student_id = create_student(&mut client, &admin, "ST2024061");

    let error = client.err(
        "students.setPhoto",
        json!({
            "session": admin,
            "studentId": student_id,
            "filename": "x.png",
            "dataBase64": "!!!not-base64!!!"
        }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    let error = client.err(
        "students.setPhoto",
        json!({
            "session": admin,
            "studentId": student_id,
            "filename": "x.png",
            "dataBase64": ""
        }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}
