#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DAY: &str = "2025-03-03";

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("ROLLCALL_WORKSPACE")
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send_line(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");

    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(out.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    principal: Option<serde_json::Value>,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(p) = principal {
        payload["principal"] = p;
    }
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    principal: Option<serde_json::Value>,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, principal, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Returns (code, details) of a failed request.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    principal: Option<serde_json::Value>,
    params: serde_json::Value,
) -> (String, serde_json::Value) {
    let value = request(stdin, reader, id, method, principal, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let error = value.get("error").cloned().unwrap_or_else(|| json!({}));
    let code = error
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    (code, error.get("details").cloned().unwrap_or(serde_json::Value::Null))
}

pub fn admin() -> serde_json::Value {
    json!({ "id": 1, "role": "admin" })
}

pub fn group_commander(id: i64, group_id: i64) -> serde_json::Value {
    json!({ "id": id, "role": "group-commander", "groupId": group_id })
}

pub fn course_head(id: i64, course_id: i64) -> serde_json::Value {
    json!({ "id": id, "role": "course-head", "courseId": course_id })
}

pub fn faculty_head(id: i64, faculty_id: i64) -> serde_json::Value {
    json!({ "id": id, "role": "faculty-head", "facultyId": faculty_id })
}

pub fn department_head(id: i64, department_id: i64) -> serde_json::Value {
    json!({ "id": id, "role": "department-head", "departmentId": department_id })
}

pub fn org_snapshot() -> serde_json::Value {
    json!({
        "faculties": [{ "id": 1, "name": "Engineering" }, { "id": 2, "name": "Medicine" }],
        "courses": [
            { "id": 1, "facultyId": 1, "number": 1 },
            { "id": 2, "facultyId": 1, "number": 2 },
            { "id": 3, "facultyId": 2, "number": 1 }
        ],
        "locations": [{ "id": 1, "name": "North campus" }, { "id": 2, "name": "South campus" }],
        "groups": [
            { "id": 101, "courseId": 1, "groupNumber": 101 },
            { "id": 102, "courseId": 1, "groupNumber": 102 },
            { "id": 201, "courseId": 2, "groupNumber": 201 },
            { "id": 301, "courseId": 3, "groupNumber": 111 }
        ],
        "departments": [
            { "id": 11, "facultyId": 1, "name": "Mechanics" },
            { "id": 12, "facultyId": 1, "name": "Optics" },
            { "id": 21, "facultyId": 2, "name": "Surgery" }
        ]
    })
}

/// Spawn a sidecar on a fresh workspace with the reference hierarchy loaded.
pub fn seeded_sidecar(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "org",
        "org.import",
        Some(admin()),
        org_snapshot(),
    );
    (child, stdin, reader)
}
