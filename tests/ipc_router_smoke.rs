mod test_support;

use serde_json::json;
use test_support::{
    admin, group_commander, request, request_err, request_ok, send_line, spawn_sidecar, temp_dir,
};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("rollcall-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", None, json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert_eq!(health.get("workspacePath"), Some(&serde_json::Value::Null));

    // Workspace-bound methods refuse to run before a workspace is selected.
    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "reports.submit",
        Some(group_commander(7, 101)),
        json!({ "totalCount": 1, "presentCount": 1 }),
    );
    assert_eq!(code, "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("rollcall.sqlite3").is_file());

    for (id, method) in [
        ("4", "org.import"),
        ("5", "reports.submit"),
        ("6", "reports.get"),
        ("7", "reports.history"),
        ("8", "reports.byAggregator"),
        ("9", "reports.missing"),
        ("10", "summaries.generate"),
        ("11", "summaries.get"),
        ("12", "summaries.history"),
        ("13", "summaries.absences"),
    ] {
        let (code, _) = request_err(&mut stdin, &mut reader, id, method, None, json!({}));
        assert_eq!(code, "unauthenticated", "{}", method);
    }

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "reports.explode",
        Some(admin()),
        json!({}),
    );
    assert_eq!(code, "not_implemented");

    let resp = request(
        &mut stdin,
        &mut reader,
        "15",
        "reports.get",
        Some(admin()),
        json!({ "reportId": "not-a-number" }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let bad = send_line(&mut stdin, &mut reader, "{not json");
    assert_eq!(bad.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(bad.pointer("/error/code").and_then(|v| v.as_str()), Some("bad_json"));

    // A well-formed line without a method still echoes its id.
    let bad = send_line(&mut stdin, &mut reader, r#"{"id":"16"}"#);
    assert_eq!(bad.get("id").and_then(|v| v.as_str()), Some("16"));
    assert_eq!(bad.pointer("/error/code").and_then(|v| v.as_str()), Some("bad_json"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn principal_accepts_snake_case_keys_and_short_role_codes() {
    let workspace = temp_dir("rollcall-principal-aliases");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "org.import",
        Some(admin()),
        test_support::org_snapshot(),
    );
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.submit",
        Some(json!({ "id": 7, "role": "kg", "group_id": 101 })),
        json!({ "date": test_support::DAY, "total_count": 12, "present_count": 12 }),
    );
    assert_eq!(submitted.get("created").and_then(|v| v.as_bool()), Some(true));

    // Role without its hierarchy key cannot act.
    let (code, details) = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "reports.submit",
        Some(json!({ "id": 8, "role": "kg" })),
        json!({ "date": test_support::DAY, "totalCount": 12, "presentCount": 12 }),
    );
    assert_eq!(code, "forbidden");
    assert_eq!(details.get("status").and_then(|v| v.as_u64()), Some(403));

    drop(stdin);
    let _ = child.wait();
}
