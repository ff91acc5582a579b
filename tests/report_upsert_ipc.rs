mod test_support;

use serde_json::json;
use test_support::{
    admin, course_head, department_head, group_commander, request_err, request_ok, seeded_sidecar,
    DAY,
};

#[test]
fn resubmission_replaces_counts_and_absences_in_full() {
    let (mut child, mut stdin, mut reader) = seeded_sidecar("rollcall-report-upsert");
    let commander = group_commander(7, 101);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.submit",
        Some(commander.clone()),
        json!({
            "date": DAY,
            "totalCount": 30,
            "presentCount": 27,
            "absences": [
                { "fullName": "Ivanov", "reason": "sick" },
                { "fullName": "Petrov", "reason": "duty" },
                { "fullName": "Sidorov", "reason": "leave" }
            ]
        }),
    );
    assert_eq!(first.get("created").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(first.get("wasUpdated").and_then(|v| v.as_bool()), Some(false));
    let report_id = first.get("reportId").and_then(|v| v.as_i64()).expect("reportId");

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.submit",
        Some(commander.clone()),
        json!({
            "date": DAY,
            "totalCount": 30,
            "presentCount": 29,
            "absences": [{ "fullName": "Orlov", "reason": "sick" }]
        }),
    );
    assert_eq!(second.get("created").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(second.get("wasUpdated").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(second.get("reportId").and_then(|v| v.as_i64()), Some(report_id));

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.get",
        Some(commander.clone()),
        json!({ "reportId": report_id }),
    );
    assert_eq!(report.get("totalCount").and_then(|v| v.as_u64()), Some(30));
    assert_eq!(report.get("presentCount").and_then(|v| v.as_u64()), Some(29));
    assert_eq!(report.get("absentCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(report.get("wasUpdated").and_then(|v| v.as_bool()), Some(true));
    assert!(report.get("updatedAt").and_then(|v| v.as_str()).is_some());
    let absences = report
        .get("absences")
        .and_then(|v| v.as_array())
        .expect("absences");
    assert_eq!(absences.len(), 1);
    assert_eq!(
        absences[0].get("fullName").and_then(|v| v.as_str()),
        Some("Orlov")
    );
    assert_eq!(
        report.pointer("/hierarchy/courseId").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        report.pointer("/hierarchy/locationId").and_then(|v| v.as_i64()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn count_invariants_are_rejected_with_the_violated_rule() {
    let (mut child, mut stdin, mut reader) = seeded_sidecar("rollcall-report-validation");
    let commander = group_commander(7, 101);

    let resp = test_support::request(
        &mut stdin,
        &mut reader,
        "1",
        "reports.submit",
        Some(commander.clone()),
        json!({ "date": DAY, "totalCount": 10, "presentCount": 11 }),
    );
    assert_eq!(resp.pointer("/error/code").and_then(|v| v.as_str()), Some("validation"));
    assert_eq!(resp.pointer("/error/details/status").and_then(|v| v.as_u64()), Some(400));
    let message = resp
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .expect("message");
    assert!(message.contains("present_count exceeds total_count"), "{}", message);

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "reports.submit",
        Some(commander.clone()),
        json!({ "date": DAY, "totalCount": -1, "presentCount": 0 }),
    );
    assert_eq!(code, "validation");

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "reports.submit",
        Some(commander),
        json!({
            "date": DAY,
            "totalCount": 5,
            "presentCount": 4,
            "absences": [{ "fullName": "  ", "reason": "sick" }]
        }),
    );
    assert_eq!(code, "validation");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn roles_are_pinned_to_their_own_unit() {
    let (mut child, mut stdin, mut reader) = seeded_sidecar("rollcall-report-roles");

    let (code, details) = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "reports.submit",
        Some(group_commander(7, 101)),
        json!({
            "unit": { "kind": "group", "id": 102 },
            "date": DAY,
            "totalCount": 10,
            "presentCount": 10
        }),
    );
    assert_eq!(code, "forbidden");
    assert_eq!(details.get("status").and_then(|v| v.as_u64()), Some(403));

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "reports.submit",
        Some(course_head(20, 1)),
        json!({ "date": DAY, "totalCount": 10, "presentCount": 10 }),
    );
    assert_eq!(code, "forbidden");

    // A commander whose group is not in the reference data.
    let (code, details) = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "reports.submit",
        Some(group_commander(8, 999)),
        json!({ "date": DAY, "totalCount": 10, "presentCount": 10 }),
    );
    assert_eq!(code, "not_found");
    assert_eq!(details.get("status").and_then(|v| v.as_u64()), Some(404));

    let dept = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.submit",
        Some(department_head(9, 11)),
        json!({ "date": DAY, "totalCount": 8, "presentCount": 8 }),
    );
    assert_eq!(dept.get("created").and_then(|v| v.as_bool()), Some(true));

    // Admin must name the unit and may name any reporting unit.
    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "reports.submit",
        Some(admin()),
        json!({ "date": DAY, "totalCount": 8, "presentCount": 8 }),
    );
    assert_eq!(code, "validation");
    let by_admin = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.submit",
        Some(admin()),
        json!({
            "unit": { "kind": "group", "id": 102 },
            "date": DAY,
            "totalCount": 25,
            "presentCount": 25
        }),
    );
    assert_eq!(by_admin.get("created").and_then(|v| v.as_bool()), Some(true));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unit_history_is_newest_first_and_honours_limit_and_range() {
    let (mut child, mut stdin, mut reader) = seeded_sidecar("rollcall-report-history");
    let commander = group_commander(7, 101);
    for (i, date) in ["2025-03-01", "2025-03-02", "2025-03-03"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "reports.submit",
            Some(commander.clone()),
            json!({ "date": date, "totalCount": 20, "presentCount": 20 - i as i64 }),
        );
    }

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "reports.history",
        Some(commander.clone()),
        json!({}),
    );
    let dates: Vec<&str> = all
        .get("reports")
        .and_then(|v| v.as_array())
        .expect("reports")
        .iter()
        .filter_map(|r| r.get("reportDate").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(dates, vec!["2025-03-03", "2025-03-02", "2025-03-01"]);

    let limited = request_ok(
        &mut stdin,
        &mut reader,
        "h2",
        "reports.history",
        Some(commander.clone()),
        json!({ "limit": 1 }),
    );
    assert_eq!(
        limited.get("reports").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let ranged = request_ok(
        &mut stdin,
        &mut reader,
        "h3",
        "reports.history",
        Some(commander.clone()),
        json!({ "from": "2025-03-02", "to": "2025-03-02" }),
    );
    let reports = ranged.get("reports").and_then(|v| v.as_array()).expect("reports");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].get("presentCount").and_then(|v| v.as_u64()), Some(19));

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "h4",
        "reports.history",
        Some(commander),
        json!({ "from": "2025-03-03", "to": "2025-03-01" }),
    );
    assert_eq!(code, "validation");

    drop(stdin);
    let _ = child.wait();
}
