mod test_support;

use serde_json::json;
use test_support::{create_student, open_workspace, request_err, request_ok};

#[test]
fn generate_month_creates_one_record_per_student_and_keeps_status() {
    let mut sc = open_workspace("schoold-fees-generate");
    let a = create_student(&mut sc, "Anya", "7A", 1000.0);
    let b = create_student(&mut sc, "Bram", "7B", 800.0);

    let gen = request_ok(&mut sc, "1", "fees.generateMonth", json!({ "month": "2024-03" }));
    assert_eq!(gen["generated"], json!(2));

    let listed = request_ok(&mut sc, "2", "fees.list", json!({ "month": "2024-03" }));
    let records = listed["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["studentName"], json!("Anya"));
    assert_eq!(records[0]["studentClass"], json!("7A"));
    assert_eq!(records[0]["studentEmail"], json!("anya@school.test"));
    assert_eq!(records[0]["amount"], json!(1000.0));
    assert_eq!(records[0]["status"], json!("not started"));
    assert_eq!(records[0]["dueDate"], json!("2024-03-15"));
    assert_eq!(records[0]["monthName"], json!("March"));
    assert_eq!(records[0]["year"], json!(2024));
    assert!(records[0]["paidDate"].is_null());

    let paid = request_ok(
        &mut sc,
        "3",
        "fees.updateStatus",
        json!({ "studentId": a, "month": "2024-03", "status": "paid" }),
    );
    assert_eq!(paid["record"]["status"], json!("paid"));
    assert!(paid["record"]["paidDate"].is_string());

    // Regenerating must not reset statuses.
    let _ = request_ok(&mut sc, "4", "fees.generateMonth", json!({ "month": "2024-03" }));
    let listed = request_ok(&mut sc, "5", "fees.list", json!({ "month": "2024-03", "class": "7A" }));
    let records = listed["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], json!("paid"));

    let pending = request_ok(
        &mut sc,
        "6",
        "fees.updateStatus",
        json!({ "studentId": b, "month": "2024-03", "status": "pending" }),
    );
    assert!(pending["record"]["paidDate"].is_null());

    // A past month leaves the student's own fee status alone.
    let student = request_ok(&mut sc, "7", "students.get", json!({ "studentId": a }));
    assert_eq!(student["student"]["feeStatus"], json!("not started"));

    let stats = request_ok(&mut sc, "8", "fees.stats", json!({ "month": "2024-03" }));
    assert_eq!(stats["totalStudents"], json!(2));
    assert_eq!(stats["paidCount"], json!(1));
    assert_eq!(stats["pendingCount"], json!(1));
    assert_eq!(stats["notStartedCount"], json!(0));
    assert_eq!(stats["paidPercentage"], json!(50.0));
    assert_eq!(stats["totalAmount"], json!(1800.0));
    assert_eq!(stats["collectedAmount"], json!(1000.0));

    let class_stats = request_ok(
        &mut sc,
        "9",
        "fees.stats",
        json!({ "month": "2024-03", "class": "7B" }),
    );
    assert_eq!(class_stats["totalStudents"], json!(1));
    assert_eq!(class_stats["paidCount"], json!(0));
    assert_eq!(class_stats["pendingCount"], json!(1));
    assert_eq!(class_stats["pendingPercentage"], json!(100.0));
    assert_eq!(class_stats["totalAmount"], json!(800.0));
    assert_eq!(class_stats["collectedAmount"], json!(0.0));
}

#[test]
fn current_month_status_updates_the_student() {
    let mut sc = open_workspace("schoold-fees-current");
    let a = create_student(&mut sc, "Cyra", "8A", 300.0);

    let ensured = request_ok(&mut sc, "1", "fees.ensureCurrentMonth", json!({}));
    let month = ensured["month"].as_str().expect("month").to_string();
    assert_eq!(ensured["generated"], json!(1));

    let _ = request_ok(
        &mut sc,
        "2",
        "fees.updateStatus",
        json!({ "studentId": a, "month": month, "status": "overdue" }),
    );
    let student = request_ok(&mut sc, "3", "students.get", json!({ "studentId": a }));
    assert_eq!(student["student"]["feeStatus"], json!("overdue"));
}

#[test]
fn months_are_labelled_newest_first_and_due_day_is_configurable() {
    let mut sc = open_workspace("schoold-fees-months");
    let _ = create_student(&mut sc, "Dina", "9A", 50.0);

    let _ = request_ok(
        &mut sc,
        "1",
        "setup.update",
        json!({ "section": "fees", "patch": { "dueDay": 5 } }),
    );
    let _ = request_ok(&mut sc, "2", "fees.generateMonth", json!({ "month": "2023-12" }));
    let _ = request_ok(&mut sc, "3", "fees.generateMonth", json!({ "month": "2024-02" }));

    let months = request_ok(&mut sc, "4", "fees.months", json!({}));
    assert_eq!(
        months["months"],
        json!([
            { "value": "2024-02", "label": "February 2024" },
            { "value": "2023-12", "label": "December 2023" }
        ])
    );

    let listed = request_ok(&mut sc, "5", "fees.list", json!({ "month": "2024-02" }));
    assert_eq!(listed["records"][0]["dueDate"], json!("2024-02-05"));

    let code = request_err(&mut sc, "6", "fees.list", json!({ "month": "2024-2" }));
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut sc,
        "7",
        "fees.updateStatus",
        json!({ "studentId": "ghost", "month": "2024-02", "status": "paid" }),
    );
    assert_eq!(code, "not_found");
    let code = request_err(
        &mut sc,
        "8",
        "setup.update",
        json!({ "section": "fees", "patch": { "dueDay": 31 } }),
    );
    assert_eq!(code, "bad_params");
}
