mod test_support;

use serde_json::json;
use test_support::{create_student, open_workspace, request, request_err, request_ok};

#[test]
fn roster_fills_unmarked_students_and_stats_count_them_absent() {
    let mut sc = open_workspace("schoold-attendance-roster");
    let zara = create_student(&mut sc, "Zara", "6A", 100.0);
    let amir = create_student(&mut sc, "Amir", "6A", 100.0);
    let _other = create_student(&mut sc, "Omar", "6B", 100.0);

    let _ = request_ok(
        &mut sc,
        "1",
        "attendance.mark",
        json!({ "studentId": zara, "date": "2024-07-01", "status": "present", "class": "6A" }),
    );

    let roster = request_ok(
        &mut sc,
        "2",
        "attendance.roster",
        json!({ "class": "6A", "date": "2024-07-01" }),
    );
    let records = roster["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["studentName"], json!("Amir"));
    assert_eq!(records[0]["studentId"], json!(amir));
    assert_eq!(records[0]["status"], json!("absent"));
    assert_eq!(records[0]["id"], json!(""));
    assert_eq!(records[1]["studentName"], json!("Zara"));
    assert_eq!(records[1]["status"], json!("present"));

    let listed = request_ok(
        &mut sc,
        "3",
        "attendance.list",
        json!({ "class": "6A", "date": "2024-07-01" }),
    );
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(1));

    let stats = request_ok(
        &mut sc,
        "4",
        "attendance.stats",
        json!({ "class": "6A", "date": "2024-07-01" }),
    );
    assert_eq!(stats["totalStudents"], json!(2));
    assert_eq!(stats["presentCount"], json!(1));
    assert_eq!(stats["absentCount"], json!(1));
    assert_eq!(stats["attendanceRate"], json!(50.0));
}

#[test]
fn marking_twice_updates_the_same_record() {
    let mut sc = open_workspace("schoold-attendance-upsert");
    let id = create_student(&mut sc, "Lia", "5A", 0.0);

    let first = request_ok(
        &mut sc,
        "1",
        "attendance.mark",
        json!({ "studentId": id, "date": "2024-07-02", "status": "absent", "class": "5A" }),
    );
    let second = request_ok(
        &mut sc,
        "2",
        "attendance.mark",
        json!({ "studentId": id, "date": "2024-07-02", "status": "present", "class": "5A" }),
    );
    assert_eq!(first["record"]["id"], second["record"]["id"]);
    assert_eq!(second["record"]["status"], json!("present"));

    let history = request_ok(&mut sc, "3", "attendance.history", json!({ "studentId": id }));
    assert_eq!(history["records"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(history["attendance"], json!(100));
}

#[test]
fn bulk_mark_is_all_or_nothing() {
    let mut sc = open_workspace("schoold-attendance-bulk");
    let a = create_student(&mut sc, "Ana", "4A", 0.0);
    let b = create_student(&mut sc, "Bo", "4A", 0.0);

    let saved = request_ok(
        &mut sc,
        "1",
        "attendance.bulkMark",
        json!({ "records": [
            { "studentId": a, "date": "2024-07-03", "status": "present", "class": "4A" },
            { "studentId": b, "date": "2024-07-03", "status": "present", "class": "4A" }
        ]}),
    );
    assert_eq!(saved["saved"], json!(2));

    let code = request_err(
        &mut sc,
        "2",
        "attendance.bulkMark",
        json!({ "records": [
            { "studentId": a, "date": "2024-07-04", "status": "present", "class": "4A" },
            { "studentId": "ghost", "date": "2024-07-04", "status": "present", "class": "4A" }
        ]}),
    );
    assert_eq!(code, "not_found");
    let listed = request_ok(
        &mut sc,
        "3",
        "attendance.list",
        json!({ "class": "4A", "date": "2024-07-04" }),
    );
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(0));

    let code = request_err(
        &mut sc,
        "4",
        "attendance.bulkMark",
        json!({ "records": [
            { "studentId": a, "date": "2024-07-05", "status": "late", "class": "4A" }
        ]}),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn unmarked_status_follows_setup() {
    let mut sc = open_workspace("schoold-attendance-setup");
    let _ = create_student(&mut sc, "Ivy", "3A", 0.0);
    let _ = request_ok(
        &mut sc,
        "1",
        "setup.update",
        json!({ "section": "attendance", "patch": { "unmarkedStatus": "present" } }),
    );
    let roster = request_ok(
        &mut sc,
        "2",
        "attendance.roster",
        json!({ "class": "3A", "date": "2024-07-08" }),
    );
    assert_eq!(roster["records"][0]["status"], json!("present"));
}

#[test]
fn marks_must_match_the_students_class() {
    let mut sc = open_workspace("schoold-attendance-class-check");
    let kai = create_student(&mut sc, "Kai", "2A", 0.0);
    let lu = create_student(&mut sc, "Lu", "2A", 0.0);

    let code = request_err(
        &mut sc,
        "1",
        "attendance.mark",
        json!({ "studentId": kai, "date": "2024-07-09", "status": "present", "class": "2B" }),
    );
    assert_eq!(code, "bad_params");

    let resp = request(
        &mut sc,
        "2",
        "attendance.bulkMark",
        json!({ "records": [
            { "studentId": lu, "date": "2024-07-09", "status": "present", "class": "2A" },
            { "studentId": kai, "date": "2024-07-09", "status": "present", "class": "2B" }
        ]}),
    );
    assert_eq!(resp["error"]["code"], json!("bad_params"));
    assert_eq!(resp["error"]["details"]["index"], json!(1));
    let listed = request_ok(
        &mut sc,
        "3",
        "attendance.list",
        json!({ "class": "2A", "date": "2024-07-09" }),
    );
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(0));

    // A record left under the old class stops counting once the student moves.
    let _ = request_ok(
        &mut sc,
        "4",
        "attendance.mark",
        json!({ "studentId": kai, "date": "2024-07-10", "status": "present", "class": "2A" }),
    );
    let _ = request_ok(
        &mut sc,
        "5",
        "students.update",
        json!({ "studentId": kai, "patch": { "class": "2B" } }),
    );
    let stats = request_ok(
        &mut sc,
        "6",
        "attendance.stats",
        json!({ "class": "2A", "date": "2024-07-10" }),
    );
    assert_eq!(stats["totalStudents"], json!(1));
    assert_eq!(stats["presentCount"], json!(0));
    assert_eq!(stats["absentCount"], json!(1));
}
