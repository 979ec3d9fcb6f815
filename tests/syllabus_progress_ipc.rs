mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, Sidecar};

fn add_chapter(sc: &mut Sidecar, id: &str, class: &str, subject: &str, name: &str, done: bool) -> String {
    let mut params = json!({ "class": class, "subject": subject, "chapterName": name });
    if done {
        params["physicalClassConducted"] = json!(true);
        params["chapterEndTestStatus"] = json!(true);
        params["notesDistributionStatus"] = json!("Distributed");
        params["revisionStatus"] = json!(true);
    }
    let result = request_ok(sc, id, "syllabus.create", params);
    result["chapterId"].as_str().expect("chapterId").to_string()
}

#[test]
fn chapters_default_to_incomplete_and_complete_with_all_flags() {
    let mut sc = open_workspace("schoold-syllabus-flags");
    let ch = add_chapter(&mut sc, "1", "8A", "Science", "Light", false);

    let listed = request_ok(
        &mut sc,
        "2",
        "syllabus.list",
        json!({ "class": "8A", "subject": "Science" }),
    );
    let chapter = &listed["chapters"][0];
    assert_eq!(chapter["physicalClassConducted"], json!(false));
    assert_eq!(chapter["notesDistributionStatus"], json!("Undistributed"));

    let progress = request_ok(
        &mut sc,
        "3",
        "syllabus.progress",
        json!({ "class": "8A", "subject": "Science" }),
    );
    assert_eq!(progress["completedChapters"], json!(0));

    // Three of four flags is still incomplete.
    let _ = request_ok(
        &mut sc,
        "4",
        "syllabus.update",
        json!({ "chapterId": ch, "patch": {
            "physicalClassConducted": true,
            "chapterEndTestStatus": true,
            "revisionStatus": true
        }}),
    );
    let progress = request_ok(
        &mut sc,
        "5",
        "syllabus.progress",
        json!({ "class": "8A", "subject": "Science" }),
    );
    assert_eq!(progress["completedChapters"], json!(0));

    let _ = request_ok(
        &mut sc,
        "6",
        "syllabus.update",
        json!({ "chapterId": ch, "patch": { "notesDistributionStatus": "Distributed" } }),
    );
    let progress = request_ok(
        &mut sc,
        "7",
        "syllabus.progress",
        json!({ "class": "8A", "subject": "Science" }),
    );
    assert_eq!(
        progress,
        json!({
            "class": "8A",
            "subject": "Science",
            "totalChapters": 1,
            "completedChapters": 1,
            "progressPercentage": 100
        })
    );

    let code = request_err(
        &mut sc,
        "8",
        "syllabus.update",
        json!({ "chapterId": ch, "patch": { "notesDistributionStatus": "Partial" } }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn overall_progress_averages_subjects() {
    let mut sc = open_workspace("schoold-syllabus-overall");

    let empty = request_ok(&mut sc, "0", "syllabus.overallProgress", json!({ "class": "9A" }));
    assert_eq!(empty["overallProgress"], json!(0));

    // Maths: 1 of 3 done (33%), English: 1 of 2 done (50%).
    add_chapter(&mut sc, "1", "9A", "Maths", "Algebra", true);
    add_chapter(&mut sc, "2", "9A", "Maths", "Geometry", false);
    add_chapter(&mut sc, "3", "9A", "Maths", "Calculus", false);
    add_chapter(&mut sc, "4", "9A", "English", "Poetry", true);
    let prose = add_chapter(&mut sc, "5", "9A", "English", "Prose", false);
    add_chapter(&mut sc, "6", "9B", "History", "Empires", true);

    let overall = request_ok(&mut sc, "7", "syllabus.overallProgress", json!({ "class": "9A" }));
    // round((33 + 50) / 2) = round(41.5) = 42
    assert_eq!(overall["overallProgress"], json!(42));

    let by_class = request_ok(&mut sc, "8", "syllabus.listByClass", json!({ "class": "9A" }));
    let names: Vec<&str> = by_class["chapters"]
        .as_array()
        .expect("chapters")
        .iter()
        .filter_map(|c| c["chapterName"].as_str())
        .collect();
    assert_eq!(names, ["Poetry", "Prose", "Algebra", "Calculus", "Geometry"]);

    let subjects = request_ok(&mut sc, "9", "syllabus.subjects", json!({ "class": "9A" }));
    assert_eq!(subjects["subjects"], json!(["English", "Maths"]));
    let classes = request_ok(&mut sc, "10", "syllabus.classes", json!({}));
    assert_eq!(classes["classes"], json!(["9A", "9B"]));

    let _ = request_ok(&mut sc, "11", "syllabus.delete", json!({ "chapterId": prose }));
    let overall = request_ok(&mut sc, "12", "syllabus.overallProgress", json!({ "class": "9A" }));
    // round((33 + 100) / 2) = round(66.5) = 67
    assert_eq!(overall["overallProgress"], json!(67));

    let code = request_err(&mut sc, "13", "syllabus.delete", json!({ "chapterId": prose }));
    assert_eq!(code, "not_found");
}
