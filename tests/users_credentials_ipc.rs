mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, Sidecar};

fn create_user(sc: &mut Sidecar, id: &str, name: &str, email: &str, role: &str) -> String {
    let result = request_ok(
        sc,
        id,
        "users.create",
        json!({
            "fullName": name,
            "email": email,
            "contactNumber": "555-0199",
            "password": "s3cret!",
            "role": role
        }),
    );
    result["userId"].as_str().expect("userId").to_string()
}

#[test]
fn create_list_search_and_update_users() {
    let mut sc = open_workspace("schoold-users-crud");
    let admin = create_user(&mut sc, "1", "Priya Admin", "priya@school.test", "admin");
    let teacher = create_user(&mut sc, "2", "Tom Teacher", "tom@school.test", "teacher");

    let listed = request_ok(&mut sc, "3", "users.list", json!({}));
    let users = listed["users"].as_array().expect("users");
    assert_eq!(users.len(), 2);
    assert_eq!(users[0]["id"], json!(teacher));
    assert_eq!(users[1]["role"], json!("admin"));
    assert_eq!(users[1]["isActive"], json!(true));

    let found = request_ok(&mut sc, "4", "users.search", json!({ "term": "PRIYA" }));
    assert_eq!(found["users"][0]["id"], json!(admin));

    let updated = request_ok(
        &mut sc,
        "5",
        "users.update",
        json!({ "userId": teacher, "role": "admin", "isActive": false }),
    );
    assert_eq!(updated["user"]["role"], json!("admin"));
    assert_eq!(updated["user"]["isActive"], json!(false));

    let code = request_err(
        &mut sc,
        "6",
        "users.update",
        json!({ "userId": teacher, "email": "priya@school.test" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut sc,
        "7",
        "users.update",
        json!({ "userId": teacher, "role": "principal" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn create_rejects_short_passwords_and_duplicate_emails() {
    let mut sc = open_workspace("schoold-users-validate");
    let code = request_err(
        &mut sc,
        "1",
        "users.create",
        json!({
            "fullName": "Short", "email": "short@school.test", "contactNumber": "1",
            "password": "12345", "role": "teacher"
        }),
    );
    assert_eq!(code, "bad_params");

    let _ = create_user(&mut sc, "2", "First", "dup@school.test", "teacher");
    let code = request_err(
        &mut sc,
        "3",
        "users.create",
        json!({
            "fullName": "Second", "email": "DUP@school.test", "contactNumber": "1",
            "password": "123456", "role": "teacher"
        }),
    );
    assert_eq!(code, "bad_params");
    let listed = request_ok(&mut sc, "4", "users.list", json!({}));
    assert_eq!(listed["users"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn change_password_and_delete_frees_the_email() {
    let mut sc = open_workspace("schoold-users-password");
    let id = create_user(&mut sc, "1", "Rae", "rae@school.test", "teacher");

    let code = request_err(
        &mut sc,
        "2",
        "users.changePassword",
        json!({ "userId": id, "newPassword": "abcdef", "confirmPassword": "abcdeg" }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut sc,
        "3",
        "users.changePassword",
        json!({ "userId": id, "newPassword": "abc", "confirmPassword": "abc" }),
    );
    assert_eq!(code, "bad_params");
    let _ = request_ok(
        &mut sc,
        "4",
        "users.changePassword",
        json!({ "userId": id, "newPassword": "abcdef", "confirmPassword": "abcdef" }),
    );

    let _ = request_ok(&mut sc, "5", "users.delete", json!({ "userId": id }));
    let got = request_ok(&mut sc, "6", "users.get", json!({ "userId": id }));
    assert!(got["user"].is_null());
    let code = request_err(
        &mut sc,
        "7",
        "users.changePassword",
        json!({ "userId": id, "newPassword": "abcdef", "confirmPassword": "abcdef" }),
    );
    assert_eq!(code, "not_found");

    let _ = create_user(&mut sc, "8", "Rae Again", "rae@school.test", "teacher");
}
