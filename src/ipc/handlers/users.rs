use crate::db;
use crate::ipc::helpers::{
    db_failed, like_pattern, new_id, optional_bool, optional_str, required_str, run_with_conn,
    to_json, HandlerErr, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AppUser, Role};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

const USER_COLUMNS: &str =
    "id, full_name, email, contact_number, role, is_active, created_at, updated_at";

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<AppUser> {
    Ok(AppUser {
        id: r.get(0)?,
        full_name: r.get(1)?,
        email: r.get(2)?,
        contact_number: r.get(3)?,
        role: r.get(4)?,
        is_active: r.get::<_, i64>(5)? != 0,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn check_password(password: &str) -> Result<(), HandlerErr> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(HandlerErr::bad_params(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Raw password param; unlike other strings it is not trimmed.
fn password_param(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        None | Some(Value::Null) => Err(HandlerErr::bad_params(format!("missing {}", key))),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

fn query_users(
    conn: &Connection,
    where_sql: &str,
    args: Vec<SqlValue>,
) -> Result<Vec<AppUser>, HandlerErr> {
    let ctx = "Failed to fetch users";
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM app_users {} ORDER BY created_at DESC, rowid DESC",
            USER_COLUMNS, where_sql
        ))
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map(params_from_iter(args), user_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

fn load_user(conn: &Connection, user_id: &str) -> Result<Option<AppUser>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM app_users WHERE id = ?", USER_COLUMNS),
        [user_id],
        user_from_row,
    )
    .optional()
    .map_err(db_failed("db_query_failed", "Failed to fetch user"))
}

fn email_taken(conn: &Connection, email: &str, except_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM app_users WHERE lower(email) = lower(?1) AND id <> ?2
         UNION ALL
         SELECT 1 FROM auth_credentials WHERE lower(email) = lower(?1) AND id <> ?2
         LIMIT 1",
        (email, except_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_failed("db_query_failed", "Failed to check email"))
}

fn users_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "users": to_json(&query_users(conn, "", Vec::new())?)? }))
}

fn users_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    Ok(json!({ "user": to_json(&load_user(conn, &user_id)?)? }))
}

fn users_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let full_name = required_str(params, "fullName")?;
    let email = required_str(params, "email")?;
    let contact_number = required_str(params, "contactNumber")?;
    let role = Role::parse(&required_str(params, "role")?)?;
    let password = password_param(params, "password")?;
    check_password(&password)?;

    let user_id = new_id();
    if email_taken(conn, &email, &user_id)? {
        return Err(HandlerErr::bad_params("a user with this email already exists"));
    }

    let now = db::now_ts();
    let salt = Uuid::new_v4().simple().to_string();
    conn.execute(
        "INSERT INTO auth_credentials(id, email, password_salt, password_hash, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &email,
            &salt,
            password_digest(&salt, &password),
            &now,
            &now,
        ),
    )
    .map_err(db_failed("db_insert_failed", "Failed to create user credentials"))?;

    let inserted = conn.execute(
        "INSERT INTO app_users(id, full_name, email, contact_number, role, is_active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
        (&user_id, &full_name, &email, &contact_number, role, &now, &now),
    );
    if let Err(e) = inserted {
        // Roll the credential back so the email can be reused.
        if let Err(cleanup) =
            conn.execute("DELETE FROM auth_credentials WHERE id = ?", [&user_id])
        {
            tracing::warn!(user_id = %user_id, "credential cleanup failed: {}", cleanup);
        }
        return Err(HandlerErr::new(
            "db_insert_failed",
            format!("Failed to create user: {}", e),
        ));
    }

    tracing::info!(user_id = %user_id, role = role.as_str(), "user created");
    let user = load_user(conn, &user_id)?.ok_or_else(|| HandlerErr::not_found("user not found"))?;
    Ok(json!({ "userId": user_id, "user": to_json(&user)? }))
}

fn users_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;

    let mut sets: Vec<&'static str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(name) = optional_str(params, "fullName")? {
        sets.push("full_name = ?");
        args.push(SqlValue::Text(name));
    }
    let email = optional_str(params, "email")?;
    if let Some(e) = &email {
        sets.push("email = ?");
        args.push(SqlValue::Text(e.clone()));
    }
    if let Some(contact) = optional_str(params, "contactNumber")? {
        sets.push("contact_number = ?");
        args.push(SqlValue::Text(contact));
    }
    if let Some(role) = optional_str(params, "role")? {
        sets.push("role = ?");
        args.push(SqlValue::Text(Role::parse(&role)?.as_str().to_string()));
    }
    if let Some(active) = optional_bool(params, "isActive")? {
        sets.push("is_active = ?");
        args.push(SqlValue::Integer(active as i64));
    }

    if load_user(conn, &user_id)?.is_none() {
        return Err(HandlerErr::not_found("user not found"));
    }
    if let Some(e) = &email {
        if email_taken(conn, e, &user_id)? {
            return Err(HandlerErr::bad_params("a user with this email already exists"));
        }
    }
    if !sets.is_empty() {
        let now = db::now_ts();
        sets.push("updated_at = ?");
        args.push(SqlValue::Text(now.clone()));
        args.push(SqlValue::Text(user_id.clone()));

        let tx = conn
            .unchecked_transaction()
            .map_err(db_failed("db_tx_failed", "Failed to update user"))?;
        tx.execute(
            &format!("UPDATE app_users SET {} WHERE id = ?", sets.join(", ")),
            params_from_iter(args),
        )
        .map_err(db_failed("db_update_failed", "Failed to update user"))?;
        if let Some(e) = &email {
            tx.execute(
                "UPDATE auth_credentials SET email = ?, updated_at = ? WHERE id = ?",
                (e, &now, &user_id),
            )
            .map_err(db_failed("db_update_failed", "Failed to update user credentials"))?;
        }
        tx.commit()
            .map_err(db_failed("db_tx_failed", "Failed to update user"))?;
        tracing::info!(user_id = %user_id, "user updated");
    }
    Ok(json!({ "user": to_json(&load_user(conn, &user_id)?)? }))
}

fn users_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let changed = conn
        .execute("DELETE FROM app_users WHERE id = ?", [&user_id])
        .map_err(db_failed("db_delete_failed", "Failed to delete user"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    if let Err(e) = conn.execute("DELETE FROM auth_credentials WHERE id = ?", [&user_id]) {
        tracing::warn!(user_id = %user_id, "failed to delete user credentials: {}", e);
    }
    tracing::info!(user_id = %user_id, "user deleted");
    Ok(json!({ "ok": true }))
}

fn users_search(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(term) = optional_str(params, "term")? else {
        return users_list(conn, params);
    };
    let users = query_users(
        conn,
        "WHERE full_name LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\'",
        vec![SqlValue::Text(like_pattern(&term))],
    )?;
    Ok(json!({ "users": to_json(&users)? }))
}

fn users_change_password(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let new_password = password_param(params, "newPassword")?;
    let confirm = password_param(params, "confirmPassword")?;
    if new_password != confirm {
        return Err(HandlerErr::bad_params("passwords do not match"));
    }
    check_password(&new_password)?;

    let salt = Uuid::new_v4().simple().to_string();
    let changed = conn
        .execute(
            "UPDATE auth_credentials SET password_salt = ?, password_hash = ?, updated_at = ?
             WHERE id = ?",
            (
                &salt,
                password_digest(&salt, &new_password),
                db::now_ts(),
                &user_id,
            ),
        )
        .map_err(db_failed("db_update_failed", "Failed to change password"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    tracing::info!(user_id = %user_id, "password changed");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "users.list" => users_list,
        "users.get" => users_get,
        "users.create" => users_create,
        "users.update" => users_update,
        "users.delete" => users_delete,
        "users.search" => users_search,
        "users.changePassword" => users_change_password,
        _ => return None,
    };
    Some(run_with_conn(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_depends_on_salt() {
        let a = password_digest("s1", "secret");
        assert_eq!(a.len(), 64);
        assert_eq!(a, password_digest("s1", "secret"));
        assert_ne!(a, password_digest("s2", "secret"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(check_password("12345").is_err());
        assert!(check_password("123456").is_ok());
    }
}
