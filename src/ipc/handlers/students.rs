use crate::calc;
use crate::db;
use crate::ipc::handlers::{attendance, exams, fees, setup};
use crate::ipc::helpers::{
    db_failed, like_pattern, new_id, optional_f64, optional_str, patch_object, required_str,
    run_with_conn, single_field, to_json, HandlerErr, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, parse_date, FeeStatus, Student};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

const STUDENT_COLUMNS: &str = "id, name, email, phone, address, class_name, fee_status, \
                               fee_amount, enrollment_date, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct BasicStudent {
    pub id: String,
    pub name: String,
    pub class_name: String,
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        phone: r.get(3)?,
        address: r.get(4)?,
        class_name: r.get(5)?,
        attendance: 0,
        fee_status: r.get(6)?,
        fee_amount: r.get(7)?,
        enrollment_date: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_failed("db_query_failed", "Failed to fetch student"))
}

pub fn student_class(conn: &Connection, student_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT class_name FROM students WHERE id = ?",
        [student_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(db_failed("db_query_failed", "Failed to fetch student"))
}

/// Students of a class ordered by name.
pub fn roster_for_class(
    conn: &Connection,
    class_name: &str,
) -> Result<Vec<BasicStudent>, HandlerErr> {
    let ctx = "Failed to fetch students";
    let mut stmt = conn
        .prepare(
            "SELECT id, name, class_name
             FROM students
             WHERE class_name = ?
             ORDER BY name, id",
        )
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map([class_name], |r| {
        Ok(BasicStudent {
            id: r.get(0)?,
            name: r.get(1)?,
            class_name: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_failed("db_query_failed", ctx))
}

pub fn distinct_classes(conn: &Connection) -> Result<Vec<String>, HandlerErr> {
    let ctx = "Failed to fetch classes";
    let mut stmt = conn
        .prepare("SELECT DISTINCT class_name FROM students ORDER BY class_name")
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<Student>, HandlerErr> {
    let student = conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
            [student_id],
            student_from_row,
        )
        .optional()
        .map_err(db_failed("db_query_failed", "Failed to fetch student"))?;
    match student {
        Some(mut s) => {
            s.attendance = attendance::student_attendance_percentage(conn, &s.id)?;
            Ok(Some(s))
        }
        None => Ok(None),
    }
}

/// Runs a student query and fills in each row's attendance percentage.
fn query_students(
    conn: &Connection,
    where_sql: &str,
    args: Vec<SqlValue>,
) -> Result<Vec<Student>, HandlerErr> {
    let ctx = "Failed to fetch students";
    let sql = format!(
        "SELECT {} FROM students {} ORDER BY created_at DESC, rowid DESC",
        STUDENT_COLUMNS, where_sql
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_failed("db_query_failed", ctx))?;
    let mut students = stmt
        .query_map(params_from_iter(args), student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))?;

    let by_student = attendance::statuses_by_student(conn)?;
    for s in students.iter_mut() {
        s.attendance = by_student
            .get(&s.id)
            .map(|statuses| calc::attendance_percentage(statuses.iter().copied()))
            .unwrap_or(0);
    }
    Ok(students)
}

fn students_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let students = query_students(conn, "", Vec::new())?;
    Ok(json!({ "students": to_json(&students)? }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let student = load_student(conn, &student_id)?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn parse_fee_amount(v: Option<f64>) -> Result<Option<f64>, HandlerErr> {
    match v {
        Some(n) if n < 0.0 => Err(HandlerErr::bad_params("feeAmount must be >= 0")),
        other => Ok(other),
    }
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let email = required_str(params, "email")?;
    let phone = required_str(params, "phone")?;
    let address = optional_str(params, "address")?;
    let class_name = required_str(params, "class")?;
    let enrollment_date = required_str(params, "enrollmentDate")?;
    parse_date("enrollmentDate", &enrollment_date)?;
    let fee_amount = match parse_fee_amount(optional_f64(params, "feeAmount")?)? {
        Some(n) => n,
        None => setup::default_fee_amount(conn)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?,
    };

    let student_id = new_id();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO students(
            id, name, email, phone, address, class_name, fee_status, fee_amount,
            enrollment_date, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &name,
            &email,
            &phone,
            &address,
            &class_name,
            FeeStatus::NotStarted,
            fee_amount,
            &enrollment_date,
            &now,
            &now,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", format!("Failed to create student: {}", e))
            .with_details(json!({ "table": "students" }))
    })?;

    tracing::info!(student_id = %student_id, class = %class_name, "student created");
    let student = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "studentId": student_id, "student": to_json(&student)? }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let patch = patch_object(params)?;

    let mut sets: Vec<&'static str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    for (k, v) in patch {
        let one = single_field(k, v);
        match k.as_str() {
            "name" | "email" | "phone" | "class" => {
                let s = required_str(&one, k)?;
                sets.push(match k.as_str() {
                    "name" => "name = ?",
                    "email" => "email = ?",
                    "phone" => "phone = ?",
                    _ => "class_name = ?",
                });
                args.push(SqlValue::Text(s));
            }
            "address" => {
                sets.push("address = ?");
                args.push(match optional_str(&one, k)? {
                    Some(s) => SqlValue::Text(s),
                    None => SqlValue::Null,
                });
            }
            "enrollmentDate" => {
                let s = required_str(&one, k)?;
                parse_date("enrollmentDate", &s)?;
                sets.push("enrollment_date = ?");
                args.push(SqlValue::Text(s));
            }
            "feeAmount" => {
                let n = parse_fee_amount(optional_f64(&one, k)?)?
                    .ok_or_else(|| HandlerErr::bad_params("feeAmount must be a number"))?;
                sets.push("fee_amount = ?");
                args.push(SqlValue::Real(n));
            }
            "feeStatus" => {
                let status = FeeStatus::parse(&required_str(&one, k)?)?;
                sets.push("fee_status = ?");
                args.push(SqlValue::Text(status.as_str().to_string()));
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown student field: {}", k))),
        }
    }

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    if !sets.is_empty() {
        sets.push("updated_at = ?");
        args.push(SqlValue::Text(db::now_ts()));
        args.push(SqlValue::Text(student_id.clone()));
        let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
        conn.execute(&sql, params_from_iter(args))
            .map_err(db_failed("db_update_failed", "Failed to update student"))?;
        tracing::info!(student_id = %student_id, fields = sets.len() - 1, "student updated");
    }

    let student = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_failed("db_tx_failed", "Failed to delete student"))?;
    // Dependents first; the schema has no ON DELETE CASCADE.
    for table in ["attendance", "fee_records", "exam_marks", "students"] {
        let column = if table == "students" { "id" } else { "student_id" };
        tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?", table, column),
            [&student_id],
        )
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", format!("Failed to delete student: {}", e))
                .with_details(json!({ "table": table }))
        })?;
    }
    tx.commit()
        .map_err(db_failed("db_tx_failed", "Failed to delete student"))?;

    tracing::info!(student_id = %student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

fn students_search(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(term) = optional_str(params, "term")? else {
        return students_list(conn, params);
    };
    let pattern = like_pattern(&term);
    let students = query_students(
        conn,
        "WHERE name LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\'
            OR phone LIKE ?1 ESCAPE '\\' OR class_name LIKE ?1 ESCAPE '\\'",
        vec![SqlValue::Text(pattern)],
    )?;
    Ok(json!({ "students": to_json(&students)? }))
}

fn students_stats(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let students = query_students(conn, "", Vec::new())?;
    let this_month = model::month_key(model::today());
    let active = students
        .iter()
        .filter(|s| s.fee_status != FeeStatus::NotStarted)
        .count();
    let new_this_month = students
        .iter()
        .filter(|s| s.enrollment_date.starts_with(&this_month))
        .count();
    let avg_attendance = calc::mean_1dp(students.iter().map(|s| s.attendance as f64));
    Ok(json!({
        "total": students.len(),
        "active": active,
        "newThisMonth": new_this_month,
        "avgAttendance": avg_attendance
    }))
}

fn students_profile(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let student = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let history: serde_json::Map<String, Value> =
        attendance::history_for_student(conn, &student.id)?
            .into_iter()
            .map(|r| (r.date, Value::String(r.status.as_str().to_string())))
            .collect();
    let current_month = model::month_key(model::today());
    let fee_records = fees::records_for_student_month(conn, &student.id, &current_month)?;
    let exam_results = exams::results_for_student(conn, &student.id, &student.class_name)?;

    Ok(json!({
        "student": to_json(&student)?,
        "attendanceHistory": history,
        "feeRecords": to_json(&fee_records)?,
        "examResults": exam_results
    }))
}

fn students_classes(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "classes": distinct_classes(conn)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.search" => students_search,
        "students.stats" => students_stats,
        "students.profile" => students_profile,
        "students.classes" => students_classes,
        _ => return None,
    };
    Some(run_with_conn(state, req, f))
}
