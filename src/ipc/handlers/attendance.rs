use crate::calc;
use crate::db;
use crate::ipc::handlers::{setup, students};
use crate::ipc::helpers::{
    array_param, db_failed, new_id, required_str, run_with_conn, to_json, HandlerErr, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_date, AttendanceRecord, AttendanceStatus, AttendanceWithStudent};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

const RECORD_COLUMNS: &str = "id, student_id, date, status, class_name, created_at, updated_at";

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        date: r.get(2)?,
        status: r.get(3)?,
        class_name: r.get(4)?,
        created_at: r.get(5)?,
        updated_at: r.get(6)?,
    })
}

/// Every stored status, grouped by student.
pub fn statuses_by_student(
    conn: &Connection,
) -> Result<HashMap<String, Vec<AttendanceStatus>>, HandlerErr> {
    let ctx = "Failed to fetch attendance";
    let mut stmt = conn
        .prepare("SELECT student_id, status FROM attendance")
        .map_err(db_failed("db_query_failed", ctx))?;
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, AttendanceStatus>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))?;
    let mut by_student: HashMap<String, Vec<AttendanceStatus>> = HashMap::new();
    for (student_id, status) in rows {
        by_student.entry(student_id).or_default().push(status);
    }
    Ok(by_student)
}

pub fn history_for_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<AttendanceRecord>, HandlerErr> {
    let ctx = "Failed to fetch attendance";
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM attendance WHERE student_id = ? ORDER BY date",
            RECORD_COLUMNS
        ))
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map([student_id], record_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

pub fn student_attendance_percentage(
    conn: &Connection,
    student_id: &str,
) -> Result<i64, HandlerErr> {
    let statuses = history_for_student(conn, student_id)?
        .into_iter()
        .map(|r| r.status);
    Ok(calc::attendance_percentage(statuses))
}

fn records_for_class_date(
    conn: &Connection,
    class_name: &str,
    date: &str,
) -> Result<Vec<AttendanceRecord>, HandlerErr> {
    let ctx = "Failed to fetch attendance records";
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM attendance WHERE class_name = ? AND date = ?",
            RECORD_COLUMNS
        ))
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map((class_name, date), record_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

fn class_and_date(params: &Value) -> Result<(String, String), HandlerErr> {
    let class_name = required_str(params, "class")?;
    let date = required_str(params, "date")?;
    parse_date("date", &date)?;
    Ok((class_name, date))
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (class_name, date) = class_and_date(params)?;
    let ctx = "Failed to fetch attendance";
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.student_id, s.name, a.date, a.status, a.class_name, a.created_at, a.updated_at
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE a.class_name = ? AND a.date = ?
             ORDER BY s.name",
        )
        .map_err(db_failed("db_query_failed", ctx))?;
    let records = stmt
        .query_map((&class_name, &date), |r| {
            Ok(AttendanceWithStudent {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                date: r.get(3)?,
                status: r.get(4)?,
                class_name: r.get(5)?,
                created_at: r.get(6)?,
                updated_at: r.get(7)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))?;
    Ok(json!({ "records": to_json(&records)? }))
}

fn attendance_roster(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (class_name, date) = class_and_date(params)?;
    let roster = students::roster_for_class(conn, &class_name)?;
    if roster.is_empty() {
        return Ok(json!({ "records": [] }));
    }
    let unmarked = setup::unmarked_status(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let by_student: HashMap<String, AttendanceRecord> =
        records_for_class_date(conn, &class_name, &date)?
            .into_iter()
            .map(|r| (r.student_id.clone(), r))
            .collect();

    let records: Vec<AttendanceWithStudent> = roster
        .into_iter()
        .map(|s| match by_student.get(&s.id) {
            Some(existing) => AttendanceWithStudent {
                id: existing.id.clone(),
                student_id: s.id,
                student_name: s.name,
                date: date.clone(),
                status: existing.status,
                class_name: class_name.clone(),
                created_at: existing.created_at.clone(),
                updated_at: existing.updated_at.clone(),
            },
            None => AttendanceWithStudent {
                id: String::new(),
                student_id: s.id,
                student_name: s.name,
                date: date.clone(),
                status: unmarked,
                class_name: class_name.clone(),
                created_at: String::new(),
                updated_at: String::new(),
            },
        })
        .collect();
    Ok(json!({ "records": to_json(&records)? }))
}

struct MarkInput {
    student_id: String,
    date: String,
    status: AttendanceStatus,
    class_name: String,
}

fn parse_mark_input(v: &Value) -> Result<MarkInput, HandlerErr> {
    let (class_name, date) = class_and_date(v)?;
    Ok(MarkInput {
        student_id: required_str(v, "studentId")?,
        date,
        status: AttendanceStatus::parse(&required_str(v, "status")?)?,
        class_name,
    })
}

/// The student must exist and belong to the class being marked.
fn check_student_class(conn: &Connection, input: &MarkInput) -> Result<(), HandlerErr> {
    match students::student_class(conn, &input.student_id)? {
        None => Err(HandlerErr::not_found("student not found")),
        Some(c) if c != input.class_name => Err(HandlerErr::bad_params(format!(
            "student belongs to class {}, not {}",
            c, input.class_name
        ))),
        Some(_) => Ok(()),
    }
}

/// Insert-or-update keyed on (student_id, date).
fn upsert_record(conn: &Connection, input: &MarkInput) -> Result<(), HandlerErr> {
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO attendance(id, student_id, date, status, class_name, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status,
           class_name = excluded.class_name,
           updated_at = excluded.updated_at",
        (
            new_id(),
            &input.student_id,
            &input.date,
            input.status,
            &input.class_name,
            &now,
            &now,
        ),
    )
    .map_err(db_failed("db_update_failed", "Failed to save attendance"))?;
    Ok(())
}

fn attendance_mark(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = parse_mark_input(params)?;
    check_student_class(conn, &input)?;
    upsert_record(conn, &input)?;

    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM attendance WHERE student_id = ? AND date = ?",
                RECORD_COLUMNS
            ),
            (&input.student_id, &input.date),
            record_from_row,
        )
        .optional()
        .map_err(db_failed("db_query_failed", "Failed to fetch attendance"))?
        .ok_or_else(|| HandlerErr::not_found("attendance record not found"))?;
    tracing::info!(
        student_id = %input.student_id,
        date = %input.date,
        status = input.status.as_str(),
        "attendance marked"
    );
    Ok(json!({ "record": to_json(&record)? }))
}

fn attendance_bulk_mark(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let raw = array_param(params, "records")?;
    let mut inputs: Vec<MarkInput> = Vec::with_capacity(raw.len());
    for (i, v) in raw.iter().enumerate() {
        let input = parse_mark_input(v)
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        inputs.push(input);
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_failed("db_tx_failed", "Failed to save attendance"))?;
    for (i, input) in inputs.iter().enumerate() {
        check_student_class(&tx, input)
            .map_err(|e| e.with_details(json!({ "index": i, "studentId": input.student_id })))?;
        upsert_record(&tx, input)?;
    }
    tx.commit()
        .map_err(db_failed("db_tx_failed", "Failed to save attendance"))?;

    tracing::info!(count = inputs.len(), "attendance bulk saved");
    Ok(json!({ "saved": inputs.len() }))
}

fn attendance_stats(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (class_name, date) = class_and_date(params)?;
    let roster: HashSet<String> = students::roster_for_class(conn, &class_name)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    // Records left behind by a class change do not count toward this roster.
    let statuses = records_for_class_date(conn, &class_name, &date)?
        .into_iter()
        .filter(|r| roster.contains(&r.student_id))
        .map(|r| r.status);
    to_json(&calc::class_attendance_stats(roster.len(), statuses))
}

fn attendance_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let records = history_for_student(conn, &student_id)?;
    let percentage = calc::attendance_percentage(records.iter().map(|r| r.status));
    Ok(json!({
        "records": to_json(&records)?,
        "attendance": percentage
    }))
}

fn attendance_classes(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "classes": students::distinct_classes(conn)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "attendance.list" => attendance_list,
        "attendance.roster" => attendance_roster,
        "attendance.mark" => attendance_mark,
        "attendance.bulkMark" => attendance_bulk_mark,
        "attendance.stats" => attendance_stats,
        "attendance.history" => attendance_history,
        "attendance.classes" => attendance_classes,
        _ => return None,
    };
    Some(run_with_conn(state, req, f))
}
