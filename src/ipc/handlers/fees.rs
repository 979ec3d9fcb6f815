use crate::calc;
use crate::db;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_failed, new_id, optional_str, required_str, run_with_conn, to_json, HandlerErr, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, parse_month_key, FeeRecord, FeeRecordWithStudent, FeeStatus};
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

const RECORD_COLUMNS: &str =
    "f.id, f.student_id, f.month, f.year, f.month_name, f.amount, f.status, f.due_date, f.paid_date, f.created_at, f.updated_at";

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<FeeRecord> {
    Ok(FeeRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        month: r.get(2)?,
        year: r.get(3)?,
        month_name: r.get(4)?,
        amount: r.get(5)?,
        status: r.get(6)?,
        due_date: r.get(7)?,
        paid_date: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

pub fn records_for_student_month(
    conn: &Connection,
    student_id: &str,
    month: &str,
) -> Result<Vec<FeeRecord>, HandlerErr> {
    let ctx = "Failed to fetch fee records";
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM fee_records f WHERE f.student_id = ? AND f.month = ?",
            RECORD_COLUMNS
        ))
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map((student_id, month), record_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

fn records_with_students(
    conn: &Connection,
    month: &str,
    class_name: Option<&str>,
) -> Result<Vec<FeeRecordWithStudent>, HandlerErr> {
    let mut args: Vec<SqlValue> = vec![SqlValue::Text(month.to_string())];
    let class_clause = match class_name {
        Some(c) => {
            args.push(SqlValue::Text(c.to_string()));
            "AND s.class_name = ?"
        }
        None => "",
    };
    let ctx = "Failed to fetch fee records";
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {}, s.name, s.class_name, s.email
             FROM fee_records f
             JOIN students s ON s.id = f.student_id
             WHERE f.month = ? {}
             ORDER BY s.name, s.id",
            RECORD_COLUMNS, class_clause
        ))
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map(params_from_iter(args), |r| {
        Ok(FeeRecordWithStudent {
            record: record_from_row(r)?,
            student_name: r.get(11)?,
            student_class: r.get(12)?,
            student_email: r.get(13)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_failed("db_query_failed", ctx))
}

fn month_param(params: &Value) -> Result<(String, i32, u32), HandlerErr> {
    let month = required_str(params, "month")?;
    let (year, m) = parse_month_key("month", &month)?;
    Ok((month, year, m))
}

fn fees_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (month, _, _) = month_param(params)?;
    let class_name = optional_str(params, "class")?;
    let records = records_with_students(conn, &month, class_name.as_deref())?;
    Ok(json!({ "records": to_json(&records)? }))
}

/// One record per student for the month. Rows that already exist keep
/// their status and paid date.
fn generate_month(
    conn: &Connection,
    month: &str,
    year: i32,
    month_num: u32,
    month_label: &str,
) -> Result<usize, HandlerErr> {
    let due_day = setup::fee_due_day(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let due_date = NaiveDate::from_ymd_opt(year, month_num, due_day)
        .ok_or_else(|| HandlerErr::bad_params("month has no configured due day"))?
        .format("%Y-%m-%d")
        .to_string();

    let ctx = "Failed to generate fee records";
    let students: Vec<(String, f64)> = {
        let mut stmt = conn
            .prepare("SELECT id, fee_amount FROM students")
            .map_err(db_failed("db_query_failed", ctx))?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_failed("db_query_failed", ctx))?;
        rows
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(db_failed("db_tx_failed", ctx))?;
    let now = db::now_ts();
    for (student_id, amount) in &students {
        tx.execute(
            "INSERT INTO fee_records(id, student_id, month, year, month_name, amount, status, due_date, paid_date, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
             ON CONFLICT(student_id, month) DO UPDATE SET
               year = excluded.year,
               month_name = excluded.month_name,
               amount = excluded.amount,
               due_date = excluded.due_date,
               updated_at = excluded.updated_at",
            (
                new_id(),
                student_id,
                month,
                year,
                month_label,
                amount,
                FeeStatus::NotStarted,
                &due_date,
                &now,
                &now,
            ),
        )
        .map_err(db_failed("db_insert_failed", ctx))?;
    }
    tx.commit().map_err(db_failed("db_tx_failed", ctx))?;

    tracing::info!(month = %month, count = students.len(), "fee records generated");
    Ok(students.len())
}

fn fees_generate_month(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (month, key_year, month_num) = month_param(params)?;
    let year = match params.get("year") {
        None | Some(Value::Null) => key_year,
        Some(v) => v
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .ok_or_else(|| HandlerErr::bad_params("year must be an integer"))?,
    };
    let month_label = optional_str(params, "monthName")?
        .unwrap_or_else(|| model::month_name(month_num).to_string());
    let generated = generate_month(conn, &month, year, month_num, &month_label)?;
    Ok(json!({ "month": month, "generated": generated }))
}

fn fees_ensure_current_month(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let today = model::today();
    let month = model::month_key(today);
    let (year, month_num) = parse_month_key("month", &month)?;
    let generated = generate_month(conn, &month, year, month_num, model::month_name(month_num))?;
    Ok(json!({ "month": month, "generated": generated }))
}

fn fees_update_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let (month, _, _) = month_param(params)?;
    let status = FeeStatus::parse(&required_str(params, "status")?)?;
    let paid_date = match status {
        FeeStatus::Paid => Some(model::today().format("%Y-%m-%d").to_string()),
        _ => None,
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(db_failed("db_tx_failed", "Failed to update fee status"))?;
    let changed = tx
        .execute(
            "UPDATE fee_records SET status = ?, paid_date = ?, updated_at = ?
             WHERE student_id = ? AND month = ?",
            (status, &paid_date, db::now_ts(), &student_id, &month),
        )
        .map_err(db_failed("db_update_failed", "Failed to update fee status"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("fee record not found"));
    }
    if month == model::month_key(model::today()) {
        tx.execute(
            "UPDATE students SET fee_status = ?, updated_at = ? WHERE id = ?",
            (status, db::now_ts(), &student_id),
        )
        .map_err(db_failed("db_update_failed", "Failed to update student fee status"))?;
    }
    tx.commit()
        .map_err(db_failed("db_tx_failed", "Failed to update fee status"))?;

    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM fee_records f WHERE f.student_id = ? AND f.month = ?",
                RECORD_COLUMNS
            ),
            (&student_id, &month),
            record_from_row,
        )
        .optional()
        .map_err(db_failed("db_query_failed", "Failed to fetch fee record"))?
        .ok_or_else(|| HandlerErr::not_found("fee record not found"))?;
    tracing::info!(student_id = %student_id, month = %month, status = status.as_str(), "fee status updated");
    Ok(json!({ "record": to_json(&record)? }))
}

fn fees_stats(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (month, _, _) = month_param(params)?;
    let class_name = optional_str(params, "class")?;
    let records = records_with_students(conn, &month, class_name.as_deref())?;
    to_json(&calc::monthly_fee_stats(
        records.iter().map(|r| (r.record.status, r.record.amount)),
    ))
}

fn fees_months(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let ctx = "Failed to fetch fee months";
    let mut stmt = conn
        .prepare("SELECT DISTINCT month FROM fee_records ORDER BY month DESC")
        .map_err(db_failed("db_query_failed", ctx))?;
    let keys = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))?;

    let mut months = Vec::with_capacity(keys.len());
    for key in keys {
        let Ok((year, m)) = parse_month_key("month", &key) else {
            tracing::warn!(month = %key, "skipping malformed fee month");
            continue;
        };
        months.push(json!({
            "value": key,
            "label": format!("{} {}", model::month_name(m), year)
        }));
    }
    Ok(json!({ "months": months }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "fees.list" => fees_list,
        "fees.generateMonth" => fees_generate_month,
        "fees.ensureCurrentMonth" => fees_ensure_current_month,
        "fees.updateStatus" => fees_update_status,
        "fees.stats" => fees_stats,
        "fees.months" => fees_months,
        _ => return None,
    };
    Some(run_with_conn(state, req, f))
}
