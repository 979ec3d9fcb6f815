use crate::calc::{self, MarkEntry};
use crate::db;
use crate::ipc::handlers::{setup, students};
use crate::ipc::helpers::{
    array_param, db_failed, new_id, optional_bool, optional_f64, optional_str, patch_object,
    required_f64, required_str, run_with_conn, single_field, to_json, HandlerErr, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_date, Exam, ExamMarkWithStudent, ExamWithStats};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use std::collections::HashMap;

const EXAM_COLUMNS: &str =
    "id, name, class_name, subject, total_marks, exam_date, created_at, updated_at";

fn exam_from_row(r: &Row<'_>) -> rusqlite::Result<Exam> {
    Ok(Exam {
        id: r.get(0)?,
        name: r.get(1)?,
        class_name: r.get(2)?,
        subject: r.get(3)?,
        total_marks: r.get(4)?,
        exam_date: r.get(5)?,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

struct StoredMark {
    id: String,
    student_id: String,
    marks_obtained: f64,
    is_absent: bool,
    created_at: String,
    updated_at: String,
}

impl StoredMark {
    fn entry(&self) -> MarkEntry {
        MarkEntry {
            marks_obtained: self.marks_obtained,
            is_absent: self.is_absent,
        }
    }
}

fn load_exam(conn: &Connection, exam_id: &str) -> Result<Option<Exam>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM exams WHERE id = ?", EXAM_COLUMNS),
        [exam_id],
        exam_from_row,
    )
    .optional()
    .map_err(db_failed("db_query_failed", "Failed to fetch exam"))
}

fn require_exam(conn: &Connection, exam_id: &str) -> Result<Exam, HandlerErr> {
    load_exam(conn, exam_id)?.ok_or_else(|| HandlerErr::not_found("Exam not found"))
}

fn marks_for_exam(conn: &Connection, exam_id: &str) -> Result<Vec<StoredMark>, HandlerErr> {
    let ctx = "Failed to fetch exam marks";
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, marks_obtained, is_absent, created_at, updated_at
             FROM exam_marks
             WHERE exam_id = ?",
        )
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map([exam_id], |r| {
        Ok(StoredMark {
            id: r.get(0)?,
            student_id: r.get(1)?,
            marks_obtained: r.get(2)?,
            is_absent: r.get::<_, i64>(3)? != 0,
            created_at: r.get(4)?,
            updated_at: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_failed("db_query_failed", ctx))
}

fn query_exams(
    conn: &Connection,
    class_name: Option<&str>,
    subject: Option<&str>,
) -> Result<Vec<Exam>, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(c) = class_name {
        clauses.push("class_name = ?");
        args.push(SqlValue::Text(c.to_string()));
    }
    if let Some(s) = subject {
        clauses.push("subject = ?");
        args.push(SqlValue::Text(s.to_string()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let ctx = "Failed to fetch exams";
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM exams {} ORDER BY created_at DESC, rowid DESC",
            EXAM_COLUMNS, where_sql
        ))
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map(params_from_iter(args), exam_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

/// Class exams with their non-absent averages, newest first.
pub fn exams_with_stats(
    conn: &Connection,
    class_name: Option<&str>,
    subject: Option<&str>,
) -> Result<Vec<ExamWithStats>, HandlerErr> {
    let exams = query_exams(conn, class_name, subject)?;
    let mut out = Vec::with_capacity(exams.len());
    for exam in exams {
        let marks = marks_for_exam(conn, &exam.id)?;
        let avg = calc::exam_average(marks.iter().map(StoredMark::entry));
        out.push(ExamWithStats {
            exam,
            avg_marks: avg.avg_marks,
            num_students: avg.num_students,
        });
    }
    Ok(out)
}

/// One row per exam of the class with this student's result.
pub fn results_for_student(
    conn: &Connection,
    student_id: &str,
    class_name: &str,
) -> Result<Vec<Value>, HandlerErr> {
    let exams = exams_with_stats(conn, Some(class_name), None)?;
    let mut out = Vec::with_capacity(exams.len());
    for e in exams {
        let mark = marks_for_exam(conn, &e.exam.id)?
            .into_iter()
            .find(|m| m.student_id == student_id);
        let (marks_obtained, is_absent) = mark
            .as_ref()
            .map(|m| (m.marks_obtained, m.is_absent))
            .unwrap_or((0.0, false));
        let percentage = match &mark {
            Some(m) if !m.is_absent => {
                calc::round_whole(calc::mark_percentage(m.marks_obtained, e.exam.total_marks))
            }
            _ => 0,
        };
        let mut row = to_json(&e)?;
        row["marksObtained"] = json!(marks_obtained);
        row["isAbsent"] = json!(is_absent);
        row["percentage"] = json!(percentage);
        out.push(row);
    }
    Ok(out)
}

fn exams_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = optional_str(params, "class")?;
    let subject = optional_str(params, "subject")?;
    let exams = exams_with_stats(conn, class_name.as_deref(), subject.as_deref())?;
    Ok(json!({ "exams": to_json(&exams)? }))
}

fn exams_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_id = required_str(params, "examId")?;
    Ok(json!({ "exam": to_json(&load_exam(conn, &exam_id)?)? }))
}

fn parse_total_marks(n: f64) -> Result<f64, HandlerErr> {
    if n <= 0.0 {
        return Err(HandlerErr::bad_params("totalMarks must be > 0"));
    }
    Ok(n)
}

fn exams_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let class_name = required_str(params, "class")?;
    let subject = required_str(params, "subject")?;
    let total_marks = parse_total_marks(required_f64(params, "totalMarks")?)?;
    let exam_date = required_str(params, "examDate")?;
    parse_date("examDate", &exam_date)?;

    let exam_id = new_id();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO exams(id, name, class_name, subject, total_marks, exam_date, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &exam_id,
            &name,
            &class_name,
            &subject,
            total_marks,
            &exam_date,
            &now,
            &now,
        ),
    )
    .map_err(db_failed("db_insert_failed", "Failed to create exam"))?;

    tracing::info!(exam_id = %exam_id, class = %class_name, subject = %subject, "exam created");
    Ok(json!({ "examId": exam_id, "exam": to_json(&require_exam(conn, &exam_id)?)? }))
}

fn exams_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_id = required_str(params, "examId")?;
    let patch = patch_object(params)?;

    let mut sets: Vec<&'static str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    for (k, v) in patch {
        let one = single_field(k, v);
        match k.as_str() {
            "name" => {
                sets.push("name = ?");
                args.push(SqlValue::Text(required_str(&one, k)?));
            }
            "class" => {
                sets.push("class_name = ?");
                args.push(SqlValue::Text(required_str(&one, k)?));
            }
            "subject" => {
                sets.push("subject = ?");
                args.push(SqlValue::Text(required_str(&one, k)?));
            }
            "totalMarks" => {
                sets.push("total_marks = ?");
                args.push(SqlValue::Real(parse_total_marks(required_f64(&one, k)?)?));
            }
            "examDate" => {
                let d = required_str(&one, k)?;
                parse_date("examDate", &d)?;
                sets.push("exam_date = ?");
                args.push(SqlValue::Text(d));
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown exam field: {}", k))),
        }
    }

    require_exam(conn, &exam_id)?;
    if !sets.is_empty() {
        sets.push("updated_at = ?");
        args.push(SqlValue::Text(db::now_ts()));
        args.push(SqlValue::Text(exam_id.clone()));
        conn.execute(
            &format!("UPDATE exams SET {} WHERE id = ?", sets.join(", ")),
            params_from_iter(args),
        )
        .map_err(db_failed("db_update_failed", "Failed to update exam"))?;
        tracing::info!(exam_id = %exam_id, "exam updated");
    }
    Ok(json!({ "exam": to_json(&require_exam(conn, &exam_id)?)? }))
}

fn exams_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_id = required_str(params, "examId")?;
    require_exam(conn, &exam_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_failed("db_tx_failed", "Failed to delete exam"))?;
    tx.execute("DELETE FROM exam_marks WHERE exam_id = ?", [&exam_id])
        .map_err(db_failed("db_delete_failed", "Failed to delete exam"))?;
    tx.execute("DELETE FROM exams WHERE id = ?", [&exam_id])
        .map_err(db_failed("db_delete_failed", "Failed to delete exam"))?;
    tx.commit()
        .map_err(db_failed("db_tx_failed", "Failed to delete exam"))?;

    tracing::info!(exam_id = %exam_id, "exam deleted");
    Ok(json!({ "ok": true }))
}

fn exams_details(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_id = required_str(params, "examId")?;
    let exam = require_exam(conn, &exam_id)?;
    let roster = students::roster_for_class(conn, &exam.class_name)?;
    let pass_percent = setup::pass_percent(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let by_student: HashMap<String, StoredMark> = marks_for_exam(conn, &exam_id)?
        .into_iter()
        .map(|m| (m.student_id.clone(), m))
        .collect();

    let mut entries: Vec<MarkEntry> = Vec::with_capacity(roster.len());
    let mut rows: Vec<ExamMarkWithStudent> = Vec::with_capacity(roster.len());
    for s in roster {
        let existing = by_student.get(&s.id);
        let entry = existing.map(StoredMark::entry).unwrap_or(MarkEntry {
            marks_obtained: 0.0,
            is_absent: false,
        });
        let raw_percentage = if entry.is_absent {
            0.0
        } else {
            calc::mark_percentage(entry.marks_obtained, exam.total_marks)
        };
        // Grade on the unrounded value so it agrees with the pass count.
        let grade = calc::grade_for(raw_percentage, entry.is_absent);
        let percentage = calc::round_1dp(raw_percentage);
        rows.push(ExamMarkWithStudent {
            id: existing.map(|m| m.id.clone()).unwrap_or_default(),
            exam_id: exam_id.clone(),
            student_id: s.id,
            student_name: s.name,
            student_class: s.class_name,
            marks_obtained: entry.marks_obtained,
            is_absent: entry.is_absent,
            percentage,
            grade,
            created_at: existing.map(|m| m.created_at.clone()).unwrap_or_default(),
            updated_at: existing.map(|m| m.updated_at.clone()).unwrap_or_default(),
        });
        entries.push(entry);
    }
    let summary = calc::exam_summary(&entries, exam.total_marks, pass_percent);

    Ok(json!({
        "exam": to_json(&exam)?,
        "marks": to_json(&rows)?,
        "stats": to_json(&summary)?
    }))
}

struct MarkInput {
    student_id: String,
    marks_obtained: f64,
    is_absent: bool,
}

fn parse_mark_input(v: &Value, total_marks: f64) -> Result<MarkInput, HandlerErr> {
    let student_id = required_str(v, "studentId")?;
    let is_absent = optional_bool(v, "isAbsent")?.unwrap_or(false);
    if is_absent {
        // Absence overrides whatever score was typed.
        return Ok(MarkInput {
            student_id,
            marks_obtained: 0.0,
            is_absent,
        });
    }
    let marks_obtained = optional_f64(v, "marksObtained")?.unwrap_or(0.0);
    if !(0.0..=total_marks).contains(&marks_obtained) {
        return Err(HandlerErr::bad_params(format!(
            "marksObtained must be between 0 and {}",
            total_marks
        )));
    }
    Ok(MarkInput {
        student_id,
        marks_obtained,
        is_absent,
    })
}

fn exams_save_marks(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_id = required_str(params, "examId")?;
    let exam = require_exam(conn, &exam_id)?;
    let raw = array_param(params, "marks")?;
    let mut inputs: Vec<MarkInput> = Vec::with_capacity(raw.len());
    for (i, v) in raw.iter().enumerate() {
        let input = parse_mark_input(v, exam.total_marks)
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        inputs.push(input);
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_failed("db_tx_failed", "Failed to save exam marks"))?;
    let now = db::now_ts();
    for (i, m) in inputs.iter().enumerate() {
        if !students::student_exists(&tx, &m.student_id)? {
            return Err(HandlerErr::not_found("student not found")
                .with_details(json!({ "index": i, "studentId": m.student_id })));
        }
        tx.execute(
            "INSERT INTO exam_marks(id, exam_id, student_id, marks_obtained, is_absent, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(exam_id, student_id) DO UPDATE SET
               marks_obtained = excluded.marks_obtained,
               is_absent = excluded.is_absent,
               updated_at = excluded.updated_at",
            (
                new_id(),
                &exam_id,
                &m.student_id,
                m.marks_obtained,
                m.is_absent as i64,
                &now,
                &now,
            ),
        )
        .map_err(db_failed("db_update_failed", "Failed to save exam marks"))?;
    }
    tx.commit()
        .map_err(db_failed("db_tx_failed", "Failed to save exam marks"))?;

    tracing::info!(exam_id = %exam_id, count = inputs.len(), "exam marks saved");
    Ok(json!({ "saved": inputs.len() }))
}

fn exams_stats(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_id = required_str(params, "examId")?;
    let marks = marks_for_exam(conn, &exam_id)?;
    to_json(&calc::exam_average(marks.iter().map(StoredMark::entry)))
}

fn exams_classes(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "classes": students::distinct_classes(conn)? }))
}

fn exams_subjects(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let subjects = setup::exam_subjects(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "exams.list" => exams_list,
        "exams.get" => exams_get,
        "exams.create" => exams_create,
        "exams.update" => exams_update,
        "exams.delete" => exams_delete,
        "exams.details" => exams_details,
        "exams.saveMarks" => exams_save_marks,
        "exams.stats" => exams_stats,
        "exams.classes" => exams_classes,
        "exams.subjects" => exams_subjects,
        _ => return None,
    };
    Some(run_with_conn(state, req, f))
}
