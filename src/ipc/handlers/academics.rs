use crate::calc;
use crate::ipc::handlers::{exams, syllabus};
use crate::ipc::helpers::{required_str, run_with_conn, to_json, HandlerErr, HandlerFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn academics_overview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = required_str(params, "class")?;
    let subjects = syllabus::class_progress(conn, &class_name)?;
    let exams = exams::exams_with_stats(conn, Some(&class_name), None)?;
    let avg_performance =
        calc::average_performance(exams.iter().map(|e| (e.avg_marks, e.exam.total_marks)));

    Ok(json!({
        "class": class_name,
        "subjects": to_json(&subjects)?,
        "overallSyllabusProgress": syllabus::overall_from(&subjects),
        "totalExams": exams.len(),
        "avgPerformance": avg_performance
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "academics.overview" => academics_overview,
        _ => return None,
    };
    Some(run_with_conn(state, req, f))
}
