use crate::calc::{self, ChapterFlags, ChapterProgress};
use crate::db;
use crate::ipc::helpers::{
    db_failed, new_id, optional_bool, optional_str, patch_object, required_str, run_with_conn,
    single_field, to_json, HandlerErr, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{NotesStatus, SyllabusChapter};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};

const CHAPTER_COLUMNS: &str = "id, class_name, subject, chapter_name, physical_class_conducted, \
                               chapter_end_test_status, notes_distribution_status, \
                               revision_status, created_at, updated_at";

fn chapter_from_row(r: &Row<'_>) -> rusqlite::Result<SyllabusChapter> {
    Ok(SyllabusChapter {
        id: r.get(0)?,
        class_name: r.get(1)?,
        subject: r.get(2)?,
        chapter_name: r.get(3)?,
        physical_class_conducted: r.get::<_, i64>(4)? != 0,
        chapter_end_test_status: r.get::<_, i64>(5)? != 0,
        notes_distribution_status: r.get(6)?,
        revision_status: r.get::<_, i64>(7)? != 0,
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

fn flags_of(c: &SyllabusChapter) -> ChapterFlags {
    ChapterFlags {
        physical_class_conducted: c.physical_class_conducted,
        chapter_end_test_status: c.chapter_end_test_status,
        notes_distribution_status: c.notes_distribution_status,
        revision_status: c.revision_status,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    #[serde(rename = "class")]
    pub class_name: String,
    pub subject: String,
    #[serde(flatten)]
    pub progress: ChapterProgress,
}

fn query_chapters(
    conn: &Connection,
    where_sql: &str,
    order_sql: &str,
    args: Vec<SqlValue>,
) -> Result<Vec<SyllabusChapter>, HandlerErr> {
    let ctx = "Failed to fetch syllabus";
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM syllabus_tracking {} ORDER BY {}",
            CHAPTER_COLUMNS, where_sql, order_sql
        ))
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map(params_from_iter(args), chapter_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

fn chapters_for(
    conn: &Connection,
    class_name: &str,
    subject: &str,
) -> Result<Vec<SyllabusChapter>, HandlerErr> {
    query_chapters(
        conn,
        "WHERE class_name = ? AND subject = ?",
        "chapter_name, id",
        vec![
            SqlValue::Text(class_name.to_string()),
            SqlValue::Text(subject.to_string()),
        ],
    )
}

fn load_chapter(conn: &Connection, chapter_id: &str) -> Result<SyllabusChapter, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM syllabus_tracking WHERE id = ?", CHAPTER_COLUMNS),
        [chapter_id],
        chapter_from_row,
    )
    .optional()
    .map_err(db_failed("db_query_failed", "Failed to fetch chapter"))?
    .ok_or_else(|| HandlerErr::not_found("chapter not found"))
}

fn distinct_subjects(conn: &Connection, class_name: Option<&str>) -> Result<Vec<String>, HandlerErr> {
    let ctx = "Failed to fetch syllabus subjects";
    let (sql, args) = match class_name {
        Some(c) => (
            "SELECT DISTINCT subject FROM syllabus_tracking WHERE class_name = ? ORDER BY subject",
            vec![SqlValue::Text(c.to_string())],
        ),
        None => (
            "SELECT DISTINCT subject FROM syllabus_tracking ORDER BY subject",
            Vec::new(),
        ),
    };
    let mut stmt = conn.prepare(sql).map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map(params_from_iter(args), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

pub fn progress_for(
    conn: &Connection,
    class_name: &str,
    subject: &str,
) -> Result<SubjectProgress, HandlerErr> {
    let chapters = chapters_for(conn, class_name, subject)?;
    Ok(SubjectProgress {
        class_name: class_name.to_string(),
        subject: subject.to_string(),
        progress: calc::syllabus_progress(chapters.iter().map(flags_of)),
    })
}

/// Progress of every subject tracked for the class, by subject name.
pub fn class_progress(conn: &Connection, class_name: &str) -> Result<Vec<SubjectProgress>, HandlerErr> {
    distinct_subjects(conn, Some(class_name))?
        .iter()
        .map(|s| progress_for(conn, class_name, s))
        .collect()
}

pub fn overall_from(subjects: &[SubjectProgress]) -> i64 {
    let per_subject: Vec<i64> = subjects
        .iter()
        .map(|s| s.progress.progress_percentage)
        .collect();
    calc::overall_progress(&per_subject)
}

fn syllabus_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = required_str(params, "class")?;
    let subject = required_str(params, "subject")?;
    let chapters = chapters_for(conn, &class_name, &subject)?;
    Ok(json!({ "chapters": to_json(&chapters)? }))
}

fn syllabus_list_by_class(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = required_str(params, "class")?;
    let chapters = query_chapters(
        conn,
        "WHERE class_name = ?",
        "subject, chapter_name, id",
        vec![SqlValue::Text(class_name)],
    )?;
    Ok(json!({ "chapters": to_json(&chapters)? }))
}

fn notes_param(params: &Value) -> Result<Option<NotesStatus>, HandlerErr> {
    match optional_str(params, "notesDistributionStatus")? {
        Some(s) => Ok(Some(NotesStatus::parse(&s)?)),
        None => Ok(None),
    }
}

fn syllabus_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = required_str(params, "class")?;
    let subject = required_str(params, "subject")?;
    let chapter_name = required_str(params, "chapterName")?;
    let physical = optional_bool(params, "physicalClassConducted")?.unwrap_or(false);
    let end_test = optional_bool(params, "chapterEndTestStatus")?.unwrap_or(false);
    let notes = notes_param(params)?.unwrap_or(NotesStatus::Undistributed);
    let revision = optional_bool(params, "revisionStatus")?.unwrap_or(false);

    let chapter_id = new_id();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO syllabus_tracking(
            id, class_name, subject, chapter_name, physical_class_conducted,
            chapter_end_test_status, notes_distribution_status, revision_status,
            created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &chapter_id,
            &class_name,
            &subject,
            &chapter_name,
            physical as i64,
            end_test as i64,
            notes,
            revision as i64,
            &now,
            &now,
        ),
    )
    .map_err(db_failed("db_insert_failed", "Failed to create chapter"))?;

    tracing::info!(chapter_id = %chapter_id, class = %class_name, subject = %subject, "chapter created");
    Ok(json!({ "chapterId": chapter_id, "chapter": to_json(&load_chapter(conn, &chapter_id)?)? }))
}

fn syllabus_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let chapter_id = required_str(params, "chapterId")?;
    let patch = patch_object(params)?;

    let mut sets: Vec<&'static str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    for (k, v) in patch {
        let one = single_field(k, v);
        let column = match k.as_str() {
            "class" => "class_name = ?",
            "subject" => "subject = ?",
            "chapterName" => "chapter_name = ?",
            "physicalClassConducted" => "physical_class_conducted = ?",
            "chapterEndTestStatus" => "chapter_end_test_status = ?",
            "revisionStatus" => "revision_status = ?",
            "notesDistributionStatus" => "notes_distribution_status = ?",
            _ => return Err(HandlerErr::bad_params(format!("unknown chapter field: {}", k))),
        };
        let arg = match k.as_str() {
            "class" | "subject" | "chapterName" => SqlValue::Text(required_str(&one, k)?),
            "notesDistributionStatus" => {
                let notes = notes_param(&one)?
                    .ok_or_else(|| HandlerErr::bad_params("missing notesDistributionStatus"))?;
                SqlValue::Text(notes.as_str().to_string())
            }
            _ => {
                let b = optional_bool(&one, k)?
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", k)))?;
                SqlValue::Integer(b as i64)
            }
        };
        sets.push(column);
        args.push(arg);
    }

    load_chapter(conn, &chapter_id)?;
    if !sets.is_empty() {
        sets.push("updated_at = ?");
        args.push(SqlValue::Text(db::now_ts()));
        args.push(SqlValue::Text(chapter_id.clone()));
        conn.execute(
            &format!("UPDATE syllabus_tracking SET {} WHERE id = ?", sets.join(", ")),
            params_from_iter(args),
        )
        .map_err(db_failed("db_update_failed", "Failed to update chapter"))?;
        tracing::info!(chapter_id = %chapter_id, "chapter updated");
    }
    Ok(json!({ "chapter": to_json(&load_chapter(conn, &chapter_id)?)? }))
}

fn syllabus_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let chapter_id = required_str(params, "chapterId")?;
    let changed = conn
        .execute("DELETE FROM syllabus_tracking WHERE id = ?", [&chapter_id])
        .map_err(db_failed("db_delete_failed", "Failed to delete chapter"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("chapter not found"));
    }
    tracing::info!(chapter_id = %chapter_id, "chapter deleted");
    Ok(json!({ "ok": true }))
}

fn syllabus_progress(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = required_str(params, "class")?;
    let subject = required_str(params, "subject")?;
    to_json(&progress_for(conn, &class_name, &subject)?)
}

fn syllabus_overall_progress(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = required_str(params, "class")?;
    let subjects = class_progress(conn, &class_name)?;
    Ok(json!({
        "class": class_name,
        "overallProgress": overall_from(&subjects)
    }))
}

fn syllabus_subjects(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = optional_str(params, "class")?;
    Ok(json!({ "subjects": distinct_subjects(conn, class_name.as_deref())? }))
}

fn syllabus_classes(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let ctx = "Failed to fetch syllabus classes";
    let mut stmt = conn
        .prepare("SELECT DISTINCT class_name FROM syllabus_tracking ORDER BY class_name")
        .map_err(db_failed("db_query_failed", ctx))?;
    let classes = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))?;
    Ok(json!({ "classes": classes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "syllabus.list" => syllabus_list,
        "syllabus.listByClass" => syllabus_list_by_class,
        "syllabus.create" => syllabus_create,
        "syllabus.update" => syllabus_update,
        "syllabus.delete" => syllabus_delete,
        "syllabus.progress" => syllabus_progress,
        "syllabus.overallProgress" => syllabus_overall_progress,
        "syllabus.subjects" => syllabus_subjects,
        "syllabus.classes" => syllabus_classes,
        _ => return None,
    };
    Some(run_with_conn(state, req, f))
}
