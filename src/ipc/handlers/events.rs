use crate::db;
use crate::ipc::helpers::{
    db_failed, new_id, optional_str, patch_object, required_i64, required_str, run_with_conn,
    single_field, to_json, HandlerErr, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{month_bounds, parse_date, parse_time, Event, EventType, Reminder};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

const EVENT_COLUMNS: &str = "id, title, description, event_type, event_date, event_time, \
                             reminder, created_by, created_at, updated_at";

fn event_from_row(r: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        event_type: r.get(3)?,
        event_date: r.get(4)?,
        event_time: r.get(5)?,
        reminder: r.get(6)?,
        created_by: r.get(7)?,
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

fn query_events(
    conn: &Connection,
    where_sql: &str,
    args: Vec<SqlValue>,
) -> Result<Vec<Event>, HandlerErr> {
    let ctx = "Failed to fetch events";
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM events {} ORDER BY event_date, event_time, rowid",
            EVENT_COLUMNS, where_sql
        ))
        .map_err(db_failed("db_query_failed", ctx))?;
    stmt.query_map(params_from_iter(args), event_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed("db_query_failed", ctx))
}

fn load_event(conn: &Connection, event_id: &str) -> Result<Option<Event>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS),
        [event_id],
        event_from_row,
    )
    .optional()
    .map_err(db_failed("db_query_failed", "Failed to fetch event"))
}

fn events_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "events": to_json(&query_events(conn, "", Vec::new())?)? }))
}

fn events_list_by_month(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let year = required_i64(params, "year")?;
    let month = required_i64(params, "month")?;
    let bounds = i32::try_from(year)
        .ok()
        .zip(u32::try_from(month).ok())
        .and_then(|(y, m)| month_bounds(y, m));
    let Some((first, last)) = bounds else {
        return Err(HandlerErr::bad_params("month must be in 1..=12"));
    };
    let events = query_events(
        conn,
        "WHERE event_date >= ? AND event_date <= ?",
        vec![
            SqlValue::Text(first.format("%Y-%m-%d").to_string()),
            SqlValue::Text(last.format("%Y-%m-%d").to_string()),
        ],
    )?;
    Ok(json!({ "events": to_json(&events)? }))
}

fn events_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let event_id = required_str(params, "eventId")?;
    Ok(json!({ "event": to_json(&load_event(conn, &event_id)?)? }))
}

fn date_param(params: &Value) -> Result<String, HandlerErr> {
    let s = required_str(params, "eventDate")?;
    parse_date("eventDate", &s)?;
    Ok(s)
}

fn time_param(params: &Value) -> Result<String, HandlerErr> {
    let s = required_str(params, "eventTime")?;
    parse_time("eventTime", &s)?;
    Ok(s)
}

fn events_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let title = required_str(params, "title")?;
    let description = optional_str(params, "description")?;
    let event_type = EventType::parse(&required_str(params, "eventType")?)?;
    let event_date = date_param(params)?;
    let event_time = time_param(params)?;
    let reminder = Reminder::parse(&required_str(params, "reminder")?)?;
    let created_by = optional_str(params, "createdBy")?;

    let event_id = new_id();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO events(
            id, title, description, event_type, event_date, event_time,
            reminder, created_by, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &event_id,
            &title,
            &description,
            event_type,
            &event_date,
            &event_time,
            reminder,
            &created_by,
            &now,
            &now,
        ),
    )
    .map_err(db_failed("db_insert_failed", "Failed to create event"))?;

    tracing::info!(event_id = %event_id, date = %event_date, "event created");
    let event = load_event(conn, &event_id)?
        .ok_or_else(|| HandlerErr::not_found("event not found"))?;
    Ok(json!({ "eventId": event_id, "event": to_json(&event)? }))
}

fn events_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let event_id = required_str(params, "eventId")?;
    let patch = patch_object(params)?;

    let mut sets: Vec<&'static str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    for (k, v) in patch {
        let one = single_field(k, v);
        match k.as_str() {
            "title" => {
                sets.push("title = ?");
                args.push(SqlValue::Text(required_str(&one, k)?));
            }
            "description" => {
                sets.push("description = ?");
                args.push(optional_str(&one, k)?.map_or(SqlValue::Null, SqlValue::Text));
            }
            "eventType" => {
                let t = EventType::parse(&required_str(&one, k)?)?;
                sets.push("event_type = ?");
                args.push(SqlValue::Text(t.as_str().to_string()));
            }
            "eventDate" => {
                sets.push("event_date = ?");
                args.push(SqlValue::Text(date_param(&one)?));
            }
            "eventTime" => {
                sets.push("event_time = ?");
                args.push(SqlValue::Text(time_param(&one)?));
            }
            "reminder" => {
                let r = Reminder::parse(&required_str(&one, k)?)?;
                sets.push("reminder = ?");
                args.push(SqlValue::Text(r.as_str().to_string()));
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown event field: {}", k))),
        }
    }

    if load_event(conn, &event_id)?.is_none() {
        return Err(HandlerErr::not_found("event not found"));
    }
    if !sets.is_empty() {
        sets.push("updated_at = ?");
        args.push(SqlValue::Text(db::now_ts()));
        args.push(SqlValue::Text(event_id.clone()));
        conn.execute(
            &format!("UPDATE events SET {} WHERE id = ?", sets.join(", ")),
            params_from_iter(args),
        )
        .map_err(db_failed("db_update_failed", "Failed to update event"))?;
        tracing::info!(event_id = %event_id, "event updated");
    }
    Ok(json!({ "event": to_json(&load_event(conn, &event_id)?)? }))
}

fn events_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let event_id = required_str(params, "eventId")?;
    let changed = conn
        .execute("DELETE FROM events WHERE id = ?", [&event_id])
        .map_err(db_failed("db_delete_failed", "Failed to delete event"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("event not found"));
    }
    tracing::info!(event_id = %event_id, "event deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "events.list" => events_list,
        "events.listByMonth" => events_list_by_month,
        "events.get" => events_get,
        "events.create" => events_create,
        "events.update" => events_update,
        "events.delete" => events_delete,
        _ => return None,
    };
    Some(run_with_conn(state, req, f))
}
