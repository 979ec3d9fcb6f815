use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceStatus;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const DEFAULT_SUBJECTS: [&str; 8] = [
    "Mathematics",
    "Science",
    "English",
    "Social Science",
    "Computer Science",
    "Physics",
    "Chemistry",
    "Biology",
];

#[derive(Clone, Copy)]
enum SetupSection {
    Fees,
    Exams,
    Attendance,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Fees, Self::Exams, Self::Attendance];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "fees" => Some(Self::Fees),
            "exams" => Some(Self::Exams),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Fees => "fees",
            Self::Exams => "exams",
            Self::Attendance => "attendance",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Fees => "setup.fees",
            Self::Exams => "setup.exams",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Fees => json!({
            "dueDay": 15,
            "defaultAmount": 0.0
        }),
        SetupSection::Exams => json!({
            "passPercent": 40,
            "subjects": DEFAULT_SUBJECTS
        }),
        SetupSection::Attendance => json!({
            "unmarkedStatus": "absent"
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_subject_list(v: &Value, key: &str) -> Result<Vec<String>, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be an array of strings", key))?
            .trim();
        if s.is_empty() {
            return Err(format!("{} entries must not be empty", key));
        }
        if !out.iter().any(|existing| existing == s) {
            out.push(s.to_string());
        }
    }
    if out.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(out)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Fees => match k.as_str() {
                "dueDay" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 28)?));
                }
                "defaultAmount" => {
                    let n = v
                        .as_f64()
                        .filter(|n| n.is_finite() && *n >= 0.0)
                        .ok_or_else(|| format!("{} must be a non-negative number", k))?;
                    obj.insert(k.clone(), Value::from(n));
                }
                _ => return Err(format!("unknown fees field: {}", k)),
            },
            SetupSection::Exams => match k.as_str() {
                "passPercent" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "subjects" => {
                    obj.insert(k.clone(), json!(parse_subject_list(v, k)?));
                }
                _ => return Err(format!("unknown exams field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "unmarkedStatus" => {
                    let s = v.as_str().ok_or_else(|| format!("{} must be string", k))?;
                    let status = AttendanceStatus::parse(s).map_err(|e| e.to_string())?;
                    obj.insert(k.clone(), Value::String(status.as_str().to_string()));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults instead of failing reads.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn fee_due_day(conn: &Connection) -> anyhow::Result<u32> {
    let fees = load_section(conn, SetupSection::Fees)?;
    Ok(fees.get("dueDay").and_then(|v| v.as_u64()).unwrap_or(15) as u32)
}

pub fn default_fee_amount(conn: &Connection) -> anyhow::Result<f64> {
    let fees = load_section(conn, SetupSection::Fees)?;
    Ok(fees
        .get("defaultAmount")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0))
}

pub fn pass_percent(conn: &Connection) -> anyhow::Result<f64> {
    let exams = load_section(conn, SetupSection::Exams)?;
    Ok(exams
        .get("passPercent")
        .and_then(|v| v.as_f64())
        .unwrap_or(40.0))
}

pub fn exam_subjects(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let exams = load_section(conn, SetupSection::Exams)?;
    let subjects = exams
        .get("subjects")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(subjects)
}

pub fn unmarked_status(conn: &Connection) -> anyhow::Result<AttendanceStatus> {
    let attendance = load_section(conn, SetupSection::Attendance)?;
    Ok(attendance
        .get("unmarkedStatus")
        .and_then(|v| v.as_str())
        .and_then(|s| AttendanceStatus::parse(s).ok())
        .unwrap_or(AttendanceStatus::Absent))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    ok(&req.id, json!({ "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
