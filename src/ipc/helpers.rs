use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::ModelError;
use rusqlite::Connection;
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ModelError> for HandlerErr {
    fn from(e: ModelError) -> Self {
        Self::bad_params(e.to_string())
    }
}

/// Maps a store error to `"<context>: <cause>"` under the given code.
pub fn db_failed<'a>(
    code: &'static str,
    context: &'a str,
) -> impl FnOnce(rusqlite::Error) -> HandlerErr + 'a {
    move |e| HandlerErr::new(code, format!("{}: {}", context, e))
}

pub type HandlerFn = fn(&Connection, &Value) -> Result<Value, HandlerErr>;

pub fn run_with_conn(state: &AppState, req: &Request, f: HandlerFn) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => {
            tracing::warn!(method = %req.method, code = e.code, "{}", e.message);
            e.response(&req.id)
        }
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match optional_str(params, key)? {
        Some(s) => Ok(s),
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

/// Trimmed string; missing, null and blank all read as None.
pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    optional_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn patch_object<'a>(params: &'a Value) -> Result<&'a Map<String, Value>, HandlerErr> {
    params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))
}

/// Wraps one patch entry so the typed getters can validate it.
pub fn single_field(k: &str, v: &Value) -> Value {
    Value::Object(std::iter::once((k.to_string(), v.clone())).collect())
}

pub fn array_param<'a>(params: &'a Value, key: &str) -> Result<&'a Vec<Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array", key)))
}

/// `%term%` for `LIKE ... ESCAPE '\'`, with wildcards in the term taken literally.
pub fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for ch in term.chars() {
        if ch == '%' || ch == '_' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}
