#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("SCHOOLD_WORKSPACE")
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
    }
}

pub fn send_line(sidecar: &mut Sidecar, line: &str) -> Value {
    writeln!(sidecar.stdin, "{}", line).expect("write request");
    sidecar.stdin.flush().expect("flush request");

    let mut out = String::new();
    sidecar
        .reader
        .read_line(&mut out)
        .expect("read response line");
    assert!(!out.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(out.trim()).expect("parse response json")
}

pub fn request(sidecar: &mut Sidecar, id: &str, method: &str, params: Value) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    let value = send_line(sidecar, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(sidecar: &mut Sidecar, id: &str, method: &str, params: Value) -> Value {
    let value = request(sidecar, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Asserts failure and returns the error code.
pub fn request_err(sidecar: &mut Sidecar, id: &str, method: &str, params: Value) -> String {
    let value = request(sidecar, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Spawns a sidecar with a fresh workspace selected.
pub fn open_workspace(prefix: &str) -> Sidecar {
    let workspace = temp_dir(prefix);
    let mut sidecar = spawn_sidecar();
    let _ = request_ok(
        &mut sidecar,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    sidecar
}

pub fn create_student(sidecar: &mut Sidecar, name: &str, class: &str, fee_amount: f64) -> String {
    let result = request_ok(
        sidecar,
        &format!("student-{}", name),
        "students.create",
        json!({
            "name": name,
            "email": format!("{}@school.test", name.to_lowercase()),
            "phone": "555-0100",
            "class": class,
            "feeAmount": fee_amount,
            "enrollmentDate": "2024-04-01"
        }),
    );
    result["studentId"]
        .as_str()
        .expect("studentId")
        .to_string()
}
