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
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        Self::spawn_with_env(&[])
    }

    pub fn spawn_with_env(env: &[(&str, &str)]) -> Self {
        let exe = env!("CARGO_BIN_EXE_resultsd");
        let mut cmd = Command::new(exe);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env_remove("RESULTSD_WORKSPACE");
        for (k, v) in env {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().expect("spawn resultsd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 1,
        }
    }

    pub fn send_line(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.call(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Returns the `error` object of a request expected to fail.
    pub fn request_err(&mut self, method: &str, params: Value) -> Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().unwrap_or(Value::Null)
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct Seeded {
    pub class_id: String,
    pub session_id: String,
    pub students: Vec<String>,
    pub subjects: Vec<String>,
}

/// Opens a fresh workspace holding one class (`JSS1`), one current session,
/// the given students in order and the given subjects assigned to the class.
pub fn seed_school(sc: &mut Sidecar, prefix: &str, last_names: &[&str], subjects: &[&str]) -> Seeded {
    let workspace = temp_dir(prefix);
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = sc.request_ok("classes.create", json!({ "name": "JSS1" }))["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let session_id = sc.request_ok(
        "sessions.create",
        json!({ "name": "2024/2025", "isCurrent": true }),
    )["sessionId"]
        .as_str()
        .expect("sessionId")
        .to_string();
    let students = last_names
        .iter()
        .enumerate()
        .map(|(i, last)| {
            sc.request_ok(
                "students.create",
                json!({
                    "classId": class_id,
                    "lastName": last,
                    "firstName": "Test",
                    "admissionNumber": format!("JSS/2024/{:03}", i + 1),
                }),
            )["studentId"]
                .as_str()
                .expect("studentId")
                .to_string()
        })
        .collect();
    let subjects = subjects
        .iter()
        .map(|name| {
            let id = sc.request_ok("subjects.create", json!({ "name": name }))["subjectId"]
                .as_str()
                .expect("subjectId")
                .to_string();
            sc.request_ok(
                "classes.assignSubject",
                json!({ "classId": class_id, "subjectId": id }),
            );
            id
        })
        .collect();
    Seeded {
        class_id,
        session_id,
        students,
        subjects,
    }
}

impl Seeded {
    pub fn term_key(&self, term: &str) -> Value {
        json!({
            "classId": self.class_id,
            "sessionId": self.session_id,
            "term": term,
        })
    }

    /// Params for `scores.save`; `marks` carries any of `ca`, `tests`, `exam`.
    pub fn score(&self, student: usize, subject: usize, term: &str, marks: Value) -> Value {
        let mut params = json!({
            "studentId": self.students[student],
            "classId": self.class_id,
            "subjectId": self.subjects[subject],
            "sessionId": self.session_id,
            "term": term,
        });
        if let (Some(obj), Some(extra)) = (params.as_object_mut(), marks.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        params
    }
}
