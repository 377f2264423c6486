use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_asramad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn asramad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn register(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        id,
        "students.register",
        json!({ "fields": { "Nama": name, "Kelas": "Tahun 5" } }),
    );
    res.get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

fn mark_days(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
    student_id: &str,
    present_days: usize,
    total_days: usize,
) {
    for d in 1..=total_days {
        let _ = request_ok(
            stdin,
            reader,
            &format!("{tag}-{d}"),
            "attendance.mark",
            json!({
                "date": format!("2025-07-{d:02}"),
                "entries": [{ "studentId": student_id, "present": d <= present_days }]
            }),
        );
    }
}

#[test]
fn threshold_orders_eligible_students_and_excludes_below() {
    let workspace = temp_dir("asrama-eligibility");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // 95%, 90%, and 85% attendance respectively.
    let amir = register(&mut stdin, &mut reader, "r1", "Amir");
    let badrul = register(&mut stdin, &mut reader, "r2", "Badrul");
    let chong = register(&mut stdin, &mut reader, "r3", "Chong");
    mark_days(&mut stdin, &mut reader, "a", &amir, 19, 20);
    mark_days(&mut stdin, &mut reader, "b", &badrul, 18, 20);
    mark_days(&mut stdin, &mut reader, "c", &chong, 17, 20);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "e",
        "analysis.eligibility",
        json!({ "threshold": 90.0 }),
    );
    assert_eq!(res.get("threshold").and_then(|v| v.as_f64()), Some(90.0));
    let eligible = res
        .get("eligible")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("eligible array");
    let ids: Vec<&str> = eligible
        .iter()
        .filter_map(|e| e.get("studentId").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(ids, vec![amir.as_str(), badrul.as_str()]);
    assert_eq!(
        eligible[0].get("percentage").and_then(|v| v.as_f64()),
        Some(95.0)
    );

    // The analysis view still reports everyone who has recorded days.
    let per_student = res
        .get("perStudent")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("perStudent array");
    assert_eq!(per_student.len(), 3);
    let chong_row = per_student
        .iter()
        .find(|s| s.get("studentId").and_then(|v| v.as_str()) == Some(chong.as_str()))
        .expect("chong row");
    assert_eq!(
        chong_row.get("eligible").and_then(|v| v.as_bool()),
        Some(false)
    );
}

#[test]
fn threshold_defaults_from_settings_when_not_supplied() {
    let workspace = temp_dir("asrama-eligibility-default");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let amir = register(&mut stdin, &mut reader, "r1", "Amir");
    mark_days(&mut stdin, &mut reader, "a", &amir, 17, 20); // 85%

    // Default threshold is 90: not eligible.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "analysis.eligibility",
        json!({}),
    );
    assert_eq!(res.get("threshold").and_then(|v| v.as_f64()), Some(90.0));
    assert_eq!(
        res.get("eligible").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // Lower the configured cutoff and the same record qualifies.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set",
        "settings.set",
        json!({ "section": "analysis", "values": { "eligibilityThreshold": 80.0 } }),
    );
    let res2 = request_ok(
        &mut stdin,
        &mut reader,
        "e2",
        "analysis.eligibility",
        json!({}),
    );
    assert_eq!(res2.get("threshold").and_then(|v| v.as_f64()), Some(80.0));
    assert_eq!(
        res2.get("eligible")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );
}

#[test]
fn letter_data_carries_record_and_percentage() {
    let workspace = temp_dir("asrama-letter-data");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let amir = register(&mut stdin, &mut reader, "r1", "Amir");
    mark_days(&mut stdin, &mut reader, "a", &amir, 19, 20);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set",
        "settings.set",
        json!({ "section": "school", "values": { "schoolName": "SK BATU NIAH" } }),
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "ld",
        "analysis.letterData",
        json!({ "studentId": amir }),
    );
    assert_eq!(
        res.get("school")
            .and_then(|s| s.get("schoolName"))
            .and_then(|v| v.as_str()),
        Some("SK BATU NIAH")
    );
    assert_eq!(
        res.get("student")
            .and_then(|s| s.get("name"))
            .and_then(|v| v.as_str()),
        Some("Amir")
    );
    assert_eq!(
        res.get("attendance")
            .and_then(|a| a.get("percentage"))
            .and_then(|v| v.as_f64()),
        Some(95.0)
    );
}
