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
        json!({ "fields": { "Nama": name } }),
    );
    res.get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

fn stats_for<'a>(
    stats: &'a serde_json::Value,
    student_id: &str,
) -> Option<&'a serde_json::Value> {
    stats
        .get("perStudent")
        .and_then(|v| v.as_array())?
        .iter()
        .find(|s| s.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
}

#[test]
fn eight_present_of_ten_days_is_eighty_percent() {
    let workspace = temp_dir("asrama-attendance-pct");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ali = register(&mut stdin, &mut reader, "r1", "Ali Bin Ahmad");

    for d in 1..=10 {
        let present = d <= 8;
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{d}"),
            "attendance.mark",
            json!({
                "date": format!("2025-06-{d:02}"),
                "entries": [{
                    "studentId": ali,
                    "present": present,
                    "reason": if present { "" } else { "demam" },
                }]
            }),
        );
    }

    let stats = request_ok(&mut stdin, &mut reader, "s", "attendance.stats", json!({}));
    let row = stats_for(&stats, &ali).expect("ali in stats");
    assert_eq!(row.get("daysRecorded").and_then(|v| v.as_u64()), Some(10));
    assert_eq!(row.get("daysPresent").and_then(|v| v.as_u64()), Some(8));
    assert_eq!(row.get("percentage").and_then(|v| v.as_f64()), Some(80.0));
}

#[test]
fn remarking_the_same_date_supersedes_the_first_write() {
    let workspace = temp_dir("asrama-attendance-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let siti = register(&mut stdin, &mut reader, "r1", "Siti Nurhaliza");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "date": "2025-06-02",
            "entries": [{ "studentId": siti, "present": true }]
        }),
    );
    // Correction later the same day: absent with a reason.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "attendance.mark",
        json!({
            "date": "2025-06-02",
            "entries": [{ "studentId": siti, "present": false, "reason": "balik kampung" }]
        }),
    );

    let stats = request_ok(&mut stdin, &mut reader, "s", "attendance.stats", json!({}));
    let row = stats_for(&stats, &siti).expect("siti in stats");
    // The pair counts once and only the later write survives.
    assert_eq!(row.get("daysRecorded").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(row.get("daysPresent").and_then(|v| v.as_u64()), Some(0));

    let day = request_ok(
        &mut stdin,
        &mut reader,
        "d",
        "attendance.dayOpen",
        json!({ "date": "2025-06-02" }),
    );
    let rows = day
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("recorded").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(rows[0].get("present").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        rows[0].get("reason").and_then(|v| v.as_str()),
        Some("balik kampung")
    );
}

#[test]
fn unmarked_students_are_omitted_from_stats() {
    let workspace = temp_dir("asrama-attendance-omit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ali = register(&mut stdin, &mut reader, "r1", "Ali Bin Ahmad");
    let siti = register(&mut stdin, &mut reader, "r2", "Siti Nurhaliza");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "date": "2025-06-01",
            "entries": [{ "studentId": ali, "present": true }]
        }),
    );

    let stats = request_ok(&mut stdin, &mut reader, "s", "attendance.stats", json!({}));
    assert!(stats_for(&stats, &ali).is_some());
    assert!(stats_for(&stats, &siti).is_none());

    // The day form still lists the unmarked student, defaulting to present.
    let day = request_ok(
        &mut stdin,
        &mut reader,
        "d",
        "attendance.dayOpen",
        json!({ "date": "2025-06-01" }),
    );
    let rows = day
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("rows");
    assert_eq!(rows.len(), 2);
    let siti_row = rows
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(siti.as_str()))
        .expect("siti row");
    assert_eq!(
        siti_row.get("recorded").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(siti_row.get("present").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn bad_dates_and_unknown_students_are_handled() {
    let workspace = temp_dir("asrama-attendance-bad");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ali = register(&mut stdin, &mut reader, "r1", "Ali Bin Ahmad");

    // Unknown ids are skipped, known ids still land.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "date": "2025-06-01",
            "entries": [
                { "studentId": ali, "present": true },
                { "studentId": "tiada-dalam-daftar", "present": true }
            ]
        }),
    );
    assert_eq!(res.get("marked").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(res.get("skipped").and_then(|v| v.as_u64()), Some(1));

    // A malformed date is rejected before anything is written.
    let payload = json!({
        "id": "bad",
        "method": "attendance.mark",
        "params": { "date": "01/06/2025", "entries": [] },
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );
}
