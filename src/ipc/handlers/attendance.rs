use crate::calc::{aggregate_attendance, AttendanceEvent};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::students::load_students;
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_date(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let raw = params
        .get("date")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing date".to_string(),
            details: None,
        })?;
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_err() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "date must be YYYY-MM-DD".to_string(),
            details: None,
        });
    }
    Ok(raw.to_string())
}

/// Full event log in write order. The store already keeps one row per
/// (student, date); the aggregator collapses again anyway, so a replayed or
/// merged log with repeats still aggregates correctly.
pub(crate) fn load_events(conn: &Connection) -> Result<Vec<AttendanceEvent>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, date, present, reason
             FROM attendance_events
             ORDER BY rowid",
        )
        .map_err(|e| e.to_string())?;
    stmt.query_map([], |r| {
        Ok(AttendanceEvent {
            record_key: r.get(0)?,
            date: r.get(1)?,
            present: r.get::<_, i64>(2)? != 0,
            reason: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| e.to_string())
}

fn attendance_day_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params)?;
    let roster = load_students(conn).map_err(db_err)?;

    let mut stmt = conn
        .prepare("SELECT student_id, present, reason FROM attendance_events WHERE date = ?")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([&date], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)? != 0,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    let mut by_student: HashMap<String, (bool, String)> = HashMap::new();
    for (student_id, present, reason) in rows {
        by_student.insert(student_id, (present, reason));
    }

    let rows_json: Vec<serde_json::Value> = roster
        .iter()
        .map(|s| match by_student.get(&s.key) {
            Some((present, reason)) => json!({
                "studentId": s.key,
                "name": s.name,
                "recorded": true,
                "present": present,
                "reason": reason,
            }),
            None => json!({
                "studentId": s.key,
                "name": s.name,
                "recorded": false,
                "present": true,
                "reason": "",
            }),
        })
        .collect();

    Ok(json!({ "date": date, "rows": rows_json }))
}

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params)?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing entries".to_string(),
            details: None,
        });
    };

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut marked = 0usize;
    let mut skipped = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "entries[].studentId must be a string".to_string(),
                details: None,
            });
        };
        let present = entry
            .get("present")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let reason = if present {
            // A present mark never carries an absence reason.
            String::new()
        } else {
            entry
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };

        let exists = tx
            .query_row(
                "SELECT 1 FROM students WHERE id = ?",
                [student_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(db_err)?
            .is_some();
        if !exists {
            skipped += 1;
            continue;
        }

        tx.execute(
            "INSERT INTO attendance_events(student_id, date, present, reason, recorded_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               present = excluded.present,
               reason = excluded.reason,
               recorded_at = excluded.recorded_at",
            (
                student_id,
                &date,
                if present { 1_i64 } else { 0_i64 },
                &reason,
                Utc::now().to_rfc3339(),
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_events" })),
        })?;
        marked += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "date": date, "marked": marked, "skipped": skipped }))
}

fn attendance_stats(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let roster = load_students(conn).map_err(db_err)?;
    let events = load_events(conn).map_err(db_err)?;
    let stats = aggregate_attendance(&events);

    // Roster order; students with no recorded days are left out entirely.
    let per_student: Vec<serde_json::Value> = roster
        .iter()
        .filter_map(|s| {
            stats.get(&s.key).map(|st| {
                json!({
                    "studentId": s.key,
                    "name": s.name,
                    "daysRecorded": st.days_recorded,
                    "daysPresent": st.days_present,
                    "percentage": st.percentage,
                })
            })
        })
        .collect();

    Ok(json!({ "perStudent": per_student }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl Fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(with_conn(state, req, attendance_day_open)),
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.stats" => Some(with_conn(state, req, attendance_stats)),
        _ => None,
    }
}
