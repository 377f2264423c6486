use crate::calc::{aggregate_attendance, eligible, round_off_1_decimal};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::attendance::load_events;
use crate::ipc::handlers::settings::effective_section;
use crate::ipc::handlers::students::load_students;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
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

fn effective_threshold(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<f64, HandlerErr> {
    if let Some(t) = params.get("threshold") {
        let Some(t) = t.as_f64() else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "threshold must be a number".to_string(),
                details: None,
            });
        };
        return Ok(t);
    }
    let section = effective_section(conn, "analysis").map_err(db_err)?;
    Ok(section
        .get("eligibilityThreshold")
        .and_then(|v| v.as_f64())
        .unwrap_or(90.0))
}

fn analysis_eligibility(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let threshold = effective_threshold(conn, params)?;
    let roster = load_students(conn).map_err(db_err)?;
    let events = load_events(conn).map_err(db_err)?;
    let stats = aggregate_attendance(&events);

    let mut name_by_key: HashMap<&str, &str> = HashMap::new();
    for s in &roster {
        name_by_key.insert(s.key.as_str(), s.name.as_str());
    }

    let eligible_json: Vec<serde_json::Value> = eligible(&stats, threshold)
        .into_iter()
        .map(|e| {
            let st = &stats[&e.record_key];
            json!({
                "studentId": e.record_key,
                "name": name_by_key.get(e.record_key.as_str()).copied().unwrap_or(""),
                "percentage": e.percentage,
                "displayPercentage": round_off_1_decimal(e.percentage),
                "daysRecorded": st.days_recorded,
                "daysPresent": st.days_present,
            })
        })
        .collect();

    // Full breakdown in roster order, eligible or not, for the analysis tab.
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
                    "eligible": st.percentage >= threshold,
                })
            })
        })
        .collect();

    Ok(json!({
        "threshold": threshold,
        "eligible": eligible_json,
        "perStudent": per_student,
    }))
}

/// Payload for the letter/certificate renderer: one record plus its
/// attendance percentage and the school identity. Layout and output format
/// belong to the renderer, not here.
fn analysis_letter_data(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(student_id) = params.get("studentId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing studentId".to_string(),
            details: None,
        });
    };
    let roster = load_students(conn).map_err(db_err)?;
    let Some(student) = roster.iter().find(|s| s.key == student_id) else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    let events = load_events(conn).map_err(db_err)?;
    let stats = aggregate_attendance(&events);
    let school = effective_section(conn, "school").map_err(db_err)?;

    Ok(json!({
        "school": school,
        "student": {
            "studentId": student.key,
            "name": student.name,
            "fields": student.fields,
        },
        "attendance": stats.get(student_id).map(|st| json!({
            "daysRecorded": st.days_recorded,
            "daysPresent": st.days_present,
            "percentage": st.percentage,
            "displayPercentage": round_off_1_decimal(st.percentage),
        })),
    }))
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
        "analysis.eligibility" => Some(with_conn(state, req, analysis_eligibility)),
        "analysis.letterData" => Some(with_conn(state, req, analysis_letter_data)),
        _ => None,
    }
}
