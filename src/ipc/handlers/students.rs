use crate::browse::{
    dedupe_by_key, filter_records, paginate, searchable_fields, PageState, Record,
};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::settings::effective_section;
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

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

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn get_fields_object(params: &serde_json::Value) -> Result<Map<String, Value>, HandlerErr> {
    params
        .get("fields")
        .and_then(|v| v.as_object())
        .cloned()
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing fields object".to_string(),
            details: None,
        })
}

fn name_from_fields(fields: &Map<String, Value>, name_field: &str) -> Result<String, HandlerErr> {
    let name = fields
        .get(name_field)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("fields.{} must be a non-empty string", name_field),
            details: None,
        });
    }
    Ok(name)
}

/// Full register snapshot in sort order. Every list/stats call re-reads the
/// store; there is no cache to go stale between an edit and the next read.
pub(crate) fn load_students(conn: &Connection) -> Result<Vec<Record>, String> {
    let mut stmt = conn
        .prepare("SELECT id, name, fields FROM students ORDER BY sort_order")
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;

    let mut records: Vec<Record> = Vec::with_capacity(rows.len());
    for (id, name, fields_text) in rows {
        let fields: Map<String, Value> = serde_json::from_str(&fields_text).unwrap_or_default();
        records.push(Record { key: id, name, fields });
    }
    Ok(dedupe_by_key(records))
}

struct BrowseConfig {
    page_size: usize,
    markers: Vec<String>,
    name_field: String,
}

fn browse_config(conn: &Connection) -> Result<BrowseConfig, HandlerErr> {
    let section = effective_section(conn, "browse").map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    let page_size = section
        .get("pageSize")
        .and_then(|v| v.as_u64())
        .unwrap_or(20)
        .max(1) as usize;
    let markers = section
        .get("searchMarkers")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let name_field = section
        .get("nameField")
        .and_then(|v| v.as_str())
        .unwrap_or("Nama")
        .to_string();
    Ok(BrowseConfig {
        page_size,
        markers,
        name_field,
    })
}

fn student_exists_by_name(conn: &Connection, name: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM students WHERE name = ? ORDER BY sort_order LIMIT 1",
        [name],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(db_err)
}

fn students_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let cfg = browse_config(conn)?;
    let fields = get_fields_object(params)?;
    let name_field = params
        .get("nameField")
        .and_then(|v| v.as_str())
        .unwrap_or(&cfg.name_field);
    let name = name_from_fields(&fields, name_field)?;

    // Registration mirrors the register sheet's append-then-dedupe: the
    // first row for a name wins and a repeat registration is reported, not
    // silently doubled.
    if let Some(existing_id) = student_exists_by_name(conn, &name)? {
        return Ok(json!({ "studentId": existing_id, "duplicate": true }));
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
            [],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    let id = Uuid::new_v4().to_string();
    let fields_text = serde_json::to_string(&Value::Object(fields)).map_err(db_err)?;
    conn.execute(
        "INSERT INTO students(id, name, sort_order, fields, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &name, next_sort, &fields_text, Utc::now().to_rfc3339()),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": id, "duplicate": false }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let cfg = browse_config(conn)?;
    let query = params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let page = params.get("page").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let page_size = params
        .get("pageSize")
        .and_then(|v| v.as_u64())
        .map(|n| n.max(1) as usize)
        .unwrap_or(cfg.page_size);
    let markers: Vec<String> = params
        .get("searchMarkers")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or(cfg.markers);

    let records = load_students(conn).map_err(db_err)?;
    let fields = searchable_fields(&records, &markers);
    let filtered = filter_records(&records, &query, &fields);

    let mut state = PageState {
        page,
        page_size,
        total: filtered.len(),
    };
    state.clamp();
    let (slice, total_pages) = paginate(&filtered, &state);

    let students_json: Vec<serde_json::Value> = slice
        .iter()
        .map(|r| {
            json!({
                "studentId": r.key,
                "name": r.name,
                "fields": r.fields,
            })
        })
        .collect();

    Ok(json!({
        "students": students_json,
        "query": query,
        "page": state.page,
        "pageSize": state.page_size,
        "total": filtered.len(),
        "totalPages": total_pages,
        "searchableFields": fields,
    }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let cfg = browse_config(conn)?;
    let student_id = get_required_str(params, "studentId")?;
    let fields = get_fields_object(params)?;
    let name_field = params
        .get("nameField")
        .and_then(|v| v.as_str())
        .unwrap_or(&cfg.name_field);

    let current_name: Option<String> = conn
        .query_row("SELECT name FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    let Some(current_name) = current_name else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    // Edits replace the row wholesale; the name follows the name field when
    // the new payload carries one.
    let name = name_from_fields(&fields, name_field)
        .ok()
        .unwrap_or(current_name);
    let fields_text = serde_json::to_string(&Value::Object(fields)).map_err(db_err)?;
    conn.execute(
        "UPDATE students SET name = ?, fields = ?, updated_at = ? WHERE id = ?",
        (&name, &fields_text, Utc::now().to_rfc3339(), &student_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id, "name": name }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute(
        "DELETE FROM attendance_events WHERE student_id = ?",
        [&student_id],
    )
    .map_err(db_err)?;
    let removed = tx
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(db_err)?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    if removed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "deleted": true }))
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
        "students.register" => Some(with_conn(state, req, students_register)),
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
