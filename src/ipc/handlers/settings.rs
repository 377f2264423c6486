use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum Section {
    School,
    Browse,
    Analysis,
}

impl Section {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "browse" => Some(Self::Browse),
            "analysis" => Some(Self::Analysis),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "settings.school",
            Self::Browse => "settings.browse",
            Self::Analysis => "settings.analysis",
        }
    }
}

fn default_section(section: Section) -> Value {
    match section {
        Section::School => json!({
            "schoolName": "SEKOLAH KEBANGSAAN BATU NIAH",
            "hostelName": "Asrama SKBN"
        }),
        Section::Browse => json!({
            "pageSize": 20,
            "searchMarkers": ["nama", "name", "kp", "id"],
            "nameField": "Nama"
        }),
        Section::Analysis => json!({
            "eligibilityThreshold": 90.0
        }),
    }
}

fn merge_over_defaults(defaults: Value, stored: Option<Value>) -> Value {
    let Some(Value::Object(stored)) = stored else {
        return defaults;
    };
    let mut out: Map<String, Value> = match defaults {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    for (k, v) in stored {
        out.insert(k, v);
    }
    Value::Object(out)
}

/// Stored values merged over the section defaults. Other handlers read
/// their configuration (page size, search markers, threshold) through this
/// so nothing is hard-coded at the call sites.
pub(crate) fn effective_section(conn: &Connection, section: &str) -> anyhow::Result<Value> {
    let Some(section) = Section::parse(section) else {
        return Ok(Value::Null);
    };
    let stored = db::settings_get_json(conn, section.key())?;
    Ok(merge_over_defaults(default_section(section), stored))
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_name) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.section", None);
    };
    if Section::parse(section_name).is_none() {
        return err(
            &req.id,
            "bad_params",
            format!("unknown section: {}", section_name),
            None,
        );
    }
    match effective_section(conn, section_name) {
        Ok(values) => ok(&req.id, json!({ "section": section_name, "values": values })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_name) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.section", None);
    };
    let Some(section) = Section::parse(section_name) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown section: {}", section_name),
            None,
        );
    };
    let Some(values) = req.params.get("values").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing values object", None);
    };

    // Partial writes layer over whatever is already stored, which itself
    // layers over the defaults on read.
    let stored = match db::settings_get_json(conn, section.key()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut merged: Map<String, Value> = match stored {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    };
    for (k, v) in values {
        merged.insert(k.clone(), v.clone());
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &Value::Object(merged)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    match effective_section(conn, section_name) {
        Ok(values) => ok(&req.id, json!({ "section": section_name, "values": values })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        _ => None,
    }
}
