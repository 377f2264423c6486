use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
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

fn inventory_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, quantity, status
             FROM inventory_items
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let items: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "itemId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "quantity": r.get::<_, Option<f64>>(2)?,
                "status": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "items": items }))
}

fn inventory_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing name".to_string(),
            details: None,
        });
    };
    let quantity = params.get("quantity").and_then(|v| v.as_f64());
    let status = params.get("status").and_then(|v| v.as_str());

    if let Some(item_id) = params.get("itemId").and_then(|v| v.as_str()) {
        let exists = conn
            .query_row("SELECT 1 FROM inventory_items WHERE id = ?", [item_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(db_err)?
            .is_some();
        if !exists {
            return Err(HandlerErr {
                code: "not_found",
                message: "inventory item not found".to_string(),
                details: None,
            });
        }
        conn.execute(
            "UPDATE inventory_items SET name = ?, quantity = ?, status = ? WHERE id = ?",
            (name, quantity, status, item_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "inventory_items" })),
        })?;
        return Ok(json!({ "itemId": item_id, "created": false }));
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM inventory_items",
            [],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO inventory_items(id, name, quantity, status, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (&id, name, quantity, status, next_sort),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "inventory_items" })),
    })?;
    Ok(json!({ "itemId": id, "created": true }))
}

fn inventory_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(item_id) = params.get("itemId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing itemId".to_string(),
            details: None,
        });
    };
    let removed = conn
        .execute("DELETE FROM inventory_items WHERE id = ?", [item_id])
        .map_err(db_err)?;
    if removed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "inventory item not found".to_string(),
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
        "inventory.list" => Some(with_conn(state, req, inventory_list)),
        "inventory.upsert" => Some(with_conn(state, req, inventory_upsert)),
        "inventory.delete" => Some(with_conn(state, req, inventory_delete)),
        _ => None,
    }
}
