use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn role_of(req: &Request) -> String {
    req.params
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or(policy::ROLE_GUEST)
        .to_string()
}

fn handle_audit_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_view_audit(&role) {
        return err(&req.id, "forbidden", "role may not view the audit log", None);
    }

    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(entity) = req.params.get("entity").and_then(|v| v.as_str()) {
        clauses.push("entity = ?".to_string());
        values.push(Value::Text(entity.to_string()));
    }
    if let Some(entity_id) = req.params.get("entityId").and_then(|v| v.as_str()) {
        clauses.push("entity_id = ?".to_string());
        values.push(Value::Text(entity_id.to_string()));
    }
    if let Some(user_id) = req.params.get("userId").and_then(|v| v.as_str()) {
        clauses.push("user_id = ?".to_string());
        values.push(Value::Text(user_id.to_string()));
    }

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT);
    let offset = req
        .params
        .get("offset")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .max(0);

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT id, event, entity, entity_id, user_id, before_json, after_json, created_at
         FROM audit_log
         {}
         ORDER BY created_at DESC, id
         LIMIT ? OFFSET ?",
        where_sql
    );
    values.push(Value::Integer(limit));
    values.push(Value::Integer(offset));

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            let before: Option<serde_json::Value> = row
                .get::<_, Option<String>>(5)?
                .and_then(|s| serde_json::from_str(&s).ok());
            let after: Option<serde_json::Value> = row
                .get::<_, Option<String>>(6)?
                .and_then(|s| serde_json::from_str(&s).ok());
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "event": row.get::<_, String>(1)?,
                "entity": row.get::<_, String>(2)?,
                "entityId": row.get::<_, Option<String>>(3)?,
                "userId": row.get::<_, Option<String>>(4)?,
                "before": before,
                "after": after,
                "createdAt": row.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => Some(handle_audit_list(state, req)),
        _ => None,
    }
}
