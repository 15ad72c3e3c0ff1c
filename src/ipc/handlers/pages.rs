use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::order;
use crate::policy;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn role_of(req: &Request) -> String {
    req.params
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or(policy::ROLE_GUEST)
        .to_string()
}

fn user_id_of(req: &Request) -> Option<String> {
    req.params
        .get("userId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Boundary wrapper shared by both reorderable collections: pages within
/// a qcm and questions within a page. The protocol itself lives in
/// `crate::order`; this maps its outcomes onto the wire contract.
pub(super) fn handle_reorder(
    state: &mut AppState,
    req: &Request,
    set: order::SiblingSet,
    id_key: &str,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not reorder", None);
    }
    let item_id = match required_str(req, id_key) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let direction = match required_str(req, "direction") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(direction) = order::Direction::parse(&direction) else {
        return err(&req.id, "bad_params", "direction must be up or down", None);
    };

    match order::reorder(conn, set, &item_id, direction) {
        // Already first/last is a silent success, not an error.
        Ok(order::ReorderOutcome::Swapped) | Ok(order::ReorderOutcome::AtBoundary) => {
            ok(&req.id, json!({ "ok": true }))
        }
        Ok(order::ReorderOutcome::Conflict) => err(
            &req.id,
            "conflict",
            "positions changed concurrently; retry",
            None,
        ),
        Err(order::ReorderError::NotFound) => err(&req.id, "not_found", "item not found", None),
        Err(order::ReorderError::Store(e)) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_pages_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not create pages", None);
    }
    let qcm_id = match required_str(req, "qcmId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM qcms WHERE id = ?", [&qcm_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "qcm not found", None);
    }

    let position = match order::next_position(conn, order::QCM_PAGES, &qcm_id) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let page_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO qcm_pages(id, qcm_id, name, position) VALUES(?, ?, ?, ?)",
        (&page_id, &qcm_id, &name, position),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "qcm_pages" })),
        );
    }

    let _ = db::record_audit(
        conn,
        "page.created",
        "page",
        Some(&page_id),
        user_id_of(req).as_deref(),
        None,
        Some(&json!({ "qcmId": qcm_id, "name": name, "position": position })),
    );

    ok(
        &req.id,
        json!({ "pageId": page_id, "name": name, "position": position }),
    )
}

fn handle_pages_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not rename pages", None);
    }
    let page_id = match required_str(req, "pageId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let before: Option<String> = match conn
        .query_row("SELECT name FROM qcm_pages WHERE id = ?", [&page_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(before) = before else {
        return err(&req.id, "not_found", "page not found", None);
    };

    if let Err(e) = conn.execute(
        "UPDATE qcm_pages SET name = ? WHERE id = ?",
        (&name, &page_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let _ = db::record_audit(
        conn,
        "page.updated",
        "page",
        Some(&page_id),
        user_id_of(req).as_deref(),
        Some(&json!({ "name": before })),
        Some(&json!({ "name": name })),
    );

    ok(&req.id, json!({ "ok": true }))
}

fn handle_pages_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not delete pages", None);
    }
    let page_id = match required_str(req, "pageId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let before: Option<(String, String, i64)> = match conn
        .query_row(
            "SELECT qcm_id, name, position FROM qcm_pages WHERE id = ?",
            [&page_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((qcm_id, name, position)) = before else {
        return err(&req.id, "not_found", "page not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM questions WHERE page_id = ?", [&page_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM qcm_pages WHERE id = ?", [&page_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "qcm_pages" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    // Remaining sibling positions are left as-is; ordering tolerates gaps.
    let _ = db::record_audit(
        conn,
        "page.deleted",
        "page",
        Some(&page_id),
        user_id_of(req).as_deref(),
        Some(&json!({ "qcmId": qcm_id, "name": name, "position": position })),
        None,
    );

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "pages.create" => Some(handle_pages_create(state, req)),
        "pages.update" => Some(handle_pages_update(state, req)),
        "pages.delete" => Some(handle_pages_delete(state, req)),
        "pages.reorder" => Some(handle_reorder(state, req, order::QCM_PAGES, "pageId")),
        _ => None,
    }
}
