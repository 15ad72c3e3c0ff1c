use crate::db;
use crate::exchange::{self, QcmDoc};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
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

fn validate_status(status: &str) -> bool {
    status == exchange::STATUS_DRAFT || status == exchange::STATUS_PUBLISHED
}

fn validate_difficulty(level: &str) -> bool {
    exchange::DIFFICULTIES.contains(&level)
}

/// Metadata snapshot of a qcm row, used both as a response payload and as
/// an audit before/after image.
pub(super) fn qcm_meta_json(
    conn: &Connection,
    qcm_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        "SELECT id, title, description, icon_class, status, difficulty_level,
                passing_threshold, created_at, last_score, last_time, is_favorite
         FROM qcms WHERE id = ?",
        [qcm_id],
        |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "iconClass": row.get::<_, Option<String>>(3)?,
                "status": row.get::<_, String>(4)?,
                "difficultyLevel": row.get::<_, Option<String>>(5)?,
                "passingThreshold": row.get::<_, Option<i64>>(6)?,
                "createdAt": row.get::<_, Option<String>>(7)?,
                "lastScore": row.get::<_, Option<i64>>(8)?,
                "lastTime": row.get::<_, Option<i64>>(9)?,
                "isFavorite": row.get::<_, i64>(10)? != 0,
            }))
        },
    )
    .optional()
}

/// Insert a full document (qcm, pages, questions) in one transaction.
/// Incoming ids are ignored; pages and questions get dense positions in
/// document order. Returns the new qcm id.
pub(super) fn insert_qcm_document(
    conn: &Connection,
    req: &Request,
    doc: &QcmDoc,
) -> Result<String, serde_json::Value> {
    let qcm_id = Uuid::new_v4().to_string();
    let status = doc
        .status
        .clone()
        .filter(|s| validate_status(s))
        .unwrap_or_else(|| exchange::STATUS_DRAFT.to_string());
    let created_at = db::now_rfc3339();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return Err(err(&req.id, "db_tx_failed", e.to_string(), None)),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO qcms(id, title, description, icon_class, status, difficulty_level,
                          passing_threshold, created_at, last_score, last_time, is_favorite)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, 0)",
        (
            &qcm_id,
            doc.title.trim(),
            &doc.description,
            &doc.icon_class,
            &status,
            &doc.difficulty_level,
            &doc.passing_threshold,
            &created_at,
        ),
    ) {
        let _ = tx.rollback();
        return Err(err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "qcms" })),
        ));
    }

    for (page_idx, page) in doc.pages.iter().enumerate() {
        let page_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO qcm_pages(id, qcm_id, name, position) VALUES(?, ?, ?, ?)",
            (&page_id, &qcm_id, &page.name, page_idx as i64 + 1),
        ) {
            let _ = tx.rollback();
            return Err(err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "qcm_pages" })),
            ));
        }
        for (q_idx, q) in page.questions.iter().enumerate() {
            let options_json = serde_json::to_string(&q.options).unwrap_or_else(|_| "[]".into());
            let answers_json =
                serde_json::to_string(&q.correct_answers).unwrap_or_else(|_| "[]".into());
            if let Err(e) = tx.execute(
                "INSERT INTO questions(id, qcm_id, page_id, text, kind, options_json,
                                       correct_answers_json, explanation, position)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &qcm_id,
                    &page_id,
                    &q.text,
                    &q.kind,
                    &options_json,
                    &answers_json,
                    &q.explanation,
                    q_idx as i64 + 1,
                ),
            ) {
                let _ = tx.rollback();
                return Err(err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "questions" })),
                ));
            }
        }
    }

    if let Err(e) = tx.commit() {
        return Err(err(&req.id, "db_commit_failed", e.to_string(), None));
    }
    Ok(qcm_id)
}

fn handle_qcms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "qcms": [] }));
    };
    if !policy::can_read_content(&role_of(req)) {
        return err(&req.id, "forbidden", "role may not list quizzes", None);
    }

    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(search) = req.params.get("search").and_then(|v| v.as_str()) {
        let trimmed = search.trim();
        if !trimmed.is_empty() {
            clauses.push("(q.title LIKE ? OR q.description LIKE ?)".to_string());
            let pattern = format!("%{}%", trimmed);
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
    }
    if let Some(difficulty) = req.params.get("difficulty").and_then(|v| v.as_str()) {
        if !validate_difficulty(difficulty) {
            return err(&req.id, "bad_params", "unknown difficulty", None);
        }
        clauses.push("q.difficulty_level = ?".to_string());
        values.push(Value::Text(difficulty.to_string()));
    }
    if let Some(icon) = req.params.get("icon").and_then(|v| v.as_str()) {
        clauses.push("q.icon_class = ?".to_string());
        values.push(Value::Text(icon.to_string()));
    }
    if req
        .params
        .get("favoritesOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        clauses.push("q.is_favorite = 1".to_string());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    // Counts via correlated subqueries so the list doubles as a dashboard.
    let sql = format!(
        "SELECT
           q.id, q.title, q.description, q.icon_class, q.status, q.difficulty_level,
           q.passing_threshold, q.created_at, q.last_score, q.last_time, q.is_favorite,
           (SELECT COUNT(*) FROM qcm_pages p WHERE p.qcm_id = q.id) AS page_count,
           (SELECT COUNT(*) FROM questions qu WHERE qu.qcm_id = q.id) AS question_count
         FROM qcms q
         {}
         ORDER BY q.title",
        where_sql
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "iconClass": row.get::<_, Option<String>>(3)?,
                "status": row.get::<_, String>(4)?,
                "difficultyLevel": row.get::<_, Option<String>>(5)?,
                "passingThreshold": row.get::<_, Option<i64>>(6)?,
                "createdAt": row.get::<_, Option<String>>(7)?,
                "lastScore": row.get::<_, Option<i64>>(8)?,
                "lastTime": row.get::<_, Option<i64>>(9)?,
                "isFavorite": row.get::<_, i64>(10)? != 0,
                "pageCount": row.get::<_, i64>(11)?,
                "questionCount": row.get::<_, i64>(12)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(qcms) => ok(&req.id, json!({ "qcms": qcms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_qcms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not create quizzes", None);
    }
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Everything except the title travels as one document body; parse it
    // the same way import does, then apply the stricter create checks.
    let doc: QcmDoc = match serde_json::from_value(req.params.clone()) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if let Some(status) = doc.status.as_deref() {
        if !validate_status(status) {
            return err(&req.id, "bad_params", "status must be draft or published", None);
        }
    }
    if let Some(level) = doc.difficulty_level.as_deref() {
        if !validate_difficulty(level) {
            return err(&req.id, "bad_params", "unknown difficultyLevel", None);
        }
    }
    if let Some(threshold) = doc.passing_threshold {
        if !(0..=100).contains(&threshold) {
            return err(&req.id, "bad_params", "passingThreshold must be 0..=100", None);
        }
    }
    for page in &doc.pages {
        if page.name.trim().is_empty() {
            return err(&req.id, "bad_params", "page name must not be empty", None);
        }
        for q in &page.questions {
            if let Err(m) = exchange::validate_question(q) {
                return err(&req.id, "bad_params", m, None);
            }
        }
    }

    let mut doc = doc;
    doc.title = title;
    let qcm_id = match insert_qcm_document(conn, req, &doc) {
        Ok(id) => id,
        Err(e) => return e,
    };

    let after = qcm_meta_json(conn, &qcm_id).ok().flatten();
    let _ = db::record_audit(
        conn,
        "qcm.created",
        "qcm",
        Some(&qcm_id),
        user_id_of(req).as_deref(),
        None,
        after.as_ref(),
    );

    ok(&req.id, json!({ "qcmId": qcm_id }))
}

fn handle_qcms_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let qcm_id = match required_str(req, "qcmId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut meta = match qcm_meta_json(conn, &qcm_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "qcm not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut page_stmt = match conn.prepare(
        "SELECT id, name, position FROM qcm_pages WHERE qcm_id = ? ORDER BY position",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let page_rows = match page_stmt
        .query_map([&qcm_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut question_stmt = match conn.prepare(
        "SELECT id, text, kind, options_json, correct_answers_json, explanation, position
         FROM questions WHERE page_id = ? ORDER BY position",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut pages = Vec::with_capacity(page_rows.len());
    for (page_id, name, position) in page_rows {
        let questions = match question_stmt
            .query_map([&page_id], |row| {
                let options: serde_json::Value =
                    serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or(json!([]));
                let answers: serde_json::Value =
                    serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or(json!([]));
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "text": row.get::<_, String>(1)?,
                    "type": row.get::<_, String>(2)?,
                    "options": options,
                    "correctAnswers": answers,
                    "explanation": row.get::<_, Option<String>>(5)?,
                    "position": row.get::<_, i64>(6)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        pages.push(json!({
            "id": page_id,
            "name": name,
            "position": position,
            "questions": questions,
        }));
    }

    meta["pages"] = json!(pages);
    ok(&req.id, meta)
}

fn handle_qcms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not edit quizzes", None);
    }
    let qcm_id = match required_str(req, "qcmId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let before = match qcm_meta_json(conn, &qcm_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "qcm not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut fields: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "title" => {
                let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return err(&req.id, "bad_params", "patch.title must not be empty", None);
                };
                fields.push("title = ?".to_string());
                values.push(Value::Text(s.to_string()));
            }
            "description" => {
                if v.is_null() {
                    fields.push("description = NULL".to_string());
                } else if let Some(s) = v.as_str() {
                    fields.push("description = ?".to_string());
                    values.push(Value::Text(s.to_string()));
                } else {
                    return err(&req.id, "bad_params", "patch.description must be a string", None);
                }
            }
            "iconClass" => {
                if v.is_null() {
                    fields.push("icon_class = NULL".to_string());
                } else if let Some(s) = v.as_str() {
                    fields.push("icon_class = ?".to_string());
                    values.push(Value::Text(s.to_string()));
                } else {
                    return err(&req.id, "bad_params", "patch.iconClass must be a string", None);
                }
            }
            "status" => {
                let Some(s) = v.as_str().filter(|s| validate_status(s)) else {
                    return err(&req.id, "bad_params", "patch.status must be draft or published", None);
                };
                fields.push("status = ?".to_string());
                values.push(Value::Text(s.to_string()));
            }
            "difficultyLevel" => {
                if v.is_null() {
                    fields.push("difficulty_level = NULL".to_string());
                } else if let Some(s) = v.as_str().filter(|s| validate_difficulty(s)) {
                    fields.push("difficulty_level = ?".to_string());
                    values.push(Value::Text(s.to_string()));
                } else {
                    return err(&req.id, "bad_params", "patch.difficultyLevel is unknown", None);
                }
            }
            "passingThreshold" => {
                if v.is_null() {
                    fields.push("passing_threshold = NULL".to_string());
                } else if let Some(n) = v.as_i64().filter(|n| (0..=100).contains(n)) {
                    fields.push("passing_threshold = ?".to_string());
                    values.push(Value::Integer(n));
                } else {
                    return err(&req.id, "bad_params", "patch.passingThreshold must be 0..=100", None);
                }
            }
            _ => return err(&req.id, "bad_params", format!("unknown patch field: {}", k), None),
        }
    }
    if fields.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }

    values.push(Value::Text(qcm_id.clone()));
    let sql = format!("UPDATE qcms SET {} WHERE id = ?", fields.join(", "));
    if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let after = qcm_meta_json(conn, &qcm_id).ok().flatten();
    let _ = db::record_audit(
        conn,
        "qcm.updated",
        "qcm",
        Some(&qcm_id),
        user_id_of(req).as_deref(),
        Some(&before),
        after.as_ref(),
    );

    ok(&req.id, json!({ "ok": true }))
}

fn handle_qcms_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not delete quizzes", None);
    }
    let qcm_id = match required_str(req, "qcmId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let before = match qcm_meta_json(conn, &qcm_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "qcm not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependency order; no ON DELETE CASCADE in the schema.
    if let Err(e) = tx.execute("DELETE FROM questions WHERE qcm_id = ?", [&qcm_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM qcm_pages WHERE qcm_id = ?", [&qcm_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "qcm_pages" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM qcms WHERE id = ?", [&qcm_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "qcms" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    let _ = db::record_audit(
        conn,
        "qcm.deleted",
        "qcm",
        Some(&qcm_id),
        user_id_of(req).as_deref(),
        Some(&before),
        None,
    );

    ok(&req.id, json!({ "ok": true }))
}

fn handle_qcms_toggle_favorite(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not toggle favorites", None);
    }
    let qcm_id = match required_str(req, "qcmId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let current: Option<i64> = match conn
        .query_row("SELECT is_favorite FROM qcms WHERE id = ?", [&qcm_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(current) = current else {
        return err(&req.id, "not_found", "qcm not found", None);
    };

    let new_value = i64::from(current == 0);
    if let Err(e) = conn.execute(
        "UPDATE qcms SET is_favorite = ? WHERE id = ?",
        (new_value, &qcm_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let _ = db::record_audit(
        conn,
        "qcm.favoriteToggled",
        "qcm",
        Some(&qcm_id),
        user_id_of(req).as_deref(),
        Some(&json!({ "isFavorite": current != 0 })),
        Some(&json!({ "isFavorite": new_value != 0 })),
    );

    ok(&req.id, json!({ "isFavorite": new_value != 0 }))
}

fn handle_qcms_update_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    // Recording a play result is open to any role, guests included.
    if !policy::can_update_stats(&role_of(req)) {
        return err(&req.id, "forbidden", "role may not record results", None);
    }
    let qcm_id = match required_str(req, "qcmId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let last_score = match req.params.get("lastScore") {
        None => None,
        Some(v) => match v.as_i64().filter(|n| (0..=100).contains(n)) {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "lastScore must be 0..=100", None),
        },
    };
    let last_time = match req.params.get("lastTime") {
        None => None,
        Some(v) => match v.as_i64().filter(|n| *n >= 0) {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "lastTime must be >= 0", None),
        },
    };
    if last_score.is_none() && last_time.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let before = match qcm_meta_json(conn, &qcm_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "qcm not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut fields: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(score) = last_score {
        fields.push("last_score = ?".to_string());
        values.push(Value::Integer(score));
    }
    if let Some(time) = last_time {
        fields.push("last_time = ?".to_string());
        values.push(Value::Integer(time));
    }
    values.push(Value::Text(qcm_id.clone()));
    let sql = format!("UPDATE qcms SET {} WHERE id = ?", fields.join(", "));
    if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let after = qcm_meta_json(conn, &qcm_id).ok().flatten();
    let _ = db::record_audit(
        conn,
        "qcm.statsUpdated",
        "qcm",
        Some(&qcm_id),
        user_id_of(req).as_deref(),
        Some(&before),
        after.as_ref(),
    );

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "qcms.list" => Some(handle_qcms_list(state, req)),
        "qcms.create" => Some(handle_qcms_create(state, req)),
        "qcms.get" => Some(handle_qcms_get(state, req)),
        "qcms.update" => Some(handle_qcms_update(state, req)),
        "qcms.delete" => Some(handle_qcms_delete(state, req)),
        "qcms.toggleFavorite" => Some(handle_qcms_toggle_favorite(state, req)),
        "qcms.updateStats" => Some(handle_qcms_update_stats(state, req)),
        _ => None,
    }
}
