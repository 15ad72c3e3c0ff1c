use crate::db;
use crate::exchange::{self, OptionDoc, QuestionDoc};
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

fn handle_questions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not create questions", None);
    }
    let page_id = match required_str(req, "pageId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let question: QuestionDoc = match serde_json::from_value(req.params.clone()) {
        Ok(q) => q,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if let Err(m) = exchange::validate_question(&question) {
        return err(&req.id, "bad_params", m, None);
    }

    // The page row also supplies the owning qcm id.
    let qcm_id: Option<String> = match conn
        .query_row("SELECT qcm_id FROM qcm_pages WHERE id = ?", [&page_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(qcm_id) = qcm_id else {
        return err(&req.id, "not_found", "page not found", None);
    };

    let position = match order::next_position(conn, order::PAGE_QUESTIONS, &page_id) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let question_id = Uuid::new_v4().to_string();
    let options_json =
        serde_json::to_string(&question.options).unwrap_or_else(|_| "[]".to_string());
    let answers_json =
        serde_json::to_string(&question.correct_answers).unwrap_or_else(|_| "[]".to_string());
    if let Err(e) = conn.execute(
        "INSERT INTO questions(id, qcm_id, page_id, text, kind, options_json,
                               correct_answers_json, explanation, position)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &question_id,
            &qcm_id,
            &page_id,
            &question.text,
            &question.kind,
            &options_json,
            &answers_json,
            &question.explanation,
            position,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }

    let _ = db::record_audit(
        conn,
        "question.created",
        "question",
        Some(&question_id),
        user_id_of(req).as_deref(),
        None,
        Some(&json!({ "pageId": page_id, "text": question.text, "position": position })),
    );

    ok(
        &req.id,
        json!({ "questionId": question_id, "position": position }),
    )
}

fn question_row_json(conn: &Connection, question_id: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        "SELECT id, page_id, text, kind, options_json, correct_answers_json, explanation, position
         FROM questions WHERE id = ?",
        [question_id],
        |row| {
            let options: serde_json::Value =
                serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or(json!([]));
            let answers: serde_json::Value =
                serde_json::from_str(&row.get::<_, String>(5)?).unwrap_or(json!([]));
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "pageId": row.get::<_, String>(1)?,
                "text": row.get::<_, String>(2)?,
                "type": row.get::<_, String>(3)?,
                "options": options,
                "correctAnswers": answers,
                "explanation": row.get::<_, Option<String>>(6)?,
                "position": row.get::<_, i64>(7)?,
            }))
        },
    )
    .optional()
}

fn handle_questions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not edit questions", None);
    }
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let before = match question_row_json(conn, &question_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "question not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Merge patch over the stored row, then re-validate the merged result
    // so a partial update cannot leave an inconsistent answer key.
    let mut merged = QuestionDoc {
        id: None,
        text: before["text"].as_str().unwrap_or_default().to_string(),
        kind: before["type"].as_str().unwrap_or("single").to_string(),
        options: serde_json::from_value::<Vec<OptionDoc>>(before["options"].clone())
            .unwrap_or_default(),
        correct_answers: serde_json::from_value::<Vec<String>>(before["correctAnswers"].clone())
            .unwrap_or_default(),
        explanation: before["explanation"].as_str().map(|s| s.to_string()),
    };
    for (k, v) in patch {
        match k.as_str() {
            "text" => {
                let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return err(&req.id, "bad_params", "patch.text must not be empty", None);
                };
                merged.text = s.to_string();
            }
            "type" => {
                let Some(s) = v.as_str() else {
                    return err(&req.id, "bad_params", "patch.type must be a string", None);
                };
                merged.kind = s.to_string();
            }
            "options" => {
                match serde_json::from_value::<Vec<OptionDoc>>(v.clone()) {
                    Ok(opts) => merged.options = opts,
                    Err(e) => {
                        return err(&req.id, "bad_params", format!("patch.options {}", e), None)
                    }
                }
            }
            "correctAnswers" => {
                match serde_json::from_value::<Vec<String>>(v.clone()) {
                    Ok(ans) => merged.correct_answers = ans,
                    Err(e) => {
                        return err(
                            &req.id,
                            "bad_params",
                            format!("patch.correctAnswers {}", e),
                            None,
                        )
                    }
                }
            }
            "explanation" => {
                if v.is_null() {
                    merged.explanation = None;
                } else if let Some(s) = v.as_str() {
                    merged.explanation = Some(s.to_string());
                } else {
                    return err(&req.id, "bad_params", "patch.explanation must be a string", None);
                }
            }
            _ => return err(&req.id, "bad_params", format!("unknown patch field: {}", k), None),
        }
    }
    if let Err(m) = exchange::validate_question(&merged) {
        return err(&req.id, "bad_params", m, None);
    }

    let options_json = serde_json::to_string(&merged.options).unwrap_or_else(|_| "[]".to_string());
    let answers_json =
        serde_json::to_string(&merged.correct_answers).unwrap_or_else(|_| "[]".to_string());
    if let Err(e) = conn.execute(
        "UPDATE questions SET text = ?, kind = ?, options_json = ?, correct_answers_json = ?, explanation = ?
         WHERE id = ?",
        (
            &merged.text,
            &merged.kind,
            &options_json,
            &answers_json,
            &merged.explanation,
            &question_id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let after = question_row_json(conn, &question_id).ok().flatten();
    let _ = db::record_audit(
        conn,
        "question.updated",
        "question",
        Some(&question_id),
        user_id_of(req).as_deref(),
        Some(&before),
        after.as_ref(),
    );

    ok(&req.id, json!({ "ok": true }))
}

fn handle_questions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not delete questions", None);
    }
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let before = match question_row_json(conn, &question_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "question not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = conn.execute("DELETE FROM questions WHERE id = ?", [&question_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }

    let _ = db::record_audit(
        conn,
        "question.deleted",
        "question",
        Some(&question_id),
        user_id_of(req).as_deref(),
        Some(&before),
        None,
    );

    ok(&req.id, json!({ "ok": true }))
}

fn handle_questions_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match question_row_json(conn, &question_id) {
        Ok(Some(v)) => ok(&req.id, v),
        Ok(None) => err(&req.id, "not_found", "question not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.create" => Some(handle_questions_create(state, req)),
        "questions.get" => Some(handle_questions_get(state, req)),
        "questions.update" => Some(handle_questions_update(state, req)),
        "questions.delete" => Some(handle_questions_delete(state, req)),
        "questions.reorder" => Some(super::pages::handle_reorder(
            state,
            req,
            order::PAGE_QUESTIONS,
            "questionId",
        )),
        _ => None,
    }
}
