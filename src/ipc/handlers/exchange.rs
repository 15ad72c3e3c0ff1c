use crate::db;
use crate::exchange::{self, OptionDoc, PageDoc, QcmDoc, QuestionDoc};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

/// Load a qcm with its pages and questions, both in position order, as an
/// exchange document.
fn load_qcm_doc(conn: &Connection, qcm_id: &str) -> anyhow::Result<Option<QcmDoc>> {
    let meta = conn
        .query_row(
            "SELECT id, title, description, icon_class, status, difficulty_level,
                    passing_threshold, created_at, last_score, last_time, is_favorite
             FROM qcms WHERE id = ?",
            [qcm_id],
            |row| {
                Ok(QcmDoc {
                    id: Some(row.get::<_, String>(0)?),
                    title: row.get(1)?,
                    description: row.get(2)?,
                    icon_class: row.get(3)?,
                    status: Some(row.get::<_, String>(4)?),
                    difficulty_level: row.get(5)?,
                    passing_threshold: row.get(6)?,
                    created_at: row.get(7)?,
                    last_score: row.get(8)?,
                    last_time: row.get(9)?,
                    is_favorite: Some(row.get::<_, i64>(10)? != 0),
                    pages: Vec::new(),
                })
            },
        )
        .optional()?;
    let Some(mut doc) = meta else {
        return Ok(None);
    };

    let mut page_stmt =
        conn.prepare("SELECT id, name FROM qcm_pages WHERE qcm_id = ? ORDER BY position")?;
    let page_rows = page_stmt
        .query_map([qcm_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut question_stmt = conn.prepare(
        "SELECT id, text, kind, options_json, correct_answers_json, explanation
         FROM questions WHERE page_id = ? ORDER BY position",
    )?;
    for (page_id, name) in page_rows {
        let questions = question_stmt
            .query_map([&page_id], |row| {
                let options_json: String = row.get(3)?;
                let answers_json: String = row.get(4)?;
                Ok(QuestionDoc {
                    id: Some(row.get::<_, String>(0)?),
                    text: row.get(1)?,
                    kind: row.get(2)?,
                    options: serde_json::from_str::<Vec<OptionDoc>>(&options_json)
                        .unwrap_or_default(),
                    correct_answers: serde_json::from_str::<Vec<String>>(&answers_json)
                        .unwrap_or_default(),
                    explanation: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        doc.pages.push(PageDoc {
            id: Some(page_id),
            name,
            questions,
        });
    }
    Ok(Some(doc))
}

fn handle_qcms_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not export quizzes", None);
    }
    let qcm_id = match required_str(req, "qcmId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let format = req
        .params
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("json");

    let doc = match load_qcm_doc(conn, &qcm_id) {
        Ok(Some(d)) => d,
        Ok(None) => return err(&req.id, "not_found", "qcm not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let data = match format {
        "json" => match exchange::to_json(&doc) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "invalid_format", e.to_string(), None),
        },
        "xml" => exchange::to_xml(&doc),
        _ => return err(&req.id, "invalid_format", "format must be json or xml", None),
    };

    ok(&req.id, json!({ "format": format, "data": data }))
}

fn handle_qcms_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = role_of(req);
    if !policy::can_author_content(&role) {
        return err(&req.id, "forbidden", "role may not import quizzes", None);
    }
    let format = match required_str(req, "format") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(data) = req.params.get("data").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing data", None);
    };

    let doc = match format.as_str() {
        "json" => exchange::from_json(data),
        "xml" => exchange::from_xml(data),
        _ => return err(&req.id, "invalid_format", "format must be json or xml", None),
    };
    let doc = match doc {
        Ok(d) => d,
        Err(e) => return err(&req.id, "invalid_format", e.to_string(), None),
    };
    if doc.title.trim().is_empty() {
        return err(&req.id, "invalid_format", "document has no title", None);
    }

    let qcm_id = match super::qcms::insert_qcm_document(conn, req, &doc) {
        Ok(id) => id,
        Err(e) => return e,
    };

    let after = super::qcms::qcm_meta_json(conn, &qcm_id).ok().flatten();
    let _ = db::record_audit(
        conn,
        "qcm.imported",
        "qcm",
        Some(&qcm_id),
        req.params.get("userId").and_then(|v| v.as_str()),
        None,
        after.as_ref(),
    );

    ok(&req.id, json!({ "qcmId": qcm_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "qcms.export" => Some(handle_qcms_export(state, req)),
        "qcms.import" => Some(handle_qcms_import(state, req)),
        _ => None,
    }
}
