//! QCM document exchange: JSON and a fixed-shape XML rendition.
//!
//! The XML side is deliberately hand-rolled against the one document shape
//! we emit, mirroring the export format exactly; it is not a general XML
//! parser. Imported documents carry no trusted ids; callers regenerate
//! them on insert.

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

pub const STATUS_DRAFT: &str = "draft";
pub const STATUS_PUBLISHED: &str = "published";

pub const DIFFICULTIES: [&str; 3] = ["beginner", "intermediate", "advanced"];
pub const QUESTION_KINDS: [&str; 2] = ["single", "multiple"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcmDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passing_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(default)]
    pub pages: Vec<PageDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub questions: Vec<QuestionDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: Vec<OptionDoc>,
    pub correct_answers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDoc {
    pub id: String,
    pub text: String,
}

/// Checks applied when a question enters through the authoring surface
/// (create/update); imported documents are accepted as-is like the rest
/// of the import path.
pub fn validate_question(q: &QuestionDoc) -> Result<(), String> {
    if q.text.trim().is_empty() {
        return Err("question text must not be empty".to_string());
    }
    if !QUESTION_KINDS.contains(&q.kind.as_str()) {
        return Err("question type must be single or multiple".to_string());
    }
    if q.options.len() < 2 {
        return Err("question needs at least 2 options".to_string());
    }
    if q.correct_answers.is_empty() {
        return Err("question needs at least 1 correct answer".to_string());
    }
    for opt in &q.options {
        if opt.id.trim().is_empty() {
            return Err("option ids must not be empty".to_string());
        }
    }
    for ans in &q.correct_answers {
        if !q.options.iter().any(|o| &o.id == ans) {
            return Err(format!("correct answer {} matches no option", ans));
        }
    }
    if q.kind == "single" && q.correct_answers.len() != 1 {
        return Err("single-choice questions take exactly 1 correct answer".to_string());
    }
    Ok(())
}

pub fn to_json(doc: &QcmDoc) -> anyhow::Result<String> {
    Ok(serde_json::to_string(doc)?)
}

pub fn from_json(data: &str) -> anyhow::Result<QcmDoc> {
    let doc: QcmDoc = serde_json::from_str(data)?;
    if doc.title.trim().is_empty() {
        bail!("document has no title");
    }
    Ok(doc)
}

pub fn to_xml(doc: &QcmDoc) -> String {
    let mut out = String::new();
    out.push_str("<qcm>");
    if let Some(id) = &doc.id {
        tag(&mut out, "id", id);
    }
    tag(&mut out, "title", &doc.title);
    if let Some(v) = &doc.description {
        tag(&mut out, "description", v);
    }
    if let Some(v) = &doc.icon_class {
        tag(&mut out, "iconClass", v);
    }
    if let Some(v) = &doc.status {
        tag(&mut out, "status", v);
    }
    if let Some(v) = &doc.difficulty_level {
        tag(&mut out, "difficultyLevel", v);
    }
    if let Some(v) = doc.passing_threshold {
        tag(&mut out, "passingThreshold", &v.to_string());
    }
    if let Some(v) = &doc.created_at {
        tag(&mut out, "createdAt", v);
    }
    if let Some(v) = doc.last_score {
        tag(&mut out, "lastScore", &v.to_string());
    }
    if let Some(v) = doc.last_time {
        tag(&mut out, "lastTime", &v.to_string());
    }
    out.push_str("<pages>");
    for page in &doc.pages {
        out.push_str("<page>");
        if let Some(id) = &page.id {
            tag(&mut out, "id", id);
        }
        tag(&mut out, "name", &page.name);
        out.push_str("<questions>");
        for q in &page.questions {
            out.push_str("<question>");
            if let Some(id) = &q.id {
                tag(&mut out, "id", id);
            }
            tag(&mut out, "text", &q.text);
            tag(&mut out, "type", &q.kind);
            out.push_str("<options>");
            for opt in &q.options {
                out.push_str(&format!(
                    "<option id=\"{}\">{}</option>",
                    escape_xml(&opt.id),
                    escape_xml(&opt.text)
                ));
            }
            out.push_str("</options>");
            out.push_str("<correctAnswers>");
            for ans in &q.correct_answers {
                tag(&mut out, "answer", ans);
            }
            out.push_str("</correctAnswers>");
            if let Some(v) = &q.explanation {
                tag(&mut out, "explanation", v);
            }
            out.push_str("</question>");
        }
        out.push_str("</questions>");
        out.push_str("</page>");
    }
    out.push_str("</pages>");
    out.push_str("</qcm>");
    out
}

pub fn from_xml(xml: &str) -> anyhow::Result<QcmDoc> {
    let qcm_body = element(xml, "qcm")
        .map(|(_, inner)| inner)
        .ok_or_else(|| anyhow!("no <qcm> element"))?;

    let title = tag_value(qcm_body, "title")
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let status = tag_value(qcm_body, "status");
    let difficulty_level =
        tag_value(qcm_body, "difficultyLevel").filter(|v| DIFFICULTIES.contains(&v.as_str()));
    let passing_threshold =
        tag_value(qcm_body, "passingThreshold").and_then(|v| v.parse::<i64>().ok());

    let mut pages = Vec::new();
    for (_, page_body) in elements(qcm_body, "page") {
        let name = tag_value(page_body, "name")
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Page".to_string());
        let mut questions = Vec::new();
        for (_, q_body) in elements(page_body, "question") {
            questions.push(parse_question(q_body));
        }
        pages.push(PageDoc {
            id: None,
            name,
            questions,
        });
    }

    Ok(QcmDoc {
        id: None,
        title,
        description: tag_value(qcm_body, "description"),
        icon_class: tag_value(qcm_body, "iconClass"),
        status,
        difficulty_level,
        passing_threshold,
        created_at: None,
        last_score: None,
        last_time: None,
        is_favorite: None,
        pages,
    })
}

fn parse_question(q_body: &str) -> QuestionDoc {
    let text = tag_value(q_body, "text").unwrap_or_default();
    let kind = tag_value(q_body, "type")
        .filter(|k| QUESTION_KINDS.contains(&k.as_str()))
        .unwrap_or_else(|| "single".to_string());

    let mut options = Vec::new();
    let raw_options = elements(q_body, "option");
    for (idx, (attrs, inner)) in raw_options.iter().enumerate() {
        let id = attr(attrs, "id").unwrap_or_else(|| fallback_option_id(idx));
        options.push(OptionDoc {
            id,
            text: unescape_xml(inner.trim()),
        });
    }

    // Correct answers come either from explicit <answer> elements or from
    // correct="true" attributes on the options themselves.
    let mut correct_answers: Vec<String> = elements(q_body, "answer")
        .into_iter()
        .map(|(_, inner)| unescape_xml(inner.trim()))
        .filter(|a| !a.is_empty())
        .collect();
    if correct_answers.is_empty() {
        for (idx, (attrs, _)) in raw_options.iter().enumerate() {
            if attr(attrs, "correct").as_deref() == Some("true") {
                correct_answers.push(attr(attrs, "id").unwrap_or_else(|| fallback_option_id(idx)));
            }
        }
    }

    QuestionDoc {
        id: None,
        text,
        kind,
        options,
        correct_answers,
        explanation: tag_value(q_body, "explanation"),
    }
}

fn fallback_option_id(idx: usize) -> String {
    // A, B, C, ... like the hand-entered documents use.
    char::from_u32('A' as u32 + (idx as u32 % 26))
        .unwrap_or('A')
        .to_string()
}

fn tag(out: &mut String, name: &str, value: &str) {
    out.push('<');
    out.push_str(name);
    out.push('>');
    out.push_str(&escape_xml(value));
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// First `<name ...>inner</name>` at or after `from`; returns
/// (attribute text, inner, offset just past the close tag).
fn element_at<'a>(xml: &'a str, name: &str, from: usize) -> Option<(&'a str, &'a str, usize)> {
    let open_prefix = format!("<{}", name);
    let close = format!("</{}>", name);
    let mut search_from = from;
    loop {
        let start = xml[search_from..].find(&open_prefix)? + search_from;
        let after_name = start + open_prefix.len();
        // Reject partial matches like <questions> when scanning for <question>.
        match xml.as_bytes().get(after_name) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') => {}
            _ => {
                search_from = after_name;
                continue;
            }
        }
        let open_end = xml[after_name..].find('>')? + after_name;
        let attrs = xml[after_name..open_end].trim();
        let inner_start = open_end + 1;
        let inner_end = xml[inner_start..].find(&close)? + inner_start;
        return Some((attrs, &xml[inner_start..inner_end], inner_end + close.len()));
    }
}

fn element<'a>(xml: &'a str, name: &str) -> Option<(&'a str, &'a str)> {
    element_at(xml, name, 0).map(|(attrs, inner, _)| (attrs, inner))
}

/// Every `<name ...>inner</name>` in `xml`, in document order.
fn elements<'a>(xml: &'a str, name: &str) -> Vec<(&'a str, &'a str)> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some((attrs, inner, next)) = element_at(xml, name, from) {
        found.push((attrs, inner));
        from = next;
    }
    found
}

fn tag_value(xml: &str, name: &str) -> Option<String> {
    element(xml, name).map(|(_, inner)| unescape_xml(inner.trim()))
}

fn attr(attrs: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let start = attrs.find(&needle)? + needle.len();
    let end = attrs[start..].find('"')? + start;
    Some(unescape_xml(&attrs[start..end]))
}
