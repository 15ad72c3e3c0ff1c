
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn mutations_leave_an_audit_trail() {
    let workspace = temp_dir("qcmd-audit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "qcms.create",
        json!({ "role": "editor", "userId": "u-42", "title": "Audited quiz" }),
    );
    let qcm_id = created
        .get("qcmId")
        .and_then(|v| v.as_str())
        .expect("qcmId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "qcms.update",
        json!({
            "role": "editor",
            "userId": "u-42",
            "qcmId": qcm_id,
            "patch": { "title": "Audited quiz v2" }
        }),
    );
    let page = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "pages.create",
        json!({ "role": "editor", "userId": "u-42", "qcmId": qcm_id, "name": "P" }),
    );
    let page_id = page
        .get("pageId")
        .and_then(|v| v.as_str())
        .expect("pageId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "pages.delete",
        json!({ "role": "editor", "userId": "u-42", "pageId": page_id }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "audit.list",
        json!({ "role": "admin" }),
    );
    let events: Vec<String> = listed
        .get("events")
        .and_then(|v| v.as_array())
        .expect("events")
        .iter()
        .map(|e| {
            e.get("event")
                .and_then(|v| v.as_str())
                .expect("event name")
                .to_string()
        })
        .collect();
    assert!(events.contains(&"qcm.created".to_string()));
    assert!(events.contains(&"qcm.updated".to_string()));
    assert!(events.contains(&"page.created".to_string()));
    assert!(events.contains(&"page.deleted".to_string()));

    // The update event captured both sides of the change.
    let update_event = listed
        .get("events")
        .and_then(|v| v.as_array())
        .expect("events")
        .iter()
        .find(|e| e.get("event").and_then(|v| v.as_str()) == Some("qcm.updated"))
        .expect("qcm.updated event")
        .clone();
    assert_eq!(
        update_event
            .get("before")
            .and_then(|b| b.get("title"))
            .and_then(|v| v.as_str()),
        Some("Audited quiz")
    );
    assert_eq!(
        update_event
            .get("after")
            .and_then(|a| a.get("title"))
            .and_then(|v| v.as_str()),
        Some("Audited quiz v2")
    );
    assert_eq!(
        update_event.get("userId").and_then(|v| v.as_str()),
        Some("u-42")
    );

    // Entity filters narrow the trail.
    let pages_only = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "audit.list",
        json!({ "role": "admin", "entity": "page" }),
    );
    let page_events = pages_only
        .get("events")
        .and_then(|v| v.as_array())
        .expect("events");
    assert_eq!(page_events.len(), 2);
    assert!(page_events
        .iter()
        .all(|e| e.get("entity").and_then(|v| v.as_str()) == Some("page")));

    let limited = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "audit.list",
        json!({ "role": "admin", "limit": 1 }),
    );
    assert_eq!(
        limited
            .get("events")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn audit_log_is_admin_only() {
    let workspace = temp_dir("qcmd-audit-rbac");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "audit.list",
        json!({ "role": "editor" }),
    );
    assert_eq!(code, "forbidden");

    let code = request_err(&mut stdin, &mut reader, "3", "audit.list", json!({}));
    assert_eq!(code, "forbidden");

    let _ = std::fs::remove_dir_all(workspace);
}
