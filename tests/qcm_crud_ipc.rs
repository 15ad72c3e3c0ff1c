
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn qcm_lifecycle_roundtrip() {
    let workspace = temp_dir("qcmd-crud");
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
        json!({
            "role": "editor",
            "userId": "u-1",
            "title": "VMware basics",
            "description": "Datacenter virtualization",
            "iconClass": "fa-server",
            "difficultyLevel": "beginner",
            "passingThreshold": 70,
            "pages": [{
                "name": "Intro",
                "questions": [{
                    "text": "What is a hypervisor?",
                    "type": "single",
                    "options": [
                        { "id": "A", "text": "A VM manager" },
                        { "id": "B", "text": "A network switch" }
                    ],
                    "correctAnswers": ["A"],
                    "explanation": "It hosts virtual machines."
                }]
            }]
        }),
    );
    let qcm_id = created
        .get("qcmId")
        .and_then(|v| v.as_str())
        .expect("qcmId")
        .to_string();

    let full = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "qcms.get",
        json!({ "qcmId": qcm_id }),
    );
    assert_eq!(full.get("title").and_then(|v| v.as_str()), Some("VMware basics"));
    assert_eq!(full.get("status").and_then(|v| v.as_str()), Some("draft"));
    assert_eq!(full.get("passingThreshold").and_then(|v| v.as_i64()), Some(70));
    let pages = full.get("pages").and_then(|v| v.as_array()).expect("pages");
    assert_eq!(pages.len(), 1);
    let questions = pages[0]
        .get("questions")
        .and_then(|v| v.as_array())
        .expect("questions");
    assert_eq!(questions.len(), 1);
    assert_eq!(
        questions[0].get("correctAnswers"),
        Some(&json!(["A"]))
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "qcms.list",
        json!({ "search": "vmware" }),
    );
    let rows = listed.get("qcms").and_then(|v| v.as_array()).expect("qcms");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("pageCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(rows[0].get("questionCount").and_then(|v| v.as_i64()), Some(1));

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "qcms.list",
        json!({ "search": "no-such-quiz" }),
    );
    assert_eq!(
        empty.get("qcms").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "qcms.update",
        json!({
            "role": "editor",
            "qcmId": qcm_id,
            "patch": { "status": "published", "title": "VMware fundamentals" }
        }),
    );
    let full = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "qcms.get",
        json!({ "qcmId": qcm_id }),
    );
    assert_eq!(full.get("status").and_then(|v| v.as_str()), Some("published"));
    assert_eq!(
        full.get("title").and_then(|v| v.as_str()),
        Some("VMware fundamentals")
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "qcms.update",
        json!({
            "role": "editor",
            "qcmId": qcm_id,
            "patch": { "passingThreshold": 150 }
        }),
    );
    assert_eq!(code, "bad_params");

    let toggled = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "qcms.toggleFavorite",
        json!({ "role": "editor", "qcmId": qcm_id }),
    );
    assert_eq!(toggled.get("isFavorite").and_then(|v| v.as_bool()), Some(true));

    let favorites = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "qcms.list",
        json!({ "favoritesOnly": true }),
    );
    assert_eq!(
        favorites
            .get("qcms")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "qcms.updateStats",
        json!({ "qcmId": qcm_id, "lastScore": 85, "lastTime": 120 }),
    );
    let full = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "qcms.get",
        json!({ "qcmId": qcm_id }),
    );
    assert_eq!(full.get("lastScore").and_then(|v| v.as_i64()), Some(85));
    assert_eq!(full.get("lastTime").and_then(|v| v.as_i64()), Some(120));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "qcms.delete",
        json!({ "role": "editor", "qcmId": qcm_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "qcms.get",
        json!({ "qcmId": qcm_id }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn page_and_question_crud_assign_appended_positions() {
    let workspace = temp_dir("qcmd-crud-pages");
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
        json!({ "role": "editor", "title": "Builder" }),
    );
    let qcm_id = created
        .get("qcmId")
        .and_then(|v| v.as_str())
        .expect("qcmId")
        .to_string();

    let p1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "pages.create",
        json!({ "role": "editor", "qcmId": qcm_id, "name": "One" }),
    );
    assert_eq!(p1.get("position").and_then(|v| v.as_i64()), Some(1));
    let p2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "pages.create",
        json!({ "role": "editor", "qcmId": qcm_id, "name": "Two" }),
    );
    assert_eq!(p2.get("position").and_then(|v| v.as_i64()), Some(2));
    let p2_id = p2
        .get("pageId")
        .and_then(|v| v.as_str())
        .expect("pageId")
        .to_string();

    let q1 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "questions.create",
        json!({
            "role": "editor",
            "pageId": p2_id,
            "text": "Pick one",
            "type": "single",
            "options": [
                { "id": "A", "text": "yes" },
                { "id": "B", "text": "no" }
            ],
            "correctAnswers": ["B"]
        }),
    );
    assert_eq!(q1.get("position").and_then(|v| v.as_i64()), Some(1));
    let q1_id = q1
        .get("questionId")
        .and_then(|v| v.as_str())
        .expect("questionId")
        .to_string();

    // A correct answer that names no option is rejected.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "questions.create",
        json!({
            "role": "editor",
            "pageId": p2_id,
            "text": "Broken",
            "type": "single",
            "options": [
                { "id": "A", "text": "yes" },
                { "id": "B", "text": "no" }
            ],
            "correctAnswers": ["C"]
        }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "questions.update",
        json!({
            "role": "editor",
            "questionId": q1_id,
            "patch": { "text": "Pick exactly one", "correctAnswers": ["A"] }
        }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "questions.get",
        json!({ "questionId": q1_id }),
    );
    assert_eq!(
        fetched.get("text").and_then(|v| v.as_str()),
        Some("Pick exactly one")
    );
    assert_eq!(fetched.get("correctAnswers"), Some(&json!(["A"])));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "pages.update",
        json!({ "role": "editor", "pageId": p2_id, "name": "Renamed" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "pages.delete",
        json!({ "role": "editor", "pageId": p2_id }),
    );

    // Deleting the page removed its questions too.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "questions.get",
        json!({ "questionId": q1_id }),
    );
    assert_eq!(code, "not_found");

    let full = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "qcms.get",
        json!({ "qcmId": qcm_id }),
    );
    let pages = full.get("pages").and_then(|v| v.as_array()).expect("pages");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].get("name").and_then(|v| v.as_str()), Some("One"));

    let _ = std::fs::remove_dir_all(workspace);
}
