mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, read, TestApp};
use leadsign::access::Role;
use serde_json::{json, Value};

fn lead_payload(name: &str) -> Value {
    json!({
        "name": name,
        "email": format!("{}@borrower.test", name.to_lowercase().replace(' ', ".")),
        "phone": "555-0100",
        "loanAmount": 250000,
        "loanType": "equipment"
    })
}

fn ids(list: &Value) -> Vec<String> {
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn create_lead_applies_defaults_and_validates() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (referrer_id, token) = app
        .user_with_token("Rita Referrer", "rita@example.com", Role::Referrer)
        .await?;
    let someone_else = app
        .insert_user("Other", "other@example.com", "password123", Role::Referrer)
        .await?;

    let mut payload = lead_payload("Acme Corp");
    payload["referrer"] = json!(someone_else);
    let (status, lead) = read(app.post_json("/api/leads", &payload, Some(&token)).await?).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(lead["status"], "new");
    assert_eq!(lead["source"], "referral");
    assert_eq!(lead["loanType"], "equipment");
    assert_eq!(lead["loanAmount"].as_f64(), Some(250000.0));
    assert_eq!(lead["referrer"]["id"], json!(referrer_id));
    assert_eq!(lead["referrer"]["name"], "Rita Referrer");
    assert_eq!(lead["assignedTo"], Value::Null);
    assert_eq!(lead["notes"], json!([]));
    assert_eq!(lead["documents"], json!([]));

    let (status, body) = read(
        app.post_json(
            "/api/leads",
            &json!({
                "name": "  ",
                "email": "borrower@example.com",
                "loanAmount": -5,
                "loanType": "business"
            }),
            Some(&token),
        )
        .await?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .expect("fields")
        .iter()
        .filter_map(|f| f["field"].as_str())
        .collect();
    assert_eq!(fields, vec!["loanAmount", "name"]);

    let mut payload = lead_payload("Ghost Assignee");
    payload["assignedTo"] = json!(uuid::Uuid::new_v4());
    let (status, body) = read(app.post_json("/api/leads", &payload, Some(&token)).await?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"][0]["field"], "assignedTo");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn lead_visibility_follows_role() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (_, admin) = app
        .user_with_token("Ada Admin", "ada@example.com", Role::Admin)
        .await?;
    let (_, rita) = app
        .user_with_token("Rita", "rita@example.com", Role::Referrer)
        .await?;
    let (_, rob) = app
        .user_with_token("Rob", "rob@example.com", Role::Referrer)
        .await?;
    let (uma_id, uma) = app
        .user_with_token("Uma", "uma@example.com", Role::User)
        .await?;

    let (_, ritas) = read(
        app.post_json("/api/leads", &lead_payload("Rita Lead"), Some(&rita))
            .await?,
    )
    .await?;
    let mut assigned = lead_payload("Assigned Lead");
    assigned["assignedTo"] = json!(uma_id);
    let (_, robs) = read(app.post_json("/api/leads", &assigned, Some(&rob)).await?).await?;
    let ritas_id = ritas["id"].as_str().expect("id").to_string();
    let robs_id = robs["id"].as_str().expect("id").to_string();

    let (_, list) = read(app.get("/api/leads", Some(&admin)).await?).await?;
    assert_eq!(ids(&list), vec![robs_id.clone(), ritas_id.clone()]);

    let (_, list) = read(app.get("/api/leads", Some(&rita)).await?).await?;
    assert_eq!(ids(&list), vec![ritas_id.clone()]);

    let (_, list) = read(app.get("/api/leads", Some(&uma)).await?).await?;
    assert_eq!(ids(&list), vec![robs_id.clone()]);

    let (_, list) = read(app.get("/api/leads?loanType=business", Some(&admin)).await?).await?;
    assert!(ids(&list).is_empty());

    let response = app.get(&format!("/api/leads/{robs_id}"), Some(&rita)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .get(&format!("/api/leads/{}", uuid::Uuid::new_v4()), Some(&rita))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, detail) = read(app.get(&format!("/api/leads/{robs_id}"), Some(&uma)).await?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["assignedTo"]["email"], "uma@example.com");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn update_lead_respects_allow_list_and_clears_nullables() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (rita_id, rita) = app
        .user_with_token("Rita", "rita@example.com", Role::Referrer)
        .await?;
    let other = app
        .insert_user("Other", "other@example.com", "password123", Role::Referrer)
        .await?;

    let (_, lead) = read(
        app.post_json("/api/leads", &lead_payload("Patch Me"), Some(&rita))
            .await?,
    )
    .await?;
    let lead_id = lead["id"].as_str().expect("id").to_string();

    let (status, updated) = read(
        app.put_json(
            &format!("/api/leads/{lead_id}"),
            &json!({
                "status": "qualified",
                "phone": null,
                "expectedCloseDate": "2026-12-31",
                "referrer": other,
                "id": uuid::Uuid::new_v4(),
                "createdAt": "2000-01-01T00:00:00"
            }),
            Some(&rita),
        )
        .await?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["id"], json!(lead_id));
    assert_eq!(updated["status"], "qualified");
    assert_eq!(updated["phone"], Value::Null);
    assert_eq!(updated["expectedCloseDate"], "2026-12-31");
    assert_eq!(updated["referrer"]["id"], json!(rita_id));
    assert_eq!(updated["createdAt"], lead["createdAt"]);
    assert_eq!(updated["name"], "Patch Me");

    let response = app
        .put_json(
            &format!("/api/leads/{lead_id}"),
            &json!({ "status": "archived" }),
            Some(&rita),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, updated) = read(
        app.put_json(
            &format!("/api/leads/{lead_id}"),
            &json!({ "expectedCloseDate": null }),
            Some(&rita),
        )
        .await?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["expectedCloseDate"], Value::Null);
    assert_eq!(updated["status"], "qualified");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn notes_and_document_attachments() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (_, admin) = app
        .user_with_token("Ada Admin", "ada@example.com", Role::Admin)
        .await?;
    let (_, rita) = app
        .user_with_token("Rita", "rita@example.com", Role::Referrer)
        .await?;
    let (_, rob) = app
        .user_with_token("Rob", "rob@example.com", Role::Referrer)
        .await?;

    let (_, lead) = read(
        app.post_json("/api/leads", &lead_payload("Noted Lead"), Some(&rita))
            .await?,
    )
    .await?;
    let lead_id = lead["id"].as_str().expect("id").to_string();

    let (status, detail) = read(
        app.post_json(
            &format!("/api/leads/{lead_id}/notes"),
            &json!({ "content": "Called, left voicemail" }),
            Some(&rita),
        )
        .await?,
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(detail["notes"][0]["content"], "Called, left voicemail");
    assert_eq!(detail["notes"][0]["createdBy"]["name"], "Rita");

    let response = app
        .post_json(
            &format!("/api/leads/{lead_id}/notes"),
            &json!({ "content": "" }),
            Some(&rita),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            &format!("/api/leads/{lead_id}/notes"),
            &json!({ "content": "Not my lead" }),
            Some(&rob),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let (_, document) = read(
        app.upload_document(
            "application.pdf",
            "application/pdf",
            b"%PDF-1.4 application",
            &[("title", "Loan Application".to_string())],
            &rita,
        )
        .await?,
    )
    .await?;
    let document_id = document["id"].clone();

    for _ in 0..2 {
        let (status, detail) = read(
            app.post_json(
                &format!("/api/leads/{lead_id}/documents"),
                &json!({ "documentId": document_id }),
                Some(&rita),
            )
            .await?,
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        let attached = detail["documents"].as_array().expect("documents");
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0]["title"], "Loan Application");
        assert_eq!(attached[0]["status"], "draft");
    }

    let (status, body) = read(
        app.post_json(
            &format!("/api/leads/{lead_id}/documents"),
            &json!({ "documentId": uuid::Uuid::new_v4() }),
            Some(&rita),
        )
        .await?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"][0]["field"], "documentId");

    let response = app
        .delete(&format!("/api/leads/{lead_id}"), Some(&rita))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete(&format!("/api/leads/{lead_id}"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get(&format!("/api/leads/{lead_id}"), Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .get(&format!("/api/documents/{}", document_id.as_str().expect("id")), Some(&rita))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn create_lead_names_malformed_fields() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app
        .user_with_token("Rita Referrer", "rita@example.com", Role::Referrer)
        .await?;

    let mut missing_type = lead_payload("No Type");
    if let Some(fields) = missing_type.as_object_mut() {
        fields.remove("loanType");
    }
    let mut unknown_type = lead_payload("Bad Type");
    unknown_type["loanType"] = json!("mortgage");
    let mut text_amount = lead_payload("Bad Amount");
    text_amount["loanAmount"] = json!("abc");

    for (payload, field) in [
        (missing_type, "loanType"),
        (unknown_type, "loanType"),
        (text_amount, "loanAmount"),
    ] {
        let (status, body) =
            read(app.post_json("/api/leads", &payload, Some(&token)).await?).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "unexpected body {body}");
        assert_eq!(body["fields"][0]["field"], field, "unexpected body {body}");
    }

    let (_, list) = read(app.get("/api/leads", Some(&token)).await?).await?;
    assert!(ids(&list).is_empty());

    app.cleanup().await?;
    Ok(())
}
