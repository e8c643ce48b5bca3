mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use common::{acquire_db_lock, body_to_vec, json_body, TestApp};
use labinsight::models::Role;
use serde_json::json;

const PDF: &[u8] = b"%PDF-1.4 complete blood count";

async fn patient_token(app: &TestApp) -> Result<String> {
    app.insert_user("Pat", "p@x.com", Some("secret1"), Role::Patient)
        .await?;
    app.login_token("p@x.com", "secret1").await
}

#[tokio::test]
async fn upload_stores_file_and_analysis() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = patient_token(&app).await?;

    let response = app
        .upload_report("blood test (1).pdf", "application/pdf", PDF, &token)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await?;
    assert_eq!(body["ai_summary"]["severity"], "normal");
    assert_eq!(body["testResults"][0]["name"], "Hemoglobin");
    let report_id = body["report_id"].as_str().unwrap().to_string();

    let storage_key = format!("{report_id}/blood_test__1_.pdf");
    assert!(app.storage().contains(&storage_key).await);
    assert_eq!(app.analyzer().calls(), 1);

    let report = json_body(app.get(&format!("/report/{report_id}"), Some(&token)).await?).await?;
    assert_eq!(report["file_name"], "blood_test__1_.pdf");
    assert_eq!(report["size_bytes"], PDF.len());
    assert_eq!(report["checksum"].as_str().unwrap().len(), 64);

    let response = app
        .get(&format!("/download-report/{report_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()?
        .starts_with("attachment; filename=\"blood_test__1_.pdf\""));
    assert_eq!(body_to_vec(response.into_body()).await?, PDF);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn upload_succeeds_when_analysis_times_out() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = patient_token(&app).await?;
    app.analyzer().set_failing(true);

    let response = app
        .upload_report("scan.png", "image/png", b"\x89PNG fake", &token)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await?;
    assert_eq!(body["ai_summary"]["summary"], "AI analysis unavailable");
    assert_eq!(body["ai_summary"]["severity"], "low");
    assert_eq!(body["testResults"], json!([]));

    let latest = json_body(app.get("/my-latest-report", Some(&token)).await?).await?;
    assert_eq!(
        latest["latestReport"]["ai_summary"]["summary"],
        "AI analysis unavailable"
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn upload_rejects_unsupported_files() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = patient_token(&app).await?;

    let response = app
        .upload_report("notes.txt", "text/plain", b"hello", &token)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let empty = app
        .upload_report("empty.pdf", "application/pdf", b"", &token)
        .await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.storage().object_count().await, 0);
    assert_eq!(app.analyzer().calls(), 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn download_is_not_found_when_file_is_missing() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = patient_token(&app).await?;

    let body = json_body(
        app.upload_report("cbc.pdf", "application/pdf", PDF, &token)
            .await?,
    )
    .await?;
    let report_id = body["report_id"].as_str().unwrap().to_string();
    assert!(app.storage().remove(&format!("{report_id}/cbc.pdf")).await);

    let metadata = app.get(&format!("/report/{report_id}"), Some(&token)).await?;
    assert_eq!(metadata.status(), StatusCode::OK);

    let download = app
        .get(&format!("/download-report/{report_id}"), Some(&token))
        .await?;
    assert_eq!(download.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn listing_latest_and_delete() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = patient_token(&app).await?;

    let none = app.get("/my-latest-report", Some(&token)).await?;
    assert_eq!(none.status(), StatusCode::NOT_FOUND);

    app.upload_report("first.pdf", "application/pdf", PDF, &token)
        .await?;
    let second = json_body(
        app.upload_report("second.jpg", "image/jpeg", b"\xff\xd8jpeg", &token)
            .await?,
    )
    .await?;
    let second_id = second["report_id"].as_str().unwrap().to_string();

    let summaries = json_body(app.get("/reports", Some(&token)).await?).await?;
    let summaries = &summaries["reports"];
    assert_eq!(summaries.as_array().unwrap().len(), 2);
    assert_eq!(summaries[0]["file_name"], "second.jpg");
    assert_eq!(summaries[0]["severity"], "normal");

    let latest = json_body(app.get("/my-latest-report?email=p@x.com", Some(&token)).await?).await?;
    assert_eq!(latest["latestReport"]["file_id"], second_id.as_str());

    let deleted = app
        .delete(&format!("/delete-report/{second_id}"), Some(&token))
        .await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage().object_count().await, 1);

    let all = json_body(app.get("/all-reports", Some(&token)).await?).await?;
    assert_eq!(all["reports"].as_array().unwrap().len(), 1);
    assert_eq!(all["reports"][0]["file_name"], "first.pdf");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn only_the_assigned_doctor_reads_and_comments() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let patient = patient_token(&app).await?;
    app.insert_user("Dr. Dee", "d@x.com", Some("doctor1"), Role::Doctor)
        .await?;
    let doctor = app.login_token("d@x.com", "doctor1").await?;

    let upload = json_body(
        app.upload_report("cbc.pdf", "application/pdf", PDF, &patient)
            .await?,
    )
    .await?;
    let report_id = upload["report_id"].as_str().unwrap().to_string();
    let comment_path = format!("/doctor/reports/{report_id}/comment");

    let before = app.get("/reports?email=p@x.com", Some(&doctor)).await?;
    assert_eq!(before.status(), StatusCode::FORBIDDEN);
    let early_comment = app
        .post_json(&comment_path, &json!({ "comment": "Looks fine" }), Some(&doctor))
        .await?;
    assert_eq!(early_comment.status(), StatusCode::FORBIDDEN);

    let request = json_body(
        app.post_json(
            "/send-request",
            &json!({ "doctorEmail": "d@x.com", "message": "please review" }),
            Some(&patient),
        )
        .await?,
    )
    .await?;
    app.post_json(
        &format!("/doctor/requests/{}/resolve", request["id"].as_str().unwrap()),
        &json!({ "decision": "accept" }),
        Some(&doctor),
    )
    .await?;

    let after = app.get("/reports?email=p@x.com", Some(&doctor)).await?;
    assert_eq!(after.status(), StatusCode::OK);

    let commented = app
        .post_json(&comment_path, &json!({ "comment": "Iron slightly low" }), Some(&doctor))
        .await?;
    assert_eq!(commented.status(), StatusCode::OK);
    let report = json_body(commented).await?;
    assert_eq!(report["doctor_comment"], "Iron slightly low");
    assert!(report["comment_date"].is_string());

    let doctor_delete = app
        .delete(&format!("/delete-report/{report_id}"), Some(&doctor))
        .await?;
    assert_eq!(doctor_delete.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}
