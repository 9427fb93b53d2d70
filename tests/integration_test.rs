//! Integration tests against an in-process server.
//!
//! Backends are in memory and the worker is stepped explicitly, so every
//! state a client can observe is reachable deterministically.

mod helpers;

use helpers::*;
use reqwest::StatusCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use motto_transcribe::models::job::{JobState, MAX_DELIVERIES, MAX_RETRIES};
use motto_transcribe::services::job_store::ReconcileClaim;
use motto_transcribe::services::queue::QueuedJob;

const SAMPLE_AUDIO: &[u8] = b"\x1aE\xdf\xa3 fake webm payload";

#[tokio::test]
async fn test_upload_transcribe_and_update_motto() {
    let app = TestApp::spawn().await;
    let token = app.register("alice").await;

    let release = Arc::new(Notify::new());
    app.transcriber
        .push(Step::Gate(release.clone(), "hello world".to_string()));

    let job_id = app.submit(&token, "sample.webm", SAMPLE_AUDIO).await;
    let job_id = job_id.to_string();

    let (status, body) = app.poll(&token, &job_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.state, "Pending");

    let worker = app.worker.clone();
    let handle = tokio::spawn(async move { worker.process_next().await });

    let body = app.wait_for_state(&token, &job_id, "Processing").await;
    assert!(body.result.is_none());
    assert_eq!(app.profile_motto(&token).await.as_deref(), Some("carpe diem"));

    release.notify_one();
    assert!(handle.await.unwrap().unwrap());

    let (status, body) = app.poll(&token, &job_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.state, "Succeeded");
    assert_eq!(body.result.as_deref(), Some("hello world"));
    assert_eq!(app.profile_motto(&token).await.as_deref(), Some("hello world"));

    // Upload and intermediate are gone once the job is terminal.
    assert!(app.stored_files().is_empty());
}

#[tokio::test]
async fn test_repeated_timeouts_fail_after_retry_bound() {
    let app = TestApp::spawn().await;
    let token = app.register("bob").await;

    for _ in 0..=MAX_RETRIES {
        app.transcriber.push(Step::Hang);
    }

    let job_id = app.submit(&token, "slow.webm", SAMPLE_AUDIO).await;
    app.drain().await;

    assert_eq!(
        app.transcriber.calls.load(Ordering::SeqCst),
        MAX_RETRIES as usize + 1
    );

    let (_, body) = app.poll(&token, &job_id.to_string()).await;
    assert_eq!(body.state, "Failed");
    let error = body.error.expect("failure detail");
    assert!(error.contains("timed out"), "unexpected error: {}", error);

    let job = app.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, MAX_RETRIES);
    assert!(app.stored_files().is_empty());

    // The motto is untouched by a failed job.
    assert_eq!(app.profile_motto(&token).await.as_deref(), Some("carpe diem"));
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let app = TestApp::spawn().await;
    let token = app.register("carol").await;

    app.transcriber.push(Step::Hang);
    app.transcriber.push(Step::Text("second time lucky".to_string()));

    let job_id = app.submit(&token, "flaky.ogg", SAMPLE_AUDIO).await;
    app.drain().await;

    let job = app.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, 1);
    assert_eq!(
        job.state,
        JobState::Succeeded {
            result: "second time lucky".to_string()
        }
    );
    assert!(app.stored_files().is_empty());
}

#[tokio::test]
async fn test_repeated_polls_write_motto_once() {
    let app = TestApp::spawn().await;
    let token = app.register("dave").await;

    let job_id = app.submit(&token, "sample.webm", SAMPLE_AUDIO).await;
    app.drain().await;

    let job_id = job_id.to_string();
    let polls = (0..5).map(|_| app.poll(&token, &job_id));
    let results = futures::future::join_all(polls).await;
    for (status, body) in results {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.state, "Succeeded");
    }
    let (_, body) = app.poll(&token, &job_id).await;
    assert_eq!(body.result.as_deref(), Some("hello world"));

    assert_eq!(app.users.motto_writes.load(Ordering::SeqCst), 1);
    assert_eq!(app.profile_motto(&token).await.as_deref(), Some("hello world"));
}

#[tokio::test]
async fn test_empty_upload_is_rejected_without_job() {
    let app = TestApp::spawn().await;
    let token = app.register("erin").await;

    let response = app.upload(&token, "empty.webm", b"").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Audio file is empty");

    assert_eq!(app.queue.depth().await.unwrap(), 0);
    assert!(app.stored_files().is_empty());
    assert!(!app.worker.process_next().await.unwrap());
}

#[tokio::test]
async fn test_unknown_job_reports_not_found() {
    let app = TestApp::spawn().await;
    let token = app.register("frank").await;

    let (status, body) = app.poll(&token, &Uuid::new_v4().to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.state, "NotFound");

    let (status, body) = app.poll(&token, "not-a-job-id").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.state, "NotFound");
    assert_eq!(body.job_id, "not-a-job-id");
}

#[tokio::test]
async fn test_malformed_audio_fails_without_retry() {
    let app = TestApp::spawn().await;
    let token = app.register("grace").await;

    let job_id = app.submit(&token, "broken.webm", b"garbage bytes").await;
    app.drain().await;

    let job = app.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, 0);
    assert!(job.state.error().unwrap().contains("Malformed audio"));
    assert_eq!(app.transcriber.calls.load(Ordering::SeqCst), 0);
    assert!(app.stored_files().is_empty());
}

#[tokio::test]
async fn test_jobs_of_other_users_are_hidden() {
    let app = TestApp::spawn().await;
    let owner = app.register("heidi").await;
    let other = app.register("ivan").await;

    let job_id = app.submit(&owner, "sample.webm", SAMPLE_AUDIO).await;
    app.drain().await;

    let (status, body) = app.poll(&other, &job_id.to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.state, "NotFound");

    // Nobody's motto changed by the foreign poll.
    assert_eq!(app.users.motto_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_redelivered_terminal_job_is_skipped() {
    let app = TestApp::spawn().await;
    let token = app.register("judy").await;

    let job_id = app.submit(&token, "sample.webm", SAMPLE_AUDIO).await;
    app.drain().await;
    assert_eq!(app.transcriber.calls.load(Ordering::SeqCst), 1);

    app.queue.enqueue(&QueuedJob::new(job_id)).await.unwrap();
    app.drain().await;

    assert_eq!(app.transcriber.calls.load(Ordering::SeqCst), 1);
    let job = app.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.state.result(), Some("hello world"));
    assert_eq!(app.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_job_that_keeps_crashing_workers_is_failed() {
    // Zero lease: a crashed attempt is redelivered on the next poll of the queue.
    let app = TestApp::spawn_with(|_| {}, Duration::ZERO).await;
    let token = app.register("kim").await;

    for _ in 0..MAX_DELIVERIES {
        app.transcriber.push(Step::Crash);
    }
    let job_id = app.submit(&token, "poison.webm", SAMPLE_AUDIO).await;

    for _ in 0..MAX_DELIVERIES {
        let worker = app.worker.clone();
        let crashed = tokio::spawn(async move { worker.process_next().await }).await;
        assert!(crashed.is_err(), "attempt should have crashed");
    }

    let job = app.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Processing);
    assert_eq!(job.attempts, MAX_DELIVERIES);

    assert!(app.worker.process_next().await.unwrap());

    let (_, body) = app.poll(&token, &job_id.to_string()).await;
    assert_eq!(body.state, "Failed");
    assert!(body.error.unwrap().contains("interrupted attempts"));
    assert_eq!(
        app.transcriber.calls.load(Ordering::SeqCst),
        MAX_DELIVERIES as usize
    );
    assert!(app.stored_files().is_empty());
    assert!(!app.worker.process_next().await.unwrap());
}

#[tokio::test]
async fn test_abandoned_reconciliation_claim_is_retried() {
    let app = TestApp::spawn().await;
    let token = app.register("lena").await;

    let job_id = app.submit(&token, "sample.webm", SAMPLE_AUDIO).await;
    app.drain().await;

    // A poller that claimed the write and died before storing the motto.
    let claim = app
        .jobs
        .claim_reconciliation(job_id, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(claim, ReconcileClaim::Claimed);

    let (status, body) = app.poll(&token, &job_id.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.state, "Succeeded");
    assert_eq!(
        body.message.as_deref(),
        Some("Transcription completed; motto update in progress")
    );
    assert_eq!(app.profile_motto(&token).await.as_deref(), Some("carpe diem"));

    tokio::time::sleep(Duration::from_millis(300)).await;

    let (_, body) = app.poll(&token, &job_id.to_string()).await;
    assert_eq!(
        body.message.as_deref(),
        Some("Transcription completed and motto updated")
    );
    assert_eq!(app.profile_motto(&token).await.as_deref(), Some("hello world"));
    assert_eq!(app.users.motto_writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_poll_after_owner_deleted_reports_not_found() {
    let app = TestApp::spawn().await;
    let token = app.register("leo").await;
    let user_id = app.user_id("leo").await;

    let job_id = app.submit(&token, "sample.webm", SAMPLE_AUDIO).await;
    app.drain().await;

    assert!(app.users.remove(user_id));

    let (status, body) = app.poll(&token, &job_id.to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.state, "NotFound");
    assert_eq!(body.job_id, job_id.to_string());
    assert_eq!(body.message.as_deref(), Some("User not found"));

    // The claim was released, so a later poll is free to write.
    let claim = app
        .jobs
        .claim_reconciliation(job_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(claim, ReconcileClaim::Claimed);

    // The job keeps its result.
    let job = app.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.state.result(), Some("hello world"));
}

#[tokio::test]
async fn test_upload_from_deleted_user_is_not_found() {
    let app = TestApp::spawn().await;
    let token = app.register("mia").await;
    let user_id = app.user_id("mia").await;
    assert!(app.users.remove(user_id));

    let response = app.upload(&token, "sample.webm", SAMPLE_AUDIO).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "User not found");

    assert_eq!(app.queue.depth().await.unwrap(), 0);
    assert!(app.stored_files().is_empty());
}

#[tokio::test]
async fn test_upload_size_limit() {
    let app = TestApp::spawn_with(|config| config.max_upload_bytes = 1024, Duration::from_secs(60)).await;
    let token = app.register("nina").await;

    let full = vec![7u8; 1024];
    let response = app.upload(&token, "full.webm", &full).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let oversized = vec![7u8; 1025];
    let response = app.upload(&token, "big.webm", &oversized).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.queue.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_outdated_client_gets_upgrade_required() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();
    let payload = serde_json::json!({ "username": "mallory", "password": TEST_PASSWORD });

    let missing = client
        .post(format!("{}/api/v1/register", app.base_url))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UPGRADE_REQUIRED);

    let old = client
        .post(format!("{}/api/v1/register", app.base_url))
        .header("app-version", "1.1.9")
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(old.status(), StatusCode::UPGRADE_REQUIRED);
}

#[tokio::test]
async fn test_account_lifecycle() {
    let app = TestApp::spawn().await;
    app.register("kate").await;

    let duplicate = app
        .client
        .post(format!("{}/api/v1/register", app.base_url))
        .json(&serde_json::json!({ "username": "kate", "password": TEST_PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let wrong = app
        .client
        .post(format!("{}/api/v1/login", app.base_url))
        .json(&serde_json::json!({ "username": "kate", "password": "not the password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let login = app
        .client
        .post(format!("{}/api/v1/login", app.base_url))
        .json(&serde_json::json!({ "username": "kate", "password": TEST_PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let body: serde_json::Value = login.json().await.unwrap();
    let token = body["token"].as_str().unwrap();
    assert_eq!(app.profile_motto(token).await.as_deref(), Some("carpe diem"));

    let anonymous = app
        .client
        .get(format!("{}/api/v1/user", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_reports_ok() {
    let app = TestApp::spawn().await;
    let response = app
        .client
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}
