// src/api/handlers/grade.rs
use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use std::time::Instant;
use uuid::Uuid;

use crate::api::AppState;
use crate::models::XqueueItem;

/// Grades one queue item and answers with `{score, msg}`.
pub async fn grade(state: web::Data<AppState>, item: web::Json<XqueueItem>) -> Result<HttpResponse> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();
    let item = item.into_inner();

    let result = match &state.worker {
        Some(worker) => state.service.process_in_worker(worker, &item).await,
        None => state.service.process_item(&item).await,
    };

    match result {
        Ok(reply) => {
            log::info!(
                "[{}] graded in {}ms: {}",
                request_id,
                started.elapsed().as_millis(),
                reply.score
            );
            Ok(HttpResponse::Ok().json(reply))
        }
        Err(e) => {
            log::error!("[{}] grading failed: {}", request_id, e);
            Ok(HttpResponse::InternalServerError().json(json!({
                "id": request_id.to_string(),
                "error": e.to_string()
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{configure_routes, AppState};
    use crate::config::AppConfig;
    use crate::models::TECH_DIFF_MSG;
    use crate::worker::Worker;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};
    use serde_json::{json, Value};
    use std::path::Path;

    fn state(root: &Path, fail_open: bool) -> AppState {
        let root = root.display().to_string();
        let config = AppConfig::from_lookup(|key| match key {
            "GRADER_ROOT" => Some(root.clone()),
            "GRADER_FAIL_OPEN" => Some(fail_open.to_string()),
            "GRADER_FORK_PER_ITEM" => Some("false".to_string()),
            "SESSION_SERVER_BIN" => Some("/nonexistent/session-server".to_string()),
            "BATCH_COMMAND" => Some("sh main.sh".to_string()),
            "BATCH_FILE" => Some("main.sh".to_string()),
            _ => None,
        })
        .unwrap();
        AppState::new(config).unwrap()
    }

    fn body(response: &str, payload: Value) -> Value {
        json!({
            "xqueue_body": json!({
                "student_response": response,
                "grader_payload": payload.to_string(),
            }).to_string(),
            "xqueue_files": null
        })
    }

    #[actix_web::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(dir.path(), true)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["status"], "healthy");
        assert_eq!(resp["service"], "xqueue-grader");
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn test_grade_batch_submission() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("answer.toml"),
            "[[cases]]\ninput = \"x\"\nclue = \"42\"\n",
        )
        .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(dir.path(), true)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/grade")
            .set_json(body("echo 42", json!({"grader": "answer.toml", "sample_size": 2})))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["score"], 1.0);
        assert_eq!(resp["msg"], "Good job!");
    }

    #[actix_web::test]
    async fn test_missing_grader_is_opaque() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(dir.path(), false)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/grade")
            .set_json(body("", json!({"grader": "nope.toml"})))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["score"], 0.0);
        assert_eq!(resp["msg"], TECH_DIFF_MSG);
    }

    #[actix_web::test]
    async fn test_fail_closed_returns_server_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chain.toml"), "stations = 2\n").unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(dir.path(), false)))
                .configure(configure_routes),
        )
        .await;

        // The session server binary is missing, which the service cannot recover from.
        let req = test::TestRequest::post()
            .uri("/api/v1/grade")
            .set_json(body("", json!({"grader": "chain.toml", "mode": "interactive"})))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let resp: Value = test::read_body_json(resp).await;
        assert!(resp["error"].as_str().unwrap().contains("session server"));
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn test_crashed_worker_gets_opaque_reply_when_failing_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut app_state = state(dir.path(), true);
        app_state.worker = Some(Worker::new("/bin/false"));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/grade")
            .set_json(body("echo 42", json!({"grader": "answer.toml"})))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp: Value = test::read_body_json(resp).await;
        assert_eq!(resp["score"], 0.0);
        assert_eq!(resp["msg"], TECH_DIFF_MSG);
    }

    #[actix_web::test]
    async fn test_malformed_item_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(dir.path(), true)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/grade")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"nope\": 1}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
