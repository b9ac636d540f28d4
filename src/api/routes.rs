use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::error::ApiError;
use super::types::*;
use crate::config::Settings;
use crate::db::{self, Store};
use crate::exercise;
use crate::scraper::{self, ScrapeReport, SentenceScraper};

/// Everything a handler needs. Built once in [`serve`] and shared.
pub struct AppState {
    pub settings: Settings,
    pub store: Store,
    pub scraper: SentenceScraper,
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>gapfill</title></head>
<body>
  <h1>gapfill</h1>
  <ul>
    <li><code>POST /exercise/generate</code>: find example sentences</li>
    <li><code>PUT /exercise/submit</code>: create an exercise</li>
    <li><code>GET /exercise/&lt;token&gt;</code>: open an exercise</li>
    <li><code>POST /check</code>: check an answer</li>
  </ul>
</body>
</html>
"#;

/// Start the HTTP server.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    let scraper = SentenceScraper::new(scraper::http_client()?, settings.search_url.clone());
    let addr = settings.bind_addr();
    let state = Arc::new(AppState {
        settings,
        store: Store::new(conn),
        scraper,
    });

    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server running on: {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index", get(index))
        .route("/health", get(health))
        .route("/exercise/generate", post(generate))
        .route("/exercise/submit", put(submit))
        .route("/exercise/:token", get(show_exercise))
        .route("/check", post(check))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request(
            "Either the request body is missing, or json is incorrect.",
        ));
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("JSON cannot be decoded: {}", e)))
}

async fn generate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError> {
    let req: GenerateRequest = parse_body(&body)?;
    info!("New search queries: {:?}", req.queries);

    let reports = state
        .scraper
        .scrape_all(
            &req.queries,
            state.settings.scrape_concurrency,
            state.settings.scrape_timeout(),
        )
        .await;

    let sentences = reports
        .into_iter()
        .map(|report| report.map(ScrapeReport::into_texts))
        .collect();
    Ok(Json(GenerateResponse { sentences }))
}

async fn submit(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let payload: Value = parse_body(&body)?;
    let raw = payload
        .get("sentences")
        .ok_or_else(|| ApiError::bad_request("Missing 'sentences' list in the post data"))?;
    let sentences: Vec<String> = serde_json::from_value(raw.clone())
        .map_err(|_| ApiError::bad_request("'sentences' must be a list of strings"))?;
    if sentences.is_empty() {
        return Err(ApiError::bad_request("Sentences list cannot be empty"));
    }

    let count = sentences.len();
    info!("Submitting {} new sentence(s)", count);
    let token = state
        .store
        .call(move |conn| Ok(exercise::create_exercise(conn, &sentences)))
        .await??;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            student_url: state.settings.student_url(&token),
            tasks: count,
        }),
    ))
}

async fn show_exercise(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<ExerciseView>, ApiError> {
    let lookup = token.clone();
    let view = state
        .store
        .call(move |conn| {
            let Some(exercise) = db::fetch_exercise(conn, &lookup)? else {
                return Ok(None);
            };
            let sentences = db::fetch_sentences(conn, exercise.id)?;
            let tasks = db::fetch_tasks(conn, exercise.id)?;
            Ok(Some(ExerciseView::build(exercise, sentences, tasks)))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No exercise {}", token)))?;
    Ok(Json(view))
}

async fn check(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<CheckResponse>, ApiError> {
    let req: CheckRequest = parse_body(&body)?;
    info!("Checking answer for task {}", req.task_id);

    let task_id = req.task_id;
    let result = state
        .store
        .call(move |conn| exercise::grade_task(conn, task_id, &req.task_answer))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No task {}", task_id)))?;

    Ok(Json(CheckResponse {
        id: task_id,
        result,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, Response};
    use tower::ServiceExt;

    use crate::exercise::TOKEN_LEN;

    fn test_state(search_url: &str) -> Arc<AppState> {
        let settings = Settings {
            search_url: search_url.to_string(),
            ..Settings::default()
        };
        Arc::new(AppState {
            scraper: SentenceScraper::new(reqwest::Client::new(), search_url),
            store: Store::new(db::test_connection()),
            settings,
        })
    }

    fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn submit_one(state: &Arc<AppState>, sentences: &str) -> String {
        let response = router(state.clone())
            .oneshot(request("PUT", "/exercise/submit", sentences))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let url = body["student_url"].as_str().unwrap();
        url.rsplit('/').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn submit_creates_exercise() {
        let state = test_state("http://127.0.0.1:1/search");
        let response = router(state.clone())
            .oneshot(request("PUT", "/exercise/submit", r#"{"sentences": ["I <am> fine"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["tasks"], 1);
        let url = body["student_url"].as_str().unwrap();
        assert!(url.starts_with("http://127.0.0.1:5000/exercise/"));
        let token = url.rsplit('/').next().unwrap().to_string();
        assert_eq!(token.len(), TOKEN_LEN);

        let (exercises, texts, answers) = state
            .store
            .call(move |conn| {
                let stats = db::get_stats(conn)?;
                let exercise = db::fetch_exercise(conn, &token)?.unwrap();
                let texts: Vec<String> = db::fetch_sentences(conn, exercise.id)?
                    .into_iter()
                    .map(|s| s.text)
                    .collect();
                let answers: Vec<String> = db::fetch_tasks(conn, exercise.id)?
                    .into_iter()
                    .map(|t| t.correct_answer)
                    .collect();
                Ok((stats.exercises, texts, answers))
            })
            .await
            .unwrap();
        assert_eq!(exercises, 1);
        assert_eq!(texts, vec!["I <am> fine"]);
        assert_eq!(answers, vec!["am"]);
    }

    #[tokio::test]
    async fn submit_rejects_bad_bodies() {
        let state = test_state("http://127.0.0.1:1/search");
        let cases = [
            ("", "Either the request body is missing, or json is incorrect."),
            ("{not json", "JSON cannot be decoded"),
            (r#"{"queries": []}"#, "Missing 'sentences' list in the post data"),
            (r#"{"sentences": []}"#, "Sentences list cannot be empty"),
            (r#"{"sentences": [1, 2]}"#, "'sentences' must be a list of strings"),
        ];
        for (body, expected) in cases {
            let response = router(state.clone())
                .oneshot(request("PUT", "/exercise/submit", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {:?}", body);
            assert_eq!(
                response.headers()[header::CONTENT_TYPE],
                "application/json"
            );
            let json = json_body(response).await;
            assert!(
                json["message"].as_str().unwrap().starts_with(expected),
                "{:?} -> {}",
                body,
                json
            );
        }

        let stats = state.store.call(|conn| db::get_stats(conn)).await.unwrap();
        assert_eq!(stats.exercises, 0);
    }

    #[tokio::test]
    async fn generate_returns_one_entry_per_query() {
        let mut server = mockito::Server::new_async().await;
        let html = std::fs::read_to_string("tests/fixtures/search_results.html").unwrap();
        server
            .mock("GET", mockito::Matcher::Any)
            .match_query(mockito::Matcher::UrlEncoded("query".into(), "am".into()))
            .with_status(200)
            .with_body(html)
            .create_async()
            .await;
        server
            .mock("GET", mockito::Matcher::Any)
            .match_query(mockito::Matcher::UrlEncoded("query".into(), "missing".into()))
            .with_status(404)
            .create_async()
            .await;

        let state = test_state(&format!("{}/eng/sentences/search", server.url()));
        let response = router(state)
            .oneshot(request(
                "POST",
                "/exercise/generate",
                r#"{"queries": ["am", "missing"]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body,
            json!({
                "sentences": [
                    ["I <am> a student.", "They <were> late, and I <am> sorry."],
                    null
                ]
            })
        );
    }

    #[tokio::test]
    async fn generate_requires_queries() {
        let state = test_state("http://127.0.0.1:1/search");
        for body in ["", r#"{"sentences": []}"#] {
            let response = router(state.clone())
                .oneshot(request("POST", "/exercise/generate", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn view_and_check_an_exercise() {
        let state = test_state("http://127.0.0.1:1/search");
        let token = submit_one(&state, r#"{"sentences": ["I <am> a <student>", "Plain."]}"#).await;

        let response = router(state.clone())
            .oneshot(request("GET", &format!("/exercise/{}", token), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view: ExerciseView = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(view.student_url, token);
        assert_eq!(view.sentences.len(), 2);
        assert!(view.sentences[1].tasks.is_empty());

        let first = &view.sentences[0];
        assert_eq!(first.tasks.len(), 2);
        let student_task = first.tasks[1].id;
        assert_eq!(
            first.segments[3],
            SegmentView::Gap {
                position: 1,
                task_id: Some(student_task)
            }
        );

        let body = format!(r#"{{"task_id": {}, "task_answer": "teacher"}}"#, student_task);
        let response = router(state.clone())
            .oneshot(request("POST", "/check", &body))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({"id": student_task, "result": false}));

        let body = format!(r#"{{"task_id": {}, "task_answer": "student"}}"#, student_task);
        let response = router(state.clone())
            .oneshot(request("POST", "/check", &body))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({"id": student_task, "result": true}));

        let response = router(state.clone())
            .oneshot(request("GET", &format!("/exercise/{}", token), ""))
            .await
            .unwrap();
        let view: ExerciseView = serde_json::from_value(json_body(response).await).unwrap();
        let task = &view.sentences[0].tasks[1];
        assert!(task.is_completed);
        assert_eq!(task.failed_attempts, 1);
    }

    #[tokio::test]
    async fn unknown_exercise_and_task_are_404() {
        let state = test_state("http://127.0.0.1:1/search");
        let response = router(state.clone())
            .oneshot(request("GET", "/exercise/nope", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router(state)
            .oneshot(request("POST", "/check", r#"{"task_id": 99, "task_answer": "am"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn index_and_health() {
        let state = test_state("http://127.0.0.1:1/search");
        let response = router(state.clone())
            .oneshot(request("GET", "/", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state)
            .oneshot(request("GET", "/health", ""))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({"status": "ok"}));
    }
}
