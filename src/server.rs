//! HTTP shell around [`QueryService`].
//!
//! Single route `/`: GET with the platform readiness header answers the readiness check,
//! GET without a query string greets, GET with parameters and POST with a
//! JSON body run a query. Every failure is a `{kind, message}` body.

use crate::error::QueryError;
use crate::service::{QueryInput, QueryService};
use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse as _, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub const READINESS_HEADER: &str = "x-apify-container-server-readiness-probe";
pub const PORT_ENV: &str = "ACTOR_STANDBY_PORT";

type AppState = Arc<QueryService>;

pub fn router(service: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(handle_get).post(handle_post).fallback(method_not_allowed),
        )
        .with_state(service)
}

/// Port from `ACTOR_STANDBY_PORT` if set and valid, else `configured`.
pub fn resolve_port(configured: u16) -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(configured)
}

/// Bind and serve until the process is stopped.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(service: AppState, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn handle_get(
    State(service): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    if headers.contains_key(READINESS_HEADER) {
        return Json(json!({"status": "ok"})).into_response();
    }
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return Json(json!({"message": "Hello from Actor"})).into_response();
    };
    match serde_urlencoded::from_str::<QueryInput>(&query) {
        Ok(input) => answer(&service, input).await,
        Err(e) => error_response(&QueryError::InvalidInput(format!("bad query string: {e}"))),
    }
}

async fn handle_post(State(service): State<AppState>, body: Bytes) -> Response {
    match serde_json::from_slice::<QueryInput>(&body) {
        Ok(input) => answer(&service, input).await,
        Err(e) => error_response(&QueryError::InvalidInput(format!("bad request body: {e}"))),
    }
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"message": "Method not allowed"})),
    )
        .into_response()
}

async fn answer(service: &QueryService, input: QueryInput) -> Response {
    match service.answer(input).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &QueryError) -> Response {
    let status = StatusCode::from_u16(err.kind().http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_body())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::dataset::{DatasetSource, MemorySource};
    use crate::llm::{ScriptedModel, ScriptedProvider};
    use axum::body::Bytes;
    use axum::http::HeaderValue;
    use polars::prelude::*;
    use serde_json::Value;

    fn service(model: ScriptedModel) -> AppState {
        let frame = df!(
            "title" => &["Smith Street Pizza", "Gravesend Pizza", "Lucia Pizza of Avenue X"],
            "totalScore" => &[4.8, 4.6, 4.9]
        )
        .expect("frame");
        Arc::new(QueryService::new(
            AppConfig::default(),
            Arc::new(MemorySource::new().with_frame("pizza", frame)) as Arc<dyn DatasetSource>,
            Arc::new(ScriptedProvider::new(Arc::new(model))),
        ))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_readiness_check() {
        let mut headers = HeaderMap::new();
        headers.insert(READINESS_HEADER, HeaderValue::from_static("1"));
        let response = handle_get(
            State(service(ScriptedModel::new())),
            headers,
            RawQuery(Some("query=x".to_owned())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_greeting_without_parameters() {
        let response =
            handle_get(State(service(ScriptedModel::new())), HeaderMap::new(), RawQuery(None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "Hello from Actor");
    }

    #[tokio::test]
    async fn test_get_runs_query() {
        let response = handle_get(
            State(service(ScriptedModel::new())),
            HeaderMap::new(),
            RawQuery(Some(
                "query=SELECT%20title%20FROM%20dataset&datasetId=pizza&limit=2&synthesize=false"
                    .to_owned(),
            )),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["rowCount"], 2);
        assert_eq!(body["rows"][1][0], "Gravesend Pizza");
        assert_eq!(body["synthesizedText"], Value::Null);
        assert_eq!(body["strategy"], "workflow");
    }

    #[tokio::test]
    async fn test_post_runs_query() {
        let body = json!({
            "query": "SELECT title FROM dataset WHERE totalScore > 4.7",
            "datasetId": "pizza"
        });
        let response = handle_post(
            State(service(ScriptedModel::new().complete_with("Two places."))),
            Bytes::from(body.to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["sql"], "SELECT title FROM dataset WHERE totalScore > 4.7");
        assert_eq!(body["synthesizedText"], "Two places.");
    }

    #[tokio::test]
    async fn test_errors_carry_kind_and_status() {
        let response = handle_post(
            State(service(ScriptedModel::new())),
            Bytes::from_static(b"{\"datasetId\": \"pizza\"}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "invalid_input");

        let response = handle_post(
            State(service(ScriptedModel::new())),
            Bytes::from(
                json!({"query": "SELECT nope FROM dataset", "datasetId": "pizza"}).to_string(),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["kind"], "execution");

        let response = handle_post(
            State(service(ScriptedModel::new())),
            Bytes::from(json!({"query": "SELECT 1", "datasetId": "missing"}).to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_other_methods_are_rejected() {
        let response = method_not_allowed().await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
