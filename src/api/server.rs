//! HTTP server setup: router and API routes.

use super::state::ApiState;
use super::{history, query};
use crate::service::CopilotService;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use std::net::SocketAddr;
use std::sync::Arc;

/// Build the application router.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/query", post(query::query))
        .route(
            "/history/{user_id}",
            get(history::list_history).delete(history::clear_history),
        );

    Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the given address.
///
/// Returns a handle that resolves when the server shuts down. The caller
/// passes a `tokio::sync::watch::Receiver<bool>` for graceful shutdown.
pub async fn start_http_server(
    bind: SocketAddr,
    service: Arc<CopilotService>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(Arc::new(ApiState::new(service)));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server stopped with an error");
        }
    });

    Ok(handle)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let uptime = state.started_at.elapsed();
    Json(serde_json::json!({
        "status": "running",
        "pid": std::process::id(),
        "uptime_seconds": uptime.as_secs(),
        "active_agents": state.service.agent_count().await,
        "index_loaded": state.service.index_loaded(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{EchoFactory, service, write_corpus};

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn app(root: &std::path::Path) -> Router {
        write_corpus(&root.join("data"));
        let service = service(root, Arc::new(EchoFactory::default())).await;
        router(Arc::new(ApiState::new(Arc::new(service))))
    }

    fn post_query(body: serde_json::Value) -> Request<Body> {
        Request::post("/api/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response = app(temp.path())
            .await
            .oneshot(Request::get("/api/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn query_answers_and_history_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = app(temp.path()).await;

        let response = app
            .clone()
            .oneshot(post_query(serde_json::json!({
                "query": "What is a DAG?",
                "user_id": "web",
            })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let answer = json_body(response).await["answer"]
            .as_str()
            .expect("answer")
            .to_string();
        assert!(answer.starts_with("[Airflow]"), "got {answer}");

        let response = app
            .clone()
            .oneshot(Request::get("/api/history/web").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let history = json_body(response).await;
        assert_eq!(history["user_id"], "web");
        assert_eq!(history["turns"][0]["answer"], answer.as_str());

        let response = app
            .clone()
            .oneshot(
                Request::delete("/api/history/web")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::get("/api/history/web").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let history = json_body(response).await;
        assert_eq!(history["turns"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response = app(temp.path())
            .await
            .oneshot(post_query(serde_json::json!({
                "query": "   ",
                "user_id": "web",
            })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
