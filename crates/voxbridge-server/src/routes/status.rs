use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

// Liveness report
async fn status_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn routes() -> Router {
    Router::new().route("/status", get(status_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_status_reports_ok() {
        let response = routes()
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"status": "ok"}));
    }
}
