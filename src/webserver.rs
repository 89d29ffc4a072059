use crate::cluster::Cluster;
use crate::notification::ImageUpdateNotification;
use crate::reconciler;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

pub async fn liveness_probe() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Receives a Diun notification and reconciles the pod it names before
/// answering. The response does not depend on the reconciliation outcome,
/// which is only logged.
pub async fn webhook<C: Cluster>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(token) = &state.webhook_token {
        let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if !token.verify_bearer(authorization) {
            warn!("Rejecting webhook notification with missing or invalid bearer token");
            return (StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response();
        }
    }

    let notification = match ImageUpdateNotification::decode(&body) {
        Ok(notification) => notification,
        Err(e) => {
            warn!("Rejecting webhook notification: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match (notification.status.as_deref(), notification.image.as_deref()) {
        (Some(status), Some(image)) => {
            info!("Received {} notification for image {}", status, image)
        }
        (None, Some(image)) => info!("Received notification for image {}", image),
        (_, None) => info!("Received notification without image reference"),
    }
    let (target, digest) = notification.into_target(&state.default_namespace);
    info!(
        "Reconciling {} for digest {}",
        target,
        digest.as_deref().unwrap_or("<none>")
    );

    let outcome = reconciler::reconcile(
        &state.cluster,
        state.restart_annotation,
        &target,
        digest.as_deref(),
    )
    .await;
    outcome.log(&target);

    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

pub fn create_app<C: Cluster>(state: AppState<C>) -> Router {
    Router::new()
        .route("/webhook", post(webhook::<C>))
        .route("/health", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::{FakeCluster, pod, replica_set};
    use crate::restart::KUBECTL_ROLLOUT_ANNOTATION;
    use crate::secret_string::SecretString;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    const NOTIFICATION: &str = r#"{
        "status": "update",
        "image": "docker.io/library/web:latest",
        "digest": "sha256:bbb",
        "metadata": {"pod_name": "web-7f9", "pod_namespace": "prod", "ctn_name": "app"}
    }"#;

    fn managed_cluster() -> FakeCluster {
        FakeCluster::new()
            .with_pod(pod(
                "prod",
                "web-7f9",
                &[("ReplicaSet", "web-7f9-abcd")],
                &[("app", "docker.io/library/web@sha256:aaa")],
            ))
            .with_replica_set(replica_set(
                "prod",
                "web-7f9-abcd",
                &[("Deployment", "web")],
            ))
    }

    fn app(cluster: &FakeCluster, webhook_token: Option<&str>) -> Router {
        create_app(AppState {
            cluster: cluster.clone(),
            default_namespace: "default".to_string(),
            restart_annotation: KUBECTL_ROLLOUT_ANNOTATION,
            webhook_token: webhook_token.map(SecretString::new),
        })
    }

    fn post_webhook(body: &str, authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8 body")
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let cluster = FakeCluster::new();
        let response = app(&cluster, None)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
        assert_eq!(cluster.pod_reads(), 0);
    }

    #[tokio::test]
    async fn test_readiness_returns_no_content() {
        let response = app(&FakeCluster::new(), None)
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_webhook_restarts_deployment() {
        let cluster = managed_cluster();

        let response = app(&cluster, None)
            .oneshot(post_webhook(NOTIFICATION, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"status":"ok"}"#);
        let patches = cluster.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].namespace, "prod");
        assert_eq!(patches[0].name, "web");
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_without_reconciling() {
        let cluster = managed_cluster();

        let response = app(&cluster, None)
            .oneshot(post_webhook(r#"{"digest": "sha256:bbb"}"#, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("metadata"));
        assert_eq!(cluster.pod_reads(), 0);
        assert!(cluster.patches().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pod_name_is_rejected_without_reconciling() {
        let cluster = managed_cluster();

        let response = app(&cluster, None)
            .oneshot(post_webhook(r#"{"metadata": {"pod_name": ""}}"#, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(cluster.pod_reads(), 0);
    }

    #[tokio::test]
    async fn test_pod_name_with_path_separator_is_rejected_without_reconciling() {
        let cluster = managed_cluster();

        let response = app(&cluster, None)
            .oneshot(post_webhook(
                r#"{"digest": "sha256:bbb", "metadata": {"pod_name": "web-7f9/exec", "pod_namespace": "prod"}}"#,
                None,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("RFC 1123"));
        assert_eq!(cluster.pod_reads(), 0);
        assert!(cluster.patches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reconciliation_still_acknowledged() {
        let cluster = FakeCluster::new();

        let response = app(&cluster, None)
            .oneshot(post_webhook(NOTIFICATION, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(cluster.pod_reads(), 1);
        assert!(cluster.patches().is_empty());
    }

    #[tokio::test]
    async fn test_missing_namespace_uses_default_namespace() {
        let cluster = FakeCluster::new()
            .with_pod(pod(
                "default",
                "web-7f9",
                &[("ReplicaSet", "web-7f9-abcd")],
                &[("app", "docker.io/library/web@sha256:aaa")],
            ))
            .with_replica_set(replica_set(
                "default",
                "web-7f9-abcd",
                &[("Deployment", "web")],
            ));

        let response = app(&cluster, None)
            .oneshot(post_webhook(
                r#"{"digest": "sha256:bbb", "metadata": {"pod_name": "web-7f9"}}"#,
                None,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let patches = cluster.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].namespace, "default");
    }

    #[tokio::test]
    async fn test_webhook_token_required_when_configured() {
        let cluster = managed_cluster();

        let response = app(&cluster, Some("s3cr3t"))
            .oneshot(post_webhook(NOTIFICATION, Some("Bearer wrong")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(cluster.pod_reads(), 0);

        let response = app(&cluster, Some("s3cr3t"))
            .oneshot(post_webhook(NOTIFICATION, None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(cluster.pod_reads(), 0);
    }

    #[tokio::test]
    async fn test_webhook_token_accepted() {
        let cluster = managed_cluster();

        let response = app(&cluster, Some("s3cr3t"))
            .oneshot(post_webhook(NOTIFICATION, Some("Bearer s3cr3t")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(cluster.patches().len(), 1);
    }
}
