use std::sync::Arc;
use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use shared::protocol::{DiscoverResponse, HelloResponse, DISCOVER_PATH, HELLO_PATH};
use crate::discovery::{DiscoveryOutcome, DiscoveryService};
use crate::tls::PeerIdentity;

#[derive(Clone)]
pub struct AppState {
    pub discovery: Arc<DiscoveryService>,
}

/// Routes expect a [`PeerIdentity`] extension, inserted per connection by
/// the accept loop after the handshake.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HELLO_PATH, get(get_hello))
        .route(DISCOVER_PATH, get(get_discover))
        .with_state(state)
}

async fn get_hello(
    State(state): State<AppState>,
    Extension(identity): Extension<PeerIdentity>,
) -> Json<HelloResponse> {
    Json(state.discovery.hello(&identity))
}

async fn get_discover(
    State(state): State<AppState>,
    Extension(identity): Extension<PeerIdentity>,
) -> (StatusCode, Json<DiscoverResponse>) {
    match state.discovery.handle(&identity) {
        DiscoveryOutcome::Authorized(response) => (StatusCode::OK, Json(response)),
        DiscoveryOutcome::Denied(response) => (StatusCode::UNAUTHORIZED, Json(response)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use shared::types::{AccessType, ProtoPort, Service};
    use tower::ServiceExt;
    use crate::policy::{ClientDefinition, PolicyStore};

    fn app_for(identity: &str) -> Router {
        let web = Service {
            name: "web".to_string(),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))],
            ports: vec![ProtoPort::tcp(443)],
            tags: vec![],
            access_types: vec![AccessType::OpenSpa],
        };
        let c1 = ClientDefinition {
            device_id: "C1".to_string(),
            label: "first".to_string(),
            services: vec!["web".to_string()],
        };
        let store = PolicyStore::build(vec![web], vec![c1]).unwrap();
        let state = AppState {
            discovery: Arc::new(DiscoveryService::new(Arc::new(store), "0.1.0")),
        };

        router(state).layer(Extension(PeerIdentity(identity.to_string())))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_discover_authorized() {
        let (status, body) = get_json(app_for("C1"), "/discover").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["deviceId"], "C1");
        assert_eq!(body["services"][0]["name"], "web");
        assert_eq!(body["services"][0]["ports"], serde_json::json!([["tcp", "443"]]));
        assert_eq!(body["services"][0]["accessType"], serde_json::json!(["OpenSPA"]));
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_discover_unknown_identity_is_401() {
        let (status, body) = get_json(app_for("C2"), "/discover").await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "not authorized for any services");
        assert_eq!(body["services"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_hello_for_any_verified_identity() {
        let (status, body) = get_json(app_for("C2"), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["msg"], "Hello C2!");
        assert_eq!(body["deviceId"], "C2");
        assert!(body["datetime"].is_string());
    }
}
