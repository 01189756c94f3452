//! HTTP surface for the gateway.
//!
//! | Route          | Description                                   |
//! |----------------|-----------------------------------------------|
//! | `GET /devices` | Channel IDs in assignment order               |
//! | `POST /send`   | `{"cmd": "FF", "targets": ["m1"]}`            |
//! | `GET /logs`    | Event log lines, oldest first                 |
//! | `GET /angles`  | Latest tilt reading, or `null`                |
//! | `GET /health`  | Liveness and poller counters                  |

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::dispatcher::DispatchError;
use crate::gateway::Gateway;
use crate::sensor::RegisterTransport;

/// Body of `POST /send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Opcode as hex text
    pub cmd: String,
    /// Channel IDs
    #[serde(default)]
    pub targets: Vec<String>,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::InvalidOpcode(_) => StatusCode::BAD_REQUEST,
            DispatchError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Application state shared across handlers.
struct AppState<T: RegisterTransport> {
    gateway: Arc<Gateway<T>>,
}

impl<T: RegisterTransport> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
        }
    }
}

/// Create the HTTP router.
pub fn create_router<T: RegisterTransport + 'static>(gateway: Arc<Gateway<T>>) -> Router {
    let state = AppState { gateway };

    Router::new()
        .route("/devices", get(devices_handler::<T>))
        .route("/send", post(send_handler::<T>))
        .route("/logs", get(logs_handler::<T>))
        .route("/angles", get(angles_handler::<T>))
        .route("/health", get(health_handler::<T>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn devices_handler<T: RegisterTransport>(State(state): State<AppState<T>>) -> Response {
    Json(state.gateway.device_ids()).into_response()
}

async fn send_handler<T: RegisterTransport>(
    State(state): State<AppState<T>>,
    Json(request): Json<SendRequest>,
) -> Result<Response, DispatchError> {
    debug!(cmd = %request.cmd, targets = ?request.targets, "Send request");

    let report = state
        .gateway
        .send_command(&request.cmd, &request.targets)
        .await?;

    let body = if report.is_complete() {
        json!({ "ok": true })
    } else {
        json!({ "ok": false, "failed": report.failed })
    };
    Ok(Json(body).into_response())
}

async fn logs_handler<T: RegisterTransport>(State(state): State<AppState<T>>) -> Response {
    Json(state.gateway.log_lines()).into_response()
}

async fn angles_handler<T: RegisterTransport>(State(state): State<AppState<T>>) -> Response {
    Json(state.gateway.read_angles().await).into_response()
}

async fn health_handler<T: RegisterTransport>(State(state): State<AppState<T>>) -> Response {
    let gateway = &state.gateway;
    Json(json!({
        "status": "healthy",
        "channels": gateway.device_ids().len(),
        "sensor": gateway.has_sensor(),
        "poller": gateway.poller_stats(),
    }))
    .into_response()
}

/// HTTP server bound to a gateway.
pub struct HttpServer<T: RegisterTransport> {
    gateway: Arc<Gateway<T>>,
    listen_addr: SocketAddr,
}

impl<T: RegisterTransport + 'static> HttpServer<T> {
    pub fn new(gateway: Arc<Gateway<T>>, listen_addr: SocketAddr) -> Self {
        Self {
            gateway,
            listen_addr,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.gateway);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow_and_update() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Serve `gateway` over HTTP until `signal` resolves or the server fails.
///
/// The gateway is shut down on every exit path, including a failed bind.
pub async fn serve<T, F>(
    gateway: Arc<Gateway<T>>,
    listen_addr: SocketAddr,
    signal: F,
) -> anyhow::Result<()>
where
    T: RegisterTransport + 'static,
    F: Future<Output = ()>,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = HttpServer::new(gateway.clone(), listen_addr);
    let mut http_task = tokio::spawn(server.run(shutdown_rx));

    let result = tokio::select! {
        joined = &mut http_task => server_result(joined),
        _ = signal => {
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(Duration::from_secs(5), &mut http_task).await {
                Ok(joined) => server_result(joined),
                Err(_) => {
                    warn!("HTTP server did not stop in time");
                    http_task.abort();
                    Ok(())
                }
            }
        }
    };

    gateway.shutdown().await;
    result
}

fn server_result(
    joined: Result<anyhow::Result<()>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    joined.map_err(|e| anyhow::anyhow!("HTTP server task failed: {}", e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ByteTransport, SerialSettings};
    use crate::mock::{MockRegisters, MockTransport};
    use crate::registry::ChannelRegistry;
    use crate::sensor::SensorClient;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_gateway(
        mocks: &[MockTransport],
        sensor: Option<MockRegisters>,
    ) -> Arc<Gateway<MockRegisters>> {
        let endpoints: Vec<String> = (0..mocks.len())
            .map(|i| format!("/dev/ttyUSB{}", i))
            .collect();
        let mut iter = mocks.to_vec().into_iter();
        let registry = ChannelRegistry::open_with(&endpoints, SerialSettings::default(), |_, _| {
            Ok(Box::new(iter.next().unwrap()) as Box<dyn ByteTransport>)
        });
        let sensor =
            sensor.map(|mock| SensorClient::with_transport(mock, Duration::from_millis(100)));
        Arc::new(Gateway::from_parts(
            registry,
            sensor,
            50,
            Duration::from_millis(10),
        ))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn send_request(body: &str) -> Request<Body> {
        Request::post("/send")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_devices_endpoint() {
        let gateway = make_gateway(&[MockTransport::new(), MockTransport::new()], None);
        let router = create_router(gateway);

        let response = router
            .oneshot(Request::get("/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!(["m1", "m2"]));
    }

    #[tokio::test]
    async fn test_send_endpoint() {
        let m1 = MockTransport::new();
        let m2 = MockTransport::new();
        let gateway = make_gateway(&[m1.clone(), m2.clone()], None);
        let router = create_router(gateway);

        let response = router
            .oneshot(send_request(r#"{"cmd": "FF", "targets": ["m1"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "ok": true }));
        assert_eq!(m1.written(), vec![0xFF]);
        assert!(m2.written().is_empty());
    }

    #[tokio::test]
    async fn test_send_reports_failed_writes() {
        let m1 = MockTransport::new();
        let m2 = MockTransport::new();
        m1.set_failing(true);
        let router = create_router(make_gateway(&[m1, m2.clone()], None));

        let response = router
            .oneshot(send_request(r#"{"cmd": "10", "targets": ["m1", "m2"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["failed"][0]["channel"], json!("m1"));
        assert!(body.get("written").is_none());
        assert_eq!(m2.written(), vec![0x10]);
    }

    #[tokio::test]
    async fn test_send_invalid_opcode() {
        let m1 = MockTransport::new();
        let router = create_router(make_gateway(&[m1.clone()], None));

        let response = router
            .oneshot(send_request(r#"{"cmd": "ZZ", "targets": ["m1"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
        assert!(m1.written().is_empty());
    }

    #[tokio::test]
    async fn test_send_unknown_channel() {
        let m1 = MockTransport::new();
        let router = create_router(make_gateway(&[m1.clone()], None));

        let response = router
            .oneshot(send_request(r#"{"cmd": "01", "targets": ["m1", "m7"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("m7"));
        assert!(m1.written().is_empty());
    }

    #[tokio::test]
    async fn test_logs_endpoint() {
        let m1 = MockTransport::new();
        m1.push_incoming(&[0x55]);
        let gateway = make_gateway(&[m1.clone()], None);

        // Wait for the poller to pick up the byte
        for _ in 0..100 {
            if !gateway.log_lines().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = create_router(gateway)
            .oneshot(Request::get("/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!(["m1: ACK"]));
    }

    #[tokio::test]
    async fn test_angles_endpoint() {
        let mock = MockRegisters::new([4500, 65036, 0]);
        let router = create_router(make_gateway(&[], Some(mock.clone())));

        let response = router
            .clone()
            .oneshot(Request::get("/angles").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "roll": 45.0, "pitch": -5.0, "yaw": 0.0 })
        );

        mock.set_failing(true);
        let response = router
            .oneshot(Request::get("/angles").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await.is_null());
    }

    #[tokio::test]
    async fn test_angles_without_sensor() {
        let router = create_router(make_gateway(&[], None));

        let response = router
            .oneshot(Request::get("/angles").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(body_json(response).await.is_null());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_gateway(&[MockTransport::new()], None));

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["channels"], json!(1));
        assert_eq!(body["sensor"], json!(false));
    }

    #[tokio::test]
    async fn test_serve_bind_failure_closes_gateway() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let m1 = MockTransport::new();
        let sensor = MockRegisters::new([0, 0, 0]);
        let gateway = make_gateway(&[m1], Some(sensor.clone()));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve(gateway.clone(), addr, std::future::pending::<()>()),
        )
        .await
        .expect("serve should return when bind fails");

        assert!(result.is_err());
        assert!(gateway.registry().channels().all(|c| !c.is_open()));
        assert_eq!(sensor.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_serve_stops_on_signal() {
        let m1 = MockTransport::new();
        let gateway = make_gateway(&[m1], None);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        serve(
            gateway.clone(),
            addr,
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap();

        assert!(gateway.registry().channels().all(|c| !c.is_open()));
    }
}
