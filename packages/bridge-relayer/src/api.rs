//! HTTP server for health, status and metrics endpoints

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bridge_core::{Asset, LedgerSnapshot, Shutdown};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::observer::{RelayStats, SharedStats};

/// Combined app state
#[derive(Clone)]
pub struct AppState {
    pub stats: SharedStats,
    pub ledgers: watch::Receiver<Vec<LedgerSnapshot>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Ledger counters as served on /status
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct LedgerView {
    pub app_id: String,
    pub asset: String,
    pub total_locked: String,
    pub nonce: String,
}

impl From<&LedgerSnapshot> for LedgerView {
    fn from(snapshot: &LedgerSnapshot) -> Self {
        let asset = match snapshot.asset {
            Asset::Native => "native".to_string(),
            Asset::Token(token) => token.to_string(),
        };
        Self {
            app_id: snapshot.app_id.to_string(),
            asset,
            total_locked: snapshot.state.total_locked.to_string(),
            nonce: snapshot.state.nonce.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub stats: RelayStats,
    pub ledgers: Vec<LedgerView>,
}

/// Liveness probe (always returns OK if server is running)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Pipeline counters and ledger balances
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.stats.read().await.clone();
    let ledgers = state.ledgers.borrow().iter().map(LedgerView::from).collect();
    Json(StatusResponse { stats, ledgers })
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve the API until shutdown is requested
pub async fn start_server(
    bind_address: &str,
    port: u16,
    state: AppState,
    mut shutdown: Shutdown,
) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("API server listening on {}", addr);
    info!("  /health  - Liveness");
    info!("  /status  - Relay counters and ledgers (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use bridge_core::testing::{ERC20_APP, ETH_APP};
    use bridge_core::{EvmAddress, LedgerState};

    #[test]
    fn test_ledger_view_formats_amounts_as_decimal() {
        let snapshot = LedgerSnapshot {
            app_id: ERC20_APP,
            asset: Asset::Token(EvmAddress([0x70; 20])),
            state: LedgerState {
                total_locked: U256::from(10u64).pow(U256::from(24u8)),
                nonce: U256::from(3u8),
            },
        };
        let view = LedgerView::from(&snapshot);
        assert_eq!(view.total_locked, "1000000000000000000000000");
        assert_eq!(view.nonce, "3");
        assert_eq!(view.asset, format!("0x{}", "70".repeat(20)));
    }

    #[tokio::test]
    async fn test_status_includes_stats_and_ledgers() {
        let stats = SharedStats::default();
        stats.write().await.locked = 2;
        let (_tx, ledgers) = watch::channel(vec![LedgerSnapshot {
            app_id: ETH_APP,
            asset: Asset::Native,
            state: LedgerState::new(U256::from(150u64)),
        }]);

        let Json(body) = status(State(AppState { stats, ledgers })).await;
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["locked"], 2);
        assert_eq!(json["ledgers"][0]["asset"], "native");
        assert_eq!(json["ledgers"][0]["total_locked"], "150");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text_format() {
        crate::metrics::set_up(true);
        let response = prometheus_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
