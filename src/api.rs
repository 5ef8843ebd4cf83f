use std::{net::SocketAddr, sync::Arc};

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use eyre::{Result, WrapErr};
use tokio::sync::watch;

use crate::models::BalanceSnapshot;
use crate::session::{History, WalletState};

type SharedState = watch::Receiver<Arc<WalletState>>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/state", get(wallet_state))
        .route("/balance", get(balance))
        .route("/transactions", get(transactions))
        .with_state(state)
}

async fn wallet_state(State(state): State<SharedState>) -> Json<WalletState> {
    Json(state.borrow().as_ref().clone())
}

async fn balance(State(state): State<SharedState>) -> Result<Json<BalanceSnapshot>, (StatusCode, &'static str)> {
    state
        .borrow()
        .balance
        .clone()
        .map(Json)
        .ok_or((StatusCode::SERVICE_UNAVAILABLE, "balance not loaded yet"))
}

async fn transactions(State(state): State<SharedState>) -> Json<History> {
    Json(state.borrow().history.clone())
}

pub async fn serve(state: SharedState, bind: &str) -> Result<()> {
    let addr: SocketAddr = bind.parse().wrap_err_with(|| format!("invalid bind address {bind}"))?;
    tracing::info!(%addr, "HTTP API listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::HistoryStrategy;
    use crate::reader::ChainReader;
    use crate::session::{StaticPrice, WalletSession};
    use crate::testing::{config, wallet, FakeTransport};

    fn fresh_session() -> WalletSession<FakeTransport> {
        let fake = FakeTransport::new(|method, _| match method {
            "eth_getBalance" => Ok(serde_json::json!("0x5f5e100")),
            "eth_getCode" => Ok(serde_json::json!("0x")),
            "eth_blockNumber" => Ok(serde_json::json!("0x10")),
            "eth_getLogs" => Ok(serde_json::json!([])),
            other => panic!("unexpected call {other}"),
        });
        WalletSession::new(ChainReader::new(fake, config()), wallet(), HistoryStrategy::Logs, 5, StaticPrice(None))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        (status, to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec())
    }

    #[tokio::test]
    async fn balance_unavailable_before_first_refresh() {
        let session = fresh_session();
        let (status, _) = get(router(session.subscribe()), "/balance").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn serves_latest_snapshot() {
        let session = fresh_session();
        session.refresh().await.unwrap();

        let (status, body) = get(router(session.subscribe()), "/balance").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["nativeBalance"], "1.0");
        assert!(json["usdValue"].is_null());

        let (_, body) = get(router(session.subscribe()), "/state").await;
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["generation"], 1);
        assert_eq!(json["warnings"][0]["kind"], "token_contract_missing");

        let (_, body) = get(router(session.subscribe()), "/transactions").await;
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["strategy"], "transfers");
        assert_eq!(json["items"], serde_json::json!([]));
    }
}
