//! Test utilities for tally-core
//!
//! This module provides testing infrastructure including mock FX and LLM
//! servers that can be used for development and integration tests.

use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Mock FX rate server: serves `GET /v4/latest/{from}` with a fixed rate
/// table and counts requests so tests can assert caching behavior.
pub struct MockRateServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    hits: Arc<AtomicU32>,
}

#[derive(Clone)]
struct RateState {
    rates: Arc<HashMap<String, HashMap<String, f64>>>,
    hits: Arc<AtomicU32>,
}

#[derive(Serialize)]
struct LatestRatesResponse {
    base: String,
    rates: HashMap<String, f64>,
}

impl MockRateServer {
    /// Start on an ephemeral port with the given `(from, to, rate)` rows.
    pub async fn start(rows: &[(&str, &str, f64)]) -> Self {
        let mut rates: HashMap<String, HashMap<String, f64>> = HashMap::new();
        for (from, to, rate) in rows {
            rates
                .entry(from.to_uppercase())
                .or_default()
                .insert(to.to_uppercase(), *rate);
        }
        let hits = Arc::new(AtomicU32::new(0));
        let state = RateState {
            rates: Arc::new(rates),
            hits: hits.clone(),
        };

        let app = Router::new()
            .route("/v4/latest/:from", get(handle_latest))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            hits,
        }
    }

    /// Endpoint template for `FxConfig::endpoint`.
    pub fn endpoint(&self) -> String {
        format!("http://{}/v4/latest/{{from}}", self.addr)
    }

    /// How many rate requests reached the server.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockRateServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_latest(
    State(state): State<RateState>,
    Path(from): Path<String>,
) -> Json<LatestRatesResponse> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let from = from.to_uppercase();
    let rates = state.rates.get(&from).cloned().unwrap_or_default();
    Json(LatestRatesResponse { base: from, rates })
}

/// Mock LLM server speaking the Ollama generate protocol. Answers every
/// prompt with a canned JSON prediction.
pub struct MockLlmServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[derive(Clone)]
struct LlmState {
    answer: Arc<String>,
}

#[derive(Deserialize)]
struct GenerateRequest {
    model: String,
    #[allow(dead_code)]
    prompt: String,
    #[allow(dead_code)]
    #[serde(default)]
    stream: bool,
}

#[derive(Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}

impl MockLlmServer {
    /// Start a server that answers every generate call with `answer`
    /// (typically a JSON prediction, optionally wrapped in prose).
    pub async fn start(answer: &str) -> Self {
        let state = LlmState {
            answer: Arc::new(answer.to_string()),
        };
        let app = Router::new()
            .route("/api/generate", post(handle_generate))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockLlmServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_generate(
    State(state): State<LlmState>,
    Json(request): Json<GenerateRequest>,
) -> Json<GenerateResponse> {
    Json(GenerateResponse {
        model: request.model,
        response: state.answer.as_ref().clone(),
        done: true,
    })
}
