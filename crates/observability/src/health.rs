//! Health-Check-Endpunkt fuer Funkrelais
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Anzahl aktiver Sessions

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::RelayMetriken;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Server baut gerade alle Sessions ab
    ShuttingDown,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub aktive_sessions: u64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    faehrt_herunter: Arc<AtomicBool>,
    metriken: RelayMetriken,
}

impl HealthState {
    pub fn neu(metriken: RelayMetriken) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            faehrt_herunter: Arc::new(AtomicBool::new(false)),
            metriken,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Markiert den Server als herunterfahrend (Health meldet dann 503)
    pub fn herunterfahren_markieren(&self) {
        self.faehrt_herunter.store(true, Ordering::Relaxed);
    }

    pub fn antwort(&self) -> HealthResponse {
        let status = if self.faehrt_herunter.load(Ordering::Relaxed) {
            HealthStatus::ShuttingDown
        } else {
            HealthStatus::Healthy
        };

        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            aktive_sessions: self.metriken.sessions_aktiv.get().max(0) as u64,
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Relay-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();

    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}
