//! Prometheus-kompatible Metriken fuer Funkrelais
//!
//! Registrierte Metriken:
//! - `funkrelais_sessions_aktiv` – Gauge: Sessions im Zustand Streaming
//! - `funkrelais_sessions_gesamt` – Counter: Gestartete Sessions
//! - `funkrelais_session_fehler_total` – Counter: Abbau-Ursachen (art)
//! - `funkrelais_audio_frames_total` – Counter: Kodierte Opus-Frames

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Funkrelais-Prometheus-Metriken
#[derive(Clone)]
pub struct RelayMetriken {
    pub registry: Arc<Registry>,

    pub sessions_aktiv: IntGauge,
    pub sessions_gesamt: IntCounter,
    pub session_fehler_total: IntCounterVec,
    pub audio_frames_total: IntCounter,
}

impl RelayMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let sessions_aktiv = IntGauge::with_opts(Opts::new(
            "funkrelais_sessions_aktiv",
            "Anzahl aktuell streamender Voice-Sessions",
        ))?;
        registry.register(Box::new(sessions_aktiv.clone()))?;

        let sessions_gesamt = IntCounter::with_opts(Opts::new(
            "funkrelais_sessions_gesamt",
            "Gesamtanzahl gestarteter Voice-Sessions",
        ))?;
        registry.register(Box::new(sessions_gesamt.clone()))?;

        let session_fehler_total = IntCounterVec::new(
            Opts::new(
                "funkrelais_session_fehler_total",
                "Abbau-Ursachen von Voice-Sessions",
            ),
            &["art"],
        )?;
        registry.register(Box::new(session_fehler_total.clone()))?;

        let audio_frames_total = IntCounter::with_opts(Opts::new(
            "funkrelais_audio_frames_total",
            "Gesamtanzahl kodierter Opus-Frames",
        ))?;
        registry.register(Box::new(audio_frames_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions_aktiv,
            sessions_gesamt,
            session_fehler_total,
            audio_frames_total,
        })
    }

    /// Session hat den Zustand Streaming erreicht
    pub fn session_gestartet(&self) {
        self.sessions_aktiv.inc();
        self.sessions_gesamt.inc();
    }

    /// Session aus dem Zustand Streaming abgebaut
    pub fn session_beendet(&self, frames: u64) {
        self.sessions_aktiv.dec();
        self.audio_frames_total.inc_by(frames);
    }

    /// Zaehlt eine Abbau-Ursache
    pub fn ursache_zaehlen(&self, art: &str) {
        self.session_fehler_total.with_label_values(&[art]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetriken>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
