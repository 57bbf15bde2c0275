//! Opus-Frames und der Pull-Vertrag zum Voice-Transport
//!
//! Der Transport der Plattform holt Frames in seinem eigenen Takt ab
//! (typisch alle 20 ms). `None` bedeutet: es kommen keine Frames mehr.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Ein kodierter Opus-Frame fester Dauer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusFrame {
    /// Laufende Nummer innerhalb der Pipeline (ab 0)
    pub sequenz: u64,
    /// Nominale Dauer des Frames
    pub dauer: Duration,
    /// Opus-Nutzdaten
    pub daten: Bytes,
}

/// Pull-basierter Lieferant von Opus-Frames
#[async_trait]
pub trait FrameProvider: Send {
    /// Liefert den naechsten Frame oder `None` sobald die Quelle terminal ist
    async fn next_frame(&mut self) -> Option<OpusFrame>;
}
