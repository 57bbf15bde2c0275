//! Vertraege zur Chat-Plattform
//!
//! Das Relay implementiert weder das Wire-Protokoll der Plattform noch die
//! Kanal-Aufloesung. Beides kommt von aussen ueber zwei Traits:
//! - [`VoicePlattform`] loest Benutzer zu Kanaelen auf und erstellt Verbindungen
//! - [`VoiceConnection`] ist die ausgehende Verbindung in genau einen Kanal
//!
//! Open und Close bekommen eine feste Frist statt eines Abbruchs durch den
//! Aufrufer, da Plattform-Transporte keinen vorzeitigen Abbruch unterstuetzen.

use async_trait::async_trait;
use funkrelais_audio::FrameProvider;
use funkrelais_core::{ChannelId, UserId};
use thiserror::Error;
use tokio::time::Instant;

/// Fehler eines Plattform-Transports
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportFehler(pub String);

impl TransportFehler {
    pub fn neu(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Ausgehende Voice-Verbindung in einen Kanal
#[async_trait]
pub trait VoiceConnection: Send + Sync + 'static {
    /// Oeffnet die Verbindung in den Kanal bis spaetestens `frist`
    async fn open(&self, kanal: ChannelId, frist: Instant) -> Result<(), TransportFehler>;

    /// Schliesst die Verbindung bis spaetestens `frist`
    async fn close(&self, frist: Instant) -> Result<(), TransportFehler>;

    /// Setzt oder loescht das Speaking-Flag
    async fn set_speaking(&self, spricht: bool) -> Result<(), TransportFehler>;

    /// Uebergibt den Frame-Lieferanten; der Transport zieht Frames im eigenen Takt
    fn set_frame_provider(&self, provider: Box<dyn FrameProvider>);

    /// Kehrt zurueck, sobald der Transport die Verbindung von sich aus beendet
    ///
    /// Standard: der Transport meldet nie eine Trennung.
    async fn getrennt(&self) -> String {
        std::future::pending().await
    }
}

/// Plattform-Client: Kanal-Aufloesung und Verbindungs-Fabrik
#[async_trait]
pub trait VoicePlattform: Send + Sync + 'static {
    type Verbindung: VoiceConnection;

    /// Aktueller Voice-Kanal eines Benutzers (None = in keinem Kanal)
    async fn voice_kanal_von(&self, benutzer: UserId) -> Result<Option<ChannelId>, TransportFehler>;

    /// Erstellt eine noch nicht geoeffnete Verbindung fuer den Kanal
    fn verbindung_erstellen(&self, kanal: ChannelId) -> Self::Verbindung;
}
