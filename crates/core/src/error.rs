//! Fehlertypen fuer Funkrelais
//!
//! Ein Fehler-Enum deckt den gesamten Lebenszyklus einer Voice-Session ab.
//! Jeder Fehler fuehrt zu genau einem Abbau und einer gemeldeten Ursache,
//! nie zum Prozessabbruch.

use std::time::Duration;
use thiserror::Error;

use crate::types::{ChannelId, UserId};

/// Globaler Result-Alias fuer Funkrelais
pub type Result<T> = std::result::Result<T, RelayError>;

/// Alle moeglichen Fehler des Relais
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    // --- Aufloesung ---
    #[error("Benutzer {0} ist in keinem Voice-Kanal")]
    NichtImVoiceKanal(UserId),

    // --- Verbindung ---
    #[error("Zeitlimit beim Verbinden mit {kanal} ueberschritten ({nach:?})")]
    VerbindungsZeitlimit { kanal: ChannelId, nach: Duration },

    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung vom Transport getrennt: {0}")]
    Getrennt(String),

    #[error("Verbindung konnte nicht sauber geschlossen werden: {0}")]
    Schliessen(String),

    // --- Registry ---
    #[error("Fuer {0} laeuft bereits eine Session")]
    SessionExistiert(ChannelId),

    #[error("Join fuer {0} wurde vor dem Streaming abgebrochen")]
    Abgebrochen(ChannelId),

    // --- Streaming ---
    #[error("Speaking-Flag konnte nicht gesetzt werden: {0}")]
    SpeakingFlag(String),

    #[error("Encoder konnte nicht gestartet werden: {0}")]
    EncoderInit(String),

    #[error("Audio-Stream beendet: {0}")]
    StreamBeendet(String),

    // --- Sonstiges ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl RelayError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler ein regulaerer Abbau-Ausloeser ist
    ///
    /// Diese Ursachen werden gemeldet, aber nicht als Fehler eskaliert.
    pub fn ist_regulaer(&self) -> bool {
        matches!(
            self,
            Self::StreamBeendet(_) | Self::Getrennt(_) | Self::Abgebrochen(_)
        )
    }

    /// Kurzes, stabiles Label (z.B. fuer Metriken)
    pub fn art(&self) -> &'static str {
        match self {
            Self::NichtImVoiceKanal(_) => "nicht_im_voice_kanal",
            Self::VerbindungsZeitlimit { .. } => "verbindungs_zeitlimit",
            Self::Verbindung(_) => "verbindung",
            Self::Getrennt(_) => "getrennt",
            Self::Schliessen(_) => "schliessen",
            Self::SessionExistiert(_) => "session_existiert",
            Self::Abgebrochen(_) => "abgebrochen",
            Self::SpeakingFlag(_) => "speaking_flag",
            Self::EncoderInit(_) => "encoder_init",
            Self::StreamBeendet(_) => "stream_beendet",
            Self::Konfiguration(_) => "konfiguration",
            Self::Intern(_) => "intern",
        }
    }
}
