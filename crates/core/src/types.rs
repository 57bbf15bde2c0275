//! Gemeinsame Identifikationstypen fuer Funkrelais
//!
//! Kanal- und Benutzer-IDs stammen von der Chat-Plattform (Snowflakes) und
//! werden hier nur als opake Werte transportiert. Das Newtype-Pattern
//! verhindert Verwechslungen zwischen den ID-Arten zur Compilezeit.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Voice-Kanal-ID der Plattform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// Gibt den rohen Plattform-Wert zurueck
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ChannelId {
    fn from(wert: u64) -> Self {
        Self(wert)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Benutzer-ID der Plattform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl UserId {
    /// Gibt den rohen Plattform-Wert zurueck
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for UserId {
    fn from(wert: u64) -> Self {
        Self(wert)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Prozess-lokale Session-ID
///
/// Unterscheidet aufeinanderfolgende Sessions im selben Kanal, damit ein
/// verspaeteter Abbau nie den Registry-Eintrag eines Nachfolgers entfernt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}
