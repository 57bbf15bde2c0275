//! funkrelais-voice – Voice-Sessions des Relays
//!
//! Verbindet einen Voice-Kanal mit dem Audio-Stream und baut ihn wieder ab.
//!
//! ## Module
//! - [`transport`] – Vertraege zur Chat-Plattform (Verbindung, Kanal-Aufloesung)
//! - [`registry`] – Prozessweite Tabelle der Sessions pro Kanal
//! - [`session`] – Zustandsautomat einer Session
//! - [`dienst`] – Befehle join/leave und Antworten

pub mod dienst;
pub mod registry;
pub mod session;
pub mod transport;

pub use dienst::{Antwort, LeaveErgebnis, RelayDienst};
pub use registry::SessionRegistry;
pub use session::{SessionHandle, SessionKonfig, SessionZustand, VoiceSession};
pub use transport::{TransportFehler, VoiceConnection, VoicePlattform};
