//! Relay-Dienst – Befehle "join" und "leave"
//!
//! Loest den Benutzer ueber die Plattform zu seinem Voice-Kanal auf und
//! bildet die Befehle auf Registry und Voice-Session ab. Der Session-Task
//! laeuft eigenstaendig, der Befehlspfad wartet nie auf das Streaming.
//!
//! Textantworten an den Benutzer sind Sache der Plattform; [`Antwort`]
//! liefert nur Erfolg und einen lesbaren Grund.

use std::sync::Arc;
use std::time::Duration;

use funkrelais_core::{ChannelId, RelayError, Result, UserId};
use funkrelais_observability::RelayMetriken;
use tracing::{info, warn};

use crate::registry::SessionRegistry;
use crate::session::{SessionHandle, SessionKonfig, SessionKontext, VoiceSession};
use crate::transport::VoicePlattform;

/// Ergebnis eines Leave-Befehls
#[derive(Debug, Clone)]
pub enum LeaveErgebnis {
    /// Session wurde geloest und baut sich ab
    Verlassen(Arc<SessionHandle>),
    /// Im Kanal lief keine Session
    NichtAktiv(ChannelId),
}

/// Befehls-Fassade ueber Registry und Sessions
pub struct RelayDienst<P: VoicePlattform> {
    plattform: Arc<P>,
    kontext: SessionKontext,
}

impl<P: VoicePlattform> Clone for RelayDienst<P> {
    fn clone(&self) -> Self {
        Self {
            plattform: Arc::clone(&self.plattform),
            kontext: self.kontext.clone(),
        }
    }
}

impl<P: VoicePlattform> RelayDienst<P> {
    pub fn neu(
        plattform: P,
        konfig: SessionKonfig,
        http: reqwest::Client,
        metriken: Option<RelayMetriken>,
    ) -> Self {
        Self {
            plattform: Arc::new(plattform),
            kontext: SessionKontext {
                registry: SessionRegistry::neu(),
                konfig: Arc::new(konfig),
                http,
                metriken,
            },
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.kontext.registry
    }

    pub fn plattform(&self) -> &P {
        &self.plattform
    }

    /// Startet eine Session im Voice-Kanal des Benutzers
    ///
    /// Kehrt zurueck sobald der Kanal reserviert und der Session-Task
    /// gestartet ist. Verbindungsfehler meldet der Handle (`beendet`, `ursache`).
    pub async fn join(&self, benutzer: UserId) -> Result<Arc<SessionHandle>> {
        let kanal = self.kanal_aufloesen(benutzer).await?;

        let handle = SessionHandle::neu(kanal);
        if let Err(e) = self.kontext.registry.reservieren(&handle) {
            info!(benutzer = %benutzer, kanal = %kanal, "Join abgelehnt: Kanal bereits belegt");
            return Err(e);
        }

        let verbindung = self.plattform.verbindung_erstellen(kanal);
        let session = VoiceSession::neu(Arc::clone(&handle), verbindung, self.kontext.clone());
        tokio::spawn(session.ausfuehren());

        info!(benutzer = %benutzer, kanal = %kanal, session = %handle.id(), "Join gestartet");
        Ok(handle)
    }

    /// Loest die Session im Voice-Kanal des Benutzers
    pub async fn leave(&self, benutzer: UserId) -> Result<LeaveErgebnis> {
        let kanal = self.kanal_aufloesen(benutzer).await?;

        match self.kontext.registry.remove_and_close(kanal) {
            Some(handle) => {
                info!(benutzer = %benutzer, kanal = %kanal, session = %handle.id(), "Leave");
                Ok(LeaveErgebnis::Verlassen(handle))
            }
            None => Ok(LeaveErgebnis::NichtAktiv(kanal)),
        }
    }

    /// Loest alle Sessions und wartet hoechstens `frist` auf ihren Abbau
    ///
    /// Gibt die Anzahl der geloesten Sessions zurueck.
    pub async fn alle_beenden(&self, frist: Duration) -> usize {
        let handles = self.kontext.registry.alle_entfernen();
        let anzahl = handles.len();
        if anzahl == 0 {
            return 0;
        }

        info!(anzahl, "Beende alle Sessions");
        let warten = async {
            for handle in &handles {
                handle.beendet().await;
            }
        };
        if tokio::time::timeout(frist, warten).await.is_err() {
            let offen = handles.iter().filter(|h| !h.zustand().ist_terminal()).count();
            warn!(offen, "Nicht alle Sessions innerhalb der Frist beendet");
        }
        anzahl
    }

    async fn kanal_aufloesen(&self, benutzer: UserId) -> Result<ChannelId> {
        match self.plattform.voice_kanal_von(benutzer).await {
            Ok(Some(kanal)) => Ok(kanal),
            Ok(None) => Err(RelayError::NichtImVoiceKanal(benutzer)),
            Err(e) => {
                warn!(benutzer = %benutzer, fehler = %e, "Voice-Kanal nicht aufloesbar");
                Err(RelayError::NichtImVoiceKanal(benutzer))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Antworten
// ---------------------------------------------------------------------------

/// Antwort an den Benutzer: Erfolg plus lesbarer Grund
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Antwort {
    pub erfolgreich: bool,
    pub nachricht: String,
}

impl Antwort {
    fn ok(nachricht: impl Into<String>) -> Self {
        Self {
            erfolgreich: true,
            nachricht: nachricht.into(),
        }
    }

    fn fehler(nachricht: impl Into<String>) -> Self {
        Self {
            erfolgreich: false,
            nachricht: nachricht.into(),
        }
    }

    pub fn aus_join(ergebnis: &Result<Arc<SessionHandle>>) -> Self {
        match ergebnis {
            Ok(_) => Self::ok("Trete dem Voice-Kanal bei!"),
            Err(e) => Self::aus_fehler(e),
        }
    }

    pub fn aus_leave(ergebnis: &Result<LeaveErgebnis>) -> Self {
        match ergebnis {
            Ok(LeaveErgebnis::Verlassen(_)) => Self::ok("Verlasse den Voice-Kanal!"),
            Ok(LeaveErgebnis::NichtAktiv(_)) => {
                Self::ok("In diesem Voice-Kanal laeuft gerade nichts.")
            }
            Err(e) => Self::aus_fehler(e),
        }
    }

    /// Antwort fuer eine Abbau-Ursache
    pub fn aus_fehler(fehler: &RelayError) -> Self {
        match fehler {
            RelayError::NichtImVoiceKanal(_) => {
                Self::fehler("Voice-Kanal nicht gefunden. Bist du in einem Voice-Kanal?")
            }
            RelayError::SessionExistiert(_) => {
                Self::fehler("In diesem Voice-Kanal laeuft bereits ein Stream.")
            }
            anderer => Self::fehler(anderer.to_string()),
        }
    }
}
