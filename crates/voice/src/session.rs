//! Voice-Session – eine Relay-Verbindung in genau einen Kanal
//!
//! Zustandsautomat:
//! ```text
//! Verbindet -> Streamt -> Schliesst -> Geschlossen
//!     |
//!     +-> Fehlgeschlagen
//! ```
//!
//! Die Session besitzt ihre Verbindung und ihre Encoder-Pipeline exklusiv.
//! Von aussen ist nur der [`SessionHandle`] sichtbar: Zustand beobachten und
//! das Schliessen anfordern. Den Abbau fuehrt immer der Session-Task selbst
//! durch, dadurch wird die Verbindung genau einmal geschlossen, egal wie viele
//! Ausloeser gleichzeitig eintreffen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use funkrelais_audio::{EncoderKonfig, EncoderPipeline, HttpQuelle};
use funkrelais_core::{ChannelId, RelayError, SessionId};
use funkrelais_observability::RelayMetriken;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::registry::SessionRegistry;
use crate::transport::VoiceConnection;

/// Standard-Frist fuer das Oeffnen der Verbindung
pub const VERBINDUNGS_TIMEOUT: Duration = Duration::from_secs(10);
/// Standard-Frist fuer das Schliessen der Verbindung
pub const SCHLIESS_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Lebenszyklus-Zustand einer Voice-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionZustand {
    Verbindet,
    Streamt,
    Schliesst,
    Geschlossen,
    Fehlgeschlagen,
}

impl SessionZustand {
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Geschlossen | Self::Fehlgeschlagen)
    }
}

impl std::fmt::Display for SessionZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Verbindet => "verbindet",
            Self::Streamt => "streamt",
            Self::Schliesst => "schliesst",
            Self::Geschlossen => "geschlossen",
            Self::Fehlgeschlagen => "fehlgeschlagen",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Geteilte Sicht auf eine Session (Registry, Befehle, Aufrufer)
pub struct SessionHandle {
    id: SessionId,
    kanal: ChannelId,
    zustand_tx: watch::Sender<SessionZustand>,
    schliessen_tx: watch::Sender<bool>,
    ursache: Mutex<Option<RelayError>>,
    frames: AtomicU64,
}

impl SessionHandle {
    /// Erstellt einen Handle im Zustand `Verbindet`
    pub fn neu(kanal: ChannelId) -> Arc<Self> {
        let (zustand_tx, _) = watch::channel(SessionZustand::Verbindet);
        let (schliessen_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: SessionId::new(),
            kanal,
            zustand_tx,
            schliessen_tx,
            ursache: Mutex::new(None),
            frames: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kanal(&self) -> ChannelId {
        self.kanal
    }

    pub fn zustand(&self) -> SessionZustand {
        *self.zustand_tx.borrow()
    }

    /// Abbau-Ursache; `None` bei explizitem Verlassen
    pub fn ursache(&self) -> Option<RelayError> {
        self.ursache.lock().clone()
    }

    /// Anzahl gestreamter Frames (nach dem Abbau gesetzt)
    pub fn frames_gesamt(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Fordert den Abbau an (idempotent)
    pub fn schliessen_anfordern(&self) {
        self.schliessen_tx.send_replace(true);
    }

    pub fn schliessen_angefordert(&self) -> bool {
        *self.schliessen_tx.borrow()
    }

    /// Wartet bis der Zustand die Bedingung erfuellt
    pub async fn warten_bis(&self, mut bedingung: impl FnMut(SessionZustand) -> bool) -> SessionZustand {
        let mut rx = self.zustand_tx.subscribe();
        // Der Sender lebt so lange wie der Handle
        let zustand = match rx.wait_for(|z| bedingung(*z)).await {
            Ok(zustand) => *zustand,
            Err(_) => self.zustand(),
        };
        zustand
    }

    /// Wartet bis die Session terminal ist
    pub async fn beendet(&self) -> SessionZustand {
        self.warten_bis(|z| z.ist_terminal()).await
    }

    fn schliessen_rx(&self) -> watch::Receiver<bool> {
        self.schliessen_tx.subscribe()
    }

    /// Setzt den Zustand; ein terminaler Zustand wird nie mehr verlassen
    fn zustand_setzen(&self, neu: SessionZustand) {
        self.zustand_tx.send_if_modified(|zustand| {
            if zustand.ist_terminal() || *zustand == neu {
                return false;
            }
            *zustand = neu;
            true
        });
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("kanal", &self.kanal)
            .field("zustand", &self.zustand())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Konfiguration und Kontext
// ---------------------------------------------------------------------------

/// Parameter einer Voice-Session
#[derive(Debug, Clone)]
pub struct SessionKonfig {
    /// URL des Audio-Streams
    pub quelle_url: String,
    pub verbindungs_timeout: Duration,
    pub schliess_timeout: Duration,
    pub encoder: EncoderKonfig,
}

impl SessionKonfig {
    pub fn neu(quelle_url: impl Into<String>) -> Self {
        Self {
            quelle_url: quelle_url.into(),
            verbindungs_timeout: VERBINDUNGS_TIMEOUT,
            schliess_timeout: SCHLIESS_TIMEOUT,
            encoder: EncoderKonfig::default(),
        }
    }
}

/// Gemeinsame Abhaengigkeiten aller Sessions
#[derive(Clone)]
pub struct SessionKontext {
    pub registry: SessionRegistry,
    pub konfig: Arc<SessionKonfig>,
    pub http: reqwest::Client,
    pub metriken: Option<RelayMetriken>,
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Der Session-Task: besitzt Verbindung und Pipeline
pub struct VoiceSession<V: VoiceConnection> {
    handle: Arc<SessionHandle>,
    verbindung: V,
    kontext: SessionKontext,
}

impl<V: VoiceConnection> VoiceSession<V> {
    pub fn neu(handle: Arc<SessionHandle>, verbindung: V, kontext: SessionKontext) -> Self {
        Self {
            handle,
            verbindung,
            kontext,
        }
    }

    /// Treibt die Session von `Verbindet` bis zum terminalen Zustand
    ///
    /// Gibt die Abbau-Ursache zurueck (`None` = explizit verlassen).
    pub async fn ausfuehren(self) -> Option<RelayError> {
        let kanal = self.handle.kanal();
        let id = self.handle.id();
        let konfig = Arc::clone(&self.kontext.konfig);

        debug!(kanal = %kanal, session = %id, "Verbinde mit Voice-Kanal");

        // --- Verbindet ---
        let frist = Instant::now() + konfig.verbindungs_timeout;
        let geoeffnet = match tokio::time::timeout_at(frist, self.verbindung.open(kanal, frist)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RelayError::Verbindung(e.0)),
            Err(_) => Err(RelayError::VerbindungsZeitlimit {
                kanal,
                nach: konfig.verbindungs_timeout,
            }),
        };

        if let Err(fehler) = geoeffnet {
            self.kontext.registry.entfernen(kanal, id);
            // Eine halb geoeffnete Verbindung wird trotzdem freigegeben
            self.verbindung_schliessen().await;
            return self.beenden(SessionZustand::Fehlgeschlagen, Some(fehler));
        }

        // Verlassen waehrend des Verbindens
        if self.handle.schliessen_angefordert() {
            self.verbindung_schliessen().await;
            return self.beenden(SessionZustand::Geschlossen, Some(RelayError::Abgebrochen(kanal)));
        }

        if let Err(fehler) = self.kontext.registry.add(kanal, Arc::clone(&self.handle)) {
            self.verbindung_schliessen().await;
            let zustand = if fehler.ist_regulaer() {
                SessionZustand::Geschlossen
            } else {
                SessionZustand::Fehlgeschlagen
            };
            return self.beenden(zustand, Some(fehler));
        }

        // --- Streamt ---
        self.handle.zustand_setzen(SessionZustand::Streamt);
        if let Some(m) = &self.kontext.metriken {
            m.session_gestartet();
        }
        info!(kanal = %kanal, session = %id, "Session streamt");

        let mut pipeline = None;
        let ursache = self.streamen(&mut pipeline).await;

        // --- Schliesst ---
        self.abbauen(pipeline, ursache).await
    }

    /// Startet Quelle und Pipeline und wartet auf den ersten Abbau-Ausloeser
    async fn streamen(&self, pipeline_slot: &mut Option<EncoderPipeline>) -> Option<RelayError> {
        let mut schliessen_rx = self.handle.schliessen_rx();
        if *schliessen_rx.borrow() {
            return None;
        }

        if let Err(e) = self.verbindung.set_speaking(true).await {
            return Some(RelayError::SpeakingFlag(e.0));
        }

        let konfig = &self.kontext.konfig;
        let quelle = HttpQuelle::open(&self.kontext.http, konfig.quelle_url.as_str());
        let pipeline = match EncoderPipeline::start(quelle, &konfig.encoder) {
            Ok(pipeline) => pipeline_slot.insert(pipeline),
            Err(e) => return Some(e.into()),
        };

        if let Some(frames) = pipeline.frames() {
            self.verbindung.set_frame_provider(Box::new(frames));
        }

        let ende = tokio::select! {
            _ = schliessen_rx.wait_for(|angefordert| *angefordert) => return None,
            ergebnis = pipeline.run_until_done() => ergebnis,
            grund = self.verbindung.getrennt() => return Some(RelayError::Getrennt(grund)),
        };

        let ende = match ende {
            Ok(ende) => ende,
            Err(e) => return Some(e.into()),
        };

        // Gepufferte Frames noch ausspielen; Leave und Trennung haben Vorrang
        let frist = self.kontext.konfig.schliess_timeout;
        tokio::select! {
            ergebnis = tokio::time::timeout(frist, pipeline.ausgelaufen()) => {
                if ergebnis.is_err() {
                    debug!(kanal = %self.handle.kanal(), "Frame-Puffer nicht rechtzeitig geleert");
                }
            }
            _ = schliessen_rx.wait_for(|angefordert| *angefordert) => return None,
            grund = self.verbindung.getrennt() => return Some(RelayError::Getrennt(grund)),
        }

        Some(RelayError::StreamBeendet(ende.to_string()))
    }

    /// Abbau in fester Reihenfolge: Registry, Pipeline, Verbindung
    async fn abbauen(
        self,
        pipeline: Option<EncoderPipeline>,
        ursache: Option<RelayError>,
    ) -> Option<RelayError> {
        let kanal = self.handle.kanal();
        self.handle.zustand_setzen(SessionZustand::Schliesst);
        debug!(kanal = %kanal, session = %self.handle.id(), "Session wird abgebaut");

        self.kontext.registry.entfernen(kanal, self.handle.id());

        let frames = match pipeline {
            Some(mut pipeline) => {
                pipeline.close().await;
                pipeline.frames_gesamt()
            }
            None => 0,
        };
        self.handle.frames.store(frames, Ordering::Relaxed);

        self.verbindung_schliessen().await;

        if let Some(m) = &self.kontext.metriken {
            m.session_beendet(frames);
        }

        self.beenden(SessionZustand::Geschlossen, ursache)
    }

    /// Schliesst die Verbindung mit Frist; Fehler werden nur geloggt
    async fn verbindung_schliessen(&self) {
        let dauer = self.kontext.konfig.schliess_timeout;
        let frist = Instant::now() + dauer;
        let ergebnis = match tokio::time::timeout_at(frist, self.verbindung.close(frist)).await {
            Ok(r) => r.map_err(|e| RelayError::Schliessen(e.0)),
            Err(_) => Err(RelayError::Schliessen(format!("Zeitlimit nach {dauer:?}"))),
        };

        if let Err(fehler) = ergebnis {
            warn!(kanal = %self.handle.kanal(), fehler = %fehler, "Verbindung nicht sauber geschlossen");
            if let Some(m) = &self.kontext.metriken {
                m.ursache_zaehlen(fehler.art());
            }
        }
    }

    /// Setzt den terminalen Zustand und meldet die Ursache genau einmal
    fn beenden(&self, zustand: SessionZustand, ursache: Option<RelayError>) -> Option<RelayError> {
        let kanal = self.handle.kanal();
        let id = self.handle.id();

        match &ursache {
            None => info!(kanal = %kanal, session = %id, "Session verlassen"),
            Some(u) if u.ist_regulaer() => {
                info!(kanal = %kanal, session = %id, ursache = %u, "Session beendet")
            }
            Some(u) => warn!(kanal = %kanal, session = %id, fehler = %u, "Session fehlgeschlagen"),
        }

        if let (Some(m), Some(u)) = (&self.kontext.metriken, &ursache) {
            m.ursache_zaehlen(u.art());
        }

        *self.handle.ursache.lock() = ursache.clone();
        self.handle.zustand_setzen(zustand);
        ursache
    }
}
