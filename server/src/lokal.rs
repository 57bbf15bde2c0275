//! Lokale Plattform – Voice-Zustand im Speicher und Loopback-Transport
//!
//! Ersetzt das SDK einer Chat-Plattform fuer den Konsolenbetrieb:
//! - Benutzer "betreten" Kanaele per Konsolenbefehl
//! - Die Verbindung spielt nichts ab, sondern zieht im 20-ms-Takt Frames
//!   und zaehlt sie, wie es ein echter Voice-Transport tun wuerde

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use funkrelais_audio::FrameProvider;
use funkrelais_core::{ChannelId, UserId};
use funkrelais_voice::{TransportFehler, VoiceConnection, VoicePlattform};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Abholtakt des Loopback-Transports
const FRAME_TAKT: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Statistik
// ---------------------------------------------------------------------------

/// Zaehler einer lokalen Verbindung
#[derive(Debug, Default)]
pub struct VerbindungsStatistik {
    offen: AtomicBool,
    spricht: AtomicBool,
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl VerbindungsStatistik {
    pub fn ist_offen(&self) -> bool {
        self.offen.load(Ordering::Relaxed)
    }

    pub fn spricht(&self) -> bool {
        self.spricht.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// LokalePlattform
// ---------------------------------------------------------------------------

/// In-Memory-Plattform: wer ist in welchem Voice-Kanal
#[derive(Clone, Default)]
pub struct LokalePlattform {
    inner: Arc<LokalePlattformInner>,
}

#[derive(Default)]
struct LokalePlattformInner {
    /// Voice-Kanal pro Benutzer
    kanaele: DashMap<UserId, ChannelId>,
    /// Statistik der zuletzt erstellten Verbindung pro Kanal
    verbindungen: DashMap<ChannelId, Arc<VerbindungsStatistik>>,
}

impl LokalePlattform {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Benutzer betritt einen Voice-Kanal (wechselt ggf. den Kanal)
    pub fn betreten(&self, benutzer: UserId, kanal: ChannelId) {
        self.inner.kanaele.insert(benutzer, kanal);
        debug!(benutzer = %benutzer, kanal = %kanal, "Benutzer betritt Voice-Kanal");
    }

    /// Benutzer verlaesst seinen Voice-Kanal
    pub fn verlassen(&self, benutzer: UserId) -> Option<ChannelId> {
        self.inner.kanaele.remove(&benutzer).map(|(_, kanal)| kanal)
    }

    pub fn kanal_von(&self, benutzer: UserId) -> Option<ChannelId> {
        self.inner.kanaele.get(&benutzer).map(|k| *k)
    }

    /// Statistik der Verbindung in einen Kanal
    pub fn statistik(&self, kanal: ChannelId) -> Option<Arc<VerbindungsStatistik>> {
        self.inner.verbindungen.get(&kanal).map(|s| Arc::clone(&s))
    }

    /// Alle Benutzer mit ihrem Kanal, sortiert nach Benutzer
    pub fn belegung(&self) -> Vec<(UserId, ChannelId)> {
        let mut liste: Vec<_> = self
            .inner
            .kanaele
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        liste.sort_by_key(|(benutzer, _)| benutzer.inner());
        liste
    }
}

#[async_trait]
impl VoicePlattform for LokalePlattform {
    type Verbindung = LokaleVerbindung;

    async fn voice_kanal_von(&self, benutzer: UserId) -> Result<Option<ChannelId>, TransportFehler> {
        Ok(self.kanal_von(benutzer))
    }

    fn verbindung_erstellen(&self, kanal: ChannelId) -> LokaleVerbindung {
        let statistik = Arc::new(VerbindungsStatistik::default());
        self.inner.verbindungen.insert(kanal, Arc::clone(&statistik));
        LokaleVerbindung {
            kanal,
            statistik,
            abspieler: Mutex::new(None),
        }
    }
}

// ---------------------------------------------------------------------------
// LokaleVerbindung
// ---------------------------------------------------------------------------

/// Loopback-Transport: holt Frames im Echtzeit-Takt ab und zaehlt sie
pub struct LokaleVerbindung {
    kanal: ChannelId,
    statistik: Arc<VerbindungsStatistik>,
    abspieler: Mutex<Option<JoinHandle<()>>>,
}

impl LokaleVerbindung {
    fn abspieler_stoppen(&self) {
        if let Some(task) = self.abspieler.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl VoiceConnection for LokaleVerbindung {
    async fn open(&self, kanal: ChannelId, _frist: Instant) -> Result<(), TransportFehler> {
        if kanal != self.kanal {
            return Err(TransportFehler::neu(format!(
                "Verbindung gehoert zu {}, nicht zu {kanal}",
                self.kanal
            )));
        }
        self.statistik.offen.store(true, Ordering::Relaxed);
        info!(kanal = %kanal, "Lokale Voice-Verbindung geoeffnet");
        Ok(())
    }

    async fn close(&self, _frist: Instant) -> Result<(), TransportFehler> {
        self.abspieler_stoppen();
        self.statistik.offen.store(false, Ordering::Relaxed);
        self.statistik.spricht.store(false, Ordering::Relaxed);
        info!(
            kanal = %self.kanal,
            frames = self.statistik.frames(),
            bytes = self.statistik.bytes(),
            "Lokale Voice-Verbindung geschlossen"
        );
        Ok(())
    }

    async fn set_speaking(&self, spricht: bool) -> Result<(), TransportFehler> {
        if !self.statistik.ist_offen() {
            return Err(TransportFehler::neu("Verbindung ist nicht offen"));
        }
        self.statistik.spricht.store(spricht, Ordering::Relaxed);
        Ok(())
    }

    fn set_frame_provider(&self, mut provider: Box<dyn FrameProvider>) {
        let statistik = Arc::clone(&self.statistik);
        let kanal = self.kanal;

        let task = tokio::spawn(async move {
            let mut takt = tokio::time::interval(FRAME_TAKT);
            takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                takt.tick().await;
                match provider.next_frame().await {
                    Some(frame) => {
                        statistik.frames.fetch_add(1, Ordering::Relaxed);
                        statistik
                            .bytes
                            .fetch_add(frame.daten.len() as u64, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
            debug!(kanal = %kanal, "Frame-Lieferant erschoepft");
        });

        // Ein neuer Lieferant ersetzt den alten
        if let Some(alt) = self.abspieler.lock().replace(task) {
            alt.abort();
        }
    }
}

impl Drop for LokaleVerbindung {
    fn drop(&mut self) {
        self.abspieler_stoppen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funkrelais_audio::OpusFrame;

    fn frame(sequenz: u64) -> OpusFrame {
        OpusFrame {
            sequenz,
            dauer: Duration::from_millis(20),
            daten: vec![0xF8, 0xFF, 0xFE].into(),
        }
    }

    /// Liefert eine feste Anzahl Frames
    struct Zaehler(u64);

    #[async_trait]
    impl FrameProvider for Zaehler {
        async fn next_frame(&mut self) -> Option<OpusFrame> {
            if self.0 == 0 {
                return None;
            }
            self.0 -= 1;
            Some(frame(self.0))
        }
    }

    #[tokio::test]
    async fn betreten_und_verlassen() {
        let plattform = LokalePlattform::neu();
        plattform.betreten(UserId(1), ChannelId(10));
        plattform.betreten(UserId(2), ChannelId(10));

        assert_eq!(plattform.voice_kanal_von(UserId(1)).await.unwrap(), Some(ChannelId(10)));
        assert_eq!(plattform.belegung().len(), 2);

        // Kanalwechsel
        plattform.betreten(UserId(1), ChannelId(20));
        assert_eq!(plattform.kanal_von(UserId(1)), Some(ChannelId(20)));

        assert_eq!(plattform.verlassen(UserId(1)), Some(ChannelId(20)));
        assert_eq!(plattform.voice_kanal_von(UserId(1)).await.unwrap(), None);
        assert_eq!(plattform.verlassen(UserId(1)), None);
    }

    #[tokio::test]
    async fn speaking_nur_bei_offener_verbindung() {
        let plattform = LokalePlattform::neu();
        let verbindung = plattform.verbindung_erstellen(ChannelId(3));
        let frist = Instant::now() + Duration::from_secs(1);

        assert!(verbindung.set_speaking(true).await.is_err());
        assert!(verbindung.open(ChannelId(4), frist).await.is_err());

        verbindung.open(ChannelId(3), frist).await.unwrap();
        verbindung.set_speaking(true).await.unwrap();
        let statistik = plattform.statistik(ChannelId(3)).unwrap();
        assert!(statistik.ist_offen());
        assert!(statistik.spricht());

        verbindung.close(frist).await.unwrap();
        assert!(!statistik.ist_offen());
    }

    #[tokio::test]
    async fn frames_werden_im_takt_gezaehlt() {
        let plattform = LokalePlattform::neu();
        let verbindung = plattform.verbindung_erstellen(ChannelId(5));
        let frist = Instant::now() + Duration::from_secs(1);
        verbindung.open(ChannelId(5), frist).await.unwrap();

        verbindung.set_frame_provider(Box::new(Zaehler(5)));

        let statistik = plattform.statistik(ChannelId(5)).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while statistik.frames() < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(statistik.frames(), 5);
        assert_eq!(statistik.bytes(), 15);
        verbindung.close(frist).await.unwrap();
    }
}
