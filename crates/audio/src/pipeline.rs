//! Encoder-Pipeline – Byte-Stream -> Transcoder-Prozess -> Opus-Frames
//!
//! Die Pipeline besteht aus drei Tasks:
//! - Zufuhr: liest die Byte-Quelle und schreibt in stdin des Transcoders
//! - Encoder: liest s16le-PCM aus stdout, kodiert 20-ms-Frames zu Opus und
//!   legt sie in einen begrenzten Kanal
//! - Stderr: leitet die Diagnose-Ausgabe des Prozesses ins Log
//!
//! Der Transport holt die Frames ueber `PipelineFrames` (FrameProvider) ab.
//! `run_until_done()` wartet auf den terminalen Status, `close()` stoppt
//! Prozess und Quelle jederzeit (idempotent).
//!
//! Der terminale Status wird genau einmal gesetzt. Frames, die beim Ende
//! noch im Kanal liegen, darf der Transport weiter abholen, solange die
//! Pipeline nicht geschlossen wurde. `ausgelaufen()` wartet darauf.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{OpusConfig, OpusEncoder};
use crate::error::{AudioError, AudioResult};
use crate::frame::{FrameProvider, OpusFrame};
use crate::quelle::ByteQuelle;

/// Blockgroesse beim Lesen der Quelle
const ZUFUHR_BLOCK: usize = 16 * 1024;

/// Maximale Wartezeit auf die Pipeline-Tasks beim Schliessen
const TASK_FRIST: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des Transcoder-Prozesses und des Opus-Encoders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderKonfig {
    /// Programm das den Stream zu s16le-PCM dekodiert
    pub programm: String,
    /// Argumente des Programms (None = ffmpeg-Standardargumente)
    pub argumente: Option<Vec<String>>,
    /// Anzahl gepufferter Frames zwischen Encoder und Transport
    pub frame_puffer: usize,
    /// Opus-Parameter
    pub opus: OpusConfig,
}

impl Default for EncoderKonfig {
    fn default() -> Self {
        Self {
            programm: "ffmpeg".to_string(),
            argumente: None,
            // 1 Sekunde bei 20-ms-Frames
            frame_puffer: 50,
            opus: OpusConfig::default(),
        }
    }
}

impl EncoderKonfig {
    /// Standardargumente fuer ffmpeg: Stream auf stdin, s16le-PCM auf stdout
    pub fn standard_argumente(opus: &OpusConfig) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            "pipe:0".into(),
            "-f".into(),
            "s16le".into(),
            "-ac".into(),
            (opus.channels as u8).to_string(),
            "-ar".into(),
            (opus.sample_rate as u32).to_string(),
            "pipe:1".into(),
        ]
    }

    /// Tatsaechlich verwendete Argumente
    pub fn effektive_argumente(&self) -> Vec<String> {
        match &self.argumente {
            Some(argumente) => argumente.clone(),
            None => Self::standard_argumente(&self.opus),
        }
    }

    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if self.programm.trim().is_empty() {
            return Err("Transcoder-Programm darf nicht leer sein".into());
        }
        if self.frame_puffer == 0 {
            return Err("frame_puffer muss groesser als 0 sein".into());
        }
        self.opus.validieren()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Grund eines regulaeren Pipeline-Endes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEnde {
    /// Quelle vollstaendig kodiert, Transcoder sauber beendet
    QuelleErschoepft,
    /// Der Transport hat den FrameProvider verworfen
    EmpfaengerWeg,
    /// `close()` wurde aufgerufen
    Geschlossen,
}

impl std::fmt::Display for PipelineEnde {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::QuelleErschoepft => "Quelle erschoepft",
            Self::EmpfaengerWeg => "Transport holt keine Frames mehr ab",
            Self::Geschlossen => "Pipeline geschlossen",
        };
        f.write_str(text)
    }
}

/// Zustand einer Encoder-Pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Frames werden produziert
    Laeuft,
    /// Regulaer beendet
    Abgeschlossen(PipelineEnde),
    /// Terminaler Fehler mit Ursache
    Fehlgeschlagen(String),
}

impl PipelineStatus {
    pub fn ist_terminal(&self) -> bool {
        !matches!(self, PipelineStatus::Laeuft)
    }
}

/// Setzt den terminalen Status, falls noch keiner gesetzt ist
///
/// Gibt `true` zurueck wenn dieser Aufruf den Status gesetzt hat.
fn status_setzen(tx: &watch::Sender<PipelineStatus>, neu: PipelineStatus) -> bool {
    tx.send_if_modified(|status| {
        if status.ist_terminal() {
            return false;
        }
        *status = neu;
        true
    })
}

// ---------------------------------------------------------------------------
// EncoderPipeline
// ---------------------------------------------------------------------------

/// Eine laufende Transkodierung von Byte-Stream zu Opus-Frames
pub struct EncoderPipeline {
    programm: String,
    status_tx: Arc<watch::Sender<PipelineStatus>>,
    status_rx: watch::Receiver<PipelineStatus>,
    shutdown_tx: watch::Sender<bool>,
    frames: Option<PipelineFrames>,
    ausgelaufen_rx: watch::Receiver<bool>,
    frames_gesamt: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
    geschlossen: bool,
}

impl EncoderPipeline {
    /// Startet Transcoder-Prozess und Encoder fuer die gegebene Quelle
    ///
    /// Schlaegt mit `AudioError::EncoderInit` fehl, wenn der Prozess oder
    /// der Opus-Encoder nicht erstellt werden kann. Muss innerhalb einer
    /// Tokio-Runtime aufgerufen werden.
    pub fn start<Q: ByteQuelle>(mut quelle: Q, konfig: &EncoderKonfig) -> AudioResult<Self> {
        if let Err(grund) = konfig.validieren() {
            quelle.schliessen();
            return Err(AudioError::Konfiguration(grund));
        }

        let encoder = match OpusEncoder::new(konfig.opus.clone()) {
            Ok(encoder) => encoder,
            Err(e) => {
                quelle.schliessen();
                return Err(AudioError::EncoderInit(e.to_string()));
            }
        };

        let argumente = konfig.effektive_argumente();
        let kind = Command::new(&konfig.programm)
            .args(&argumente)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut kind = match kind {
            Ok(kind) => kind,
            Err(e) => {
                quelle.schliessen();
                return Err(AudioError::EncoderInit(format!(
                    "{} konnte nicht gestartet werden: {e}",
                    konfig.programm
                )));
            }
        };

        let (stdin, stdout, stderr) = match (kind.stdin.take(), kind.stdout.take(), kind.stderr.take())
        {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                quelle.schliessen();
                return Err(AudioError::EncoderInit(
                    "Standard-Streams des Transcoders nicht verfuegbar".into(),
                ));
            }
        };

        let (status_tx, status_rx) = watch::channel(PipelineStatus::Laeuft);
        let status_tx = Arc::new(status_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (frame_tx, frame_rx) = mpsc::channel(konfig.frame_puffer);
        let (ausgelaufen_tx, ausgelaufen_rx) = watch::channel(false);
        let frames_gesamt = Arc::new(AtomicU64::new(0));
        let quellen_fehler = Arc::new(Mutex::new(None));

        info!(
            programm = %konfig.programm,
            pid = ?kind.id(),
            bitrate_kbps = konfig.opus.bitrate_kbps,
            "Encoder-Pipeline gestartet"
        );

        let zufuhr = tokio::spawn(zufuehren(
            quelle,
            stdin,
            shutdown_rx.clone(),
            Arc::clone(&quellen_fehler),
        ));

        let encoder_task = tokio::spawn(
            EncoderSchleife {
                kind,
                stdout,
                encoder,
                frame_tx,
                shutdown_rx: shutdown_rx.clone(),
                status_tx: Arc::clone(&status_tx),
                quellen_fehler,
                frames_gesamt: Arc::clone(&frames_gesamt),
            }
            .ausfuehren(),
        );

        let stderr_task = tokio::spawn(stderr_protokollieren(stderr, konfig.programm.clone()));

        Ok(Self {
            programm: konfig.programm.clone(),
            status_tx,
            status_rx,
            shutdown_tx,
            frames: Some(PipelineFrames {
                rx: frame_rx,
                shutdown_rx,
                ausgelaufen_tx,
            }),
            ausgelaufen_rx,
            frames_gesamt,
            tasks: vec![zufuhr, encoder_task, stderr_task],
            geschlossen: false,
        })
    }

    /// Uebergibt den FrameProvider (nur einmal moeglich)
    pub fn frames(&mut self) -> Option<PipelineFrames> {
        self.frames.take()
    }

    /// Wartet bis die Pipeline terminal ist
    ///
    /// Liefert den Grund eines regulaeren Endes oder den Fehler.
    pub async fn run_until_done(&self) -> AudioResult<PipelineEnde> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(PipelineStatus::ist_terminal)
            .await
            .map_err(|_| AudioError::StreamFehler("Pipeline-Status nicht verfuegbar".into()))?
            .clone();

        match status {
            PipelineStatus::Fehlgeschlagen(grund) => Err(AudioError::StreamFehler(grund)),
            PipelineStatus::Abgeschlossen(ende) => Ok(ende),
            PipelineStatus::Laeuft => Ok(PipelineEnde::Geschlossen),
        }
    }

    /// Wartet bis der FrameProvider alle gepufferten Frames abgegeben hat
    ///
    /// Kehrt sofort zurueck, wenn der Provider nie uebergeben oder vom
    /// Transport verworfen wurde.
    pub async fn ausgelaufen(&self) {
        if self.frames.is_some() {
            return;
        }
        let mut rx = self.ausgelaufen_rx.clone();
        let _ = rx.wait_for(|leer| *leer).await;
    }

    /// Stoppt Transcoder-Prozess und Quelle (idempotent)
    ///
    /// Nach dem Schliessen liefert der FrameProvider keine Frames mehr.
    pub async fn close(&mut self) {
        if self.geschlossen {
            return;
        }
        self.geschlossen = true;

        let _ = self.shutdown_tx.send(true);
        status_setzen(
            &self.status_tx,
            PipelineStatus::Abgeschlossen(PipelineEnde::Geschlossen),
        );

        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(TASK_FRIST, &mut task).await.is_err() {
                warn!(programm = %self.programm, "Pipeline-Task reagiert nicht, wird abgebrochen");
                task.abort();
            }
        }

        info!(
            programm = %self.programm,
            frames = self.frames_gesamt(),
            "Encoder-Pipeline geschlossen"
        );
    }

    /// Aktueller Status
    pub fn status(&self) -> PipelineStatus {
        self.status_rx.borrow().clone()
    }

    /// Anzahl bisher kodierter Frames
    pub fn frames_gesamt(&self) -> u64 {
        self.frames_gesamt.load(Ordering::Relaxed)
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen
    }
}

// ---------------------------------------------------------------------------
// PipelineFrames
// ---------------------------------------------------------------------------

/// FrameProvider einer Encoder-Pipeline
pub struct PipelineFrames {
    rx: mpsc::Receiver<OpusFrame>,
    shutdown_rx: watch::Receiver<bool>,
    ausgelaufen_tx: watch::Sender<bool>,
}

#[async_trait]
impl FrameProvider for PipelineFrames {
    async fn next_frame(&mut self) -> Option<OpusFrame> {
        if *self.shutdown_rx.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => None,
            frame = self.rx.recv() => {
                if frame.is_none() {
                    self.ausgelaufen_tx.send_replace(true);
                }
                frame
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Schreibt die Quelle in stdin des Transcoders
///
/// Ein Quellfehler wird vor dem Schliessen von stdin festgehalten, damit
/// der Encoder-Task ihn beim Prozessende sieht.
async fn zufuehren<Q: ByteQuelle>(
    mut quelle: Q,
    mut stdin: ChildStdin,
    mut shutdown_rx: watch::Receiver<bool>,
    quellen_fehler: Arc<Mutex<Option<String>>>,
) {
    let mut puffer = vec![0u8; ZUFUHR_BLOCK];
    let mut bytes_gesamt: u64 = 0;

    loop {
        let gelesen = tokio::select! {
            r = quelle.read(&mut puffer) => r,
            _ = shutdown_rx.changed() => break,
        };

        match gelesen {
            Ok(0) => {
                if let Some(grund) = quelle.fehler() {
                    *quellen_fehler.lock() = Some(grund);
                }
                debug!(bytes = bytes_gesamt, "Quelle erschoepft, stdin wird geschlossen");
                break;
            }
            Ok(n) => {
                let geschrieben = tokio::select! {
                    r = stdin.write_all(&puffer[..n]) => r,
                    _ = shutdown_rx.changed() => break,
                };
                if let Err(e) = geschrieben {
                    debug!(fehler = %e, "Transcoder nimmt keine Daten mehr an");
                    break;
                }
                bytes_gesamt += n as u64;
            }
            Err(e) => {
                *quellen_fehler.lock() = Some(format!("Lesefehler der Quelle: {e}"));
                break;
            }
        }
    }

    quelle.schliessen();
    drop(stdin);
}

/// Liest bis zu einem vollen Frame; 0 bedeutet EOF
async fn frame_lesen<R: AsyncRead + Unpin>(leser: &mut R, puffer: &mut [u8]) -> std::io::Result<usize> {
    let mut gefuellt = 0;
    while gefuellt < puffer.len() {
        let n = leser.read(&mut puffer[gefuellt..]).await?;
        if n == 0 {
            break;
        }
        gefuellt += n;
    }
    Ok(gefuellt)
}

/// Wie die Encoder-Schleife endete
enum SchleifenEnde {
    /// stdout erschoepft
    Eof,
    /// Niemand holt mehr Frames ab
    EmpfaengerWeg,
    Fehler(String),
    /// Pipeline wird geschlossen
    Abbruch,
}

struct EncoderSchleife {
    kind: Child,
    stdout: ChildStdout,
    encoder: OpusEncoder,
    frame_tx: mpsc::Sender<OpusFrame>,
    shutdown_rx: watch::Receiver<bool>,
    status_tx: Arc<watch::Sender<PipelineStatus>>,
    quellen_fehler: Arc<Mutex<Option<String>>>,
    frames_gesamt: Arc<AtomicU64>,
}

impl EncoderSchleife {
    async fn ausfuehren(mut self) {
        let ende = self.kodieren().await;

        let ergebnis = match ende {
            SchleifenEnde::Abbruch => {
                let _ = self.kind.kill().await;
                return;
            }
            SchleifenEnde::EmpfaengerWeg => {
                debug!("Frame-Empfaenger geschlossen, Transcoder wird beendet");
                let _ = self.kind.kill().await;
                Ok(PipelineEnde::EmpfaengerWeg)
            }
            SchleifenEnde::Fehler(grund) => {
                let _ = self.kind.kill().await;
                Err(grund)
            }
            SchleifenEnde::Eof => {
                let exit = tokio::select! {
                    s = self.kind.wait() => s,
                    _ = self.shutdown_rx.changed() => {
                        let _ = self.kind.kill().await;
                        return;
                    }
                };
                match exit {
                    Ok(s) if s.success() => Ok(PipelineEnde::QuelleErschoepft),
                    Ok(s) => Err(format!("Transcoder beendet mit {s}")),
                    Err(e) => Err(format!("Transcoder-Status nicht lesbar: {e}")),
                }
            }
        };

        // Ein Quellfehler ist die eigentliche Ursache
        let ergebnis = match self.quellen_fehler.lock().clone() {
            Some(grund) => Err(grund),
            None => ergebnis,
        };

        let frames = self.frames_gesamt.load(Ordering::Relaxed);
        let neu = match ergebnis {
            Ok(ende) => {
                info!(frames, ende = %ende, "Encoder-Pipeline abgeschlossen");
                PipelineStatus::Abgeschlossen(ende)
            }
            Err(grund) => {
                warn!(frames, grund = %grund, "Encoder-Pipeline fehlgeschlagen");
                PipelineStatus::Fehlgeschlagen(grund)
            }
        };
        status_setzen(&self.status_tx, neu);
    }

    async fn kodieren(&mut self) -> SchleifenEnde {
        let pcm_bytes = self.encoder.config().pcm_bytes_pro_frame();
        let dauer = self.encoder.config().frame_size.dauer();
        let mut puffer = vec![0u8; pcm_bytes];
        let mut sequenz: u64 = 0;

        loop {
            let gelesen = tokio::select! {
                r = frame_lesen(&mut self.stdout, &mut puffer) => r,
                _ = self.shutdown_rx.changed() => return SchleifenEnde::Abbruch,
            };

            let gefuellt = match gelesen {
                Ok(0) => return SchleifenEnde::Eof,
                Ok(n) => n,
                Err(e) => return SchleifenEnde::Fehler(format!("Transcoder-Ausgabe nicht lesbar: {e}")),
            };

            // Letzten unvollstaendigen Frame mit Stille auffuellen
            if gefuellt < pcm_bytes {
                puffer[gefuellt..].fill(0);
            }

            let daten = match self.encoder.encode_s16le(&puffer) {
                Ok(daten) => daten,
                Err(e) => return SchleifenEnde::Fehler(e.to_string()),
            };

            let frame = OpusFrame {
                sequenz,
                dauer,
                daten,
            };

            tokio::select! {
                r = self.frame_tx.send(frame) => {
                    if r.is_err() {
                        return SchleifenEnde::EmpfaengerWeg;
                    }
                }
                _ = self.shutdown_rx.changed() => return SchleifenEnde::Abbruch,
            }

            sequenz += 1;
            self.frames_gesamt.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Leitet stderr des Transcoders zeilenweise ins Debug-Log
async fn stderr_protokollieren(stderr: ChildStderr, programm: String) {
    let mut zeilen = BufReader::new(stderr).lines();
    while let Ok(Some(zeile)) = zeilen.next_line().await {
        debug!(programm = %programm, "{}", zeile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ChannelCount;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf};

    /// Transcoder-Ersatz: `cat` gibt die Eingabe unveraendert als PCM aus
    fn cat_konfig() -> EncoderKonfig {
        EncoderKonfig {
            programm: "cat".into(),
            argumente: Some(vec![]),
            frame_puffer: 8,
            opus: OpusConfig {
                channels: ChannelCount::Mono,
                ..Default::default()
            },
        }
    }

    async fn quelle_mit(bytes: usize) -> DuplexStream {
        let (mut schreiber, leser) = tokio::io::duplex(64 * 1024);
        schreiber.write_all(&vec![0u8; bytes]).await.unwrap();
        drop(schreiber);
        leser
    }

    async fn alle_frames(frames: &mut PipelineFrames) -> Vec<OpusFrame> {
        let mut alle = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(frame) = frames.next_frame().await {
                alle.push(frame);
            }
        })
        .await
        .expect("Pipeline muss terminieren");
        alle
    }

    /// Transcoder der seine PID in eine Datei schreibt und dann `cat` wird
    fn pid_konfig(pid_datei: &std::path::Path) -> EncoderKonfig {
        let mut konfig = cat_konfig();
        konfig.programm = "sh".into();
        konfig.argumente = Some(vec![
            "-c".into(),
            format!("echo $$ > '{}'; exec cat", pid_datei.display()),
        ]);
        konfig
    }

    async fn pid_lesen(pid_datei: &std::path::Path) -> u32 {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(inhalt) = tokio::fs::read_to_string(pid_datei).await {
                    if let Ok(pid) = inhalt.trim().parse::<u32>() {
                        return pid;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Transcoder muss seine PID schreiben")
    }

    fn prozess_lebt(pid: u32) -> bool {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }

    /// Quelle die nach EOF einen Abruffehler meldet
    struct FehlerQuelle(DuplexStream);

    impl AsyncRead for FehlerQuelle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl ByteQuelle for FehlerQuelle {
        fn fehler(&self) -> Option<String> {
            Some("HTTP-Status 404 Not Found".into())
        }
    }

    #[test]
    fn standard_argumente_folgen_opus_konfig() {
        let konfig = EncoderKonfig::default();
        let argumente = konfig.effektive_argumente();
        assert_eq!(argumente.first().map(String::as_str), Some("-hide_banner"));
        assert!(argumente.windows(2).any(|w| w[0] == "-ac" && w[1] == "2"));
        assert!(argumente.windows(2).any(|w| w[0] == "-ar" && w[1] == "48000"));
        assert_eq!(argumente.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn konfig_validierung() {
        assert!(EncoderKonfig::default().validieren().is_ok());

        let mut konfig = EncoderKonfig::default();
        konfig.programm = "  ".into();
        assert!(konfig.validieren().is_err());

        let mut konfig = EncoderKonfig::default();
        konfig.frame_puffer = 0;
        assert!(konfig.validieren().is_err());
    }

    #[tokio::test]
    async fn cat_liefert_frames_in_reihenfolge() {
        let konfig = cat_konfig();
        let pro_frame = konfig.opus.pcm_bytes_pro_frame();

        let mut pipeline = EncoderPipeline::start(quelle_mit(5 * pro_frame).await, &konfig).unwrap();
        let mut frames = pipeline.frames().unwrap();
        assert!(pipeline.frames().is_none());

        let alle = alle_frames(&mut frames).await;
        assert_eq!(alle.len(), 5);
        for (i, frame) in alle.iter().enumerate() {
            assert_eq!(frame.sequenz, i as u64);
            assert_eq!(frame.dauer, Duration::from_millis(20));
            assert!(!frame.daten.is_empty());
        }

        assert_eq!(
            pipeline.run_until_done().await.unwrap(),
            PipelineEnde::QuelleErschoepft
        );
        assert_eq!(
            pipeline.status(),
            PipelineStatus::Abgeschlossen(PipelineEnde::QuelleErschoepft)
        );
        assert_eq!(pipeline.frames_gesamt(), 5);
        // Provider ist leer gelaufen
        tokio::time::timeout(Duration::from_secs(1), pipeline.ausgelaufen())
            .await
            .unwrap();
        pipeline.close().await;
    }

    #[tokio::test]
    async fn teil_frame_wird_aufgefuellt() {
        let konfig = cat_konfig();
        let pro_frame = konfig.opus.pcm_bytes_pro_frame();

        let mut pipeline =
            EncoderPipeline::start(quelle_mit(pro_frame + pro_frame / 2).await, &konfig).unwrap();
        let mut frames = pipeline.frames().unwrap();

        assert_eq!(alle_frames(&mut frames).await.len(), 2);
        pipeline.run_until_done().await.unwrap();
    }

    #[tokio::test]
    async fn close_stoppt_laufende_pipeline() {
        let konfig = cat_konfig();
        // Schreibseite bleibt offen: die Quelle endet nie von selbst
        let (_schreiber, leser) = tokio::io::duplex(1024);

        let mut pipeline = EncoderPipeline::start(leser, &konfig).unwrap();
        let mut frames = pipeline.frames().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Laeuft);

        tokio::time::timeout(Duration::from_secs(5), pipeline.close())
            .await
            .expect("close() muss zeitnah zurueckkehren");
        assert!(pipeline.ist_geschlossen());
        assert_eq!(
            pipeline.status(),
            PipelineStatus::Abgeschlossen(PipelineEnde::Geschlossen)
        );
        assert!(frames.next_frame().await.is_none());

        // Zweites close ist ein No-op
        pipeline.close().await;
        pipeline.run_until_done().await.unwrap();
    }

    #[tokio::test]
    async fn close_beendet_transcoder_prozess() {
        let verzeichnis = tempfile::tempdir().unwrap();
        let pid_datei = verzeichnis.path().join("transcoder.pid");
        let (_schreiber, leser) = tokio::io::duplex(1024);

        let mut pipeline = EncoderPipeline::start(leser, &pid_konfig(&pid_datei)).unwrap();
        let pid = pid_lesen(&pid_datei).await;
        assert!(prozess_lebt(pid));

        tokio::time::timeout(Duration::from_secs(10), pipeline.close())
            .await
            .unwrap();
        assert!(!prozess_lebt(pid), "Transcoder {pid} laeuft nach close() weiter");
    }

    #[tokio::test]
    async fn verworfener_provider_beendet_transcoder() {
        let verzeichnis = tempfile::tempdir().unwrap();
        let pid_datei = verzeichnis.path().join("transcoder.pid");
        let konfig = pid_konfig(&pid_datei);

        // Ein voller Frame, danach bleibt die Quelle offen
        let (mut schreiber, leser) = tokio::io::duplex(64 * 1024);
        schreiber
            .write_all(&vec![0u8; konfig.opus.pcm_bytes_pro_frame()])
            .await
            .unwrap();

        let mut pipeline = EncoderPipeline::start(leser, &konfig).unwrap();
        drop(pipeline.frames());
        let pid = pid_lesen(&pid_datei).await;

        let ende = tokio::time::timeout(Duration::from_secs(10), pipeline.run_until_done())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ende, PipelineEnde::EmpfaengerWeg);
        assert_eq!(ende.to_string(), "Transport holt keine Frames mehr ab");
        assert!(!prozess_lebt(pid), "Transcoder {pid} laeuft ohne Empfaenger weiter");

        pipeline.close().await;
        drop(schreiber);
    }

    #[tokio::test]
    async fn ausgelaufen_wartet_auf_gepufferte_frames() {
        let konfig = cat_konfig();
        let pro_frame = konfig.opus.pcm_bytes_pro_frame();

        let mut pipeline = EncoderPipeline::start(quelle_mit(3 * pro_frame).await, &konfig).unwrap();
        let mut frames = pipeline.frames().unwrap();

        // Alles kodiert, aber noch nichts abgeholt
        tokio::time::timeout(Duration::from_secs(10), pipeline.run_until_done())
            .await
            .unwrap()
            .unwrap();
        let zu_frueh =
            tokio::time::timeout(Duration::from_millis(100), pipeline.ausgelaufen()).await;
        assert!(zu_frueh.is_err());

        assert_eq!(alle_frames(&mut frames).await.len(), 3);
        tokio::time::timeout(Duration::from_secs(1), pipeline.ausgelaufen())
            .await
            .unwrap();
        pipeline.close().await;
    }

    #[tokio::test]
    async fn fehlendes_programm_ist_encoder_init() {
        let mut konfig = cat_konfig();
        konfig.programm = "/nicht/vorhanden/transcoder".into();

        let ergebnis = EncoderPipeline::start(quelle_mit(0).await, &konfig);
        assert!(matches!(ergebnis, Err(AudioError::EncoderInit(_))));
    }

    #[tokio::test]
    async fn quellen_fehler_fuehrt_zu_fehlschlag() {
        let konfig = cat_konfig();
        let quelle = FehlerQuelle(quelle_mit(0).await);

        let mut pipeline = EncoderPipeline::start(quelle, &konfig).unwrap();
        let ergebnis = tokio::time::timeout(Duration::from_secs(10), pipeline.run_until_done())
            .await
            .unwrap();

        match ergebnis {
            Err(AudioError::StreamFehler(grund)) => assert!(grund.contains("404")),
            anderes => panic!("Unerwartetes Ergebnis: {anderes:?}"),
        }
        assert!(matches!(pipeline.status(), PipelineStatus::Fehlgeschlagen(_)));
        pipeline.close().await;
    }

    #[tokio::test]
    async fn exit_code_ungleich_null_ist_fehlschlag() {
        let mut konfig = cat_konfig();
        konfig.programm = "sh".into();
        konfig.argumente = Some(vec!["-c".into(), "cat > /dev/null; exit 3".into()]);

        let mut pipeline = EncoderPipeline::start(quelle_mit(1024).await, &konfig).unwrap();
        let ergebnis = tokio::time::timeout(Duration::from_secs(10), pipeline.run_until_done())
            .await
            .unwrap();

        assert!(matches!(ergebnis, Err(AudioError::StreamFehler(_))));
        assert_eq!(pipeline.frames_gesamt(), 0);
        pipeline.close().await;
    }
}
