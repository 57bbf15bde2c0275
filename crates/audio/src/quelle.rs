//! HTTP-Quelle – kontinuierlicher Byte-Stream als sequentieller Leser
//!
//! `HttpQuelle::open` startet einen Hintergrund-Task, der die Ressource per
//! HTTP abruft und die Bytes in eine In-Memory-Pipe schreibt. Der Leser sieht
//! die Bytes in Ankunftsreihenfolge.
//!
//! ## Verhalten
//! - Netzwerkfehler oder Nicht-2xx-Status: der Leser sieht EOF, die Ursache
//!   ist ueber `abruf_fehler()` abfragbar (kein endloses Blockieren)
//! - `close()` von Leserseite: Pipe wird geschlossen und der Abruf-Task
//!   beendet sich, die HTTP-Verbindung wird freigegeben
//! - `close()` ist idempotent, `Drop` schliesst ebenfalls
//! - Kein Lese-Timeout: Live-Streams duerfen beliebig lange laufen

use futures_util::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Puffergroesse der Pipe zwischen Abruf-Task und Leser
pub const PIPE_PUFFER: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// ByteQuelle
// ---------------------------------------------------------------------------

/// Sequentielle Byte-Quelle fuer die Encoder-Pipeline
pub trait ByteQuelle: AsyncRead + Send + Unpin + 'static {
    /// Ursache, falls die Quelle durch einen Fehler (statt regulaer) endete
    fn fehler(&self) -> Option<String> {
        None
    }

    /// Gibt die Quelle frei (idempotent)
    fn schliessen(&mut self) {}
}

/// In-Memory-Quelle (z.B. fuer lokal erzeugtes PCM)
impl ByteQuelle for DuplexStream {}

// ---------------------------------------------------------------------------
// HttpQuelle
// ---------------------------------------------------------------------------

/// Byte-Leser ueber einer HTTP-Ressource
pub struct HttpQuelle {
    url: String,
    /// Leseseite der Pipe (None = geschlossen)
    leser: Option<DuplexStream>,
    /// Abbruch-Signal fuer den Abruf-Task
    shutdown_tx: watch::Sender<bool>,
    /// Fehlerursache des Abrufs (falls vorhanden)
    fehler: Arc<Mutex<Option<String>>>,
    abruf: Option<JoinHandle<()>>,
}

impl HttpQuelle {
    /// Oeffnet die Quelle und startet den Abruf im Hintergrund
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn open(client: &reqwest::Client, url: impl Into<String>) -> Self {
        let url = url.into();
        let (leser, schreiber) = tokio::io::duplex(PIPE_PUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fehler = Arc::new(Mutex::new(None));

        let abruf = tokio::spawn(abrufen(
            client.clone(),
            url.clone(),
            schreiber,
            shutdown_rx,
            Arc::clone(&fehler),
        ));

        debug!(url = %url, "HTTP-Quelle geoeffnet");

        Self {
            url,
            leser: Some(leser),
            shutdown_tx,
            fehler,
            abruf: Some(abruf),
        }
    }

    /// Schliesst die Quelle (idempotent)
    pub fn close(&mut self) {
        if let Some(leser) = self.leser.take() {
            drop(leser);
            let _ = self.shutdown_tx.send(true);
            debug!(url = %self.url, "HTTP-Quelle geschlossen");
        }
    }

    /// Prueft ob die Quelle bereits geschlossen wurde
    pub fn ist_geschlossen(&self) -> bool {
        self.leser.is_none()
    }

    /// Prueft ob der Abruf-Task noch laeuft
    pub fn abruf_laeuft(&self) -> bool {
        self.abruf.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Fehlerursache des Abrufs, falls er nicht regulaer endete
    pub fn abruf_fehler(&self) -> Option<String> {
        self.fehler.lock().clone()
    }
}

impl ByteQuelle for HttpQuelle {
    fn fehler(&self) -> Option<String> {
        self.abruf_fehler()
    }

    fn schliessen(&mut self) {
        self.close();
    }
}

impl AsyncRead for HttpQuelle {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.leser.as_mut() {
            Some(leser) => Pin::new(leser).poll_read(cx, buf),
            // Geschlossen: dauerhaft EOF
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for HttpQuelle {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Abruf-Task
// ---------------------------------------------------------------------------

fn fehler_setzen(slot: &Mutex<Option<String>>, grund: String) {
    let mut slot = slot.lock();
    if slot.is_none() {
        *slot = Some(grund);
    }
}

/// Ruft die Ressource ab und schreibt sie in die Pipe
///
/// Endet bei Stream-Ende, Fehler, geschlossenem Leser oder Abbruch-Signal.
/// Die HTTP-Antwort wird mit dem Task verworfen.
async fn abrufen(
    client: reqwest::Client,
    url: String,
    mut schreiber: DuplexStream,
    mut shutdown_rx: watch::Receiver<bool>,
    fehler: Arc<Mutex<Option<String>>>,
) {
    let antwort = tokio::select! {
        r = client.get(&url).send() => r,
        _ = shutdown_rx.changed() => {
            debug!(url = %url, "Abruf vor Antwort abgebrochen");
            return;
        }
    };

    let antwort = match antwort {
        Ok(a) if a.status().is_success() => a,
        Ok(a) => {
            let grund = format!("HTTP-Status {}", a.status());
            warn!(url = %url, status = %a.status(), "Audio-Quelle antwortet mit Fehlerstatus");
            fehler_setzen(&fehler, grund);
            return;
        }
        Err(e) => {
            warn!(url = %url, fehler = %e, "Audio-Quelle nicht erreichbar");
            fehler_setzen(&fehler, format!("Abruf fehlgeschlagen: {e}"));
            return;
        }
    };

    info!(url = %url, "Audio-Quelle verbunden");

    let mut stream = antwort.bytes_stream();
    let mut bytes_gesamt: u64 = 0;

    loop {
        tokio::select! {
            chunk = stream.next() => match chunk {
                Some(Ok(daten)) => {
                    // Schlaegt fehl sobald der Leser geschlossen ist
                    if schreiber.write_all(&daten).await.is_err() {
                        debug!(url = %url, "Leser geschlossen, Abruf endet");
                        break;
                    }
                    bytes_gesamt += daten.len() as u64;
                }
                Some(Err(e)) => {
                    warn!(url = %url, fehler = %e, "Lesefehler im Audio-Stream");
                    fehler_setzen(&fehler, format!("Lesefehler: {e}"));
                    break;
                }
                None => {
                    info!(url = %url, bytes = bytes_gesamt, "Audio-Quelle erschoepft");
                    break;
                }
            },
            _ = shutdown_rx.changed() => {
                debug!(url = %url, "Abruf abgebrochen");
                break;
            }
        }
    }

    let _ = schreiber.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn test_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn endlos() -> Body {
        let stream = futures_util::stream::unfold((), |_| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Some((Ok::<_, io::Error>(Bytes::from_static(&[1u8; 1024])), ()))
        });
        Body::from_stream(stream)
    }

    #[tokio::test]
    async fn liest_kompletten_body() {
        let router = Router::new().route("/radio", get(|| async { vec![7u8; 10_000] }));
        let basis = test_server(router).await;

        let client = reqwest::Client::new();
        let mut quelle = HttpQuelle::open(&client, format!("{basis}/radio"));

        let mut daten = Vec::new();
        quelle.read_to_end(&mut daten).await.unwrap();

        assert_eq!(daten.len(), 10_000);
        assert!(daten.iter().all(|b| *b == 7));
        assert!(quelle.abruf_fehler().is_none());
    }

    #[tokio::test]
    async fn fehlerstatus_liefert_eof_mit_ursache() {
        let basis = test_server(Router::new()).await;

        let client = reqwest::Client::new();
        let mut quelle = HttpQuelle::open(&client, format!("{basis}/gibtsnicht"));

        let mut daten = Vec::new();
        let gelesen = tokio::time::timeout(Duration::from_secs(5), quelle.read_to_end(&mut daten))
            .await
            .expect("Leser darf bei Fehlerstatus nicht blockieren")
            .unwrap();

        assert_eq!(gelesen, 0);
        let fehler = quelle.abruf_fehler().expect("Fehlerursache muss gesetzt sein");
        assert!(fehler.contains("404"), "unerwartete Ursache: {fehler}");
    }

    #[tokio::test]
    async fn nicht_erreichbare_quelle_liefert_eof() {
        let client = reqwest::Client::new();
        // Port 1 ist lokal praktisch nie belegt
        let mut quelle = HttpQuelle::open(&client, "http://127.0.0.1:1/radio");

        let mut daten = Vec::new();
        let gelesen = tokio::time::timeout(Duration::from_secs(5), quelle.read_to_end(&mut daten))
            .await
            .expect("Leser darf nicht blockieren")
            .unwrap();

        assert_eq!(gelesen, 0);
        assert!(ByteQuelle::fehler(&quelle).is_some());
    }

    #[tokio::test]
    async fn schliessen_ist_idempotent_und_beendet_abruf() {
        let router = Router::new().route("/live", get(endlos));
        let basis = test_server(router).await;

        let client = reqwest::Client::new();
        let mut quelle = HttpQuelle::open(&client, format!("{basis}/live"));

        let mut puffer = [0u8; 512];
        let n = quelle.read(&mut puffer).await.unwrap();
        assert!(n > 0, "Live-Stream sollte Daten liefern");

        quelle.close();
        quelle.close();
        assert!(quelle.ist_geschlossen());

        // Nach dem Schliessen: dauerhaft EOF
        assert_eq!(quelle.read(&mut puffer).await.unwrap(), 0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while quelle.abruf_laeuft() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Abruf-Task muss nach close() enden");

        // Regulaer geschlossen, kein Fehler
        assert!(quelle.abruf_fehler().is_none());
    }
}
