//! Konsole – Textbefehle fuer den lokalen Betrieb
//!
//! Jede Zeile ist ein Befehl. `join` und `leave` gehen an den Relay-Dienst,
//! `betreten` und `verlassen` veraendern die lokale Voice-Belegung.

use std::str::FromStr;

use funkrelais_core::{ChannelId, UserId};
use funkrelais_voice::{Antwort, RelayDienst};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::lokal::LokalePlattform;

const HILFE: &str = "\
Befehle:
  betreten <benutzer> <kanal>  Benutzer betritt einen Voice-Kanal
  verlassen <benutzer>         Benutzer verlaesst seinen Voice-Kanal
  join <benutzer>              Stream im Kanal des Benutzers starten
  leave <benutzer>             Stream im Kanal des Benutzers beenden
  status                       Belegung und laufende Sessions
  hilfe                        Diese Hilfe
  ende                         Konsole beenden";

/// Ein geparster Konsolenbefehl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Befehl {
    Betreten(UserId, ChannelId),
    Verlassen(UserId),
    Join(UserId),
    Leave(UserId),
    Status,
    Hilfe,
    Ende,
}

impl FromStr for Befehl {
    type Err = String;

    fn from_str(zeile: &str) -> Result<Self, Self::Err> {
        let mut teile = zeile.split_whitespace();
        let name = teile.next().ok_or_else(|| "Leere Eingabe".to_string())?;

        let mut id = |was: &str| -> Result<u64, String> {
            let roh = teile
                .next()
                .ok_or_else(|| format!("{name}: {was} fehlt"))?;
            roh.parse::<u64>()
                .map_err(|_| format!("{name}: ungueltige {was} '{roh}'"))
        };

        let befehl = match name.to_ascii_lowercase().as_str() {
            "betreten" => {
                let benutzer = id("Benutzer-ID")?;
                let kanal = id("Kanal-ID")?;
                Befehl::Betreten(UserId(benutzer), ChannelId(kanal))
            }
            "verlassen" => Befehl::Verlassen(UserId(id("Benutzer-ID")?)),
            "join" => Befehl::Join(UserId(id("Benutzer-ID")?)),
            "leave" => Befehl::Leave(UserId(id("Benutzer-ID")?)),
            "status" => Befehl::Status,
            "hilfe" | "help" | "?" => Befehl::Hilfe,
            "ende" | "quit" | "exit" => Befehl::Ende,
            anderer => return Err(format!("Unbekannter Befehl '{anderer}' (hilfe zeigt alle)")),
        };

        if teile.next().is_some() {
            return Err(format!("{name}: zu viele Argumente"));
        }
        Ok(befehl)
    }
}

/// Liest Befehle bis `ende` oder Eingabeende und schreibt die Antworten
pub async fn ausfuehren<R, W>(
    dienst: &RelayDienst<LokalePlattform>,
    eingabe: R,
    mut ausgabe: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut zeilen = eingabe.lines();

    while let Some(zeile) = zeilen.next_line().await? {
        let zeile = zeile.trim();
        if zeile.is_empty() || zeile.starts_with('#') {
            continue;
        }

        let befehl = match zeile.parse::<Befehl>() {
            Ok(b) => b,
            Err(e) => {
                schreiben(&mut ausgabe, &e).await?;
                continue;
            }
        };

        if befehl == Befehl::Ende {
            break;
        }
        let text = bearbeiten(dienst, befehl).await;
        schreiben(&mut ausgabe, &text).await?;
    }

    ausgabe.flush().await
}

async fn bearbeiten(dienst: &RelayDienst<LokalePlattform>, befehl: Befehl) -> String {
    match befehl {
        Befehl::Betreten(benutzer, kanal) => {
            dienst.plattform().betreten(benutzer, kanal);
            format!("{benutzer} ist jetzt in {kanal}")
        }
        Befehl::Verlassen(benutzer) => match dienst.plattform().verlassen(benutzer) {
            Some(kanal) => format!("{benutzer} hat {kanal} verlassen"),
            None => format!("{benutzer} ist in keinem Voice-Kanal"),
        },
        Befehl::Join(benutzer) => {
            let ergebnis = dienst.join(benutzer).await;
            if let Ok(handle) = &ergebnis {
                // Abbau-Ursache nachtraeglich protokollieren
                let handle = handle.clone();
                tokio::spawn(async move {
                    let zustand = handle.beendet().await;
                    match handle.ursache() {
                        Some(ursache) if !ursache.ist_regulaer() => warn!(
                            kanal = %handle.kanal(),
                            zustand = %zustand,
                            ursache = %Antwort::aus_fehler(&ursache).nachricht,
                            "Session mit Fehler beendet"
                        ),
                        ursache => info!(
                            kanal = %handle.kanal(),
                            zustand = %zustand,
                            frames = handle.frames_gesamt(),
                            ursache = ?ursache.map(|u| u.to_string()),
                            "Session beendet"
                        ),
                    }
                });
            }
            Antwort::aus_join(&ergebnis).nachricht
        }
        Befehl::Leave(benutzer) => Antwort::aus_leave(&dienst.leave(benutzer).await).nachricht,
        Befehl::Status => status(dienst),
        Befehl::Hilfe => HILFE.to_string(),
        Befehl::Ende => String::new(),
    }
}

fn status(dienst: &RelayDienst<LokalePlattform>) -> String {
    let mut zeilen = Vec::new();

    let belegung = dienst.plattform().belegung();
    if belegung.is_empty() {
        zeilen.push("Niemand ist in einem Voice-Kanal.".to_string());
    }
    for (benutzer, kanal) in belegung {
        zeilen.push(format!("{benutzer} -> {kanal}"));
    }

    let sessions = dienst.registry().aktive_sessions();
    zeilen.push(format!("Aktive Sessions: {}", sessions.len()));
    for handle in sessions {
        let statistik = dienst.plattform().statistik(handle.kanal());
        zeilen.push(format!(
            "  {} {} zustand={} gesendet={}",
            handle.kanal(),
            handle.id(),
            handle.zustand(),
            statistik.map(|s| s.frames()).unwrap_or(0)
        ));
    }
    zeilen.join("\n")
}

async fn schreiben<W: AsyncWrite + Unpin>(ausgabe: &mut W, text: &str) -> std::io::Result<()> {
    ausgabe.write_all(text.as_bytes()).await?;
    ausgabe.write_all(b"\n").await?;
    ausgabe.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use funkrelais_voice::SessionKonfig;

    fn dienst() -> RelayDienst<LokalePlattform> {
        RelayDienst::neu(
            LokalePlattform::neu(),
            SessionKonfig::neu("http://127.0.0.1:1/stream"),
            reqwest::Client::new(),
            None,
        )
    }

    async fn sitzung(dienst: &RelayDienst<LokalePlattform>, eingabe: &str) -> String {
        let mut ausgabe = Vec::new();
        ausfuehren(dienst, eingabe.as_bytes(), &mut ausgabe)
            .await
            .unwrap();
        String::from_utf8(ausgabe).unwrap()
    }

    #[test]
    fn befehle_parsen() {
        assert_eq!(
            "betreten 1 20".parse::<Befehl>().unwrap(),
            Befehl::Betreten(UserId(1), ChannelId(20))
        );
        assert_eq!("JOIN 7".parse::<Befehl>().unwrap(), Befehl::Join(UserId(7)));
        assert_eq!("leave 7".parse::<Befehl>().unwrap(), Befehl::Leave(UserId(7)));
        assert_eq!("  status  ".parse::<Befehl>().unwrap(), Befehl::Status);
        assert_eq!("quit".parse::<Befehl>().unwrap(), Befehl::Ende);
    }

    #[test]
    fn fehlerhafte_befehle() {
        assert!("join".parse::<Befehl>().unwrap_err().contains("fehlt"));
        assert!("join abc".parse::<Befehl>().unwrap_err().contains("ungueltige"));
        assert!("status 1".parse::<Befehl>().unwrap_err().contains("zu viele"));
        assert!("tanzen".parse::<Befehl>().unwrap_err().contains("Unbekannter"));
    }

    #[tokio::test]
    async fn join_ohne_voice_kanal() {
        let dienst = dienst();
        let ausgabe = sitzung(&dienst, "join 1\nende\n").await;
        assert_eq!(
            ausgabe.trim(),
            "Voice-Kanal nicht gefunden. Bist du in einem Voice-Kanal?"
        );
        assert_eq!(dienst.registry().anzahl_eintraege(), 0);
    }

    #[tokio::test]
    async fn leave_ohne_session() {
        let dienst = dienst();
        let ausgabe = sitzung(&dienst, "betreten 1 5\nleave 1\n").await;
        let zeilen: Vec<_> = ausgabe.lines().collect();
        assert_eq!(zeilen[0], "user:1 ist jetzt in channel:5");
        assert_eq!(zeilen[1], "In diesem Voice-Kanal laeuft gerade nichts.");
    }

    #[tokio::test]
    async fn ende_stoppt_die_verarbeitung() {
        let dienst = dienst();
        let ausgabe = sitzung(&dienst, "# kommentar\n\nende\nbetreten 1 2\n").await;
        assert!(ausgabe.is_empty());
        assert!(dienst.plattform().belegung().is_empty());
    }

    #[tokio::test]
    async fn status_zeigt_belegung() {
        let dienst = dienst();
        let ausgabe = sitzung(&dienst, "betreten 2 9\nstatus\nverlassen 2\nverlassen 2\n").await;
        assert!(ausgabe.contains("user:2 -> channel:9"));
        assert!(ausgabe.contains("Aktive Sessions: 0"));
        assert!(ausgabe.contains("user:2 hat channel:9 verlassen"));
        assert!(ausgabe.contains("user:2 ist in keinem Voice-Kanal"));
    }
}
