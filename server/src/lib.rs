//! funkrelais-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;
pub mod konsole;
pub mod lokal;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use config::RelayConfig;
use funkrelais_observability::{observability_server_starten, HealthState, RelayMetriken};
use funkrelais_voice::RelayDienst;
use lokal::LokalePlattform;
use tokio::io::BufReader;

/// Zusaetzliche Wartezeit beim Herunterfahren ueber das Schliess-Zeitlimit hinaus
const SHUTDOWN_PUFFER: Duration = Duration::from_secs(5);

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: RelayConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis Konsolenende oder Ctrl-C
    ///
    /// Reihenfolge:
    /// 1. Metriken und Health-State anlegen, Observability-Server starten
    /// 2. HTTP-Client und Relay-Dienst erstellen
    /// 3. Konsole auf stdin/stdout bedienen
    /// 4. Alle Sessions abbauen
    pub async fn starten(self) -> Result<()> {
        let metriken = RelayMetriken::neu().context("Metriken konnten nicht registriert werden")?;
        let health = HealthState::neu(metriken.clone());

        if self.config.observability.aktiviert {
            let adresse: SocketAddr = self
                .config
                .observability_bind_adresse()
                .parse()
                .context("Ungueltige Observability-Adresse")?;
            let metriken = metriken.clone();
            let health = health.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(adresse, metriken, health).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.config.quelle.verbindungs_timeout_sek))
            .user_agent(concat!("funkrelais/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("HTTP-Client konnte nicht erstellt werden")?;

        let session_konfig = self.config.session_konfig()?;
        let schliess_timeout = session_konfig.schliess_timeout;
        let dienst = RelayDienst::neu(LokalePlattform::neu(), session_konfig, http, Some(metriken));

        tracing::info!(
            quelle = %self.config.quelle.url,
            encoder = %self.config.encoder.programm,
            "Funkrelais laeuft. Befehle auf stdin (hilfe), Ctrl-C beendet"
        );

        let eingabe = BufReader::new(tokio::io::stdin());
        let ausgabe = tokio::io::stdout();
        tokio::select! {
            ergebnis = konsole::ausfuehren(&dienst, eingabe, ausgabe) => {
                ergebnis.context("Konsole fehlgeschlagen")?;
                tracing::info!("Konsole beendet");
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutdown-Signal empfangen");
            }
        }

        health.herunterfahren_markieren();
        let beendet = dienst.alle_beenden(schliess_timeout + SHUTDOWN_PUFFER).await;
        tracing::info!(sessions = beendet, "Funkrelais beendet");

        Ok(())
    }
}
