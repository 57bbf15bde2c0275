//! Funkrelais Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use std::time::Duration;

use anyhow::Result;
use funkrelais_observability::logging_initialisieren;
use funkrelais_server::config::{ConfigHerkunft, RelayConfig};
use funkrelais_server::Server;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let ergebnis = runtime.block_on(ausfuehren());
    // Ein haengendes stdin-Lesen darf das Beenden nicht blockieren
    runtime.shutdown_timeout(Duration::from_secs(1));
    ergebnis
}

async fn ausfuehren() -> Result<()> {
    // .env ist optional
    dotenv::dotenv().ok();

    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad =
        std::env::var("FUNKRELAIS_CONFIG").unwrap_or_else(|_| "funkrelais.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt), dann Umgebung
    let (mut config, herkunft) = RelayConfig::laden(&config_pfad)?;
    config.umgebung_anwenden();

    logging_initialisieren(&config.logging.level, &config.logging.format)?;

    if herkunft == ConfigHerkunft::Standardwerte {
        tracing::warn!(
            pfad = %config_pfad,
            "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
        );
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Funkrelais wird initialisiert"
    );

    config.validieren()?;

    let server = Server::neu(config);
    server.starten().await?;

    Ok(())
}
