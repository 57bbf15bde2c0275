//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (ueberschreibt die Konfigurationsdatei):
//! - `FR_LOG_LEVEL`: Log-Level oder Filter-Direktive, Standard: info
//! - `FR_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Session- und Kanal-IDs werden als strukturierte Felder geloggt.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Level
pub const ENV_LOG_LEVEL: &str = "FR_LOG_LEVEL";
/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "FR_LOG_FORMAT";

/// Gedaempfte Abhaengigkeiten (HTTP-Client und -Server sind sehr gespraechig)
const LEISE_CRATES: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Baut die Filter-Direktive aus Level und den gedaempften Crates
pub fn filter_direktive(level: &str) -> String {
    let mut direktive = level.to_string();
    for eintrag in LEISE_CRATES {
        direktive.push(',');
        direktive.push_str(eintrag);
    }
    direktive
}

/// Initialisiert das Logging-System.
///
/// `FR_LOG_LEVEL` und `FR_LOG_FORMAT` haben Vorrang vor den Parametern.
/// Schlaegt fehl, wenn bereits ein globaler Subscriber installiert ist.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<()> {
    let level = std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(filter_direktive(&level))
        .unwrap_or_else(|_| EnvFilter::new(filter_direktive("info")));

    let format = std::env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| format.to_string());

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    ergebnis.map_err(|e| anyhow!("Logging konnte nicht initialisiert werden: {e}"))
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_gueltige_und_ungueltige_werte() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level));
        }
        assert!(!log_level_gueltig("verbose"));
        assert!(!log_level_gueltig("INFO")); // Gross-/Kleinschreibung
        assert!(!log_level_gueltig(""));
    }

    #[test]
    fn log_format_werte() {
        assert!(log_format_gueltig("text"));
        assert!(log_format_gueltig("json"));
        assert!(!log_format_gueltig("xml"));
        assert!(!log_format_gueltig("JSON"));
    }

    #[test]
    fn direktive_daempft_http_crates() {
        let direktive = filter_direktive("debug");
        assert!(direktive.starts_with("debug,"));
        assert!(direktive.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&direktive).is_ok());
    }
}
