//! Relay-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Relay ohne Konfigurationsdatei
//! lauffaehig ist. Die Stream-URL kommt typischerweise aus der Umgebung
//! (`RADIO_STREAM_URL`, auch ueber eine `.env`-Datei).

use std::time::Duration;

use funkrelais_audio::{ChannelCount, EncoderKonfig, OpusConfig};
use funkrelais_core::{RelayError, Result};
use funkrelais_observability::logging::{log_format_gueltig, log_level_gueltig};
use funkrelais_voice::SessionKonfig;
use serde::{Deserialize, Serialize};

/// Umgebungsvariable fuer die Stream-URL
pub const ENV_STREAM_URL: &str = "RADIO_STREAM_URL";

/// Woher die geladene Konfiguration stammt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigHerkunft {
    Datei,
    /// Datei fehlt, es gelten die Standardwerte
    Standardwerte,
}

/// Vollstaendige Relay-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Audio-Quelle
    pub quelle: QuelleEinstellungen,
    /// Transcoder und Opus-Encoder
    pub encoder: EncoderEinstellungen,
    /// Fristen der Voice-Sessions
    pub sitzung: SitzungEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Audio-Quelle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuelleEinstellungen {
    /// URL des kontinuierlichen HTTP-Audio-Streams
    pub url: String,
    /// Zeitlimit fuer den TCP-Verbindungsaufbau zur Quelle
    pub verbindungs_timeout_sek: u64,
}

impl Default for QuelleEinstellungen {
    fn default() -> Self {
        Self {
            url: String::new(),
            verbindungs_timeout_sek: 10,
        }
    }
}

/// Transcoder und Opus-Encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderEinstellungen {
    /// Transcoder-Programm (liest den Stream auf stdin, schreibt s16le auf stdout)
    pub programm: String,
    /// Eigene Argumente (leer lassen fuer die ffmpeg-Standardargumente)
    pub argumente: Option<Vec<String>>,
    /// Opus-Bitrate in kbit/s
    pub bitrate_kbps: u16,
    /// 1 = Mono, 2 = Stereo
    pub kanaele: u8,
    /// Gepufferte Frames zwischen Encoder und Transport
    pub frame_puffer: usize,
}

impl Default for EncoderEinstellungen {
    fn default() -> Self {
        Self {
            programm: "ffmpeg".into(),
            argumente: None,
            bitrate_kbps: 64,
            kanaele: 2,
            frame_puffer: 50,
        }
    }
}

/// Fristen der Voice-Sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SitzungEinstellungen {
    pub verbindungs_timeout_sek: u64,
    pub schliess_timeout_sek: u64,
}

impl Default for SitzungEinstellungen {
    fn default() -> Self {
        Self {
            verbindungs_timeout_sek: 10,
            schliess_timeout_sek: 10,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    pub bind_adresse: String,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: "127.0.0.1".into(),
            port: 9300,
        }
    }
}

impl RelayConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    ///
    /// Laeuft vor der Logging-Initialisierung, daher meldet die Herkunft
    /// statt eines Log-Eintrags, ob Standardwerte verwendet werden.
    pub fn laden(pfad: &str) -> anyhow::Result<(Self, ConfigHerkunft)> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok((config, ConfigHerkunft::Datei))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok((Self::default(), ConfigHerkunft::Standardwerte))
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Uebernimmt Werte aus der Prozessumgebung
    pub fn umgebung_anwenden(&mut self) {
        self.ueberschreiben_aus(|name| std::env::var(name).ok());
    }

    /// Uebernimmt Werte aus einer beliebigen Variablen-Quelle
    pub fn ueberschreiben_aus(&mut self, variable: impl Fn(&str) -> Option<String>) {
        if let Some(url) = variable(ENV_STREAM_URL).filter(|u| !u.trim().is_empty()) {
            self.quelle.url = url.trim().to_string();
        }
    }

    /// Prueft die Konfiguration vor dem Start
    pub fn validieren(&self) -> Result<()> {
        let url = self.quelle.url.as_str();
        if url.is_empty() {
            return Err(RelayError::Konfiguration(format!(
                "Keine Stream-URL konfiguriert ([quelle] url oder {ENV_STREAM_URL})"
            )));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RelayError::Konfiguration(format!(
                "Stream-URL muss mit http:// oder https:// beginnen: {url}"
            )));
        }
        if self.quelle.verbindungs_timeout_sek == 0
            || self.sitzung.verbindungs_timeout_sek == 0
            || self.sitzung.schliess_timeout_sek == 0
        {
            return Err(RelayError::Konfiguration(
                "Zeitlimits muessen groesser als 0 sein".into(),
            ));
        }
        if !log_level_gueltig(&self.logging.level) {
            return Err(RelayError::Konfiguration(format!(
                "Ungueltiges Log-Level: {}",
                self.logging.level
            )));
        }
        if !log_format_gueltig(&self.logging.format) {
            return Err(RelayError::Konfiguration(format!(
                "Ungueltiges Log-Format: {}",
                self.logging.format
            )));
        }
        self.encoder_konfig()?
            .validieren()
            .map_err(RelayError::Konfiguration)
    }

    /// Encoder-Konfiguration fuer die Pipeline
    pub fn encoder_konfig(&self) -> Result<EncoderKonfig> {
        let channels = match self.encoder.kanaele {
            1 => ChannelCount::Mono,
            2 => ChannelCount::Stereo,
            n => {
                return Err(RelayError::Konfiguration(format!(
                    "kanaele muss 1 oder 2 sein (war: {n})"
                )))
            }
        };

        Ok(EncoderKonfig {
            programm: self.encoder.programm.clone(),
            argumente: self.encoder.argumente.clone(),
            frame_puffer: self.encoder.frame_puffer,
            opus: OpusConfig {
                bitrate_kbps: self.encoder.bitrate_kbps,
                channels,
                ..Default::default()
            },
        })
    }

    /// Session-Konfiguration fuer den Relay-Dienst
    pub fn session_konfig(&self) -> Result<SessionKonfig> {
        Ok(SessionKonfig {
            quelle_url: self.quelle.url.clone(),
            verbindungs_timeout: Duration::from_secs(self.sitzung.verbindungs_timeout_sek),
            schliess_timeout: Duration::from_secs(self.sitzung.schliess_timeout_sek),
            encoder: self.encoder_konfig()?,
        })
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.observability.bind_adresse, self.observability.port
        )
    }
}
