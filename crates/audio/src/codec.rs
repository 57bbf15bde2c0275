//! Opus-Konfiguration und Encoder
//!
//! Der Transcoder-Prozess liefert rohes s16le-PCM, hier wird daraus Opus.
//! Die Konfiguration legt Abtastrate, Kanaele und Frame-Dauer fest und damit
//! auch, wie viele PCM-Bytes die Pipeline pro Frame vom Prozess liest.

use audiopus::{coder::Encoder, Application, Channels, SampleRate as OpusRate};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Maximale Groesse eines kodierten Opus-Frames
const MAX_FRAME_BYTES: usize = 4000;

// ---------------------------------------------------------------------------
// Opus-Konfiguration
// ---------------------------------------------------------------------------

/// Abtastrate fuer Opus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    /// 16 kHz – Breitband
    Hz16000 = 16000,
    /// 24 kHz – Superbreitband
    Hz24000 = 24000,
    /// 48 kHz – Vollband (Standard der Voice-Transporte)
    #[default]
    Hz48000 = 48000,
}

/// Anzahl der Audio-Kanaele
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCount {
    /// Mono (1 Kanal)
    Mono = 1,
    /// Stereo (2 Kanaele) – Standard fuer Radio-Streams
    #[default]
    Stereo = 2,
}

/// Opus-Anwendungsmodus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    /// Optimiert fuer Sprachverstaendlichkeit
    Voip,
    /// Optimiert fuer Musik
    #[default]
    Audio,
    /// Minimale Verarbeitungsverzoegerung
    RestrictedLowdelay,
}

/// Frame-Dauer in Millisekunden
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSizeMs {
    Ms10 = 10,
    /// 20 ms – Standard der Voice-Transporte
    #[default]
    Ms20 = 20,
    Ms40 = 40,
    Ms60 = 60,
}

impl FrameSizeMs {
    /// Frame-Dauer als `Duration`
    pub fn dauer(&self) -> std::time::Duration {
        std::time::Duration::from_millis(*self as u64)
    }

    /// Anzahl der Samples pro Kanal und Frame bei gegebener Abtastrate
    pub fn samples_per_frame(&self, sample_rate: SampleRate) -> u32 {
        sample_rate as u32 * (*self as u32) / 1000
    }
}

/// Vollstaendige Opus-Encoder-Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    /// Ziel-Bitrate in kbps (6–510)
    pub bitrate_kbps: u16,
    /// Abtastrate
    pub sample_rate: SampleRate,
    /// Anzahl der Kanaele
    pub channels: ChannelCount,
    /// Frame-Dauer
    pub frame_size: FrameSizeMs,
    /// Anwendungsmodus
    pub application: OpusApplication,
    /// Komplexitaet (0–10)
    pub complexity: u8,
    /// Variable Bitrate aktivieren
    pub vbr_enabled: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 64,
            sample_rate: SampleRate::Hz48000,
            channels: ChannelCount::Stereo,
            frame_size: FrameSizeMs::Ms20,
            application: OpusApplication::Audio,
            complexity: 10,
            vbr_enabled: true,
        }
    }
}

impl OpusConfig {
    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if self.bitrate_kbps < 6 || self.bitrate_kbps > 510 {
            return Err(format!(
                "Bitrate muss zwischen 6 und 510 kbps liegen (war: {})",
                self.bitrate_kbps
            ));
        }
        if self.complexity > 10 {
            return Err(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.complexity
            ));
        }
        Ok(())
    }

    /// Anzahl interleavter i16-Samples pro Frame (alle Kanaele)
    pub fn samples_pro_frame(&self) -> usize {
        self.frame_size.samples_per_frame(self.sample_rate) as usize * self.channels as usize
    }

    /// Anzahl PCM-Bytes (s16le) pro Frame
    pub fn pcm_bytes_pro_frame(&self) -> usize {
        self.samples_pro_frame() * 2
    }
}

// ---------------------------------------------------------------------------
// OpusEncoder
// ---------------------------------------------------------------------------

/// Opus-Encoder: kodiert interleavtes i16-PCM zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    samples_pro_frame: usize,
}

impl OpusEncoder {
    /// Erstellt einen neuen Encoder mit der gegebenen Konfiguration
    pub fn new(config: OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;

        let mut encoder = Encoder::new(
            rate_to_audiopus(config.sample_rate),
            channels_to_audiopus(config.channels),
            app_to_audiopus(config.application),
        )
        .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(
                (config.bitrate_kbps as i32) * 1000,
            ))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_complexity(config.complexity)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_vbr(config.vbr_enabled)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let samples_pro_frame = config.samples_pro_frame();

        debug!(
            "OpusEncoder erstellt: {}kbps, {:?}, {:?}, samples_pro_frame={}",
            config.bitrate_kbps, config.sample_rate, config.channels, samples_pro_frame
        );

        Ok(Self {
            encoder,
            config,
            samples_pro_frame,
        })
    }

    /// Kodiert einen interleavten PCM-Frame zu Opus-Bytes
    ///
    /// Die Eingabe muss exakt `samples_pro_frame()` Samples lang sein.
    pub fn encode(&mut self, pcm: &[i16]) -> AudioResult<Bytes> {
        if pcm.len() != self.samples_pro_frame {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                self.samples_pro_frame,
                pcm.len()
            )));
        }

        let mut output = vec![0u8; MAX_FRAME_BYTES];
        let written = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        output.truncate(written);
        Ok(Bytes::from(output))
    }

    /// Kodiert rohe s16le-Bytes (genau ein Frame)
    pub fn encode_s16le(&mut self, rohdaten: &[u8]) -> AudioResult<Bytes> {
        let pcm: Vec<i16> = rohdaten
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        self.encode(&pcm)
    }

    /// Gibt die erwartete Frame-Groesse in interleavten Samples zurueck
    pub fn samples_pro_frame(&self) -> usize {
        self.samples_pro_frame
    }

    /// Gibt die aktuelle Konfiguration zurueck
    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn rate_to_audiopus(rate: SampleRate) -> OpusRate {
    match rate {
        SampleRate::Hz16000 => OpusRate::Hz16000,
        SampleRate::Hz24000 => OpusRate::Hz24000,
        SampleRate::Hz48000 => OpusRate::Hz48000,
    }
}

fn channels_to_audiopus(ch: ChannelCount) -> Channels {
    match ch {
        ChannelCount::Mono => Channels::Mono,
        ChannelCount::Stereo => Channels::Stereo,
    }
}

fn app_to_audiopus(app: OpusApplication) -> Application {
    match app {
        OpusApplication::Voip => Application::Voip,
        OpusApplication::Audio => Application::Audio,
        OpusApplication::RestrictedLowdelay => Application::LowDelay,
    }
}
