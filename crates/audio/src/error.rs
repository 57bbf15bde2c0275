//! Fehlertypen fuer den Audio-Pfad

use funkrelais_core::RelayError;
use thiserror::Error;

/// Alle moeglichen Fehler von Quelle, Transcoder und Encoder
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Encoder-Start fehlgeschlagen: {0}")]
    EncoderInit(String),

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for RelayError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::EncoderInit(grund) => RelayError::EncoderInit(grund),
            AudioError::Konfiguration(grund) => RelayError::Konfiguration(grund),
            AudioError::CodecFehler(grund) | AudioError::StreamFehler(grund) => {
                RelayError::StreamBeendet(grund)
            }
            AudioError::Io(e) => RelayError::StreamBeendet(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_init_bleibt_encoder_init() {
        let e: RelayError = AudioError::EncoderInit("ffmpeg fehlt".into()).into();
        assert_eq!(e, RelayError::EncoderInit("ffmpeg fehlt".into()));
    }

    #[test]
    fn stream_fehler_wird_stream_beendet() {
        let e: RelayError = AudioError::StreamFehler("HTTP-Status 404".into()).into();
        assert!(matches!(e, RelayError::StreamBeendet(_)));
        assert!(e.ist_regulaer());
    }
}
