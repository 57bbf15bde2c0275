//! funkrelais-audio – Audio-Pfad des Relays
//!
//! Vom HTTP-Stream zum Opus-Frame:
//! - HTTP-Quelle als sequentieller Byte-Leser (reqwest)
//! - Transcoder-Prozess (ffmpeg) dekodiert zu s16le-PCM
//! - Opus-Encoding in festen 20-ms-Frames (audiopus)
//! - Pull-basierter FrameProvider fuer den Voice-Transport

pub mod codec;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod quelle;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::{ChannelCount, FrameSizeMs, OpusApplication, OpusConfig, OpusEncoder, SampleRate};
pub use error::{AudioError, AudioResult};
pub use frame::{FrameProvider, OpusFrame};
pub use pipeline::{EncoderKonfig, EncoderPipeline, PipelineEnde, PipelineFrames, PipelineStatus};
pub use quelle::{ByteQuelle, HttpQuelle};
