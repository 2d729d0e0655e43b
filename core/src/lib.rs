//! Audio modem library for short-payload data-over-sound links
//!
//! Uses Multi-Frequency Shift Keying (MFSK) tone groups bracketed by
//! start/end markers, with Reed-Solomon FEC over GF(2^8) for error
//! correction on the acoustic channel.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod gf;
pub mod modem;
pub mod params;
pub mod payload;
pub mod poly;
pub mod rs;
pub mod spectrum;
pub mod tones;

pub use decoder::{Decoder, RxState};
pub use encoder::synthesize_transmission;
pub use error::{ModemError, Result};
pub use modem::Modem;
pub use params::{ecc_len_for, ModemParams, TxMode, TxProtocol};
pub use rs::ReedSolomon;
pub use spectrum::SpectrumAnalyzer;
pub use tones::ToneBank;

// Protocol constants
/// Longest payload a single transmission can carry
pub const MAX_PAYLOAD_LEN: usize = 140;
/// Data block size in fixed-length mode (payload is zero-padded to this)
pub const FIXED_PAYLOAD_LEN: usize = 82;
/// Capacity of the encoded-data scratch buffer (RS limit: codewords < 256)
pub const MAX_DATA_SIZE: usize = 256;

// Marker framing
/// Channels participating in the start/end marker pattern
pub const MARKER_BITS: usize = 16;
/// Audio frames the start/end marker is held for
pub const MARKER_FRAMES: usize = 16;
/// Inverted-marker frames emitted right after the start marker
pub const POST_MARKER_FRAMES: usize = 0;

// Receiver tuning
/// Frames averaged together for the idle-detection spectrum
pub const SPECTRUM_HISTORY: usize = 4;
/// Sub-frame alignment steps searched during analysis
pub const STEPS_PER_FRAME: usize = 16;
/// Total spectral power below this counts as silence
pub const SILENCE_POWER_FLOOR: f64 = 1e-10;
/// Mark/space power ratio required by the marker detector
pub const MARKER_SNR: f32 = 3.0;
/// Capture queue length (in frames) that triggers an overrun reset
pub const CAPTURE_QUEUE_LIMIT_FRAMES: usize = 32;

/// Peak sample value used when converting synthesized audio to 16-bit PCM
pub const PCM_FULL_SCALE: f32 = 32000.0;
