//! Modem parameters, protocol presets and the values derived from them.
//!
//! Parameters are staged by the control surface and committed as a whole
//! at the next (re)initialization, so a transmission in flight is never
//! reconfigured under its feet.

use crate::error::{ModemError, Result};
use crate::MARKER_BITS;

/// Parity bytes protecting a variable-length payload of `len` bytes
pub fn ecc_len_for(len: usize) -> usize {
    (2 * (len / 5)).max(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Every transmission carries an 82-byte data block plus fixed parity
    FixedLength,
    /// Length-prefixed payload with length-scaled parity and an end marker
    VariableLength,
}

/// Named protocol presets selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxProtocol {
    Normal,
    Fast,
    Fastest,
    Ultrasonic,
}

impl TxProtocol {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(TxProtocol::Normal),
            1 => Some(TxProtocol::Fast),
            2 => Some(TxProtocol::Fastest),
            3 => Some(TxProtocol::Ultrasonic),
            _ => None,
        }
    }

    pub fn params(self) -> ModemParams {
        let (freq_delta_bins, freq_start_bin, frames_per_tx) = match self {
            TxProtocol::Normal => (1, 40, 9),
            TxProtocol::Fast => (1, 40, 6),
            TxProtocol::Fastest => (1, 40, 3),
            TxProtocol::Ultrasonic => (1, 320, 9),
        };
        ModemParams {
            sample_rate_in: 48_000.0,
            sample_rate_out: 48_000.0,
            samples_per_frame: 1024,
            freq_start_bin,
            freq_delta_bins,
            frames_per_tx,
            bytes_per_tx: 3,
            ecc_bytes_per_tx: 32,
            volume: 50,
            phase_shuffle_seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModemParams {
    /// Capture sample rate in Hz; also the FFT analysis rate
    pub sample_rate_in: f64,
    /// Playback sample rate in Hz; may differ from the capture rate
    pub sample_rate_out: f64,
    /// FFT window and emission-frame size in samples
    pub samples_per_frame: usize,
    /// Lowest tone bin index
    pub freq_start_bin: usize,
    /// Spacing between adjacent bit channels, in bins
    pub freq_delta_bins: usize,
    /// Audio frames each tone group is held for
    pub frames_per_tx: usize,
    /// Payload bytes emitted per tone group
    pub bytes_per_tx: usize,
    /// Reed-Solomon parity length in fixed-length mode
    pub ecc_bytes_per_tx: usize,
    /// Per-tone amplitude scale, 0..=100
    pub volume: u8,
    /// Seed for the optional phase-offset permutation; `None` keeps the
    /// deterministic ramp, which is what reproducible tests want
    pub phase_shuffle_seed: Option<u64>,
}

impl Default for ModemParams {
    fn default() -> Self {
        TxProtocol::Fast.params()
    }
}

impl ModemParams {
    /// Width of one FFT bin in Hz
    pub fn hz_per_frame(&self) -> f64 {
        self.sample_rate_in / self.samples_per_frame as f64
    }

    /// Output-side frame length, scaled for the playback rate
    pub fn samples_per_frame_out(&self) -> usize {
        ((self.sample_rate_out / self.sample_rate_in) * self.samples_per_frame as f64) as usize
    }

    pub fn data_bits_per_tx(&self) -> usize {
        self.bytes_per_tx * 8
    }

    /// Single-bin mode: each nibble drives one of 16 consecutive bins
    pub fn one_hot(&self) -> bool {
        self.freq_delta_bins == 1
    }

    /// Bin offset separating a channel's space tone from its mark tone
    pub fn d0(&self) -> usize {
        if self.one_hot() {
            1
        } else {
            (self.freq_delta_bins / 2).max(1)
        }
    }

    /// Bin spacing between adjacent tone channels; doubled in one-hot
    /// mode so mark and space stay disjoint
    pub fn tone_spacing_bins(&self) -> usize {
        if self.one_hot() {
            2
        } else {
            self.freq_delta_bins
        }
    }

    /// Base bin of tone channel `k`
    pub fn channel_bin(&self, k: usize) -> usize {
        self.freq_start_bin + k * self.tone_spacing_bins()
    }

    /// Base frequency of tone channel `k` in Hz
    pub fn channel_freq_hz(&self, k: usize) -> f64 {
        self.channel_bin(k) as f64 * self.hz_per_frame()
    }

    /// Tone channels that must be synthesized: enough for both the data
    /// bits of the current mode and the 16 marker channels
    pub fn tone_channels(&self) -> usize {
        let data_channels = if self.one_hot() {
            16 * self.bytes_per_tx
        } else {
            8 * self.bytes_per_tx
        };
        data_channels.max(MARKER_BITS)
    }

    pub fn validate(&self) -> Result<()> {
        if self.samples_per_frame == 0 || !self.samples_per_frame.is_power_of_two() {
            return Err(ModemError::InvalidConfig(
                "samples_per_frame must be a nonzero power of two".to_string(),
            ));
        }
        if self.sample_rate_in <= 0.0 || self.sample_rate_out <= 0.0 {
            return Err(ModemError::InvalidConfig(
                "sample rates must be positive".to_string(),
            ));
        }
        if self.bytes_per_tx == 0 || self.data_bits_per_tx() > crate::MAX_DATA_SIZE {
            return Err(ModemError::InvalidConfig(
                "bytes_per_tx out of range".to_string(),
            ));
        }
        if self.frames_per_tx == 0 || self.freq_delta_bins == 0 {
            return Err(ModemError::InvalidConfig(
                "frames_per_tx and freq_delta_bins must be nonzero".to_string(),
            ));
        }
        if self.volume > 100 {
            return Err(ModemError::InvalidConfig(
                "volume must be within 0..=100".to_string(),
            ));
        }
        // The highest space tone has to stay below Nyquist
        let top_bin = self.channel_bin(self.tone_channels() - 1) + self.d0();
        if top_bin >= self.samples_per_frame / 2 {
            return Err(ModemError::InvalidConfig(format!(
                "tone plan reaches bin {} beyond Nyquist ({})",
                top_bin,
                self.samples_per_frame / 2
            )));
        }
        Ok(())
    }
}
