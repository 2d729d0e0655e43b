//! Modem controller: owns the committed parameters, the tone bank, the
//! codec instances and the receiver, and exposes the control surface.
//!
//! Parameter changes are staged and applied through a full
//! re-initialization between transmissions (`need_update`), never while
//! audio is in flight. Hosts running the controller from multiple
//! threads wrap it in a single mutex; the only shared state with the
//! audio subsystem is the pair of sample queues at the boundary.

use std::collections::VecDeque;
use std::time::Instant;

use log::{info, warn};

use crate::decoder::{Decoder, RxState};
use crate::encoder::synthesize_transmission;
use crate::error::Result;
use crate::params::{ecc_len_for, ModemParams, TxMode};
use crate::payload;
use crate::tones::ToneBank;
use crate::{CAPTURE_QUEUE_LIMIT_FRAMES, FIXED_PAYLOAD_LEN, MAX_PAYLOAD_LEN};

const RX_TIME_WINDOW: u32 = 10;

pub struct Modem {
    committed: ModemParams,
    staged: ModemParams,
    need_update: bool,
    tx_mode: TxMode,

    tones: ToneBank,
    decoder: Decoder,

    encoded: Vec<u8>,
    send_len: usize,
    ecc_len: usize,
    has_data: bool,

    rx_data: Vec<u8>,
    average_rx_time_ms: f32,
    rx_time_accum_ms: f32,
    rx_calls: u32,
    truncation_warned: bool,
}

impl Modem {
    pub fn new(params: ModemParams) -> Result<Self> {
        params.validate()?;
        let mut modem = Self {
            staged: params.clone(),
            tones: ToneBank::new(&params),
            decoder: Decoder::new(params.clone(), TxMode::FixedLength)?,
            need_update: false,
            tx_mode: TxMode::FixedLength,
            encoded: Vec::new(),
            send_len: 0,
            ecc_len: 0,
            has_data: false,
            rx_data: Vec::new(),
            average_rx_time_ms: 0.0,
            rx_time_accum_ms: 0.0,
            rx_calls: 0,
            truncation_warned: false,
            committed: params,
        };
        modem.reinit(&[])?;
        Ok(modem)
    }

    /// Stage new transmission parameters; they take effect at the next
    /// initialization. The parity-length slot is accepted but ignored,
    /// as fixed-mode parity is not runtime-tunable.
    pub fn set_parameters(
        &mut self,
        freq_delta_bins: usize,
        freq_start_bin: usize,
        frames_per_tx: usize,
        bytes_per_tx: usize,
        _ecc_reserved: usize,
        volume: u8,
    ) {
        self.staged.freq_delta_bins = freq_delta_bins;
        self.staged.freq_start_bin = freq_start_bin;
        self.staged.frames_per_tx = frames_per_tx;
        self.staged.bytes_per_tx = bytes_per_tx;
        self.staged.volume = volume;
        self.need_update = true;
    }

    pub fn set_tx_mode(&mut self, tx_mode: TxMode) {
        self.tx_mode = tx_mode;
        self.need_update = true;
    }

    /// Submit a payload for transmission. An empty payload re-initializes
    /// the modem for receive-only operation. Payloads over the protocol
    /// limit are truncated.
    pub fn set_text(&mut self, text: &[u8]) -> Result<()> {
        let payload = if text.len() > MAX_PAYLOAD_LEN {
            if !self.truncation_warned {
                warn!("truncating payload from {} to {} bytes", text.len(), MAX_PAYLOAD_LEN);
                self.truncation_warned = true;
            }
            &text[..MAX_PAYLOAD_LEN]
        } else {
            text
        };
        self.need_update = false;
        self.reinit(payload)
    }

    /// Commit staged parameters and rebuild every derived structure.
    fn reinit(&mut self, payload: &[u8]) -> Result<()> {
        self.staged.validate()?;
        self.committed = self.staged.clone();
        self.tones = ToneBank::new(&self.committed);
        self.decoder = Decoder::new(self.committed.clone(), self.tx_mode)?;
        self.has_data = false;

        if !payload.is_empty() {
            let encoded = match self.tx_mode {
                TxMode::FixedLength => {
                    self.send_len = FIXED_PAYLOAD_LEN;
                    self.ecc_len = self.committed.ecc_bytes_per_tx;
                    payload::build_fixed(payload, self.ecc_len)?
                }
                TxMode::VariableLength => {
                    self.send_len = payload.len() + 3;
                    self.ecc_len = ecc_len_for(payload.len());
                    payload::build_variable(payload)?
                }
            };
            self.encoded = encoded;
            self.has_data = true;
        }
        Ok(())
    }

    /// A payload is waiting to be synthesized
    pub fn has_pending_tx(&self) -> bool {
        self.has_data
    }

    /// Synthesize the pending transmission in one burst. The host pushes
    /// the returned PCM to the playback sink atomically.
    pub fn take_tx_samples(&mut self) -> Vec<i16> {
        if !self.has_data {
            return Vec::new();
        }
        if self.committed.sample_rate_out != self.committed.sample_rate_in {
            info!(
                "resampling from {} Hz to {} Hz",
                self.committed.sample_rate_in, self.committed.sample_rate_out
            );
        }
        let pcm = synthesize_transmission(
            &self.committed,
            &self.tones,
            self.tx_mode,
            &self.encoded,
            self.send_len,
            self.ecc_len,
        );
        self.has_data = false;
        pcm
    }

    /// Drain every whole frame from the capture queue through the
    /// receiver. Returns a newly decoded payload, if any. A queue that
    /// has grown past the overrun limit afterwards is cleared.
    pub fn receive(&mut self, capture: &mut VecDeque<f32>) -> Option<Vec<u8>> {
        let started = Instant::now();

        if self.need_update {
            self.need_update = false;
            if let Err(e) = self.reinit(&[]) {
                warn!("staged parameters rejected: {}", e);
            }
        }

        let spf = self.committed.samples_per_frame;
        let mut frame = vec![0.0f32; spf];
        let mut decoded = None;
        while !self.has_data && capture.len() >= spf {
            for (dst, src) in frame.iter_mut().zip(capture.drain(..spf)) {
                *dst = src;
            }
            match self.decoder.push_frame(&frame) {
                Ok(Some(payload)) => {
                    self.rx_data = payload.clone();
                    decoded = Some(payload);
                }
                Ok(None) => {}
                Err(e) => warn!("failed to capture sound data ({}), please try again", e),
            }
        }

        self.rx_time_accum_ms += started.elapsed().as_secs_f32() * 1000.0;
        self.rx_calls += 1;
        if self.rx_calls >= RX_TIME_WINDOW {
            self.average_rx_time_ms = self.rx_time_accum_ms / self.rx_calls as f32;
            self.rx_time_accum_ms = 0.0;
            self.rx_calls = 0;
        }

        if capture.len() > CAPTURE_QUEUE_LIMIT_FRAMES * spf {
            warn!("capture queue overrun ({} samples), clearing", capture.len());
            capture.clear();
        }

        decoded
    }

    /// Last successfully decoded payload
    pub fn rx_data(&self) -> &[u8] {
        &self.rx_data
    }

    pub fn params(&self) -> &ModemParams {
        &self.committed
    }

    pub fn tx_mode(&self) -> TxMode {
        self.tx_mode
    }

    pub fn sample_rate_in(&self) -> f64 {
        self.committed.sample_rate_in
    }

    pub fn sample_rate_out(&self) -> f64 {
        self.committed.sample_rate_out
    }

    pub fn average_rx_time_ms(&self) -> f32 {
        self.average_rx_time_ms
    }

    pub fn rx_state(&self) -> RxState {
        self.decoder.state()
    }

    pub fn frames_to_record(&self) -> i32 {
        self.decoder.frames_to_record()
    }

    pub fn frames_left_to_record(&self) -> i32 {
        self.decoder.frames_left_to_record()
    }

    pub fn frames_to_analyze(&self) -> i32 {
        self.decoder.frames_to_analyze()
    }

    pub fn frames_left_to_analyze(&self) -> i32 {
        self.decoder.frames_left_to_analyze()
    }

    /// The capture stream has carried non-silent audio recently
    pub fn capture_active(&self) -> bool {
        self.decoder.samples_captured() > 0
    }
}
