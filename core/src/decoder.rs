//! Receive pipeline: a streaming state machine over capture frames.
//!
//! The receiver idles on a sliding 4-frame averaged spectrum, watching
//! for the start-marker tone pattern. A match switches it to recording a
//! worst-case-length window of raw frames; in variable-length mode the
//! end marker truncates the window early. Once the window is full the
//! analyzer searches sub-frame alignment offsets from late to early,
//! demapping tone groups and attempting a Reed-Solomon decode at each
//! candidate until one succeeds.

use log::info;

use crate::error::{ModemError, Result};
use crate::params::{ecc_len_for, ModemParams, TxMode};
use crate::rs::ReedSolomon;
use crate::spectrum::SpectrumAnalyzer;
use crate::{
    FIXED_PAYLOAD_LEN, MARKER_BITS, MARKER_FRAMES, MARKER_SNR, MAX_DATA_SIZE, MAX_PAYLOAD_LEN,
    POST_MARKER_FRAMES, SILENCE_POWER_FLOOR, SPECTRUM_HISTORY, STEPS_PER_FRAME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    Recording,
}

pub struct Decoder {
    params: ModemParams,
    tx_mode: TxMode,
    analyzer: SpectrumAnalyzer,
    rs_length: ReedSolomon,

    history: Vec<Vec<f32>>,
    history_id: usize,
    averaged: Vec<f32>,
    spectrum: Vec<f32>,

    state: RxState,
    recorded: Vec<f32>,
    recv_duration_frames: usize,
    frames_to_record: i32,
    frames_left_to_record: i32,
    frames_to_analyze: i32,
    frames_left_to_analyze: i32,

    samples_captured: usize,
    encoded: Vec<u8>,
    fft_in: Vec<f32>,
}

impl Decoder {
    pub fn new(params: ModemParams, tx_mode: TxMode) -> Result<Self> {
        params.validate()?;
        let spf = params.samples_per_frame;
        Ok(Self {
            analyzer: SpectrumAnalyzer::new(spf),
            rs_length: ReedSolomon::new(1, 2)?,
            history: vec![vec![0.0; spf]; SPECTRUM_HISTORY],
            history_id: 0,
            averaged: vec![0.0; spf],
            spectrum: vec![0.0; spf],
            state: RxState::Idle,
            recorded: Vec::new(),
            recv_duration_frames: 0,
            frames_to_record: 0,
            frames_left_to_record: 0,
            frames_to_analyze: 0,
            frames_left_to_analyze: 0,
            samples_captured: 0,
            encoded: vec![0u8; MAX_DATA_SIZE],
            fft_in: vec![0.0; spf],
            params,
            tx_mode,
        })
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn frames_to_record(&self) -> i32 {
        self.frames_to_record
    }

    pub fn frames_left_to_record(&self) -> i32 {
        self.frames_left_to_record
    }

    pub fn frames_to_analyze(&self) -> i32 {
        self.frames_to_analyze
    }

    pub fn frames_left_to_analyze(&self) -> i32 {
        self.frames_left_to_analyze
    }

    /// Nonzero while the capture stream has carried signal recently;
    /// silence resets it.
    pub fn samples_captured(&self) -> usize {
        self.samples_captured
    }

    /// Feed one capture frame of `samples_per_frame` float samples.
    /// Returns the decoded payload when a full transmission has been
    /// captured and analyzed successfully, and
    /// [`ModemError::AllOffsetsFailed`] when a captured transmission
    /// exhausts every alignment offset without decoding.
    pub fn push_frame(&mut self, frame: &[f32]) -> Result<Option<Vec<u8>>> {
        let spf = self.params.samples_per_frame;
        debug_assert_eq!(frame.len(), spf);

        self.history[self.history_id].copy_from_slice(frame);
        self.history_id += 1;
        if self.history_id >= SPECTRUM_HISTORY {
            self.history_id = 0;
        }

        // The averaged spectrum only matters while hunting for markers:
        // always when idle, and during recording only in variable mode
        // (the end marker may arrive at any time).
        if self.history_id == 0
            && (self.state == RxState::Idle || self.tx_mode == TxMode::VariableLength)
        {
            self.averaged.fill(0.0);
            for hist in &self.history {
                for (avg, &s) in self.averaged.iter_mut().zip(hist) {
                    *avg += s;
                }
            }
            let norm = 1.0 / SPECTRUM_HISTORY as f32;
            for avg in self.averaged.iter_mut() {
                *avg *= norm;
            }

            let total = self.analyzer.power_spectrum(&self.averaged, &mut self.spectrum);
            if total < SILENCE_POWER_FLOOR {
                self.samples_captured = 0;
            } else {
                self.samples_captured += spf;
            }
        }

        let mut analysis = None;
        if self.frames_left_to_record > 0 {
            let written = (self.frames_to_record - self.frames_left_to_record) as usize;
            self.recorded[written * spf..(written + 1) * spf].copy_from_slice(frame);
            self.frames_left_to_record -= 1;
            if self.frames_left_to_record <= 0 {
                self.spectrum.fill(0.0);
                analysis = Some(self.analyze());
            }
        }

        match self.state {
            RxState::Idle => {
                if self.marker_match(false) {
                    info!("receiving sound data ...");
                    self.begin_recording();
                }
            }
            RxState::Recording => {
                if self.tx_mode == TxMode::VariableLength
                    && self.frames_left_to_record > 0
                    && self.frames_to_record > 1
                    && self.marker_match(true)
                {
                    info!("received end marker");
                    self.recv_duration_frames -= (self.frames_left_to_record - 1) as usize;
                    self.frames_left_to_record = 1;
                }
            }
        }

        match analysis {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Marker predicate over the current spectrum: every even channel
    /// must beat its space bin by the configured ratio and every odd
    /// channel must lose to it by the same ratio. `inverted` swaps the
    /// polarity, which is what the end marker transmits.
    fn marker_match(&self, inverted: bool) -> bool {
        let d0 = self.params.d0();
        for i in 0..MARKER_BITS {
            let bin = self.params.channel_bin(i);
            let p = self.spectrum[bin];
            let q = self.spectrum[bin + d0];
            let wants_mark = (i % 2 == 0) != inverted;
            if wants_mark {
                if p <= MARKER_SNR * q {
                    return false;
                }
            } else if q <= MARKER_SNR * p {
                return false;
            }
        }
        true
    }

    fn begin_recording(&mut self) {
        let markers = MARKER_FRAMES + POST_MARKER_FRAMES;
        let groups = match self.tx_mode {
            TxMode::FixedLength => {
                (FIXED_PAYLOAD_LEN + self.params.ecc_bytes_per_tx) / self.params.bytes_per_tx + 1
            }
            TxMode::VariableLength => {
                (MAX_PAYLOAD_LEN + ecc_len_for(MAX_PAYLOAD_LEN)) / self.params.bytes_per_tx + 1
            }
        };
        self.recv_duration_frames = markers + self.params.frames_per_tx * groups;
        self.frames_to_record = self.recv_duration_frames as i32;
        self.frames_left_to_record = self.frames_to_record;

        // Slack frames stay zero; the analyzer's coherent sum may read a
        // few frames past the recording window.
        let spf = self.params.samples_per_frame;
        self.recorded.clear();
        self.recorded
            .resize((self.recv_duration_frames + self.params.frames_per_tx) * spf, 0.0);
        self.state = RxState::Recording;
    }

    /// Offset search over the recorded window. Returns the payload of
    /// the first alignment whose Reed-Solomon decode succeeds; a single
    /// failed offset just moves the search along, only exhausting the
    /// whole window is an error.
    fn analyze(&mut self) -> Result<Vec<u8>> {
        let spf = self.params.samples_per_frame;
        let step = spf / STEPS_PER_FRAME;
        let bytes_per_tx = self.params.bytes_per_tx;
        let frames_per_tx = self.params.frames_per_tx;

        self.frames_to_analyze = (MARKER_FRAMES * STEPS_PER_FRAME) as i32;
        self.frames_left_to_analyze = self.frames_to_analyze;

        let mut result = None;

        let window_end = MARKER_FRAMES * STEPS_PER_FRAME;
        'offsets: for ii in (window_end / 2..window_end).rev() {
            self.encoded.fill(0);
            let mut known_length = match self.tx_mode {
                TxMode::FixedLength => Some(FIXED_PAYLOAD_LEN),
                TxMode::VariableLength => None,
            };

            for itx in 0..self.encoded.len() / bytes_per_tx {
                let offset_tx = ii + itx * frames_per_tx * STEPS_PER_FRAME;
                if offset_tx >= self.recv_duration_frames * STEPS_PER_FRAME {
                    break;
                }

                // Coherent sum over the held-tone frames, skipping the
                // last one, which carries the fade-out.
                let base = offset_tx * step;
                self.fft_in.copy_from_slice(&self.recorded[base..base + spf]);
                for k in 1..frames_per_tx.saturating_sub(1) {
                    let o = (offset_tx + k * STEPS_PER_FRAME) * step;
                    for (acc, &s) in self.fft_in.iter_mut().zip(&self.recorded[o..o + spf]) {
                        *acc += s;
                    }
                }
                self.analyzer.power_spectrum(&self.fft_in, &mut self.spectrum);

                self.demap_group(itx);

                if self.tx_mode == TxMode::VariableLength
                    && known_length.is_none()
                    && itx * bytes_per_tx > 3
                {
                    match self.rs_length.decode(&self.encoded[..3], &[]) {
                        Ok(len) if (len[0] as usize) <= MAX_PAYLOAD_LEN && len[0] > 0 => {
                            known_length = Some(len[0] as usize);
                        }
                        // A failed length codeword means this alignment
                        // is hopeless; abandon it immediately.
                        _ => break,
                    }
                }
            }

            if let Some(len) = known_length {
                let (geometry, data_offset) = match self.tx_mode {
                    TxMode::FixedLength => (
                        ReedSolomon::new(FIXED_PAYLOAD_LEN, self.params.ecc_bytes_per_tx),
                        0,
                    ),
                    TxMode::VariableLength => (ReedSolomon::new(len, ecc_len_for(len)), 3),
                };
                if let Ok(rs) = geometry {
                    let codeword = &self.encoded[data_offset..data_offset + rs.codeword_len()];
                    if let Ok(payload) = rs.decode(codeword, &[]) {
                        info!("decoded {} payload bytes", len);
                        self.frames_to_record = 0;
                        result = Some(payload);
                        break 'offsets;
                    }
                }
            }

            self.frames_left_to_analyze -= 1;
        }

        if result.is_none() {
            self.frames_to_record = -1;
        }

        self.state = RxState::Idle;
        self.spectrum.fill(0.0);
        self.frames_to_analyze = 0;
        self.frames_left_to_analyze = 0;
        result.ok_or(ModemError::AllOffsetsFailed)
    }

    /// Demap one tone group from the current spectrum into the encoded
    /// buffer at `itx * bytes_per_tx`.
    fn demap_group(&mut self, itx: usize) {
        let bytes_per_tx = self.params.bytes_per_tx;
        let d0 = self.params.d0();

        if !self.params.one_hot() {
            // Spread mode: mark bin louder than space bin means 1,
            // packed LSB-first.
            let mut current = 0u8;
            for i in 0..self.params.data_bits_per_tx() {
                let bit = i % 8;
                let bin = self.params.channel_bin(i);
                if self.spectrum[bin] > self.spectrum[bin + d0] {
                    current |= 1 << bit;
                }
                if bit == 7 {
                    self.encoded[itx * bytes_per_tx + i / 8] = current;
                    current = 0;
                }
            }
        } else {
            // One-hot mode: the strongest bin of each 16-bin window is
            // the nibble value, low nibble first.
            let mut current = 0u8;
            for i in 0..2 * bytes_per_tx {
                let base = self.params.freq_start_bin + i * 16;
                let mut best = 0usize;
                let mut best_power = 0.0f32;
                for k in 0..16 {
                    let p = self.spectrum[base + k];
                    if p > best_power {
                        best_power = p;
                        best = k;
                    }
                }
                if i % 2 == 1 {
                    current |= (best as u8) << 4;
                    self.encoded[itx * bytes_per_tx + i / 2] = current;
                    current = 0;
                } else {
                    current = best as u8;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::synthesize_transmission;
    use crate::params::TxProtocol;
    use crate::payload;
    use crate::tones::ToneBank;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pcm_to_frames(pcm: &[i16], spf: usize) -> Vec<Vec<f32>> {
        pcm.chunks(spf)
            .filter(|c| c.len() == spf)
            .map(|c| c.iter().map(|&s| s as f32 / 32768.0).collect())
            .collect()
    }

    #[test]
    fn test_start_marker_is_recognizable() {
        // A pure start-marker frame must satisfy the detection predicate
        // at the true bin positions with margin.
        let params = TxProtocol::Fast.params();
        let tones = ToneBank::new(&params);
        let encoded = payload::build_fixed(b"x", params.ecc_bytes_per_tx).unwrap();
        let pcm = synthesize_transmission(
            &params,
            &tones,
            TxMode::FixedLength,
            &encoded,
            FIXED_PAYLOAD_LEN,
            params.ecc_bytes_per_tx,
        );

        let mut decoder = Decoder::new(params.clone(), TxMode::FixedLength).unwrap();
        // Use a full-amplitude marker frame from the middle of the marker
        let frame: Vec<f32> = pcm[8 * 1024..9 * 1024]
            .iter()
            .map(|&s| s as f32 / 32768.0)
            .collect();
        decoder
            .analyzer
            .power_spectrum(&frame, &mut decoder.spectrum);
        assert!(decoder.marker_match(false));
        assert!(!decoder.marker_match(true));
    }

    #[test]
    fn test_silence_never_triggers_detection() {
        let params = TxProtocol::Fast.params();
        let mut decoder = Decoder::new(params.clone(), TxMode::FixedLength).unwrap();
        let silence = vec![0.0f32; params.samples_per_frame];
        // One second of silence
        for _ in 0..47 {
            assert!(decoder.push_frame(&silence).unwrap().is_none());
            assert_eq!(decoder.state(), RxState::Idle);
        }
        assert_eq!(decoder.samples_captured(), 0);
    }

    #[test]
    fn test_detection_starts_recording() {
        let params = TxProtocol::Fast.params();
        let tones = ToneBank::new(&params);
        let encoded = payload::build_fixed(b"ping", params.ecc_bytes_per_tx).unwrap();
        let pcm = synthesize_transmission(
            &params,
            &tones,
            TxMode::FixedLength,
            &encoded,
            FIXED_PAYLOAD_LEN,
            params.ecc_bytes_per_tx,
        );

        let mut decoder = Decoder::new(params.clone(), TxMode::FixedLength).unwrap();
        let frames = pcm_to_frames(&pcm, params.samples_per_frame);
        // Feeding the marker must flip the state within its 16 frames
        for frame in frames.iter().take(MARKER_FRAMES) {
            decoder.push_frame(frame).unwrap();
        }
        assert_eq!(decoder.state(), RxState::Recording);
        assert!(decoder.frames_left_to_record() > 0);
    }

    #[test]
    fn test_exhausted_offset_search_is_an_error() {
        let params = TxProtocol::Fast.params();
        let tones = ToneBank::new(&params);
        let encoded = payload::build_fixed(b"x", params.ecc_bytes_per_tx).unwrap();
        let pcm = synthesize_transmission(
            &params,
            &tones,
            TxMode::FixedLength,
            &encoded,
            FIXED_PAYLOAD_LEN,
            params.ecc_bytes_per_tx,
        );

        let mut decoder = Decoder::new(params.clone(), TxMode::FixedLength).unwrap();
        let frames = pcm_to_frames(&pcm, params.samples_per_frame);
        for frame in frames.iter().take(MARKER_FRAMES) {
            decoder.push_frame(frame).unwrap();
        }
        assert_eq!(decoder.state(), RxState::Recording);

        // A genuine marker followed by noise instead of data: every
        // alignment offset must fail once the recording window fills.
        let mut rng = StdRng::seed_from_u64(21);
        let mut outcome = Ok(None);
        for _ in 0..600 {
            let noise: Vec<f32> = (0..params.samples_per_frame)
                .map(|_| rng.gen_range(-0.3..0.3))
                .collect();
            outcome = decoder.push_frame(&noise);
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(ModemError::AllOffsetsFailed)));
        assert_eq!(decoder.state(), RxState::Idle);
        assert_eq!(decoder.frames_to_record(), -1);
    }
}
