//! Precomputed tone waveforms and the tone-group amplitude envelope.
//!
//! Each bit channel owns two sinusoids of one frame length: the mark
//! tone at the channel's base frequency and the space tone one `d0` bin
//! above it. Channels carry a per-channel phase offset so the summed
//! waveform does not peak at frame start; the offsets can optionally be
//! permuted with a seeded RNG to lower the crest factor further.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::f64::consts::PI;

use crate::params::ModemParams;

pub struct ToneBank {
    mark: Vec<Vec<f32>>,
    space: Vec<Vec<f32>>,
    phase_offsets: Vec<f64>,
}

impl ToneBank {
    pub fn new(params: &ModemParams) -> Self {
        let channels = params.tone_channels();
        let n_bits = params.data_bits_per_tx();
        let spf_out = params.samples_per_frame_out();
        let hz_per_frame = params.hz_per_frame();
        let d0_hz = hz_per_frame * params.d0() as f64;

        let mut phase_offsets: Vec<f64> =
            (0..channels).map(|k| PI * k as f64 / n_bits as f64).collect();
        if let Some(seed) = params.phase_shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            phase_offsets.shuffle(&mut rng);
        }

        let mut mark = Vec::with_capacity(channels);
        let mut space = Vec::with_capacity(channels);
        for (k, &phase) in phase_offsets.iter().enumerate() {
            let freq = params.channel_freq_hz(k);
            mark.push(tone_frame(spf_out, params.sample_rate_out, freq, phase));
            space.push(tone_frame(
                spf_out,
                params.sample_rate_out,
                freq + d0_hz,
                phase,
            ));
        }

        Self {
            mark,
            space,
            phase_offsets,
        }
    }

    pub fn channels(&self) -> usize {
        self.mark.len()
    }

    pub fn mark(&self, k: usize) -> &[f32] {
        &self.mark[k]
    }

    pub fn space(&self, k: usize) -> &[f32] {
        &self.space[k]
    }

    pub fn phase_offset(&self, k: usize) -> f64 {
        self.phase_offsets[k]
    }
}

/// One frame of a sinusoid at `freq` Hz sampled at `sample_rate`
pub fn tone_frame(len: usize, sample_rate: f64, freq: f64, phase: f64) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * PI * freq * i as f64 / sample_rate + phase).sin() as f32)
        .collect()
}

/// Like [`tone_frame`], but with the phase continued across frame
/// boundaries. The transmit path uses this when the playback rate
/// differs from the analysis rate and tones no longer close an integer
/// number of cycles per frame.
pub fn tone_frame_at(
    len: usize,
    sample_rate: f64,
    freq: f64,
    phase: f64,
    frame_id: usize,
) -> Vec<f32> {
    let base = (frame_id * len) as f64;
    (0..len)
        .map(|i| (2.0 * PI * freq * (base + i as f64) / sample_rate + phase).sin() as f32)
        .collect()
}

/// Accumulate `scalar * src` into `dst` under the tone-group envelope:
/// linear fade-in over the first 15% of the group, flat in the middle,
/// symmetric fade-out at the end. `cycle` is the frame's index within
/// the group of `frames_per_cycle` frames.
pub fn add_tone_smooth(
    src: &[f32],
    dst: &mut [f32],
    scalar: f32,
    cycle: usize,
    frames_per_cycle: usize,
) {
    let frame_len = dst.len();
    let n_total = (frames_per_cycle * frame_len) as f32;
    let frac = 0.15f32;
    let ids = 1.0 / (frac * n_total);
    let n_begin = frac * n_total;
    let n_end = (1.0 - frac) * n_total;

    let base = (cycle * frame_len) as f32;
    for (i, (d, &s)) in dst.iter_mut().zip(src).enumerate() {
        let k = base + i as f32;
        let envelope = if k < n_begin {
            k * ids
        } else if k > n_end {
            (n_total - k) * ids
        } else {
            1.0
        };
        *d += scalar * s * envelope;
    }
}
