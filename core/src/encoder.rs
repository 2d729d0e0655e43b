//! Transmit pipeline: turn an encoded payload buffer into 16-bit PCM.
//!
//! A transmission is synthesized in one burst: the start marker, the
//! data tone groups and, in variable-length mode, the end marker. Every
//! frame is the sum of the tones selected for it, shaped by the
//! tone-group envelope and normalized by the simultaneous tone count so
//! the output never clips.

use crate::params::{ModemParams, TxMode};
use crate::tones::{add_tone_smooth, tone_frame_at, ToneBank};
use crate::{MARKER_BITS, MARKER_FRAMES, PCM_FULL_SCALE, POST_MARKER_FRAMES};

/// Synthesize the complete transmission for an encoded buffer laid out
/// by the [`payload`](crate::payload) module. `send_len` and `ecc_len`
/// describe the data region; bytes past `encoded` read as zero, which
/// covers the trailing padding groups.
pub fn synthesize_transmission(
    params: &ModemParams,
    tones: &ToneBank,
    tx_mode: TxMode,
    encoded: &[u8],
    send_len: usize,
    ecc_len: usize,
) -> Vec<i16> {
    let spf_out = params.samples_per_frame_out();
    let bytes_per_tx = params.bytes_per_tx;
    let frames_per_tx = params.frames_per_tx;
    let n_bits = params.data_bits_per_tx();
    let volume = params.volume as f32 / 100.0;
    let resampling = params.sample_rate_out != params.sample_rate_in;

    let markers = MARKER_FRAMES + POST_MARKER_FRAMES;
    let n_groups = (send_len + ecc_len) / bytes_per_tx + 2;
    let data_end = markers + n_groups * frames_per_tx;
    let total_frames = match tx_mode {
        TxMode::FixedLength => data_end,
        TxMode::VariableLength => data_end + MARKER_FRAMES,
    };

    let channels = tones.channels();
    let mut mark_scratch: Vec<Vec<f32>> = Vec::new();
    let mut space_scratch: Vec<Vec<f32>> = Vec::new();

    let mut pcm = Vec::with_capacity(total_frames * spf_out);
    let mut block = vec![0.0f32; spf_out];

    for frame_id in 0..total_frames {
        if resampling {
            // Tones no longer close whole cycles per frame at the output
            // rate, so rebuild them with the phase carried across frames.
            rebuild_tone_scratch(
                params,
                tones,
                channels,
                frame_id,
                &mut mark_scratch,
                &mut space_scratch,
            );
        }
        let marks: Vec<&[f32]> = if resampling {
            mark_scratch.iter().map(Vec::as_slice).collect()
        } else {
            (0..channels).map(|k| tones.mark(k)).collect()
        };
        let spaces: Vec<&[f32]> = if resampling {
            space_scratch.iter().map(Vec::as_slice).collect()
        } else {
            (0..channels).map(|k| tones.space(k)).collect()
        };

        block.fill(0.0);
        let mut n_tones = 0usize;

        if frame_id < MARKER_FRAMES {
            // Start marker: even channels mark, odd channels space
            for i in 0..MARKER_BITS {
                let src = if i % 2 == 0 { marks[i] } else { spaces[i] };
                add_tone_smooth(src, &mut block, volume, frame_id, MARKER_FRAMES);
            }
            n_tones = MARKER_BITS;
        } else if frame_id < markers {
            // Inverted marker right after the start marker
            for i in 0..MARKER_BITS {
                let src = if i % 2 == 0 { spaces[i] } else { marks[i] };
                add_tone_smooth(
                    src,
                    &mut block,
                    volume,
                    frame_id - MARKER_FRAMES,
                    POST_MARKER_FRAMES,
                );
            }
            n_tones = MARKER_BITS;
        } else if frame_id < data_end {
            let rel = frame_id - markers;
            let cycle = rel % frames_per_tx;
            let data_offset = (rel / frames_per_tx) * bytes_per_tx;

            if !params.one_hot() {
                // Spread mode: every bit owns a channel and always emits
                for j in 0..bytes_per_tx {
                    let byte = encoded.get(data_offset + j).copied().unwrap_or(0);
                    for bit in 0..8 {
                        let k = j * 8 + bit;
                        let src = if byte & (1 << bit) != 0 {
                            marks[k]
                        } else {
                            spaces[k]
                        };
                        add_tone_smooth(src, &mut block, volume, cycle, frames_per_tx);
                    }
                }
                n_tones = n_bits;
            } else {
                // One-hot mode: each nibble drives one bin out of its 16
                for j in 0..bytes_per_tx {
                    let byte = encoded.get(data_offset + j).copied().unwrap_or(0);
                    for (nibble_idx, nibble) in [(2 * j, byte & 0x0f), (2 * j + 1, byte >> 4)] {
                        let k = nibble_idx * 16 + nibble as usize;
                        let src = if k % 2 == 0 { marks[k / 2] } else { spaces[k / 2] };
                        add_tone_smooth(src, &mut block, volume, cycle, frames_per_tx);
                        n_tones += 1;
                    }
                }
            }
        } else {
            // Variable-length trailing end marker (inverted polarity)
            for i in 0..MARKER_BITS {
                let src = if i % 2 == 0 { spaces[i] } else { marks[i] };
                add_tone_smooth(src, &mut block, volume, frame_id - data_end, MARKER_FRAMES);
            }
            n_tones = MARKER_BITS;
        }

        let scale = 1.0 / n_tones.max(1) as f32;
        for &v in &block {
            pcm.push((PCM_FULL_SCALE * v * scale).round() as i16);
        }
    }

    pcm
}

/// Total frame count of a transmission with the given data region
pub fn transmission_frames(
    params: &ModemParams,
    tx_mode: TxMode,
    send_len: usize,
    ecc_len: usize,
) -> usize {
    let markers = MARKER_FRAMES + POST_MARKER_FRAMES;
    let n_groups = (send_len + ecc_len) / params.bytes_per_tx + 2;
    let data_end = markers + n_groups * params.frames_per_tx;
    match tx_mode {
        TxMode::FixedLength => data_end,
        TxMode::VariableLength => data_end + MARKER_FRAMES,
    }
}

fn rebuild_tone_scratch(
    params: &ModemParams,
    tones: &ToneBank,
    channels: usize,
    frame_id: usize,
    mark: &mut Vec<Vec<f32>>,
    space: &mut Vec<Vec<f32>>,
) {
    let spf_out = params.samples_per_frame_out();
    let d0_hz = params.hz_per_frame() * params.d0() as f64;
    mark.clear();
    space.clear();
    for k in 0..channels {
        let freq = params.channel_freq_hz(k);
        let phase = tones.phase_offset(k);
        mark.push(tone_frame_at(
            spf_out,
            params.sample_rate_out,
            freq,
            phase,
            frame_id,
        ));
        space.push(tone_frame_at(
            spf_out,
            params.sample_rate_out,
            freq + d0_hz,
            phase,
            frame_id,
        ));
    }
}
