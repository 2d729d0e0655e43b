// ============================================================================
// LOOPBACK INTEGRATION TESTS
// ============================================================================
// Full transmit -> receive roundtrips: the synthesized 16-bit PCM is fed
// straight back into the receiver's capture queue and must decode
// bit-exact, for every protocol preset and both length modes.
//
// For faster test execution, run in release mode:
//   cargo test -p tonelink-core --test loopback_test --release
// ============================================================================

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use tonelink_core::{
    payload, Modem, ModemParams, ReedSolomon, RxState, TxMode, TxProtocol, FIXED_PAYLOAD_LEN,
};

/// Synthesize a transmission, optionally mangle it, and run it through a
/// fresh receiver. Returns whatever the receiver decodes.
fn loopback_with(
    params: ModemParams,
    mode: TxMode,
    payload_bytes: &[u8],
    lead_in_samples: usize,
    mut mangle: impl FnMut(&mut Vec<f32>),
) -> Option<Vec<u8>> {
    let mut tx = Modem::new(params.clone()).expect("tx modem");
    tx.set_tx_mode(mode);
    tx.set_text(payload_bytes).expect("set_text");
    let pcm = tx.take_tx_samples();
    assert!(!pcm.is_empty(), "no samples synthesized");

    let mut samples: Vec<f32> = Vec::with_capacity(lead_in_samples + pcm.len() + 96_000);
    samples.resize(lead_in_samples, 0.0);
    samples.extend(pcm.iter().map(|&s| s as f32 / 32768.0));
    // Two seconds of tail silence so the recording window can complete
    samples.extend(std::iter::repeat(0.0).take(96_000));
    mangle(&mut samples);

    let mut rx = Modem::new(params).expect("rx modem");
    rx.set_tx_mode(mode);
    let mut queue: VecDeque<f32> = samples.into_iter().collect();
    rx.receive(&mut queue)
}

fn loopback(params: ModemParams, mode: TxMode, payload_bytes: &[u8]) -> Option<Vec<u8>> {
    loopback_with(params, mode, payload_bytes, 0, |_| {})
}

fn trim_trailing_zeros(mut data: Vec<u8>) -> Vec<u8> {
    while data.last() == Some(&0) {
        data.pop();
    }
    data
}

#[test]
fn test_loopback_every_preset_fixed_mode() {
    for index in 0..4 {
        let preset = TxProtocol::from_index(index).unwrap();
        let decoded = loopback(preset.params(), TxMode::FixedLength, b"hello")
            .unwrap_or_else(|| panic!("preset {:?} failed to decode", preset));
        assert_eq!(decoded.len(), FIXED_PAYLOAD_LEN);
        assert_eq!(&decoded[..5], b"hello", "preset {:?}", preset);
        assert!(decoded[5..].iter().all(|&b| b == 0), "preset {:?}", preset);
    }
}

#[test]
fn test_loopback_single_byte_acknowledgements() {
    for ack in [b'A', b'O'] {
        let decoded = loopback(TxProtocol::Fast.params(), TxMode::FixedLength, &[ack]).unwrap();
        assert_eq!(trim_trailing_zeros(decoded), vec![ack]);
    }
}

#[test]
fn test_loopback_variable_length_abc() {
    let decoded = loopback(TxProtocol::Fast.params(), TxMode::VariableLength, b"abc").unwrap();
    assert_eq!(decoded, b"abc");
}

#[test]
fn test_loopback_variable_length_binary_payload() {
    let mut rng = StdRng::seed_from_u64(11);
    let payload_bytes: Vec<u8> = (0..60).map(|_| rng.gen()).collect();
    let decoded = loopback(
        TxProtocol::Fast.params(),
        TxMode::VariableLength,
        &payload_bytes,
    )
    .unwrap();
    assert_eq!(decoded, payload_bytes);
}

#[test]
fn test_loopback_variable_length_max_payload() {
    let mut rng = StdRng::seed_from_u64(12);
    let payload_bytes: Vec<u8> = (0..140).map(|_| rng.gen()).collect();
    let decoded = loopback(
        TxProtocol::Fast.params(),
        TxMode::VariableLength,
        &payload_bytes,
    )
    .unwrap();
    assert_eq!(decoded, payload_bytes);
}

#[test]
fn test_loopback_survives_unaligned_lead_in() {
    // Lead-in silence that is not a whole number of frames forces the
    // analyzer to find a sub-frame alignment offset.
    let decoded = loopback_with(
        TxProtocol::Fast.params(),
        TxMode::FixedLength,
        b"offset hunt",
        24_000,
        |_| {},
    )
    .unwrap();
    assert_eq!(&decoded[..11], b"offset hunt");
}

#[test]
fn test_loopback_with_channel_noise() {
    let normal = Normal::new(0.0f32, 0.01).unwrap();
    let mut rng = StdRng::seed_from_u64(13);
    let decoded = loopback_with(
        TxProtocol::Fast.params(),
        TxMode::FixedLength,
        b"noisy channel",
        4_096,
        |samples| {
            for s in samples.iter_mut() {
                *s += normal.sample(&mut rng);
            }
        },
    )
    .unwrap();
    assert_eq!(&decoded[..13], b"noisy channel");
}

#[test]
fn test_loopback_spread_mode() {
    // Wider channel spacing: one dedicated frequency per bit
    let mut params = TxProtocol::Fast.params();
    params.freq_delta_bins = 6;
    params.bytes_per_tx = 2;
    let decoded = loopback(params, TxMode::FixedLength, b"spread!").unwrap();
    assert_eq!(&decoded[..7], b"spread!");
}

#[test]
fn test_silence_keeps_receiver_idle() {
    let params = TxProtocol::Fast.params();
    let mut rx = Modem::new(params).expect("rx modem");
    // One second of pure silence
    let mut queue: VecDeque<f32> = std::iter::repeat(0.0f32).take(48_000).collect();
    assert!(rx.receive(&mut queue).is_none());
    assert_eq!(rx.rx_state(), RxState::Idle);
    assert!(!rx.capture_active());
    assert!(rx.rx_data().is_empty());
}

#[test]
fn test_corrupted_data_region_still_decodes() {
    // Fast preset geometry: 32 parity bytes correct up to 16 byte errors;
    // 8 corrupted bytes in the data region must not matter.
    let mut rng = StdRng::seed_from_u64(14);
    let mut encoded = payload::build_fixed(b"resilient", 32).unwrap();
    let mut hit = vec![false; encoded.len()];
    let mut corrupted = 0;
    while corrupted < 8 {
        let pos = rng.gen_range(0..encoded.len());
        if hit[pos] {
            continue;
        }
        hit[pos] = true;
        encoded[pos] ^= rng.gen_range(1..=255u8);
        corrupted += 1;
    }
    let rs = ReedSolomon::new(FIXED_PAYLOAD_LEN, 32).unwrap();
    let decoded = rs.decode(&encoded, &[]).unwrap();
    assert_eq!(&decoded[..9], b"resilient");
}

#[test]
fn test_transmissions_are_identical_across_runs() {
    let make = || {
        let mut tx = Modem::new(TxProtocol::Fast.params()).unwrap();
        tx.set_text(b"same in, same out").unwrap();
        tx.take_tx_samples()
    };
    assert_eq!(make(), make());
}
