use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, info};

use tonelink_core::{Modem, ModemParams, TxMode, TxProtocol};

/// Milliseconds to wait after the playback queue drains before capture
/// resumes; suppresses reception of our own transmission.
const SELF_RX_GUARD_MS: u64 = 500;

#[derive(Parser)]
#[command(name = "tonelink")]
#[command(about = "Send and receive short payloads over sound using MFSK tones")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Capture device index
    #[arg(short = 'c', long, default_value_t = 0)]
    capture: usize,

    /// Playback device index
    #[arg(short = 'p', long, default_value_t = 0)]
    playback: usize,

    /// Transmission protocol: 0 Normal, 1 Fast, 2 Fastest, 3 Ultrasonic
    #[arg(short = 't', long, default_value_t = 1)]
    protocol: usize,

    /// Length-prefixed payloads with an end marker instead of the
    /// fixed 82-byte block
    #[arg(long)]
    variable: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a text payload into a WAV audio file
    Encode {
        /// Payload text
        text: String,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Transmission protocol: 0 Normal, 1 Fast, 2 Fastest, 3 Ultrasonic
        #[arg(short = 't', long, default_value_t = 1)]
        protocol: usize,

        /// Variable-length mode
        #[arg(long)]
        variable: bool,
    },

    /// Decode a payload from a WAV audio file
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Transmission protocol: 0 Normal, 1 Fast, 2 Fastest, 3 Ultrasonic
        #[arg(short = 't', long, default_value_t = 1)]
        protocol: usize,

        /// Variable-length mode
        #[arg(long)]
        variable: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Encode {
            text,
            output,
            protocol,
            variable,
        }) => encode_to_wav(&text, &output, protocol, variable),
        Some(Commands::Decode {
            input,
            protocol,
            variable,
        }) => decode_from_wav(&input, protocol, variable),
        None => run_live(cli.capture, cli.playback, cli.protocol, cli.variable),
    }
}

fn preset_params(protocol: usize) -> Result<ModemParams> {
    let preset = TxProtocol::from_index(protocol)
        .with_context(|| format!("unknown protocol {}, expected 0..=3", protocol))?;
    info!("using {:?} Tx protocol", preset);
    Ok(preset.params())
}

fn tx_mode(variable: bool) -> TxMode {
    if variable {
        TxMode::VariableLength
    } else {
        TxMode::FixedLength
    }
}

/// Print a decoded payload the way the receiver intends it: fixed-mode
/// single-byte `A`/`O` payloads are handshake acknowledgements,
/// everything else is text.
fn report_payload(payload: &[u8], mode: TxMode) {
    let trimmed: &[u8] = match mode {
        TxMode::FixedLength => {
            let end = payload
                .iter()
                .rposition(|&b| b != 0)
                .map_or(0, |p| p + 1);
            &payload[..end]
        }
        TxMode::VariableLength => payload,
    };

    match (mode, trimmed) {
        (TxMode::FixedLength, b"A") => println!("[ANSWER] Received sound data successfully!"),
        (TxMode::FixedLength, b"O") => println!("[OFFER]  Received sound data successfully!"),
        _ => println!(
            "Received sound data successfully: '{}'",
            String::from_utf8_lossy(trimmed)
        ),
    }
}

fn run_live(capture_id: usize, playback_id: usize, protocol: usize, variable: bool) -> Result<()> {
    let params = preset_params(protocol)?;
    let mode = tx_mode(variable);
    let samples_per_frame = params.samples_per_frame;
    let sample_rate = params.sample_rate_in as u32;

    let host = cpal::default_host();

    let playback_devices: Vec<_> = host.output_devices()?.collect();
    println!("Found {} playback devices:", playback_devices.len());
    for (i, device) in playback_devices.iter().enumerate() {
        println!("    - Playback device #{}: '{}'", i, device_name(device));
    }
    let capture_devices: Vec<_> = host.input_devices()?.collect();
    println!("Found {} capture devices:", capture_devices.len());
    for (i, device) in capture_devices.iter().enumerate() {
        println!("    - Capture device #{}: '{}'", i, device_name(device));
    }

    let output_device = playback_devices
        .into_iter()
        .nth(playback_id)
        .with_context(|| format!("no playback device #{}", playback_id))?;
    let input_device = capture_devices
        .into_iter()
        .nth(capture_id)
        .with_context(|| format!("no capture device #{}", capture_id))?;

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut modem = Modem::new(params)?;
    modem.set_tx_mode(mode);
    let modem = Arc::new(Mutex::new(modem));

    let capture_queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
    let playback_queue: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));

    // The capture path feeds the analyzer directly, so a device that
    // silently resamples would wreck the tone bins. Opening the stream
    // at the exact requested rate is the contract; anything else fails.
    let capture_for_input = Arc::clone(&capture_queue);
    let input_stream = input_device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut queue = capture_for_input.lock().unwrap();
                queue.extend(data.iter().copied());
            },
            |err| log::error!("capture stream error: {}", err),
            None,
        )
        .with_context(|| format!("capture device does not support {} Hz mono f32", sample_rate))?;

    let playback_for_output = Arc::clone(&playback_queue);
    let output_stream = output_device
        .build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut queue = playback_for_output.lock().unwrap();
                for sample in data.iter_mut() {
                    *sample = queue.pop_front().unwrap_or(0);
                }
            },
            |err| log::error!("playback stream error: {}", err),
            None,
        )
        .with_context(|| format!("playback device does not support {} Hz mono i16", sample_rate))?;

    input_stream.play()?;
    output_stream.play()?;

    // Payload input on its own thread; the modem loop stays real-time
    let modem_for_stdin = Arc::clone(&modem);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        loop {
            print!("Enter text: ");
            std::io::stdout().flush().ok();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let text = line.trim_end_matches(&['\r', '\n'][..]);
            if let Err(e) = modem_for_stdin.lock().unwrap().set_text(text.as_bytes()) {
                eprintln!("cannot send: {}", e);
            } else {
                println!("Sending ...");
            }
        }
    });

    let guard = Duration::from_millis(SELF_RX_GUARD_MS);
    let mut last_pending = Instant::now();
    loop {
        std::thread::sleep(Duration::from_millis(1));
        let mut modem = modem.lock().unwrap();

        if modem.has_pending_tx() {
            let pcm = modem.take_tx_samples();
            debug!("queueing {} transmit samples", pcm.len());
            playback_queue.lock().unwrap().extend(pcm);
            capture_queue.lock().unwrap().clear();
            last_pending = Instant::now();
            continue;
        }

        let playback_drained = playback_queue.lock().unwrap().len() < samples_per_frame;
        if !playback_drained {
            last_pending = Instant::now();
            continue;
        }

        if last_pending.elapsed() < guard {
            // Still too close to our own transmission; drop the echo
            capture_queue.lock().unwrap().clear();
            continue;
        }

        let mut queue = capture_queue.lock().unwrap();
        if let Some(payload) = modem.receive(&mut queue) {
            drop(queue);
            report_payload(&payload, modem.tx_mode());
        }
    }
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "<unknown>".to_string())
}

fn encode_to_wav(text: &str, output: &PathBuf, protocol: usize, variable: bool) -> Result<()> {
    let params = preset_params(protocol)?;
    let sample_rate = params.sample_rate_out as u32;

    let mut modem = Modem::new(params)?;
    modem.set_tx_mode(tx_mode(variable));
    modem.set_text(text.as_bytes())?;
    let pcm = modem.take_tx_samples();

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("cannot create {}", output.display()))?;
    for &sample in &pcm {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    println!(
        "Wrote {} samples ({:.2} s) to {}",
        pcm.len(),
        pcm.len() as f64 / sample_rate as f64,
        output.display()
    );
    Ok(())
}

fn decode_from_wav(input: &PathBuf, protocol: usize, variable: bool) -> Result<()> {
    let params = preset_params(protocol)?;
    let mode = tx_mode(variable);

    let mut reader = hound::WavReader::open(input)
        .with_context(|| format!("cannot open {}", input.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != params.sample_rate_in as u32 {
        bail!(
            "{} is sampled at {} Hz, expected {} Hz",
            input.display(),
            spec.sample_rate,
            params.sample_rate_in
        );
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
    };
    let mut samples = mix_to_mono(&interleaved, spec.channels as usize);
    // Tail silence lets the recording window run out past the signal
    samples.extend(std::iter::repeat(0.0).take(2 * spec.sample_rate as usize));

    let mut modem = Modem::new(params)?;
    modem.set_tx_mode(mode);
    let mut queue: VecDeque<f32> = samples.into_iter().collect();

    match modem.receive(&mut queue) {
        Some(payload) => {
            report_payload(&payload, mode);
            Ok(())
        }
        None => bail!("no payload decoded from {}", input.display()),
    }
}

fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
