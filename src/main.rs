use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use beacon_voice::audio::{
    self, FrameSource, MicrophoneSource, PlaybackKind, PlaybackRequest, open_sink,
};
use beacon_voice::services;
use beacon_voice::shutdown;
use beacon_voice::turn::Collaborators;
use beacon_voice::vad;
use beacon_voice::wake::{self, WakeDetector};
use beacon_voice::{Config, TurnController, TurnEvent};

/// Beacon Voice - wake-phrase voice front end for the Beacon gateway
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Config file (default: ~/.config/omni/beacon-voice/config.toml)
    #[arg(short, long, env = "BEACON_VOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for the wake phrase and hold conversations (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// List audio devices and their indices
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,beacon_voice=info",
        1 => "info,beacon_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Run);

    if matches!(command, Command::Devices) {
        return list_devices();
    }

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match command {
        Command::Run => run_assistant(&config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker(&config).await,
        Command::Devices => list_devices(),
    }
}

/// Run the wake → turn loop until Ctrl+C
#[allow(clippy::future_not_send)]
async fn run_assistant(config: &Config) -> anyhow::Result<()> {
    let services = services::from_config(config)?;
    let playback = open_sink(config.audio.playback_backend, config.audio.output_device)?;

    // No microphone at startup is fatal
    let source = MicrophoneSource::open(&config.audio)?;
    let format = source.format();
    let wake = WakeDetector::new(
        wake::model_from_config(&config.wake, format)?,
        &config.wake,
        format,
    );
    let speech = vad::detector_from_config(&config.vad, format)?;

    let mut controller = TurnController::new(
        config,
        Box::new(source),
        wake,
        speech,
        Collaborators::new(services, playback),
    )?;

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            trigger.trigger();
        }
    });

    let printer = tokio::spawn(print_events(controller.subscribe()));

    println!("Listening for \"{}\"... (Ctrl+C to quit)", config.wake.phrase);
    let result = controller.run(shutdown).await;

    // Closes the event channel
    drop(controller);
    let _ = printer.await;

    result?;
    println!("Shutting down...");
    Ok(())
}

/// Print the user-visible status line for each turn event
async fn print_events(mut events: broadcast::Receiver<TurnEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event {
                TurnEvent::WakeDetected { .. } => println!("Wake phrase detected, listening..."),
                TurnEvent::UtteranceIgnored { reason } => println!("  ({reason}, ignoring)"),
                TurnEvent::Transcript(text) => println!("  You: {text}"),
                TurnEvent::Reply(text) => println!("  Beacon: {text}"),
                TurnEvent::Failed { class, .. } => println!("  [{class}] {}", class.notice()),
                TurnEvent::TurnCompleted => println!(),
                TurnEvent::StateChanged(_) | TurnEvent::UtteranceCaptured { .. } => {}
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = MicrophoneSource::open(&config.audio)?;
    let format = source.format();
    println!(
        "Sample rate: {} Hz, {} samples per frame",
        format.sample_rate, format.samples_per_frame
    );
    println!("---");

    let frames_per_second = format.frames_within(Duration::from_secs(1)).max(1);
    let start = Instant::now();

    for i in 0..duration {
        let mut samples = Vec::with_capacity(frames_per_second * format.samples_per_frame);
        for _ in 0..frames_per_second {
            match source.next_frame().await? {
                Some(frame) => samples.extend_from_slice(frame.samples()),
                None => anyhow::bail!("capture stream ended"),
            }
        }

        let energy = audio::rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    let dropped = source.dropped_frames();
    source.stop();

    println!("\n---");
    println!(
        "Captured {duration}s in {:.1}s, {dropped} frames dropped",
        start.elapsed().as_secs_f32()
    );
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: beacon-voice devices (and set audio.input_device)");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = open_sink(config.audio.playback_backend, config.audio.output_device)?;

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let completed = playback
        .play(PlaybackRequest::pcm(PlaybackKind::Cue, samples, sample_rate))
        .await?;

    println!("\n---");
    println!("Played {:.1}s of audio.", completed.duration.as_secs_f32());
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: beacon-voice devices (and set audio.output_device)");
    println!("  2. Try another backend: BEACON_VOICE_PLAYBACK_BACKEND=cpal");

    Ok(())
}

/// List input and output devices
fn list_devices() -> anyhow::Result<()> {
    let (inputs, outputs) = audio::list_devices()?;

    println!("Input devices:");
    for device in &inputs {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  [{}] {}{marker}", device.index, device.name);
    }

    println!("\nOutput devices:");
    for device in &outputs {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  [{}] {}{marker}", device.index, device.name);
    }

    Ok(())
}
