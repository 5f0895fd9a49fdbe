//! # Console Tuner
//!
//! Headless front-end for `tuner-core`. It captures the default microphone,
//! runs the tuning pipeline on a dedicated analysis thread and renders the
//! published snapshot as a text needle.
//!
//! ## Architecture
//! - **Audio Thread**: owns the CPAL stream and the `Tuner` (single writer)
//! - **Main Thread**: polls the lock-free snapshot and lock events at ~20 Hz
//! - **Communication**: crossbeam channels for frames, shutdown and lock events

use std::io::Write;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender};
use log::{error, info};
use tuner_core::audio::{self, DEFAULT_FRAME_SIZE, DEFAULT_SAMPLE_RATE};
use tuner_core::instrument::{self, InstrumentConfig};
use tuner_core::publish::{self, LockEvent, SnapshotReader, TuningSnapshot};
use tuner_core::{SampleFrame, Tuner, TuningMode, TuningState};

/// Width of the needle bar in characters.
const METER_WIDTH: usize = 41;

const DISPLAY_INTERVAL: Duration = Duration::from_millis(50);

/// Command-line arguments for the console tuner
#[derive(Parser, Debug)]
#[command(name = "tuner-cli")]
#[command(about = "Real-time instrument tuner for the terminal")]
#[command(version)]
struct Args {
    /// Built-in instrument preset
    #[arg(short, long, default_value = "guitar")]
    instrument: String,

    /// JSON instrument profile, overrides --instrument
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Tune a single string (0 = lowest)
    #[arg(short, long, conflicts_with = "auto_string")]
    string: Option<usize>,

    /// Measure against the nearest open string instead of the nearest note
    #[arg(long)]
    auto_string: bool,

    /// Preferred capture sample rate in Hz
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Samples per analysis frame
    #[arg(long, default_value_t = DEFAULT_FRAME_SIZE)]
    frame_size: usize,

    /// Stop after this many seconds (runs until the stream ends otherwise)
    #[arg(long)]
    seconds: Option<f32>,

    /// Write the selected instrument configuration to this file and exit
    #[arg(long)]
    save_profile: Option<PathBuf>,

    /// List the built-in presets and exit
    #[arg(long)]
    list_presets: bool,
}

/// Handle on the analysis thread.
struct AudioWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("[AUDIO-THREAD] panicked during shutdown");
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_presets {
        for name in instrument::preset_names() {
            let config = instrument::preset(name)?;
            let strings: Vec<_> = config.strings.iter().map(|s| s.name.as_str()).collect();
            println!(
                "{:<10} {:>6.1}-{:<6.1} Hz  {}",
                name,
                config.min_frequency,
                config.max_frequency,
                strings.join(" ")
            );
        }
        return Ok(());
    }

    let config = load_instrument(&args)?;

    if let Some(path) = &args.save_profile {
        instrument::save_profile(&config, path)?;
        println!("Saved '{}' to {}", config.name, path.display());
        return Ok(());
    }

    let mode = match (args.string, args.auto_string) {
        (Some(index), _) => {
            let target = config.string(index)?;
            TuningMode::Manual {
                string_index: index,
                note_name: target.name.clone(),
                target_freq: target.frequency,
            }
        }
        (None, true) => TuningMode::AutoString,
        (None, false) => TuningMode::Auto,
    };

    let (publisher, reader) = publish::snapshot_channel();
    let (notifier, lock_events) = publish::lock_event_channel(4);
    let mut tuner = Tuner::new(config)?
        .with_publisher(publisher)
        .with_lock_notifier(notifier);
    tuner.set_mode(mode.clone());

    info!("[MAIN] Starting audio processing in {:?} mode", mode);
    let worker = start_audio_processing(tuner, args.frame_size, args.sample_rate);

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs_f32(s.max(0.0)));
    run_display(&reader, &lock_events, &worker, deadline);

    println!();
    info!("[MAIN] Shutting down audio worker...");
    worker.shutdown();
    Ok(())
}

fn load_instrument(args: &Args) -> Result<InstrumentConfig> {
    match &args.profile {
        Some(path) => instrument::load_profile(path)
            .with_context(|| format!("loading profile {}", path.display())),
        None => instrument::preset(&args.instrument).map_err(|e| {
            anyhow!(
                "{} (available: {})",
                e,
                instrument::preset_names().join(", ")
            )
        }),
    }
}

/// Spawns the thread that owns the capture stream and the tuner.
///
/// The CPAL stream is not `Send`, so it is created and dropped on this thread.
fn start_audio_processing(mut tuner: Tuner, frame_size: usize, sample_rate: u32) -> AudioWorker {
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    let thread_handle = thread::spawn(move || {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<SampleFrame>(8);

        let (stream, rate) = match audio::start_audio_capture(frame_tx, frame_size, sample_rate) {
            Ok(started) => started,
            Err(e) => {
                error!("[AUDIO-THREAD] Fatal error starting audio: {:#}", e);
                return;
            }
        };
        info!("[AUDIO-THREAD] Capturing at {} Hz", rate);

        loop {
            crossbeam_channel::select! {
                recv(frame_rx) -> msg => match msg {
                    Ok(frame) => {
                        tuner.process_frame(&frame, Instant::now());
                    }
                    Err(_) => {
                        error!("[AUDIO-THREAD] Audio channel closed");
                        break;
                    }
                },
                recv(shutdown_rx) -> _ => {
                    info!("[AUDIO-THREAD] Received shutdown signal");
                    break;
                },
            }
        }

        tuner.stop();
        if let Err(e) = stream.pause() {
            error!("[AUDIO-THREAD] Error pausing stream: {}", e);
        }
        drop(stream);
        info!("[AUDIO-THREAD] Audio thread finished");
    });

    AudioWorker {
        shutdown_tx,
        thread_handle: Some(thread_handle),
    }
}

fn run_display(
    reader: &SnapshotReader,
    lock_events: &Receiver<LockEvent>,
    worker: &AudioWorker,
    deadline: Option<Instant>,
) {
    let mut last_lock: Option<LockEvent> = None;
    let stdout = std::io::stdout();

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if worker.thread_handle.as_ref().is_some_and(|h| h.is_finished()) {
            break;
        }

        while let Ok(event) = lock_events.try_recv() {
            // Terminal bell stands in for audio/haptic feedback
            print!("\x07");
            info!("in tune: {} ({:.2} Hz)", event.note, event.frequency);
            last_lock = Some(event);
        }

        let snapshot = reader.load();
        if snapshot.state != TuningState::InTune {
            last_lock = None;
        }

        let mut out = stdout.lock();
        let _ = write!(out, "\r{}", render_line(&snapshot, last_lock.as_ref()));
        let _ = out.flush();
        drop(out);

        thread::sleep(DISPLAY_INTERVAL);
    }
}

fn render_line(snapshot: &TuningSnapshot, lock: Option<&LockEvent>) -> String {
    let label = match snapshot.state {
        TuningState::NoSignal => "  ---  ",
        TuningState::Flat => " FLAT  ",
        TuningState::Sharp => " SHARP ",
        TuningState::Close => " close ",
        TuningState::InTune => "IN TUNE",
    };

    let mut meter = vec!['-'; METER_WIDTH];
    let center = METER_WIDTH / 2;
    meter[center] = '|';
    if snapshot.state != TuningState::NoSignal {
        let offset = (snapshot.needle * center as f32).round() as isize;
        let pos = (center as isize + offset).clamp(0, METER_WIDTH as isize - 1) as usize;
        meter[pos] = '^';
    }
    let meter: String = meter.into_iter().collect();

    let note = lock.map(|e| e.note.to_string()).unwrap_or_default();
    format!("[{}] {} {:+6.1} ct {:<4}", meter, label, snapshot.cents, note)
}
