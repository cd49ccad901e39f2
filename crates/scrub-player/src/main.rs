//! Scrub Player - command-line front end for the scrub playback engine
//!
//! Loads a WAV file into memory, opens the first available audio backend
//! and plays it through a [`PlaybackChannel`], printing the play position,
//! output levels and a coarse spectrum while it runs.
//!
//! Set RUST_LOG=debug for engine-level logging.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;

use scrub_core::audio::{
    create_initialized_sound_player, get_output_devices, AudioBackend, BackendKind, DeviceId,
};
use scrub_core::engine::{to_db, PeakHold, PlaybackChannel, PlayerHub};
use scrub_core::store::{MemoryStore, SampleStore};
use scrub_core::{FramePosition, LoopType};

use config::PlayerConfig;

const STATUS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "scrub-player")]
#[command(about = "Play a WAV file through the scrub playback engine")]
#[command(version)]
struct Args {
    /// WAV file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Loop mode: none, normal, gap or skip
    #[arg(short, long = "loop", default_value = "none")]
    loop_mode: String,

    /// Seek speed; negative plays backwards
    #[arg(short, long, default_value_t = 1.0, allow_negative_numbers = true)]
    speed: f64,

    /// Selection in seconds; playback stays inside it
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    selection: Option<Vec<f64>>,

    /// Start position in seconds (defaults to the selection start)
    #[arg(long)]
    start: Option<f64>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<f64>,

    /// Mute a sound channel (repeatable)
    #[arg(long)]
    mute: Vec<usize>,

    /// Only try this backend: jack, cpal or null
    #[arg(long)]
    backend: Option<String>,

    /// Output device name for the cpal backend
    #[arg(long)]
    device: Option<String>,

    /// Config file (defaults to ~/.config/scrub/player.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if args.list_devices {
        return list_devices();
    }

    let mut config = PlayerConfig::load(args.config.as_deref());
    if let Some(name) = &args.backend {
        config.audio.backends = vec![parse_backend(name)?];
    }
    if let Some(name) = &args.device {
        config.audio.device = Some(DeviceId::new(name.as_str()));
    }

    let loop_type = LoopType::from_name(&args.loop_mode)
        .with_context(|| format!("Unknown loop mode '{}'", args.loop_mode))?;

    let Some(path) = args.file.as_ref() else {
        bail!("No file given");
    };
    let store = Arc::new(
        MemoryStore::from_wav(path).with_context(|| format!("Failed to load {:?}", path))?,
    );
    log::info!(
        "Loaded {:?}: {} channels, {}Hz, {} frames",
        path,
        store.channel_count(),
        store.sample_rate(),
        store.len()
    );

    let hub = PlayerHub::new(&config.meters);
    let player = create_initialized_sound_player(&config.audio, Arc::clone(&hub));
    println!("Playing through {}", player.kind());

    let sound: Arc<dyn SampleStore> = store.clone();
    let channel = PlaybackChannel::new(&hub, sound, &config.transport)?;
    let rate = store.sample_rate();
    let to_frames = |seconds: f64| (seconds.max(0.0) * rate as f64).round() as FramePosition;

    let selection_only = match &args.selection {
        Some(bounds) => {
            let (start, end) = (to_frames(bounds[0]), to_frames(bounds[1]));
            channel
                .set_selection(start.min(store.len()), end.min(store.len()))
                .context("Invalid selection")?;
            true
        }
        None => false,
    };
    for &ch in &args.mute {
        channel
            .set_mute(ch, true)
            .with_context(|| format!("Cannot mute channel {}", ch))?;
    }
    channel.set_seek_speed(args.speed)?;

    let start = match args.start {
        Some(seconds) => to_frames(seconds).min(store.len()),
        None if channel.seek_speed() < 0.0 => {
            if selection_only {
                channel.stop_position()
            } else {
                store.len()
            }
        }
        None if selection_only => channel.start_position(),
        None => 0,
    };
    channel.play(start, loop_type, selection_only)?;

    run(&channel, &hub, player.as_ref(), args.seconds);

    channel.stop();
    drop(channel);
    drop(player);
    println!("Stopped.");
    Ok(())
}

/// Print status until playback ends or `limit` seconds have passed
fn run(channel: &PlaybackChannel, hub: &PlayerHub, player: &dyn AudioBackend, limit: Option<f64>) {
    let started = Instant::now();
    let out_channels = player.format().map(|f| f.channels).unwrap_or(0);
    let rate = channel.sample_rate().max(1) as f64;
    let mut holds: Vec<PeakHold> = (0..out_channels)
        .map(|_| PeakHold::new(hub.meter_config()))
        .collect();

    while channel.is_playing() {
        if limit.is_some_and(|s| started.elapsed().as_secs_f64() >= s) {
            break;
        }
        thread::sleep(STATUS_INTERVAL);

        println!(
            "{:>8.2}s {:?} peak/rms dB [{}] {}",
            channel.position() as f64 / rate,
            channel.play_state(),
            level_columns(hub, &mut holds, Instant::now()),
            spectrum_bar(&hub.frequency_analysis())
        );
    }
}

/// Held peak and RMS of each output channel in dB
fn level_columns(hub: &PlayerHub, holds: &mut [PeakHold], now: Instant) -> String {
    holds
        .iter_mut()
        .enumerate()
        .map(|(ch, hold)| {
            format!(
                "{:>6.1}/{:>6.1}",
                to_db(hold.update(hub.peak_level(ch), now)),
                to_db(hub.rms_level(ch))
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One character per band, height from the band level
fn spectrum_bar(bands: &[f32]) -> String {
    const LEVELS: [char; 8] = [' ', '.', ':', '-', '=', '+', '*', '#'];
    bands
        .iter()
        .map(|&level| {
            // Map -60..0 dB onto the character ramp
            let db = to_db(level).clamp(-60.0, 0.0);
            let index = ((db + 60.0) / 60.0 * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[index.min(LEVELS.len() - 1)]
        })
        .collect()
}

fn parse_backend(name: &str) -> Result<BackendKind> {
    match name.to_ascii_lowercase().as_str() {
        "jack" => Ok(BackendKind::Jack),
        "cpal" => Ok(BackendKind::Cpal),
        "null" | "none" => Ok(BackendKind::Null),
        other => bail!("Unknown backend '{}'", other),
    }
}

fn list_devices() -> Result<()> {
    let devices = get_output_devices()?;
    if devices.is_empty() {
        println!("No output devices found");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrub_core::config::MeterConfig;
    use scrub_core::OutputFormat;

    #[test]
    fn test_parse_backend() {
        assert_eq!(parse_backend("JACK").unwrap(), BackendKind::Jack);
        assert_eq!(parse_backend("cpal").unwrap(), BackendKind::Cpal);
        assert_eq!(parse_backend("none").unwrap(), BackendKind::Null);
        assert!(parse_backend("asio").is_err());
    }

    #[test]
    fn test_spectrum_bar_ramp() {
        assert_eq!(spectrum_bar(&[0.0, 1.0]), " #");
        assert_eq!(spectrum_bar(&[]), "");
    }

    #[test]
    fn test_level_columns_hold_the_last_peak() {
        let hub = PlayerHub::new(&MeterConfig::default());
        hub.initialize(OutputFormat::new(44100, 2, 256)).unwrap();
        let mut holds = vec![PeakHold::new(hub.meter_config()); 2];
        let now = Instant::now();
        holds[0].update(0.5, now);

        // Nothing mixed since, but the first channel's peak is still held
        let columns = level_columns(&hub, &mut holds, now);
        assert_eq!(columns, "  -6.0/ -96.0  -96.0/ -96.0");
    }

    #[test]
    fn test_args_selection_and_speed() {
        let args = Args::parse_from([
            "scrub-player",
            "take.wav",
            "--loop",
            "gap",
            "--speed",
            "-2",
            "--selection",
            "1.5",
            "3",
        ]);
        assert_eq!(args.file, Some(PathBuf::from("take.wav")));
        assert_eq!(args.speed, -2.0);
        assert_eq!(args.selection, Some(vec![1.5, 3.0]));
        assert_eq!(LoopType::from_name(&args.loop_mode), Some(LoopType::GapBeforeRepeat));
    }

    #[test]
    fn test_file_optional_when_listing() {
        let args = Args::parse_from(["scrub-player", "--list-devices"]);
        assert!(args.list_devices);
        assert!(args.file.is_none());
    }
}
