mod output;

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use radial_visualiser_core::{
    AppConfig, FileFetcher, FrameStats, PlaybackState, RingGeometry, SourceDescriptor, Visualiser,
    VisualiserError,
};
use tracing_subscriber::EnvFilter;

use crate::output::OutputDevice;

/// Frames pulled per offline render call.
const OFFLINE_CHUNK: usize = 1024;

fn main() -> radial_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Play { input } => run_device(config, &input),
        Commands::Offline { input, paced } => run_offline(config, &input, paced),
        Commands::Layout => print_layout(&config),
    }
}

fn load_config(path: Option<&Path>) -> radial_visualiser_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn run_device(mut config: AppConfig, input: &Path) -> radial_visualiser_core::Result<()> {
    let device = OutputDevice::open_default()?;
    config.audio.sample_rate = device.sample_rate();

    let visualiser = build_and_load(config, input)?;
    let events = visualiser.subscribe()?;
    let stats = visualiser.stats();
    let shared = Arc::new(Mutex::new(visualiser));

    lock(&shared)?.play()?;
    let stream = device.start(Arc::clone(&shared))?;

    loop {
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(event) if event.to == PlaybackState::Ended => break,
            Ok(_) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                tracing::info!(frames = stats.frames(), overruns = stats.overruns(), "rendering");
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    drop(stream);
    lock(&shared)?.teardown();
    tracing::info!(frames = stats.frames(), overruns = stats.overruns(), "playback finished");
    Ok(())
}

fn run_offline(config: AppConfig, input: &Path, paced: bool) -> radial_visualiser_core::Result<()> {
    let channels = 2;
    let sample_rate = config.audio.sample_rate;
    let mut visualiser = build_and_load(config, input)?;
    let chunk_duration = Duration::from_secs_f64(OFFLINE_CHUNK as f64 / sample_rate as f64);
    let mut output = vec![0.0; OFFLINE_CHUNK * channels];

    visualiser.play()?;
    let started = Instant::now();
    let mut chunks: u32 = 0;
    while visualiser.state() == PlaybackState::Playing {
        visualiser.render(&mut output, channels)?;
        chunks += 1;
        if paced {
            let target = chunk_duration * chunks;
            if let Some(wait) = target.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }

    let stats = visualiser.stats();
    let surface = visualiser.surface();
    let bars = lock(&surface)?.bars_in_last_frame;
    visualiser.teardown();
    tracing::info!(
        frames = stats.frames(),
        overruns = stats.overruns(),
        bars,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "offline run finished"
    );
    Ok(())
}

fn build_and_load(config: AppConfig, input: &Path) -> radial_visualiser_core::Result<Visualiser<FrameStats>> {
    let surface = FrameStats::new(config.layout.width, config.layout.height);
    let mut visualiser = Visualiser::new(config, surface)?;
    let events = visualiser.subscribe()?;

    let state = visualiser.load(
        SourceDescriptor::new(input.to_string_lossy()),
        &FileFetcher::new(),
    )?;
    if state == PlaybackState::Failed {
        let reason = events
            .try_iter()
            .find_map(|event| event.error)
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(VisualiserError::invalid_state(format!(
            "could not load {}: {reason}",
            input.display()
        )));
    }
    Ok(visualiser)
}

fn print_layout(config: &AppConfig) -> radial_visualiser_core::Result<()> {
    config.validate()?;
    let layout = &config.layout;
    let geometry = RingGeometry::compute(layout, layout.width, layout.height, config.audio.fft_size / 2);
    println!("{}", describe_geometry(&geometry));
    Ok(())
}

fn describe_geometry(geometry: &RingGeometry) -> String {
    format!(
        "radius={} max_bars={} bars={} bin_stride={} step_deg={:.3} offset_deg={:.3}",
        geometry.radius,
        geometry.max_bars,
        geometry.bar_count,
        geometry.bin_stride,
        geometry.angle_step.to_degrees(),
        geometry.base_offset.to_degrees()
    )
}

fn lock<T>(shared: &Mutex<T>) -> radial_visualiser_core::Result<std::sync::MutexGuard<'_, T>> {
    shared
        .lock()
        .map_err(|_| VisualiserError::invalid_state("visualiser lock has been poisoned"))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive radial bar visualiser", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields use defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a WAV file on the default output device while rendering.
    Play {
        /// Path to the audio file.
        input: PathBuf,
    },
    /// Run the pipeline without an output device.
    Offline {
        /// Path to the audio file.
        input: PathBuf,
        /// Sleep between chunks to follow real time.
        #[arg(long)]
        paced: bool,
    },
    /// Print the ring geometry derived from the configuration.
    Layout,
}
