use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dance_deck_core::{
    lock_session, AppConfig, Channel, DanceController, DanceEvent, DanceId, SkeletonRig,
    SoftwareAudio,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> dance_deck_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let controller = DanceController::from_config(
        &config,
        Box::new(SoftwareAudio::new()),
        Box::new(SkeletonRig::canonical()),
    )?;
    report_progress(&controller);

    match cli.command {
        Commands::List => run_list(&controller).await,
        Commands::Fetch { id } => controller.fetch(&DanceId::from(id)).await,
        Commands::Sync => run_sync(&controller).await,
        Commands::Local => run_local(&controller),
        Commands::Inspect { id } => run_inspect(&controller, &DanceId::from(id)).await,
        Commands::Play {
            id,
            seconds,
            range,
            rate,
            with_audio,
        } => {
            let options = PlayOptions {
                seconds,
                range,
                rate,
                with_audio,
            };
            run_play(&controller, &DanceId::from(id), options).await
        }
    }
}

fn report_progress(controller: &DanceController) {
    controller
        .events()
        .subscribe_to(Channel::DownloadProgress, |event| {
            if let DanceEvent::DownloadProgress {
                dance,
                fraction,
                phase,
            } = event
            {
                let percent = (fraction * 100.0).round() as u32;
                tracing::info!(%dance, percent, "{phase}");
            }
        });
}

async fn run_list(controller: &DanceController) -> dance_deck_core::Result<()> {
    for dance in controller.resolver().list_remote().await? {
        println!("{dance}");
    }
    Ok(())
}

async fn run_sync(controller: &DanceController) -> dance_deck_core::Result<()> {
    let summary = controller.refresh_all().await?;
    println!(
        "loaded {}, failed {}, timed out {}, skipped {}",
        summary.loaded, summary.failed, summary.timed_out, summary.skipped
    );
    Ok(())
}

fn run_local(controller: &DanceController) -> dance_deck_core::Result<()> {
    for dance in controller.resolver().store().refresh()? {
        println!("{dance}");
    }
    Ok(())
}

async fn run_inspect(controller: &DanceController, dance: &DanceId) -> dance_deck_core::Result<()> {
    controller.load_by_id(dance).await?;
    let session = lock_session(controller.session())?;
    let state = session.playback_state();

    println!("dance:       {dance}");
    println!("frames:      {}", session.total_frames());
    println!("frame rate:  {}", state.frame_rate);
    match session.audio_track() {
        Some(track) => println!(
            "audio:       {:.2}s, {} Hz, {} ch",
            track.duration, track.sample_rate, track.channels
        ),
        None => println!("audio:       none"),
    }
    println!("beats:       {}", session.beat_times().len());
    println!("rms samples: {}", session.rms_values().len());
    let beat_frames = session.analysis().beat_frames(state.frame_rate);
    tracing::debug!(?beat_frames, "beat frames");
    if session.total_frames() > 0 {
        let first = session.scaled_positions(0)?;
        println!("hip @ 0:     {:?}", first[0]);
    }
    Ok(())
}

struct PlayOptions {
    seconds: Option<f64>,
    range: Option<Vec<i64>>,
    rate: Option<f32>,
    with_audio: bool,
}

async fn run_play(
    controller: &DanceController,
    dance: &DanceId,
    options: PlayOptions,
) -> dance_deck_core::Result<()> {
    controller.load_by_id(dance).await?;
    {
        let mut session = lock_session(controller.session())?;
        if let Some(rate) = options.rate {
            session.set_frame_rate(rate)?;
        }
        if let Some([start, end]) = options.range.as_deref() {
            session.set_play_range(*start, *end, true)?;
        }
    }

    let frames_shown = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&frames_shown);
    controller
        .events()
        .subscribe_to(Channel::FrameChanged, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

    let started = if options.with_audio {
        controller.play_with_audio()?
    } else {
        controller.play()?
    };
    if !started {
        tracing::warn!(%dance, "nothing to play");
        return Ok(());
    }

    match options.seconds {
        Some(seconds) => {
            let limit = Duration::from_secs_f64(seconds.max(0.0));
            if tokio::time::timeout(limit, controller.wait_stopped())
                .await
                .is_err()
            {
                controller.pause()?;
            }
        }
        None if options.with_audio => controller.wait_stopped().await,
        None => {
            tokio::signal::ctrl_c().await?;
            controller.pause()?;
        }
    }

    let session = lock_session(controller.session())?;
    tracing::info!(
        frames_shown = frames_shown.load(Ordering::Relaxed),
        stopped_at = session.current_frame(),
        "playback finished"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Motion-capture dance player and editor", long_about = None)]
struct Cli {
    /// JSON configuration file. Missing files fall back to the defaults.
    #[arg(short, long, global = true, default_value = "dance-deck.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the dances available on the server.
    List,
    /// Download a dance into the local store.
    Fetch {
        id: String,
    },
    /// Download every dance the server lists, skipping ones that stall.
    Sync,
    /// List the dances already stored locally.
    Local,
    /// Load a dance and print a summary of its data.
    Inspect {
        id: String,
    },
    /// Load a dance and play it headlessly.
    Play {
        id: String,
        /// Stop after this many seconds.
        #[arg(short, long)]
        seconds: Option<f64>,
        /// Loop between two frames (inclusive).
        #[arg(long, num_args = 2, value_names = ["START", "END"], allow_negative_numbers = true)]
        range: Option<Vec<i64>>,
        /// Override the configured frame rate.
        #[arg(long)]
        rate: Option<f32>,
        /// Play the audio track along and stop when it ends.
        #[arg(long)]
        with_audio: bool,
    },
}
