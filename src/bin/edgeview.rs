//! edgeview - run the edge-detection pipeline from the command line
//!
//! Selects one source, subscribes to the published result and writes every
//! new frame to `<out>/frame_<sequence>.png`.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use edgeview::ingest::open_camera;
use edgeview::ui::{FrameProgress, Ui, UiMode};
use edgeview::{
    CancelToken, EdgeviewConfig, PublishedFrame, ResultPublisher, SessionController,
    SessionState, SourceSelection, Subscription,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Output directory for published frames (overrides config).
    #[arg(long, global = true, env = "EDGEVIEW_OUTPUT_DIR", value_name = "DIR")]
    out: Option<PathBuf>,
    /// UI mode for stderr progress.
    #[arg(long, global = true, value_enum, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one still image (path or stub:// reference).
    Still { reference: String },
    /// Sample a video every ten seconds (path or stub:// reference).
    Video { reference: String },
    /// Stream from the configured camera until Ctrl-C.
    Camera {
        /// Stop after this many seconds.
        #[arg(long)]
        seconds: Option<u64>,
        /// Camera device (overrides config).
        #[arg(long, env = "EDGEVIEW_CAMERA_DEVICE")]
        device: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = EdgeviewConfig::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.as_str()),
    )
    .init();

    let is_tty = std::io::stderr().is_terminal();
    let quiet_logs = std::env::var_os("RUST_LOG").is_none();
    let ui = Ui::new(args.ui, is_tty, quiet_logs);

    let out_dir = args.out.clone().unwrap_or_else(|| config.output_dir.clone());
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("create output directory {}", out_dir.display()))?;

    let shutdown = CancelToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {e}"))?;

    let publisher = Arc::new(ResultPublisher::new());
    let mut sub = publisher.subscribe();
    let mut controller = SessionController::new(Arc::clone(&publisher));

    let written = match args.command {
        Command::Still { reference } => {
            {
                let _stage = ui.stage(&format!("Process still {reference}"));
                controller.select_source(SourceSelection::StillImage(reference.clone()))?;
            }
            let mut progress = ui.frames("Write output");
            if let Some(frame) = sub.poll() {
                let path = write_frame(&out_dir, &frame)?;
                progress.frame_written(frame.sequence, &path);
            }
            progress.written()
        }
        Command::Video { reference } => {
            controller.select_source(SourceSelection::Video(reference.clone()))?;
            let mut progress = ui.frames(&format!("Sample video {reference}"));
            drain(&mut controller, &mut sub, &out_dir, &mut progress, &shutdown, None)?;
            progress.written()
        }
        Command::Camera { seconds, device } => {
            let device = device.unwrap_or_else(|| config.camera.device.clone());
            let camera = {
                let _stage = ui.stage(&format!("Open camera {device}"));
                open_camera(
                    &device,
                    config.camera.width,
                    config.camera.height,
                    config.camera.target_fps,
                )?
            };
            controller = controller.with_camera(camera);
            controller.select_source(SourceSelection::LiveCamera)?;
            let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
            let mut progress = ui.frames(&format!("Stream camera {device}"));
            drain(
                &mut controller,
                &mut sub,
                &out_dir,
                &mut progress,
                &shutdown,
                deadline,
            )?;
            progress.written()
        }
    };

    controller.stop();
    if written == 0 {
        return Err(anyhow!("no frame was published"));
    }
    log::info!("wrote {} frames to {}", written, out_dir.display());
    Ok(())
}

/// Write published frames until the session goes idle, the deadline passes
/// or Ctrl-C arrives.
fn drain(
    controller: &mut SessionController,
    sub: &mut Subscription,
    out_dir: &Path,
    progress: &mut FrameProgress,
    shutdown: &CancelToken,
    deadline: Option<Instant>,
) -> Result<()> {
    loop {
        if let Some(frame) = sub.wait(POLL_INTERVAL) {
            let path = write_frame(out_dir, &frame)?;
            progress.frame_written(frame.sequence, &path);
        }
        if shutdown.is_cancelled() {
            log::info!("shutdown signal received, stopping session");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if controller.state() == SessionState::Idle {
            break;
        }
    }
    controller.stop();
    if let Some(frame) = sub.poll() {
        let path = write_frame(out_dir, &frame)?;
        progress.frame_written(frame.sequence, &path);
    }
    Ok(())
}

fn write_frame(out_dir: &Path, published: &PublishedFrame) -> Result<PathBuf> {
    let path = out_dir.join(format!("frame_{}.png", published.sequence));
    published
        .frame
        .to_rgba_image()?
        .save(&path)
        .with_context(|| format!("write {}", path.display()))?;
    log::debug!("wrote {}", path.display());
    Ok(path)
}
