//! Terminal reporting for the `edgeview` binary.
//!
//! Spinners on a TTY, `==>` lines on stderr otherwise.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    quiet_logs: bool,
}

impl Ui {
    /// `quiet_logs` is false when verbose logging would interleave with a spinner.
    pub fn new(mode: UiMode, is_tty: bool, quiet_logs: bool) -> Self {
        Self {
            mode,
            is_tty,
            quiet_logs,
        }
    }

    fn pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => self.quiet_logs,
                UiMode::Plain => false,
            }
    }

    fn spinner(&self, template: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner
    }

    /// Report a stage; completion and elapsed time are printed on drop.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.pretty() {
            let spinner = self.spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// Count frames written during a stage.
    pub fn frames(&self, name: &str) -> FrameProgress {
        let spinner = if self.pretty() {
            let spinner = self.spinner("{spinner} {msg} [{pos} frames]");
            spinner.set_message(name.to_string());
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        FrameProgress {
            name: name.to_string(),
            start: Instant::now(),
            written: 0,
            spinner,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

pub struct FrameProgress {
    name: String,
    start: Instant,
    written: u64,
    spinner: Option<ProgressBar>,
}

impl FrameProgress {
    pub fn frame_written(&mut self, sequence: u64, path: &std::path::Path) {
        self.written += 1;
        match &self.spinner {
            Some(spinner) => spinner.inc(1),
            None => eprintln!("    frame {} -> {}", sequence, path.display()),
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Drop for FrameProgress {
    fn drop(&mut self) {
        let message = format!(
            "✔ {}: {} frames ({})",
            self.name,
            self.written,
            format_duration(self.start.elapsed())
        );
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_without_tty() {
        assert!(!Ui::new(UiMode::Pretty, false, true).pretty());
        assert!(!Ui::new(UiMode::Plain, true, true).pretty());
        assert!(Ui::new(UiMode::Pretty, true, false).pretty());
        assert!(!Ui::new(UiMode::Auto, true, false).pretty());
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn frame_progress_counts_writes() {
        let ui = Ui::new(UiMode::Plain, false, true);
        let mut progress = ui.frames("video");
        progress.frame_written(1, std::path::Path::new("frame_1.png"));
        progress.frame_written(2, std::path::Path::new("frame_2.png"));
        assert_eq!(progress.written(), 2);
    }
}
