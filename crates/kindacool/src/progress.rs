use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a long cluster operation runs
///
/// Hidden in verbose mode so it doesn't interleave with log lines.
pub struct ClusterProgress {
    progress_bar: ProgressBar,
}

impl ClusterProgress {
    pub fn new(message: &str, verbose: bool) -> Self {
        let pb = if verbose {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));

        Self { progress_bar: pb }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    pub fn finish_success(&self, message: &str) {
        self.progress_bar
            .finish_with_message(format!("{} {}", "✓".green(), message));
    }

    pub fn finish_error(&self) {
        self.progress_bar.abandon_with_message("failed".red().to_string());
    }
}
