use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const TEMPLATE_BAR: &str =
    "{prefix:.bold} {msg:.bold} [{elapsed_precise}] {bar:40.green/blue} {pos:>6}/{len:6} ETA {eta}";
const TEMPLATE_SPINNER: &str = "{prefix:.bold} {spinner:.yellow} {msg} [{elapsed_precise}]";

fn draw_target(enabled: bool) -> ProgressDrawTarget {
    if enabled {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    }
}

/// Bar over `n` realisation draws. Hidden when `enabled` is false.
pub fn realisation_bar(n: u64, enabled: bool) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(n), draw_target(enabled));
    let style = ProgressStyle::with_template(TEMPLATE_BAR)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb.set_prefix("Sampling");
    pb.set_message("realisations");
    pb
}

/// Spinner for one setup stage such as solving the DLT equations.
pub fn stage_spinner(stage: &str, msg: &str, enabled: bool) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(None, draw_target(enabled));
    let style = ProgressStyle::with_template(TEMPLATE_SPINNER)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("|/-\\ ");
    pb.set_style(style);
    pb.set_prefix(stage.to_string());
    pb.set_message(msg.to_string());
    if enabled {
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb
}
