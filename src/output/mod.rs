use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// The two sinks the orchestrator writes to: `status` for user-facing phase
/// transitions, `verbose` for diagnostic detail that a `-v` user wants but a
/// default run shouldn't show. Neither may buffer indefinitely — a sink is
/// expected to forward each line as it arrives.
pub trait ProgressSink: Send + Sync {
    fn status(&self, msg: &str);
    fn verbose(&self, msg: &str);
    fn warn(&self, msg: &str);
}

/// The real terminal sink, built on the helpers below.
pub struct TerminalSink;

impl ProgressSink for TerminalSink {
    fn status(&self, msg: &str) {
        info(msg);
    }

    fn verbose(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    fn warn(&self, msg: &str) {
        warning(msg);
    }
}

/// A sink that records every line instead of printing it, for tests and for
/// any caller (the reconciler's non-interactive path) that wants to inspect
/// what would have been shown.
#[derive(Default)]
pub struct RecordingSink {
    pub lines: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn status(&self, msg: &str) {
        self.lines.lock().unwrap().push(format!("status: {msg}"));
    }

    fn verbose(&self, msg: &str) {
        self.lines.lock().unwrap().push(format!("verbose: {msg}"));
    }

    fn warn(&self, msg: &str) {
        self.lines.lock().unwrap().push(format!("warn: {msg}"));
    }
}

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn step(num: usize, total: usize, msg: &str) {
    println!(
        "{} {}",
        style(format!("[{}/{}]", num, total)).bold().cyan(),
        msg
    );
}

pub fn success(msg: &str) {
    println!("{} {}", style("✓").bold().green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").bold().red(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", style("!").bold().yellow(), msg);
}

pub fn info(msg: &str) {
    println!("{} {}", style("→").bold().blue(), msg);
}

pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}
