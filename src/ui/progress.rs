use crate::progress::{ProgressMessage, ProgressSender};
use crate::ui::{theme, Icons};
use indicatif::{HumanDuration, MultiProgress, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// Progress bars driven from a channel, one bar per phase
///
/// Library code only sends [`ProgressMessage`]s; the bars live on a UI thread
/// so a slow terminal never holds up a reindex or migration.
pub struct ProgressManager {
    mp: MultiProgress,
    handle: Option<thread::JoinHandle<usize>>,
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {msg:<32} [{bar:30}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl ProgressManager {
    pub fn new() -> (Self, ProgressSender) {
        let (tx, rx) = crossbeam::channel::unbounded::<ProgressMessage>();
        let mp = MultiProgress::new();
        let visible = console::Term::stdout().is_term();
        let mp_clone = mp.clone();

        let handle = thread::spawn(move || {
            let mut bars: HashMap<String, ProgressBar> = HashMap::new();
            let mut warnings = 0;
            for msg in rx {
                match msg {
                    ProgressMessage::Started { phase, total } => {
                        let bar = if !visible {
                            ProgressBar::hidden()
                        } else if total > 0 {
                            let bar = mp_clone.add(ProgressBar::new(total as u64));
                            bar.set_style(bar_style());
                            bar
                        } else {
                            let bar = mp_clone.add(ProgressBar::new_spinner());
                            bar.enable_steady_tick(Duration::from_millis(100));
                            bar
                        };
                        bar.set_message(phase.to_string());
                        bars.insert(phase.to_string(), bar);
                    }
                    ProgressMessage::Progress { phase, current } => {
                        if let Some(bar) = bars.get(&phase.to_string()) {
                            bar.set_position(current as u64);
                        }
                    }
                    ProgressMessage::Finished { phase } => {
                        if let Some(bar) = bars.remove(&phase.to_string()) {
                            bar.finish_with_message(format!("{} done", phase));
                        }
                    }
                    ProgressMessage::Warning(text) => {
                        warnings += 1;
                        let _ = mp_clone.println(format!("{} {}", Icons::WARN, text.style(theme().warn)));
                    }
                }
            }
            warnings
        });

        (Self { mp, handle: Some(handle) }, tx)
    }

    /// Wait for the UI thread once every sender is dropped; returns the warning count
    pub fn join(mut self) -> usize {
        let warnings = self
            .handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0);
        self.mp.clear().ok();
        warnings
    }

    pub fn finish_with_summary(self, duration: Duration, records: usize, references: usize) -> usize {
        let warnings = self.join();
        println!();
        println!(
            "{} {}",
            Icons::CHECK.style(theme().success),
            format!("Complete in {}", HumanDuration(duration)).style(theme().success)
        );
        println!(
            "  {} {} records  {} {} references",
            Icons::PACKAGE.style(theme().info),
            records,
            Icons::LINK.style(theme().info),
            references
        );
        warnings
    }
}

pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = if console::Term::stdout().is_term() {
            let pb = ProgressBar::new_spinner();
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(message.to_string());
        Self { pb }
    }

    pub fn finish_with_message(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }
}

