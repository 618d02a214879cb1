//! Terminal output for foreground submissions: a spinner while the job runs
//! and a coloured summary once it reaches a terminal state.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{ItemRecord, JobState, StatusRecord};

/// Spinner and styled output for one job run in the foreground.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    pub fn start(job_id: &str, items: usize, references: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!(
            "Processing {job_id}: {items} items, {references} images"
        ));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Clears the spinner and prints a one-line outcome.
    pub fn complete(&self, record: &StatusRecord) {
        self.pb.finish_and_clear();
        match record.state {
            JobState::Completed => {
                println!("  {} Job {} completed", self.green.apply_to("✓"), record.job_id);
            }
            JobState::Failed => {
                let reason = record.error.as_deref().unwrap_or("unknown error");
                println!(
                    "  {} Job {} failed: {reason}",
                    self.red.apply_to("✗"),
                    record.job_id
                );
            }
            JobState::Processing => {
                println!(
                    "  {} Job {} is still processing",
                    self.yellow.apply_to("…"),
                    record.job_id
                );
            }
        }
    }
}

/// Prints a status record as pretty JSON under a header coloured by state.
pub fn print_record(record: &StatusRecord) {
    let header = match record.state {
        JobState::Completed => Style::new().green(),
        JobState::Failed => Style::new().red(),
        JobState::Processing => Style::new().yellow(),
    };
    println!();
    println!("{}", header.apply_to("─── Job Status ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(record).unwrap_or_default()
    );
}

/// One line per persisted item: name and how many outputs it kept.
pub fn print_items(items: &[ItemRecord]) {
    if items.is_empty() {
        return;
    }
    let dim = Style::new().dim();
    println!();
    println!("{}", dim.apply_to("─── Items ───"));
    for item in items {
        println!(
            "  {:>4}  {}  {}/{} outputs",
            item.position,
            item.name,
            item.outputs.len(),
            item.inputs.len()
        );
    }
}
