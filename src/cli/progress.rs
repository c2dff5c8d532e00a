//! Live stage display for `generate`.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::{PipelineEvent, Stage};

/// Renders pipeline events as one spinner line per stage.
#[derive(Default)]
pub struct StageProgress {
    current: Option<ProgressBar>,
}

impl StageProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage, .. } => {
                let spinner = ProgressBar::new_spinner();
                spinner.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg} {elapsed:.dim}")
                        .unwrap(),
                );
                spinner.set_message(label(stage).to_string());
                spinner.enable_steady_tick(Duration::from_millis(100));
                self.current = Some(spinner);
            }
            PipelineEvent::StageCompleted { stage, detail, .. } => {
                let line = format!("{} {} {}", style("✓").green(), label(stage), style(detail).dim());
                self.finish_line(line);
            }
            PipelineEvent::StageFailed { stage, error, .. } => {
                let line = format!("{} {} {}", style("✗").red(), label(stage), error);
                self.finish_line(line);
            }
            PipelineEvent::Finished { outcome, elapsed } => {
                if let Some(spinner) = self.current.take() {
                    spinner.finish_and_clear();
                }
                let mark = if outcome == Stage::Done {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                eprintln!("{} {} in {:.1}s", mark, outcome, elapsed.as_secs_f64());
            }
        }
    }

    fn finish_line(&mut self, line: String) {
        match self.current.take() {
            Some(spinner) => {
                spinner.finish_and_clear();
                eprintln!("{}", line);
            }
            None => eprintln!("{}", line),
        }
    }
}

fn label(stage: Stage) -> &'static str {
    match stage {
        Stage::Analyzing => "Analyzing source",
        Stage::SchemaSynth => "Synthesizing schemas",
        Stage::Rendering => "Rendering connector",
        Stage::Materializing => "Writing workspace",
        Stage::Deploying => "Deploying",
        Stage::Done => "Done",
        Stage::Failed => "Failed",
    }
}
