use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mdscatter::engine::progress::{Progress, ProgressCallback};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const SPINNER_TICK_MS: u64 = 100;
const SPINNER_TEMPLATE: &str = "{spinner:.green} {prefix:.bold} {msg}";
const STEP_TEMPLATE: &str =
    "{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} steps ({per_sec}, {eta} left) {msg}";

struct BarState {
    bar: ProgressBar,
    stage: Option<&'static str>,
}

impl BarState {
    fn apply(&mut self, event: Progress) {
        match event {
            Progress::StageStarted { stage } => {
                debug!(stage, "Stage started");
                self.stage = Some(stage);
                self.bar.reset();
                self.bar.set_length(0);
                self.bar.set_style(spinner_style());
                self.bar.set_prefix(stage);
                self.bar.set_message("");
                self.bar.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
            }
            Progress::FramesPlanned { frames } => {
                self.bar.disable_steady_tick();
                self.bar.reset();
                self.bar.set_style(step_style());
                self.bar.set_length(frames);
                self.bar.set_message("");
            }
            Progress::FrameDone => self.bar.inc(1),
            Progress::FramesEnded => {
                let done = self.bar.position();
                match self.bar.length() {
                    Some(total) if done < total => {
                        self.bar.abandon_with_message(format!("stopped after {done} of {total} steps"));
                    }
                    _ => self.bar.finish(),
                }
            }
            Progress::StageFinished => {
                self.bar.disable_steady_tick();
                let stage = self.stage.take().unwrap_or("Analysis");
                self.bar.finish_with_message(format!("✓ {stage} finished"));
            }
            Progress::Note(text) => {
                if self.bar.is_finished() {
                    self.bar.set_message(text);
                } else {
                    self.bar.println(format!("  {text}"));
                }
            }
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn step_style() -> ProgressStyle {
    ProgressStyle::with_template(STEP_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Draws the stages and frame loops of a running analysis on stderr.
#[derive(Clone)]
pub struct CliProgressHandler {
    state: Arc<Mutex<BarState>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Tracks progress without drawing.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), target).with_style(spinner_style());
        bar.finish_and_clear();
        Self {
            state: Arc::new(Mutex::new(BarState { bar, stage: None })),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let state = Arc::clone(&self.state);
        Box::new(move |event: Progress| match state.lock() {
            Ok(mut guard) => guard.apply(event),
            Err(_) => warn!("Progress state is poisoned; dropping a progress event."),
        })
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}
