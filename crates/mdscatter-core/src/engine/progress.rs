/// What an analysis or an import tells whoever is watching it.
///
/// A stage wraps one frame loop. Fewer [`Progress::FrameDone`] events than the
/// [`Progress::FramesPlanned`] count before [`Progress::FramesEnded`] means the loop
/// stopped early, through cancellation or a failing step.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// An analysis, by its registry name, or `Import`.
    StageStarted { stage: &'static str },
    StageFinished,

    FramesPlanned { frames: u64 },
    FrameDone,
    FramesEnded,

    Note(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

/// Forwards [`Progress`] events to an optional observer.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    /// A reporter nobody listens to.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    pub fn start_stage(&self, stage: &'static str) {
        self.report(Progress::StageStarted { stage });
    }

    pub fn finish_stage(&self) {
        self.report(Progress::StageFinished);
    }

    pub fn note(&self, text: impl Into<String>) {
        self.report(Progress::Note(text.into()));
    }

    /// Announces a loop over `frames` steps. The loop ends when the returned guard drops.
    pub fn frame_loop(&self, frames: usize) -> FrameLoop<'_, 'a> {
        self.report(Progress::FramesPlanned { frames: frames as u64 });
        FrameLoop {
            reporter: self,
            done: 0,
        }
    }
}

/// Counts the frames of one loop and reports [`Progress::FramesEnded`] on drop, so an
/// early return still closes the loop for the observer.
pub struct FrameLoop<'r, 'a> {
    reporter: &'r ProgressReporter<'a>,
    done: usize,
}

impl FrameLoop<'_, '_> {
    #[inline]
    pub fn frame_done(&mut self) {
        self.done += 1;
        self.reporter.report(Progress::FrameDone);
    }

    pub fn completed(&self) -> usize {
        self.done
    }
}

impl Drop for FrameLoop<'_, '_> {
    fn drop(&mut self) {
        self.reporter.report(Progress::FramesEnded);
    }
}
