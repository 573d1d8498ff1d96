use super::cancel::CancelToken;
use super::configurators::{Configurable, ConfiguredValue};
use super::error::JobError;
use super::output::OutputData;
use super::progress::{FrameLoop, ProgressReporter};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// How the steps of a job are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunningMode {
    #[default]
    Monoprocessor,
    /// `workers == 0` uses every available core.
    Multiprocessor {
        #[serde(default)]
        workers: usize,
    },
}

impl RunningMode {
    pub fn workers(&self) -> usize {
        match *self {
            Self::Monoprocessor => 1,
            Self::Multiprocessor { workers: 0 } => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            Self::Multiprocessor { workers } => workers,
        }
    }
}

/// An analysis split into independent steps.
///
/// The runtime calls [`initialize`](Job::initialize) once, [`run_step`](Job::run_step)
/// for every step (possibly concurrently), [`combine`](Job::combine) serially for each
/// payload in completion order, then [`finalize`](Job::finalize).
pub trait Job: Send + Sync {
    type Payload: Send;

    fn name(&self) -> &'static str;

    fn configuration(&self) -> &Configurable;

    /// Allocates the outputs and returns the number of steps.
    fn initialize(&mut self) -> Result<usize, JobError>;

    fn run_step(&self, index: usize) -> Result<Self::Payload, JobError>;

    /// Folds one payload into the outputs. `index` identifies the step.
    fn combine(&mut self, index: usize, payload: Self::Payload) -> Result<(), JobError>;

    /// Normalizes the accumulated outputs.
    fn finalize(&mut self) -> Result<(), JobError>;

    fn output(&self) -> &OutputData;

    fn take_output(&mut self) -> OutputData;
}

/// How a job run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        output: OutputData,
        /// Files written for the configured output formats.
        written: Vec<PathBuf>,
    },
    /// Stopped by its cancel token. The partial output holds every combined step and
    /// was neither finalized nor written.
    Cancelled {
        completed_steps: usize,
        partial: OutputData,
    },
}

impl JobOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn output(&self) -> &OutputData {
        match self {
            Self::Completed { output, .. } => output,
            Self::Cancelled { partial, .. } => partial,
        }
    }
}

/// Object-safe view of a [`Job`], used by the analysis registry.
pub trait Analysis: Send {
    fn analysis_name(&self) -> &'static str;

    fn configured(&self) -> &Configurable;

    fn execute(
        &mut self,
        cancel: Option<&CancelToken>,
        reporter: &ProgressReporter,
    ) -> Result<JobOutcome, JobError>;
}

impl<J: Job> Analysis for J {
    fn analysis_name(&self) -> &'static str {
        self.name()
    }

    fn configured(&self) -> &Configurable {
        self.configuration()
    }

    fn execute(
        &mut self,
        cancel: Option<&CancelToken>,
        reporter: &ProgressReporter,
    ) -> Result<JobOutcome, JobError> {
        run_job(self, cancel, reporter)
    }
}

/// Header written at the top of every output file.
fn output_info(job: &impl Job) -> String {
    let mut info = format!(
        "{} analysis, mdscatter {}\nparameters:",
        job.name(),
        env!("CARGO_PKG_VERSION")
    );
    for (key, value) in job.configuration().parameters() {
        info.push_str(&format!("\n  {key} = {value}"));
    }
    info
}

/// Runs `job` to completion, cancellation or the first failing step.
///
/// The running mode comes from the job's `running_mode` setting when it has one. After
/// finalization the output is written to the job's `output_files` setting, if any.
///
/// # Errors
///
/// A failing step is reported as [`JobError::Step`] once in-flight steps have drained;
/// the partial output is discarded. Errors from `initialize`, `combine`, `finalize` and
/// from writing the output are returned as they are.
#[instrument(skip_all, name = "job", fields(job = job.name()))]
pub fn run_job<J: Job>(
    job: &mut J,
    cancel: Option<&CancelToken>,
    reporter: &ProgressReporter,
) -> Result<JobOutcome, JobError> {
    let mode = match job.configuration().get("running_mode") {
        Some(ConfiguredValue::RunningMode(mode)) => *mode,
        _ => RunningMode::Monoprocessor,
    };

    reporter.start_stage(job.name());
    let n_steps = job.initialize()?;
    debug!(n_steps, "Initialized job");
    info!(n_steps, ?mode, "Starting job");

    let completed = {
        let mut frames = reporter.frame_loop(n_steps);
        match mode {
            RunningMode::Multiprocessor { .. } if mode.workers() > 1 => {
                run_parallel(job, n_steps, mode.workers(), cancel, &mut frames)?
            }
            _ => run_sequential(job, n_steps, cancel, &mut frames)?,
        }
        frames.completed()
    };

    if completed < n_steps {
        warn!(completed, n_steps, "Job cancelled; returning the partial output");
        reporter.finish_stage();
        return Ok(JobOutcome::Cancelled {
            completed_steps: completed,
            partial: job.take_output(),
        });
    }

    job.finalize()?;
    let written = match job.configuration().get("output_files") {
        Some(ConfiguredValue::OutputFiles(files)) => {
            job.output()
                .write(&files.root, &files.formats, &output_info(&*job))?
        }
        _ => Vec::new(),
    };
    reporter.finish_stage();
    info!(outputs = written.len(), "Job finished");
    Ok(JobOutcome::Completed {
        output: job.take_output(),
        written,
    })
}

fn step_failed(index: usize, error: JobError) -> JobError {
    JobError::Step {
        index,
        source: Box::new(error),
    }
}

/// Combined steps are counted on `frames`.
fn run_sequential<J: Job>(
    job: &mut J,
    n_steps: usize,
    cancel: Option<&CancelToken>,
    frames: &mut FrameLoop,
) -> Result<(), JobError> {
    for index in 0..n_steps {
        if cancel.is_some_and(CancelToken::is_stopped) {
            return Ok(());
        }
        let payload = job.run_step(index).map_err(|e| step_failed(index, e))?;
        job.combine(index, payload)?;
        frames.frame_done();
    }
    Ok(())
}

#[cfg(not(feature = "parallel"))]
fn run_parallel<J: Job>(
    job: &mut J,
    n_steps: usize,
    workers: usize,
    cancel: Option<&CancelToken>,
    frames: &mut FrameLoop,
) -> Result<(), JobError> {
    warn!(workers, "Built without the 'parallel' feature; running single-threaded");
    run_sequential(job, n_steps, cancel, frames)
}

/// Runs batches of steps on a dedicated pool and combines each batch on this thread,
/// in the order the steps completed.
#[cfg(feature = "parallel")]
fn run_parallel<J: Job>(
    job: &mut J,
    n_steps: usize,
    workers: usize,
    cancel: Option<&CancelToken>,
    frames: &mut FrameLoop,
) -> Result<(), JobError> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| JobError::WorkerPool(e.to_string()))?;
    debug!(workers, "Created worker pool");

    let batch_size = workers * 4;
    let failed = AtomicBool::new(false);
    for batch_start in (0..n_steps).step_by(batch_size) {
        if cancel.is_some_and(CancelToken::is_stopped) {
            return Ok(());
        }
        let batch = batch_start..(batch_start + batch_size).min(n_steps);
        let (sender, receiver) = mpsc::channel();
        {
            let shared: &J = job;
            let failed = &failed;
            pool.scope(|scope| {
                for index in batch {
                    let sender = sender.clone();
                    scope.spawn(move |_| {
                        if failed.load(Ordering::Relaxed) {
                            return;
                        }
                        let result = shared.run_step(index);
                        if result.is_err() {
                            failed.store(true, Ordering::Relaxed);
                        }
                        // The receiver outlives the scope.
                        let _ = sender.send((index, result));
                    });
                }
            });
        }
        drop(sender);

        let mut first_error = None;
        let mut results = Vec::new();
        for (index, result) in receiver {
            match result {
                Ok(payload) => results.push((index, payload)),
                Err(e) => {
                    first_error.get_or_insert((index, e));
                }
            }
        }
        if let Some((index, error)) = first_error {
            return Err(step_failed(index, error));
        }
        for (index, payload) in results {
            job.combine(index, payload)?;
            frames.frame_done();
        }
    }
    Ok(())
}
