// ABOUTME: Compilation scheduler for the beamer-preview application
// ABOUTME: Runs slide jobs on a fixed-size worker pool and stops early on fatal failures

use crate::assembler;
use crate::cancel::CancelToken;
use crate::compiler::{CompilationJob, SlideCompiler};
use crate::errors::PreviewError;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

/// How a single job ended
#[derive(Debug)]
pub enum JobOutcome {
    /// The compiler produced a usable PDF at this path
    Compiled(PathBuf),
    Failed(PreviewError),
    /// The job never ran, or was stopped, because the pool was cancelled
    Cancelled,
}

#[derive(Debug)]
pub struct JobResult {
    pub job: CompilationJob,
    pub outcome: JobOutcome,
}

impl JobResult {
    /// A failure that was not downgraded by `ignore_errors`
    pub fn is_fatal(&self) -> bool {
        match &self.outcome {
            JobOutcome::Failed(err) => !(self.job.ignore_errors && err.is_ignorable()),
            _ => false,
        }
    }
}

/// Bounded worker pool for compiler jobs
pub struct Scheduler<'a> {
    compiler: &'a dyn SlideCompiler,
    concurrency: usize,
}

impl<'a> Scheduler<'a> {
    pub fn new(compiler: &'a dyn SlideCompiler, concurrency: usize) -> Self {
        Self {
            compiler,
            concurrency: concurrency.max(1),
        }
    }

    /// Run every job and return their results in completion order.
    ///
    /// At most `concurrency` jobs execute at once. The first fatal failure
    /// cancels the pool: queued jobs resolve as `Cancelled` and running
    /// compilers are asked to stop. Cancelling `cancel` has the same effect.
    pub fn run(&self, jobs: Vec<CompilationJob>, cancel: &CancelToken) -> Vec<JobResult> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let total = jobs.len();
        let workers = self.concurrency.min(total);
        info!("Compiling {} slide(s) on {} worker(s)", total, workers);

        let queue = Mutex::new(VecDeque::from(jobs));
        let pool = cancel.child();
        let (tx, rx) = mpsc::channel();
        let mut results = Vec::with_capacity(total);

        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                let pool = &pool;
                let compiler = self.compiler;
                scope.spawn(move || loop {
                    let Some(job) = queue.lock().pop_front() else {
                        break;
                    };
                    let outcome = if pool.is_cancelled() {
                        JobOutcome::Cancelled
                    } else {
                        debug!("Worker {} takes slide {}", worker, job.index());
                        execute(compiler, &job, pool)
                    };
                    let result = JobResult { job, outcome };
                    // Cancel before reporting so no worker picks up another job
                    if result.is_fatal() && !pool.is_cancelled() {
                        debug!(
                            "Slide {} failed; cancelling remaining jobs",
                            result.job.index()
                        );
                        pool.cancel();
                    }
                    if tx.send(result).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            results.extend(rx);
        });

        results
    }
}

/// Prepare, compile and validate one job
fn execute(compiler: &dyn SlideCompiler, job: &CompilationJob, cancel: &CancelToken) -> JobOutcome {
    info!("Compiling slide {} ({})", job.index(), job.slide.kind);

    if let Err(e) = job.prepare() {
        return JobOutcome::Failed(job.failure(format!("could not write slide source: {}", e)));
    }

    match compiler.compile(job, cancel) {
        Ok(pdf) => match assembler::page_count(&pdf) {
            Ok(0) => JobOutcome::Failed(job.failure("compiler output has no pages")),
            Ok(_) => JobOutcome::Compiled(pdf),
            Err(e) => JobOutcome::Failed(job.failure(format!("unreadable compiler output: {}", e))),
        },
        Err(PreviewError::Cancelled) => JobOutcome::Cancelled,
        Err(e) => JobOutcome::Failed(e),
    }
}
