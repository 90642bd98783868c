// ABOUTME: Build orchestrator for the beamer-preview application
// ABOUTME: Splits the deck, resolves slides from cache or compiler, and assembles the preview

use crate::assembler::{self, Artifact};
use crate::cache::{ContentCache, Fingerprint};
use crate::cancel::CancelToken;
use crate::compiler::{CompilationJob, ProcessCompiler, SlideCompiler};
use crate::config::BuildOptions;
use crate::errors::{PreviewError, Result};
use crate::scheduler::{JobOutcome, Scheduler};
use crate::splitter::{self, Document, SlideKind};
use crate::utils;
use chrono::{DateTime, Local};
use log::{error, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How one slide was resolved in a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlideOutcome {
    /// Reused from the cache without running the compiler
    CachedHit,
    CompiledOk,
    /// Compilation failed and aborted the build
    CompiledFailed(String),
    /// Compilation failed and an error page took its place
    SkippedWithPlaceholder(String),
    /// Not resolved because the build was cancelled or aborted first
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SlideReport {
    pub index: usize,
    pub kind: SlideKind,
    pub line: usize,
    pub fingerprint: Fingerprint,
    pub outcome: SlideOutcome,
}

#[derive(Debug)]
pub enum BuildStatus {
    /// The preview was assembled; `output` is `None` for an empty deck
    Done { output: Option<PathBuf>, pages: usize },
    Aborted(PreviewError),
}

/// Everything a caller needs to know about one build
#[derive(Debug)]
pub struct BuildResult {
    /// Per-slide outcomes in original slide order
    pub slides: Vec<SlideReport>,
    pub status: BuildStatus,
    pub started: DateTime<Local>,
    pub elapsed: Duration,
}

impl BuildResult {
    fn aborted(err: PreviewError) -> Self {
        Self {
            slides: Vec::new(),
            status: BuildStatus::Aborted(err),
            started: Local::now(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status, BuildStatus::Done { .. })
    }

    pub fn error(&self) -> Option<&PreviewError> {
        match &self.status {
            BuildStatus::Aborted(err) => Some(err),
            BuildStatus::Done { .. } => None,
        }
    }

    pub fn outcomes(&self) -> Vec<&SlideOutcome> {
        self.slides.iter().map(|s| &s.outcome).collect()
    }

    fn count(&self, pred: impl Fn(&SlideOutcome) -> bool) -> usize {
        self.slides.iter().filter(|s| pred(&s.outcome)).count()
    }

    pub fn compiled(&self) -> usize {
        self.count(|o| matches!(o, SlideOutcome::CompiledOk))
    }

    pub fn cached(&self) -> usize {
        self.count(|o| matches!(o, SlideOutcome::CachedHit))
    }

    pub fn placeholders(&self) -> usize {
        self.count(|o| matches!(o, SlideOutcome::SkippedWithPlaceholder(_)))
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} slide(s): {} compiled, {} cached, {} placeholder(s) in {:.2}s",
            self.started.format("%H:%M:%S"),
            self.slides.len(),
            self.compiled(),
            self.cached(),
            self.placeholders(),
            self.elapsed.as_secs_f64()
        )?;
        match &self.status {
            BuildStatus::Done {
                output: Some(path),
                pages,
            } => write!(f, " -> {} page(s) in {:?}", pages, path),
            BuildStatus::Done { output: None, .. } => write!(f, " -> nothing to write"),
            BuildStatus::Aborted(err) => write!(f, " -> aborted: {}", err),
        }
    }
}

/// The incremental build engine.
///
/// Holds the options, the content cache and the compiler for the lifetime of
/// the process; `build` may be called any number of times.
pub struct Previewer {
    options: BuildOptions,
    cache: ContentCache,
    compiler: Box<dyn SlideCompiler>,
}

impl Previewer {
    /// Create a previewer that runs the configured LaTeX engine
    pub fn new(options: BuildOptions) -> Result<Self> {
        Self::with_compiler(options, Box::new(ProcessCompiler::new()))
    }

    /// Create a previewer with a custom compiler implementation
    pub fn with_compiler(options: BuildOptions, compiler: Box<dyn SlideCompiler>) -> Result<Self> {
        options.validate()?;
        let cache = ContentCache::open(&options.cache_dir())?;
        Ok(Self {
            options,
            cache,
            compiler,
        })
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Build the preview for `source`.
    ///
    /// Never panics on bad input; every failure ends up in the returned
    /// status. The output file is only replaced when the build is `Done`.
    pub fn build(&self, source: &str, cancel: &CancelToken) -> BuildResult {
        let started = Local::now();
        let timer = Instant::now();
        let mut slides = Vec::new();

        let status = match self.run(source, cancel, &mut slides) {
            Ok((output, pages)) => BuildStatus::Done { output, pages },
            Err(err) => BuildStatus::Aborted(err),
        };

        BuildResult {
            slides,
            status,
            started,
            elapsed: timer.elapsed(),
        }
    }

    /// Remove cached artifacts that no slide of `source` uses
    pub fn prune(&self, source: &str) -> Result<usize> {
        let document = splitter::split(source)?;
        let live: HashSet<Fingerprint> =
            Fingerprint::all(&document, self.options.fixed_frame_numbers)
                .into_iter()
                .collect();
        self.cache.prune(&live)
    }

    fn run(
        &self,
        source: &str,
        cancel: &CancelToken,
        reports: &mut Vec<SlideReport>,
    ) -> Result<(Option<PathBuf>, usize)> {
        let document = splitter::split(source)?;
        if document.slides.is_empty() {
            warn!("No slides found");
            return Ok((None, 0));
        }

        let (mut artifacts, jobs) = self.resolve_cached(&document, reports);
        if jobs.is_empty() {
            info!("Everything is up to date, no recompilation required");
        }
        if cancel.is_cancelled() {
            return Err(PreviewError::Cancelled);
        }

        let scheduler = Scheduler::new(self.compiler.as_ref(), self.options.concurrency);
        let results = scheduler.run(jobs, cancel);

        let mut first_failure: Option<PreviewError> = None;
        for result in results {
            let index = result.job.index();
            let outcome = match result.outcome {
                JobOutcome::Compiled(pdf) => {
                    let artifact = match self.cache.store(&result.job.fingerprint, &pdf) {
                        Ok(stored) => {
                            utils::remove_dir_quietly(&result.job.working_directory);
                            stored
                        }
                        Err(err) => {
                            warn!("{}; using uncached output for slide {}", err, index);
                            pdf
                        }
                    };
                    artifacts.push((index, Artifact::Stored(artifact)));
                    SlideOutcome::CompiledOk
                }
                JobOutcome::Failed(err) if result.job.ignore_errors && err.is_ignorable() => {
                    let reason = err.to_string();
                    warn!("Slide {} replaced by a placeholder: {}", index, reason);
                    utils::remove_dir_quietly(&result.job.working_directory);
                    artifacts.push((
                        index,
                        Artifact::Placeholder {
                            index,
                            reason: reason.clone(),
                        },
                    ));
                    SlideOutcome::SkippedWithPlaceholder(reason)
                }
                JobOutcome::Failed(err) => {
                    let reason = err.to_string();
                    error!("{}", reason);
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                    SlideOutcome::CompiledFailed(reason)
                }
                JobOutcome::Cancelled => {
                    utils::remove_dir_quietly(&result.job.working_directory);
                    SlideOutcome::Cancelled
                }
            };
            reports[index].outcome = outcome;
        }

        // Only succeeds once every scratch directory is gone.
        let _ = fs::remove_dir(self.options.jobs_dir());

        if let Some(err) = first_failure {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(PreviewError::Cancelled);
        }

        let mut merged = assembler::assemble(artifacts, document.slides.len())?;
        if cancel.is_cancelled() {
            return Err(PreviewError::Cancelled);
        }
        let pages = assembler::write_document(&mut merged, &self.options.output)?;
        info!("Wrote {} page(s) to {:?}", pages, self.options.output);

        Ok((Some(self.options.output.clone()), pages))
    }

    /// Fingerprint every slide, collecting cache hits and jobs for the misses
    fn resolve_cached(
        &self,
        document: &Document,
        reports: &mut Vec<SlideReport>,
    ) -> (Vec<(usize, Artifact)>, Vec<CompilationJob>) {
        let fixed = self.options.fixed_frame_numbers;
        let command = self.options.compiler_command();
        let jobs_dir = self.options.jobs_dir();

        let mut artifacts = Vec::new();
        let mut jobs = Vec::new();

        let fingerprints = Fingerprint::all(document, fixed);
        for (slide, fingerprint) in document.slides.iter().zip(fingerprints) {
            let cached = if self.options.force {
                None
            } else {
                self.cache.lookup(&fingerprint)
            };

            let outcome = match cached {
                Some(path) => {
                    artifacts.push((slide.index, Artifact::Stored(path)));
                    SlideOutcome::CachedHit
                }
                None => {
                    jobs.push(CompilationJob {
                        slide: slide.clone(),
                        fingerprint: fingerprint.clone(),
                        source: document.compilation_unit(slide, fixed),
                        command: command.clone(),
                        run_count: self.options.runs,
                        working_directory: jobs_dir.join(format!(
                            "{}-{}",
                            slide.index,
                            uuid::Uuid::new_v4().simple()
                        )),
                        ignore_errors: self.options.ignore_errors,
                        search_path: self.options.source_dir.clone(),
                    });
                    SlideOutcome::Cancelled
                }
            };

            reports.push(SlideReport {
                index: slide.index,
                kind: slide.kind,
                line: slide.line,
                fingerprint,
                outcome,
            });
        }

        (artifacts, jobs)
    }
}

/// One-shot build with the configured LaTeX engine
pub fn build(source: &str, options: BuildOptions) -> BuildResult {
    match Previewer::new(options) {
        Ok(previewer) => previewer.build(source, &CancelToken::new()),
        Err(err) => BuildResult::aborted(err),
    }
}
