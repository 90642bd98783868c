// ABOUTME: Compiler invocation for the beamer-preview application
// ABOUTME: Defines slide compilation jobs and runs the external LaTeX engine as a subprocess

use crate::cache::Fingerprint;
use crate::cancel::CancelToken;
use crate::config::CompilerCommand;
use crate::errors::{PreviewError, Result};
use crate::splitter::Slide;
use crate::utils;
use log::debug;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

pub const SLIDE_TEX: &str = "slide.tex";
pub const SLIDE_PDF: &str = "slide.pdf";
pub const SLIDE_LOG: &str = "slide.log";

/// How often a running compiler is checked for exit or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lines of log context kept after the first error line
const LOG_CONTEXT_LINES: usize = 2;

/// One cache-miss slide waiting to be compiled
#[derive(Debug, Clone)]
pub struct CompilationJob {
    pub slide: Slide,
    pub fingerprint: Fingerprint,
    /// Full standalone source: header, slide body, footer
    pub source: String,
    pub command: CompilerCommand,
    /// Compiler passes to run
    pub run_count: usize,
    /// Scratch directory owned by this job alone
    pub working_directory: PathBuf,
    pub ignore_errors: bool,
    /// Extra directory for the engine to search for inputs
    pub search_path: Option<PathBuf>,
}

impl CompilationJob {
    pub fn index(&self) -> usize {
        self.slide.index
    }

    pub fn tex_path(&self) -> PathBuf {
        self.working_directory.join(SLIDE_TEX)
    }

    pub fn pdf_path(&self) -> PathBuf {
        self.working_directory.join(SLIDE_PDF)
    }

    pub fn log_path(&self) -> PathBuf {
        self.working_directory.join(SLIDE_LOG)
    }

    /// Create the scratch directory and write the slide source into it
    pub fn prepare(&self) -> Result<()> {
        utils::ensure_directory_exists(&self.working_directory)?;
        fs::write(self.tex_path(), &self.source)?;
        Ok(())
    }

    /// Build a `CompilerFailure` for this job, attaching the log excerpt
    pub fn failure(&self, message: impl Into<String>) -> PreviewError {
        PreviewError::CompilerFailure {
            index: self.index(),
            message: message.into(),
            log: log_excerpt(&self.log_path()),
        }
    }
}

/// Something that turns a prepared job into a PDF
pub trait SlideCompiler: Send + Sync {
    /// Compile `job` inside its working directory and return the PDF path.
    ///
    /// Implementations must return `PreviewError::Cancelled` promptly once
    /// `cancel` fires.
    fn compile(&self, job: &CompilationJob, cancel: &CancelToken) -> Result<PathBuf>;
}

/// Runs the job's compiler command as a child process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCompiler;

impl ProcessCompiler {
    pub fn new() -> Self {
        Self
    }

    fn command(&self, job: &CompilationJob) -> Command {
        let mut command = Command::new(&job.command.program);
        command
            .args(&job.command.args)
            .arg(SLIDE_TEX)
            .current_dir(&job.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &job.search_path {
            command.env("TEXINPUTS", texinputs(dir));
        }
        command
    }
}

impl SlideCompiler for ProcessCompiler {
    fn compile(&self, job: &CompilationJob, cancel: &CancelToken) -> Result<PathBuf> {
        for pass in 1..=job.run_count {
            if cancel.is_cancelled() {
                return Err(PreviewError::Cancelled);
            }
            debug!(
                "Slide {}: {} pass {}/{}",
                job.index(),
                job.command.program,
                pass,
                job.run_count
            );

            let mut child = self.command(job).spawn().map_err(|e| {
                job.failure(format!("could not start {}: {}", job.command.program, e))
            })?;

            let status = loop {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) => {}
                    Err(e) => {
                        stop(&mut child);
                        return Err(job.failure(format!(
                            "lost track of {}: {}",
                            job.command.program, e
                        )));
                    }
                }
                if cancel.is_cancelled() {
                    stop(&mut child);
                    return Err(PreviewError::Cancelled);
                }
                thread::sleep(POLL_INTERVAL);
            };

            if !status.success() {
                return Err(job.failure(format!(
                    "{} exited with {} on pass {}",
                    job.command.program, status, pass
                )));
            }
        }

        let pdf = job.pdf_path();
        if !pdf.is_file() {
            return Err(job.failure(format!("{} produced no PDF", job.command.program)));
        }
        Ok(pdf)
    }
}

/// Kill and reap a compiler process that may already have exited
fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// `TEXINPUTS` value that puts `dir` in front of the engine's search path
fn texinputs(dir: &Path) -> String {
    let sep = if cfg!(windows) { ";" } else { ":" };
    match env::var("TEXINPUTS") {
        Ok(existing) if !existing.is_empty() => {
            format!("{}{}{}", dir.display(), sep, existing)
        }
        _ => format!("{}{}", dir.display(), sep),
    }
}

/// First error in a TeX log with a little following context
pub fn log_excerpt(log: &Path) -> Option<String> {
    let bytes = fs::read(log).ok()?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines
        .iter()
        .position(|l| l.starts_with('!') || is_file_line_error(l))?;
    let end = (start + 1 + LOG_CONTEXT_LINES).min(lines.len());
    Some(lines[start..end].join("\n"))
}

/// Matches `-file-line-error` style messages such as `./slide.tex:12: Undefined control sequence.`
fn is_file_line_error(line: &str) -> bool {
    let mut parts = line.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(file), Some(number), Some(_)) => {
            file.ends_with(".tex") && !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}
