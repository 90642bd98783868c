// ABOUTME: Configuration module for the beamer-preview application
// ABOUTME: Provides build options, compiler selection and environment variable handling

use crate::errors::{PreviewError, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Flags passed to every compiler invocation before any user flags.
const BASE_FLAGS: &[&str] = &["-interaction=nonstopmode", "-halt-on-error", "-file-line-error"];

/// Supported LaTeX engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compiler {
    #[default]
    PdfLatex,
    XeLatex,
    LuaLatex,
}

impl Compiler {
    /// Executable name, also used as the cache namespace
    pub fn program(&self) -> &'static str {
        match self {
            Compiler::PdfLatex => "pdflatex",
            Compiler::XeLatex => "xelatex",
            Compiler::LuaLatex => "lualatex",
        }
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for Compiler {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdflatex" | "pdftex" => Ok(Compiler::PdfLatex),
            "xelatex" | "xetex" => Ok(Compiler::XeLatex),
            "lualatex" | "luatex" => Ok(Compiler::LuaLatex),
            other => Err(format!(
                "unknown compiler '{}' (expected pdflatex, xelatex or lualatex)",
                other
            )),
        }
    }
}

/// A fully resolved compiler command line, minus the input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Options for one incremental build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Where the merged preview PDF is written
    pub output: PathBuf,

    /// LaTeX engine used for every slide
    pub compiler: Compiler,

    /// Replace slides that fail to compile with a placeholder page
    pub ignore_errors: bool,

    /// Directory holding cached artifacts and per-job scratch directories
    pub prefix: PathBuf,

    /// Recompile every slide regardless of the cache
    pub force: bool,

    /// Maximum number of compiler processes running at once
    pub concurrency: usize,

    /// Extra flags passed verbatim to the compiler
    pub extra_flags: Vec<String>,

    /// Compiler passes per slide
    pub runs: usize,

    /// Keep the frame number each slide has in the full deck
    pub fixed_frame_numbers: bool,

    /// Directory the deck lives in, searched for \input and graphics
    pub source_dir: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from("slide.pdf"),
            compiler: Compiler::default(),
            ignore_errors: false,
            prefix: PathBuf::from("_slide_"),
            force: false,
            concurrency: default_concurrency(),
            extra_flags: Vec::new(),
            runs: 1,
            fixed_frame_numbers: false,
            source_dir: None,
        }
    }
}

/// Number of available processors, falling back to one
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl BuildOptions {
    /// Create a new options instance with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let compiler = env::var("BEAMER_PREVIEW_COMPILER")
            .ok()
            .and_then(|s| s.parse::<Compiler>().ok())
            .unwrap_or(defaults.compiler);
        let prefix = env::var("BEAMER_PREVIEW_PREFIX")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.prefix);
        let concurrency = env::var("BEAMER_PREVIEW_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.concurrency);
        let runs = env::var("BEAMER_PREVIEW_RUNS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.runs);

        Self {
            compiler,
            prefix,
            concurrency,
            runs,
            ..defaults
        }
    }

    /// Reject option combinations that can never build
    pub fn validate(&self) -> Result<()> {
        if self.runs == 0 {
            return Err(PreviewError::Config(
                "run count must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(PreviewError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.output.as_os_str().is_empty() {
            return Err(PreviewError::Config("output path is empty".to_string()));
        }
        Ok(())
    }

    /// The compiler command line for every slide job
    pub fn compiler_command(&self) -> CompilerCommand {
        let mut args: Vec<String> = BASE_FLAGS.iter().map(|s| s.to_string()).collect();
        args.extend(self.extra_flags.iter().cloned());
        CompilerCommand {
            program: self.compiler.program().to_string(),
            args,
        }
    }

    /// Directory of cached artifacts for the selected compiler
    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join(self.compiler.program())
    }

    /// Parent directory of the per-job scratch directories
    pub fn jobs_dir(&self) -> PathBuf {
        self.prefix.join("jobs")
    }
}

/// Strip the backslash that protects a leading dash in a pass-through flag.
///
/// `\-shell-escape` becomes `-shell-escape`; anything else is returned as is.
pub fn unescape_flag(flag: &str) -> String {
    match flag.strip_prefix("\\-") {
        Some(rest) => format!("-{}", rest),
        None => flag.to_string(),
    }
}
