// ABOUTME: Library module for the beamer-preview program.
// ABOUTME: Contains the incremental split, cache, compile and assemble pipeline.

// Reexport modules
pub mod assembler;
pub mod build;
pub mod cache;
pub mod cancel;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod scheduler;
pub mod splitter;
pub mod utils;
pub mod watch;

// Reexport common types and functions
pub use assembler::{assemble, Artifact};
pub use build::{build, BuildResult, BuildStatus, Previewer, SlideOutcome, SlideReport};
pub use cache::{ContentCache, Fingerprint};
pub use cancel::CancelToken;
pub use compiler::{CompilationJob, ProcessCompiler, SlideCompiler};
pub use config::{BuildOptions, Compiler};
pub use errors::{PreviewError, Result};
pub use scheduler::{JobOutcome, JobResult, Scheduler};
pub use splitter::{split, Document, Slide, SlideKind};
pub use watch::{watch_slides, BuildSupervisor, WatchConfig};

#[cfg(test)]
mod tests;
