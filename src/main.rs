// ABOUTME: Main entry point for the beamer-preview program.
// ABOUTME: Provides the CLI and runs a single build or watch mode from the library.

use anyhow::Context;
use beamer_preview::config::unescape_flag;
use beamer_preview::{BuildOptions, CancelToken, Compiler, Previewer, WatchConfig};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

/// Recompile only changed Beamer slides and merge them into one preview PDF.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Beamer source file
    slides: PathBuf,

    /// Path of the merged preview PDF
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// LaTeX engine: pdflatex, xelatex or lualatex
    #[arg(short, long)]
    compiler: Option<Compiler>,

    /// Replace slides that fail to compile with an error page
    #[arg(short, long)]
    ignore_errors: bool,

    /// Directory for cached slides and scratch files
    #[arg(short, long)]
    prefix: Option<PathBuf>,

    /// Recompile every slide, ignoring the cache
    #[arg(long)]
    force: bool,

    /// Rebuild whenever the source file is saved
    #[arg(long)]
    watch: bool,

    /// Number of slides compiled in parallel
    #[arg(long = "smp", short = 'j')]
    concurrency: Option<usize>,

    /// Extra compiler flag, repeatable; escape a leading dash as \-flag
    #[arg(short = 'f', long = "flag", allow_hyphen_values = true)]
    flags: Vec<String>,

    /// Compiler passes per slide
    #[arg(short, long)]
    runs: Option<usize>,

    /// Keep each slide's frame number from the full deck
    #[arg(long)]
    fixed_frame_numbers: bool,

    /// Delete cached slides the current source no longer uses
    #[arg(long, conflicts_with = "watch")]
    prune: bool,

    /// Debounce interval for watch mode in milliseconds
    #[arg(long, default_value_t = 200)]
    debounce_ms: u64,

    /// Log cache decisions and compiler passes
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn build_options(&self) -> BuildOptions {
        let mut options = BuildOptions::from_env();
        if let Some(out) = &self.out {
            options.output = out.clone();
        }
        if let Some(compiler) = self.compiler {
            options.compiler = compiler;
        }
        if let Some(prefix) = &self.prefix {
            options.prefix = prefix.clone();
        }
        if let Some(concurrency) = self.concurrency {
            options.concurrency = concurrency;
        }
        if let Some(runs) = self.runs {
            options.runs = runs;
        }
        options.ignore_errors = self.ignore_errors;
        options.force = self.force;
        options.fixed_frame_numbers = self.fixed_frame_numbers;
        options.extra_flags = self.flags.iter().map(|f| unescape_flag(f)).collect();
        options.source_dir = self
            .slides
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .or_else(|| Some(PathBuf::from(".")))
            .and_then(|p| fs::canonicalize(p).ok());
        options
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let options = cli.build_options();
    log::info!(
        "Compiling with {} on {} core(s) (change with --smp <cores>)",
        options.compiler,
        options.concurrency
    );

    if cli.watch {
        let config = WatchConfig {
            slides_path: cli.slides.clone(),
            debounce_ms: cli.debounce_ms,
        };
        beamer_preview::watch_slides(config, options).context("watch mode failed")?;
        return Ok(());
    }

    let source = fs::read_to_string(&cli.slides)
        .with_context(|| format!("Could not open '{}'", cli.slides.display()))?;

    let previewer = Previewer::new(options).context("invalid options")?;
    let result = previewer.build(&source, &CancelToken::new());
    println!("{}", result);

    if let Some(err) = result.error() {
        anyhow::bail!("build aborted: {}", err);
    }

    if cli.prune {
        let removed = previewer.prune(&source)?;
        log::info!("Pruned {} stale cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
    }

    Ok(())
}
