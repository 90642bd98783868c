use super::*;
use crate::config::{unescape_flag, CompilerCommand};
use lopdf::Object;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const DECK: &str = r"\documentclass{beamer}
\title{Test}
\begin{document}
\maketitle
\begin{frame}{First}
  Hello
\end{frame}
% \begin{frame} commented out
\begin{frame}[fragile]{Second}
  World
\end{frame}
\end{document}
";

fn marked_pdf(mark: &str) -> Vec<u8> {
    let mut doc = assembler::placeholder_page(0, mark).expect("Failed to build page");
    let page_id = *doc.get_pages().values().next().expect("No page");
    doc.get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .expect("Page is not a dictionary")
        .set("SlideMark", Object::Name(mark.as_bytes().to_vec()));
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to save PDF");
    bytes
}

fn page_marks(doc: &lopdf::Document) -> Vec<String> {
    doc.get_pages()
        .values()
        .map(|id| match doc.get_dictionary(*id).expect("Page").get(b"SlideMark") {
            Ok(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
            _ => String::new(),
        })
        .collect()
}

fn write_pdf(dir: &Path, name: &str, mark: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, marked_pdf(mark)).expect("Failed to write PDF");
    path
}

#[test]
fn test_split_finds_title_and_frames() {
    let doc = split(DECK).expect("Failed to split");

    assert_eq!(doc.slides.len(), 3);
    assert_eq!(doc.slides[0].kind, SlideKind::TitleSlide);
    assert_eq!(doc.slides[1].kind, SlideKind::Frame);
    assert_eq!(doc.slides[2].kind, SlideKind::Frame);

    assert!(doc.header.contains("\\begin{document}"));
    assert!(doc.footer.contains("\\end{document}"));
    assert!(doc.slides[1].body.starts_with("\\begin{frame}{First}"));
    assert!(doc.slides[1].body.ends_with("\\end{frame}"));
    assert!(doc.slides[2].body.contains("World"));
}

#[test]
fn test_split_tracks_lines_and_frame_numbers() {
    let doc = split(DECK).expect("Failed to split");

    assert_eq!(doc.slides[0].line, 4);
    assert_eq!(doc.slides[1].line, 5);
    assert_eq!(doc.slides[2].line, 9);

    // \maketitle outside a frame takes frame number 1
    let first_frame = doc.compilation_unit(&doc.slides[1], true);
    assert!(first_frame.contains("\\setcounter{framenumber}{1}"));
    let title = doc.compilation_unit(&doc.slides[0], true);
    assert!(title.contains("\\setcounter{framenumber}{0}"));
}

#[test]
fn test_split_reconstruction_is_idempotent() {
    let doc = split(DECK).expect("Failed to split");
    let again = split(&doc.reconstruct()).expect("Failed to re-split");

    let kinds: Vec<SlideKind> = doc.slides.iter().map(|s| s.kind).collect();
    let kinds_again: Vec<SlideKind> = again.slides.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, kinds_again);
    assert_eq!(doc.header, again.header);
}

#[test]
fn test_split_drops_text_between_slides() {
    let source = "\\begin{document}\n\\begin{frame}A\\end{frame}\n\\setbeamercolor{x}{y}\n\\begin{frame}B\\end{frame}\n\\end{document}\n";
    let doc = split(source).expect("Failed to split");

    assert_eq!(doc.slides.len(), 2);
    assert!(!doc.reconstruct().contains("setbeamercolor"));
}

#[test]
fn test_split_nested_frames_count_as_one_slide() {
    let source = "\\begin{document}\n\\begin{frame}\n\\begin{frame}x\\end{frame}\n\\end{frame}\n\\end{document}";
    let doc = split(source).expect("Failed to split");

    assert_eq!(doc.slides.len(), 1);
    assert_eq!(doc.slides[0].body.matches("\\end{frame}").count(), 2);
}

#[test]
fn test_split_ignores_maketitle_inside_frame() {
    let source = "\\begin{document}\n\\begin{frame}\\maketitle\\end{frame}\n\\end{document}";
    let doc = split(source).expect("Failed to split");

    assert_eq!(doc.slides.len(), 1);
    assert_eq!(doc.slides[0].kind, SlideKind::Frame);
}

#[test]
fn test_split_tolerates_whitespace_in_markers() {
    let source = "\\begin{document}\n\\begin { frame }x\\end{ frame}\n\\end{document}";
    let doc = split(source).expect("Failed to split");
    assert_eq!(doc.slides.len(), 1);
}

#[test]
fn test_split_unclosed_frame_is_an_error() {
    let source = "\\begin{document}\n\\begin{frame}\nno end\n\\end{document}";
    match split(source) {
        Err(PreviewError::StructuralParse { marker, line }) => {
            assert!(marker.contains("\\begin{frame}"));
            assert_eq!(line, 2);
        }
        other => panic!("Expected structural error, got {:?}", other),
    }
}

#[test]
fn test_split_stray_end_is_an_error() {
    let source = "\\begin{document}\n\n\\end{frame}\n\\end{document}";
    match split(source) {
        Err(PreviewError::StructuralParse { marker, line }) => {
            assert!(marker.contains("\\end{frame}"));
            assert_eq!(line, 3);
        }
        other => panic!("Expected structural error, got {:?}", other),
    }
}

#[test]
fn test_split_without_slides_keeps_everything_in_header() {
    let source = "\\documentclass{beamer}\n\\begin{document}\n\\end{document}\n";
    let doc = split(source).expect("Failed to split");

    assert!(doc.slides.is_empty());
    assert_eq!(doc.header, source);
    assert!(doc.footer.is_empty());
}

#[test]
fn test_escaped_percent_is_not_a_comment() {
    let source = "\\begin{document}\n50\\% \\begin{frame}x\\end{frame}\n\\end{document}";
    let doc = split(source).expect("Failed to split");
    assert_eq!(doc.slides.len(), 1);
}

#[test]
fn test_compilation_unit_wraps_slide() {
    let doc = split(DECK).expect("Failed to split");
    let unit = doc.compilation_unit(&doc.slides[2], false);

    assert!(unit.starts_with("\\documentclass{beamer}"));
    assert!(unit.contains("World"));
    assert!(!unit.contains("Hello"));
    assert!(unit.trim_end().ends_with("\\end{document}"));
    assert!(!unit.contains("framenumber"));

    let fixed = doc.compilation_unit(&doc.slides[2], true);
    assert!(fixed.contains("\\setcounter{framenumber}{2}"));
}

#[test]
fn test_fingerprint_ignores_position() {
    let a = split("H\\begin{frame}A\\end{frame}\\begin{frame}B\\end{frame}F").expect("split");
    let b = split("H\\begin{frame}B\\end{frame}\\begin{frame}A\\end{frame}F").expect("split");

    assert_eq!(
        Fingerprint::of(&a, &a.slides[0], false),
        Fingerprint::of(&b, &b.slides[1], false)
    );
    assert_ne!(
        Fingerprint::of(&a, &a.slides[0], true),
        Fingerprint::of(&b, &b.slides[1], true)
    );
}

#[test]
fn test_fixed_fingerprint_tracks_deck_outline() {
    let before = split("H\\begin{frame}A\\end{frame}\\begin{frame}B\\end{frame}F").expect("split");
    let after = split(
        "H\\begin{frame}A\\end{frame}\\begin{frame}B\\end{frame}\\begin{frame}C\\end{frame}F",
    )
    .expect("split");

    // Appending a slide leaves free-numbered slides alone
    assert_eq!(
        Fingerprint::all(&before, false)[..2],
        Fingerprint::all(&after, false)[..2]
    );
    // but invalidates every pinned-number slide
    let pinned_before = Fingerprint::all(&before, true);
    let pinned_after = Fingerprint::all(&after, true);
    assert_ne!(pinned_before[0], pinned_after[0]);
    assert_ne!(pinned_before[1], pinned_after[1]);
    assert_eq!(pinned_after[2], Fingerprint::of(&after, &after.slides[2], true));
}

#[test]
fn test_fingerprint_covers_header_and_footer() {
    let base = split("H\\begin{frame}A\\end{frame}F").expect("split");
    let header = split("H2\\begin{frame}A\\end{frame}F").expect("split");
    let footer = split("H\\begin{frame}A\\end{frame}F2").expect("split");
    let body = split("H\\begin{frame}A2\\end{frame}F").expect("split");

    let fp = |d: &Document| Fingerprint::of(d, &d.slides[0], false);
    assert_ne!(fp(&base), fp(&header));
    assert_ne!(fp(&base), fp(&footer));
    assert_ne!(fp(&base), fp(&body));
    assert_eq!(fp(&base), fp(&base.clone()));
    assert_eq!(fp(&base).as_str().len(), 64);
}

#[test]
fn test_cache_store_and_lookup() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = ContentCache::open(&temp_dir.path().join("cache")).expect("Failed to open cache");
    let doc = split("H\\begin{frame}A\\end{frame}F").expect("split");
    let fp = Fingerprint::of(&doc, &doc.slides[0], false);

    assert!(cache.lookup(&fp).is_none());

    let pdf = write_pdf(temp_dir.path(), "a.pdf", "A");
    let stored = cache.store(&fp, &pdf).expect("Failed to store");
    assert_eq!(cache.lookup(&fp), Some(stored.clone()));
    assert_eq!(fs::read(&stored).unwrap(), fs::read(&pdf).unwrap());

    // Identical rewrite is harmless
    cache.store(&fp, &pdf).expect("Failed to store twice");
    assert_eq!(cache.entries().unwrap(), vec![fp]);
}

#[test]
fn test_cache_survives_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let dir = temp_dir.path().join("cache");
    let doc = split("H\\begin{frame}A\\end{frame}F").expect("split");
    let fp = Fingerprint::of(&doc, &doc.slides[0], false);
    let pdf = write_pdf(temp_dir.path(), "a.pdf", "A");

    ContentCache::open(&dir).unwrap().store(&fp, &pdf).unwrap();
    assert!(ContentCache::open(&dir).unwrap().lookup(&fp).is_some());
}

#[test]
fn test_cache_treats_corrupt_entry_as_miss() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = ContentCache::open(temp_dir.path()).unwrap();
    let doc = split("H\\begin{frame}A\\end{frame}F").expect("split");
    let fp = Fingerprint::of(&doc, &doc.slides[0], false);

    fs::write(cache.artifact_path(&fp), b"garbage").unwrap();
    assert!(cache.lookup(&fp).is_none());
}

#[test]
fn test_cache_prune_keeps_live_entries() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = ContentCache::open(&temp_dir.path().join("cache")).unwrap();
    let doc = split("H\\begin{frame}A\\end{frame}\\begin{frame}B\\end{frame}F").expect("split");
    let a = Fingerprint::of(&doc, &doc.slides[0], false);
    let b = Fingerprint::of(&doc, &doc.slides[1], false);
    let pdf = write_pdf(temp_dir.path(), "x.pdf", "X");
    cache.store(&a, &pdf).unwrap();
    cache.store(&b, &pdf).unwrap();

    let live: HashSet<Fingerprint> = [a.clone()].into_iter().collect();
    assert_eq!(cache.prune(&live).unwrap(), 1);
    assert!(cache.lookup(&a).is_some());
    assert!(cache.lookup(&b).is_none());
}

#[test]
fn test_assemble_orders_by_index() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_pdf(temp_dir.path(), "a.pdf", "A");
    let b = write_pdf(temp_dir.path(), "b.pdf", "B");
    let c = write_pdf(temp_dir.path(), "c.pdf", "C");

    let parts = vec![
        (2, Artifact::Stored(c)),
        (0, Artifact::Stored(a)),
        (1, Artifact::Stored(b)),
    ];
    let mut merged = assemble(parts, 3).expect("Failed to assemble");
    assert_eq!(page_marks(&merged), vec!["A", "B", "C"]);

    let out = temp_dir.path().join("out").join("merged.pdf");
    let pages = assembler::write_document(&mut merged, &out).expect("Failed to write");
    assert_eq!(pages, 3);
    let reloaded = lopdf::Document::load(&out).expect("Failed to reload");
    assert_eq!(page_marks(&reloaded), vec!["A", "B", "C"]);
}

#[test]
fn test_assemble_includes_placeholder() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_pdf(temp_dir.path(), "a.pdf", "A");

    let parts = vec![
        (
            1,
            Artifact::Placeholder {
                index: 1,
                reason: "Undefined control sequence".to_string(),
            },
        ),
        (0, Artifact::Stored(a)),
    ];
    let merged = assemble(parts, 2).expect("Failed to assemble");
    assert_eq!(page_marks(&merged), vec!["A", ""]);
}

#[test]
fn test_assemble_reports_missing_slide() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let a = write_pdf(temp_dir.path(), "a.pdf", "A");
    let c = write_pdf(temp_dir.path(), "c.pdf", "C");

    let result = assemble(vec![(0, Artifact::Stored(a)), (2, Artifact::Stored(c))], 3);
    match result {
        Err(PreviewError::Assembly(msg)) => assert!(msg.contains("slide 1")),
        other => panic!("Expected assembly error, got {:?}", other.map(|_| ())),
    }

    let short = assemble(vec![], 1);
    assert!(matches!(short, Err(PreviewError::Assembly(_))));
}

#[test]
fn test_placeholder_is_single_page() {
    let mut doc = assembler::placeholder_page(7, "é broken\nsecond line").expect("placeholder");
    assert_eq!(doc.get_pages().len(), 1);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save");
    assert!(bytes.starts_with(b"%PDF-"));
}

#[test]
fn test_compiler_parsing_and_command() {
    assert_eq!("xelatex".parse::<Compiler>(), Ok(Compiler::XeLatex));
    assert_eq!("LuaLaTeX".parse::<Compiler>(), Ok(Compiler::LuaLatex));
    assert!("latexmk".parse::<Compiler>().is_err());

    let options = BuildOptions {
        compiler: Compiler::LuaLatex,
        extra_flags: vec!["-shell-escape".to_string()],
        ..BuildOptions::default()
    };
    let command = options.compiler_command();
    assert_eq!(command.program, "lualatex");
    assert!(command.args.contains(&"-interaction=nonstopmode".to_string()));
    assert_eq!(command.args.last().map(String::as_str), Some("-shell-escape"));
    assert!(options.cache_dir().ends_with("lualatex"));
}

#[test]
fn test_options_validation() {
    assert!(BuildOptions::default().validate().is_ok());
    let no_runs = BuildOptions {
        runs: 0,
        ..BuildOptions::default()
    };
    assert!(matches!(no_runs.validate(), Err(PreviewError::Config(_))));
    let no_workers = BuildOptions {
        concurrency: 0,
        ..BuildOptions::default()
    };
    assert!(matches!(no_workers.validate(), Err(PreviewError::Config(_))));
}

#[test]
fn test_unescape_flag() {
    assert_eq!(unescape_flag("\\-shell-escape"), "-shell-escape");
    assert_eq!(unescape_flag("-synctex=1"), "-synctex=1");
    assert_eq!(unescape_flag("draftmode"), "draftmode");
}

#[test]
fn test_cancel_token_propagates_to_children() {
    let parent = CancelToken::new();
    let child = parent.child();
    let sibling = parent.child();

    child.cancel();
    assert!(child.is_cancelled());
    assert!(!parent.is_cancelled());
    assert!(!sibling.is_cancelled());

    parent.cancel();
    assert!(sibling.is_cancelled());
}

#[test]
fn test_process_compiler_failure_is_ignorable() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let doc = split(DECK).expect("Failed to split");
    let slide = doc.slides[1].clone();
    let job = CompilationJob {
        fingerprint: Fingerprint::of(&doc, &slide, false),
        source: doc.compilation_unit(&slide, false),
        slide,
        command: CompilerCommand {
            program: "beamer-preview-no-such-engine".to_string(),
            args: Vec::new(),
        },
        run_count: 1,
        working_directory: temp_dir.path().join("job"),
        ignore_errors: true,
        search_path: None,
    };
    job.prepare().expect("Failed to prepare job");

    let err = ProcessCompiler::new()
        .compile(&job, &CancelToken::new())
        .expect_err("Missing engine should fail");

    assert!(err.is_ignorable(), "Unexpected error: {:?}", err);
    assert!(matches!(err, PreviewError::CompilerFailure { index: 1, .. }));
}

#[test]
fn test_log_excerpt_finds_first_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let log = temp_dir.path().join("slide.log");
    fs::write(
        &log,
        "This is pdfTeX\n(./slide.tex\n! Undefined control sequence.\nl.12 \\foo\n\nmore\n",
    )
    .unwrap();

    let excerpt = compiler::log_excerpt(&log).expect("No excerpt");
    assert!(excerpt.starts_with("! Undefined control sequence."));
    assert!(excerpt.contains("l.12"));

    fs::write(&log, "./slide.tex:7: LaTeX Error: Missing \\begin{document}.\n").unwrap();
    let excerpt = compiler::log_excerpt(&log).expect("No excerpt");
    assert!(excerpt.contains("Missing"));

    assert!(compiler::log_excerpt(&temp_dir.path().join("none.log")).is_none());
}

#[test]
fn test_atomic_write_replaces_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("nested").join("file.bin");

    utils::write_file_atomic(&path, b"one").unwrap();
    utils::write_file_atomic(&path, b"two").unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"two");

    let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
