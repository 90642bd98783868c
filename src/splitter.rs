// ABOUTME: Document splitter for the beamer-preview application
// ABOUTME: Scans Beamer source for frame boundaries and splits it into header, slides and footer

use crate::errors::{PreviewError, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Matches `\begin{frame}`, `\end{frame}` and `\maketitle`, tolerating
/// whitespace inside the environment braces.
fn markers() -> &'static Regex {
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    MARKERS.get_or_init(|| {
        Regex::new(r"\\(begin|end)\s*\{\s*frame\s*\}|\\maketitle\b")
            .expect("marker pattern is valid")
    })
}

/// What produced a slide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlideKind {
    /// A top-level `frame` environment
    Frame,
    /// A `\maketitle` outside any frame
    TitleSlide,
}

impl fmt::Display for SlideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlideKind::Frame => f.write_str("frame"),
            SlideKind::TitleSlide => f.write_str("title"),
        }
    }
}

/// One independently compilable unit of the deck
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slide {
    /// 0-based position in the source
    pub index: usize,
    pub kind: SlideKind,
    /// Verbatim source of the frame environment or title command
    pub body: String,
    /// 1-based source line the slide starts on
    pub line: usize,
}

/// A Beamer source split at slide boundaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Everything before the first slide
    pub header: String,
    /// Everything after the last slide, including `\end{document}`
    pub footer: String,
    pub slides: Vec<Slide>,
}

impl Document {
    /// Standalone source for compiling a single slide.
    ///
    /// With `fixed_frame_numbers` the frame counter is primed so the slide
    /// shows the number it has in the full deck. A `\maketitle` outside a
    /// frame is numbered like a frame, so that number is the slide index.
    pub fn compilation_unit(&self, slide: &Slide, fixed_frame_numbers: bool) -> String {
        let mut unit =
            String::with_capacity(self.header.len() + slide.body.len() + self.footer.len() + 64);
        unit.push_str(&self.header);
        if fixed_frame_numbers {
            unit.push_str(&format!(
                "\\setcounter{{framenumber}}{{{}}}\n",
                slide.index
            ));
        }
        unit.push_str(&slide.body);
        unit.push('\n');
        unit.push_str(&self.footer);
        unit
    }

    /// Header, slide bodies in order, and footer joined back into one source.
    ///
    /// Text that sat between slides is not part of any slide and is lost.
    pub fn reconstruct(&self) -> String {
        let mut out = self.header.clone();
        for slide in &self.slides {
            out.push_str(&slide.body);
            out.push('\n');
        }
        out.push_str(&self.footer);
        out
    }
}

/// Split Beamer source into header, ordered slides and footer.
///
/// Only top-level frame environments and `\maketitle` commands outside frames
/// become slides. Markers inside `%` comments are ignored.
pub fn split(source: &str) -> Result<Document> {
    let mut spans: Vec<(usize, usize, usize, SlideKind)> = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<(usize, usize)> = None;

    let mut line = 1;
    let mut scanned = 0;

    for caps in markers().captures_iter(source) {
        let Some(m) = caps.get(0) else { continue };
        line += source[scanned..m.start()].matches('\n').count();
        scanned = m.start();

        if in_comment(source, m.start()) {
            continue;
        }

        match caps.get(1).map(|g| g.as_str()) {
            Some("begin") => {
                if depth == 0 {
                    open = Some((m.start(), line));
                }
                depth += 1;
            }
            Some(_) => {
                if depth == 0 {
                    return Err(PreviewError::StructuralParse {
                        marker: "\\end{frame} without matching \\begin{frame}".to_string(),
                        line,
                    });
                }
                depth -= 1;
                if depth == 0 {
                    if let Some((start, start_line)) = open.take() {
                        spans.push((start, m.end(), start_line, SlideKind::Frame));
                    }
                }
            }
            None => {
                if depth == 0 {
                    spans.push((m.start(), m.end(), line, SlideKind::TitleSlide));
                }
            }
        }
    }

    if let Some((_, start_line)) = open {
        return Err(PreviewError::StructuralParse {
            marker: "\\begin{frame} without matching \\end{frame}".to_string(),
            line: start_line,
        });
    }

    let (header, footer) = match (spans.first(), spans.last()) {
        (Some(first), Some(last)) => (
            source[..first.0].to_string(),
            source[last.1..].to_string(),
        ),
        _ => (source.to_string(), String::new()),
    };

    let slides = spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end, line, kind))| Slide {
            index,
            kind,
            body: source[start..end].to_string(),
            line,
        })
        .collect();

    Ok(Document {
        header,
        footer,
        slides,
    })
}

/// Whether `pos` lies after an unescaped `%` on its line
fn in_comment(source: &str, pos: usize) -> bool {
    let line_start = source[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut backslashes = 0;
    for c in source[line_start..pos].chars() {
        match c {
            '\\' => backslashes += 1,
            '%' if backslashes % 2 == 0 => return true,
            _ => backslashes = 0,
        }
    }
    false
}
