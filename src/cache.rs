// ABOUTME: Content-addressed cache of compiled slides for the beamer-preview application
// ABOUTME: Maps slide fingerprints to single-slide PDFs persisted under the prefix directory

use crate::errors::{PreviewError, Result};
use crate::splitter::{Document, Slide};
use crate::utils;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const ARTIFACT_EXT: &str = "pdf";
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Content hash identifying one slide in its header/footer context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the header, footer and slide body.
    ///
    /// Every part is length-prefixed so moving text across a boundary changes
    /// the hash. The slide's position is not hashed unless the frame number
    /// is pinned, which makes reordered slides cache hits. With pinned frame
    /// numbers the whole deck outline is hashed too, so any insert, delete,
    /// reorder or edit of a slide invalidates every slide.
    pub fn of(document: &Document, slide: &Slide, fixed_frame_numbers: bool) -> Self {
        let outline = fixed_frame_numbers.then(|| outline_digest(document));
        Self::with_outline(document, slide, outline.as_deref())
    }

    /// Fingerprints of every slide in document order
    pub fn all(document: &Document, fixed_frame_numbers: bool) -> Vec<Self> {
        let outline = fixed_frame_numbers.then(|| outline_digest(document));
        document
            .slides
            .iter()
            .map(|slide| Self::with_outline(document, slide, outline.as_deref()))
            .collect()
    }

    fn with_outline(document: &Document, slide: &Slide, outline: Option<&[u8]>) -> Self {
        let mut hasher = Sha256::new();
        for part in [&document.header, &document.footer, &slide.body] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        if let Some(outline) = outline {
            hasher.update(b"framenumber");
            hasher.update((slide.index as u64).to_le_bytes());
            hasher.update(outline);
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log messages
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable store of compiled slides, one file per fingerprint.
///
/// The presence of `<dir>/<fingerprint>.pdf` is the cache entry. Entries are
/// written once per fingerprint and never mutated, so concurrent writers can
/// at worst replace a file with identical content.
#[derive(Debug, Clone)]
pub struct ContentCache {
    dir: PathBuf,
}

impl ContentCache {
    /// Open (and create if needed) the cache rooted at `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        utils::ensure_directory_exists(dir).map_err(|e| match e {
            PreviewError::Io(source) => PreviewError::CacheIo {
                path: dir.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Location of the artifact for `fingerprint`, whether or not it exists
    pub fn artifact_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir
            .join(format!("{}.{}", fingerprint.as_str(), ARTIFACT_EXT))
    }

    /// Find the cached PDF for `fingerprint`.
    ///
    /// Unreadable or non-PDF files are reported and treated as a miss.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        let path = self.artifact_path(fingerprint);
        if !path.is_file() {
            debug!("Cache miss for {}", fingerprint.short());
            return None;
        }
        match has_pdf_magic(&path) {
            Ok(true) => {
                debug!("Cache hit for {}", fingerprint.short());
                Some(path)
            }
            Ok(false) => {
                warn!("Ignoring corrupt cache entry {:?}", path);
                None
            }
            Err(source) => {
                let err = PreviewError::CacheIo { path, source };
                warn!("{}; recompiling", err);
                None
            }
        }
    }

    /// Persist the PDF at `artifact` under `fingerprint`.
    ///
    /// The file is synced to disk before this returns.
    pub fn store(&self, fingerprint: &Fingerprint, artifact: &Path) -> Result<PathBuf> {
        let target = self.artifact_path(fingerprint);
        let bytes = fs::read(artifact).map_err(|source| PreviewError::CacheIo {
            path: artifact.to_path_buf(),
            source,
        })?;
        utils::write_file_atomic(&target, &bytes).map_err(|e| match e {
            PreviewError::Io(source) => PreviewError::CacheIo {
                path: target.clone(),
                source,
            },
            other => other,
        })?;
        debug!("Stored {} in cache", fingerprint.short());
        Ok(target)
    }

    /// Fingerprints of every artifact currently in the cache
    pub fn entries(&self) -> Result<Vec<Fingerprint>> {
        let pattern = format!("{}/*.{}", self.dir.to_string_lossy(), ARTIFACT_EXT);
        let paths = glob::glob(&pattern)
            .map_err(|e| PreviewError::Config(format!("Invalid cache path: {}", e)))?;

        let mut entries: Vec<Fingerprint> = paths
            .flatten()
            .filter_map(|path| {
                path.file_stem()
                    .map(|stem| Fingerprint(stem.to_string_lossy().into_owned()))
            })
            .collect();
        entries.sort();
        Ok(entries)
    }

    /// Delete every artifact whose fingerprint is not in `live`.
    ///
    /// Returns the number of removed entries.
    pub fn prune(&self, live: &HashSet<Fingerprint>) -> Result<usize> {
        let mut removed = 0;
        for fingerprint in self.entries()? {
            if live.contains(&fingerprint) {
                continue;
            }
            let path = self.artifact_path(&fingerprint);
            fs::remove_file(&path).map_err(|source| PreviewError::CacheIo { path, source })?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Slide count and the ordered slide body hashes
fn outline_digest(document: &Document) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update((document.slides.len() as u64).to_le_bytes());
    for slide in &document.slides {
        hasher.update(Sha256::digest(slide.body.as_bytes()));
    }
    hasher.finalize().to_vec()
}

fn has_pdf_magic(path: &Path) -> std::io::Result<bool> {
    let mut magic = [0u8; 5];
    let mut file = fs::File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == PDF_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
