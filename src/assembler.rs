// ABOUTME: Document assembler for the beamer-preview application
// ABOUTME: Merges per-slide PDFs into one preview in original slide order

use crate::errors::{PreviewError, Result};
use crate::utils;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// Guards against malformed page trees with parent cycles
const MAX_TREE_DEPTH: usize = 64;

/// Default Beamer page size (128mm x 96mm) in points
const PLACEHOLDER_SIZE: (i64, i64) = (363, 272);

const PLACEHOLDER_REASON_CHARS: usize = 70;

/// A resolved slide ready to be merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A compiled PDF on disk, usually inside the cache
    Stored(PathBuf),
    /// An error-marker page for a slide that failed with errors ignored
    Placeholder { index: usize, reason: String },
}

impl Artifact {
    fn load(&self) -> Result<Document> {
        match self {
            Artifact::Stored(path) => Ok(Document::load(path)?),
            Artifact::Placeholder { index, reason } => placeholder_page(*index, reason),
        }
    }
}

/// Number of pages in the PDF at `path`
pub fn page_count(path: &Path) -> Result<usize> {
    Ok(Document::load(path)?.get_pages().len())
}

/// Merge slide artifacts into one document, ordered by slide index.
///
/// `parts` may arrive in any order but must cover every index in
/// `0..slide_count` exactly once.
pub fn assemble(mut parts: Vec<(usize, Artifact)>, slide_count: usize) -> Result<Document> {
    parts.sort_by_key(|(index, _)| *index);
    check_coverage(&parts, slide_count)?;

    let mut merged = Document::with_version("1.5");
    let pages_id = merged.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for (index, artifact) in parts {
        let mut doc = artifact.load()?;
        doc.renumber_objects_with(merged.max_id + 1);

        let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
        for page_id in doc.get_pages().into_values() {
            let mut page = doc.get_dictionary(page_id)?.clone();
            inherit_attributes(&doc, &mut page)?;
            page.set("Parent", pages_id);
            pages.push((page_id, page));
        }
        if pages.is_empty() {
            return Err(PreviewError::Assembly(format!(
                "artifact for slide {} has no pages",
                index
            )));
        }

        if let Some(max) = doc.objects.keys().map(|(id, _)| *id).max() {
            merged.max_id = merged.max_id.max(max);
        }
        merged.objects.extend(doc.objects);
        for (page_id, page) in pages {
            merged.objects.insert(page_id, Object::Dictionary(page));
            kids.push(page_id.into());
        }
    }

    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    // Catalogs and page trees of the individual slides are now unreferenced.
    merged.prune_objects();
    merged.compress();

    Ok(merged)
}

/// Save `document` to `output` atomically and return its page count
pub fn write_document(document: &mut Document, output: &Path) -> Result<usize> {
    let pages = document.get_pages().len();
    let mut bytes = Vec::new();
    document.save_to(&mut bytes)?;
    utils::write_file_atomic(output, &bytes)?;
    Ok(pages)
}

fn check_coverage(parts: &[(usize, Artifact)], slide_count: usize) -> Result<()> {
    for (expected, (index, _)) in parts.iter().enumerate() {
        if *index > expected {
            return Err(PreviewError::Assembly(format!(
                "missing artifact for slide {}",
                expected
            )));
        }
        if *index < expected {
            return Err(PreviewError::Assembly(format!(
                "duplicate artifact for slide {}",
                index
            )));
        }
    }
    if parts.len() < slide_count {
        return Err(PreviewError::Assembly(format!(
            "missing artifact for slide {}",
            parts.len()
        )));
    }
    if parts.len() > slide_count {
        return Err(PreviewError::Assembly(format!(
            "artifact for unknown slide {}",
            slide_count
        )));
    }
    Ok(())
}

/// Copy inherited page-tree attributes onto the page itself so it survives
/// being moved under a new parent.
fn inherit_attributes(doc: &Document, page: &mut Dictionary) -> Result<()> {
    let mut parent = page.get(b"Parent").and_then(|p| p.as_reference()).ok();
    let mut depth = 0;

    while let Some(node_id) = parent {
        let node = doc.get_dictionary(node_id)?;
        for key in INHERITABLE {
            if page.has(key.as_bytes()) {
                continue;
            }
            if let Ok(value) = node.get(key.as_bytes()) {
                page.set(key, value.clone());
            }
        }

        depth += 1;
        if depth >= MAX_TREE_DEPTH {
            break;
        }
        parent = node.get(b"Parent").and_then(|p| p.as_reference()).ok();
    }
    Ok(())
}

/// A single page marking slide `index` as failed
pub fn placeholder_page(index: usize, reason: &str) -> Result<Document> {
    let (width, height) = PLACEHOLDER_SIZE;
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let title = format!("Slide {} could not be compiled", index);
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 16.into()]),
            Operation::new("rg", vec![1.into(), 0.into(), 0.into()]),
            Operation::new("Td", vec![24.into(), (height / 2 + 20).into()]),
            Operation::new("Tj", vec![Object::string_literal(title)]),
            Operation::new("ET", vec![]),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 8.into()]),
            Operation::new("rg", vec![0.into(), 0.into(), 0.into()]),
            Operation::new("Td", vec![24.into(), (height / 2 - 4).into()]),
            Operation::new("Tj", vec![Object::string_literal(printable(reason))]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}

/// First line of `reason`, shortened and limited to ASCII for the base font
fn printable(reason: &str) -> String {
    let line = reason.lines().next().unwrap_or_default();
    let mut out: String = line
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .take(PLACEHOLDER_REASON_CHARS)
        .collect();
    if line.chars().count() > PLACEHOLDER_REASON_CHARS {
        out.push_str("...");
    }
    out
}
