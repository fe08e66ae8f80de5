#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// PDF parsing into ordered content blocks
pub mod ingest;
/// Reading-order reconstruction from page content streams
pub mod layout;
/// Resolving visual blocks into text through the reasoning service
pub mod resolve;

pub use ingest::{IngestedDocument, ingest};
pub use resolve::{ResolvedDocument, resolve_visuals};

/// Which of the two input documents a block or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRole {
    /// The assignment specification.
    Assignment,
    /// The student's submission.
    Submission,
}

impl fmt::Display for DocumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentRole::Assignment => write!(f, "assignment"),
            DocumentRole::Submission => write!(f, "submission"),
        }
    }
}

/// Kind of extracted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Extracted text.
    Text,
    /// Ruled tabular drawing.
    Table,
    /// Vector drawing or form XObject.
    Figure,
    /// Embedded raster image.
    Image,
}

impl BlockKind {
    /// Whether blocks of this kind go through the Visual Block Resolver.
    pub fn is_visual(self) -> bool {
        !matches!(self, BlockKind::Text)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::Text => "text",
            BlockKind::Table => "table",
            BlockKind::Figure => "figure",
            BlockKind::Image => "image",
        };
        f.write_str(name)
    }
}

/// Encoded data behind a visual block.
#[derive(Debug, Clone, PartialEq)]
pub enum VisualData {
    /// Raster bytes in a format image-capable models accept.
    Raster {
        /// MIME type, `image/png` or `image/jpeg`.
        media_type: &'static str,
        /// Encoded image bytes.
        bytes:      Arc<[u8]>,
    },
    /// Vector drawing operators, one per line.
    Vector(Arc<str>),
    /// An embedded image the ingestor could not decode.
    Undecodable(String),
}

/// Opaque reference to a visual region plus the data needed to describe it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualAsset {
    /// Stable identifier, unique within a document.
    pub reference: String,
    /// Encoded data; not serialized.
    #[serde(skip)]
    pub data:      VisualData,
}

/// Raw payload of a block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Exact extracted text.
    Text(String),
    /// Visual region reference.
    Visual(VisualAsset),
}

/// One unit of extracted page content. Ordering by `(page, ordinal)` is
/// significant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentBlock {
    /// Kind of content.
    kind:        BlockKind,
    /// 1-based page number.
    page:        u32,
    /// Position within the page, starting at 0.
    ordinal:     u32,
    /// Text or visual reference.
    payload:     Payload,
    /// Filled in by the resolver for visual blocks.
    description: Option<String>,
}

impl ContentBlock {
    /// Creates a text block.
    pub fn text(page: u32, ordinal: u32, text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Text,
            page,
            ordinal,
            payload: Payload::Text(text.into()),
            description: None,
        }
    }

    /// Creates an unresolved visual block.
    pub fn visual(kind: BlockKind, page: u32, ordinal: u32, asset: VisualAsset) -> Self {
        Self {
            kind,
            page,
            ordinal,
            payload: Payload::Visual(asset),
            description: None,
        }
    }

    /// Returns a copy of this block carrying `description`.
    pub fn with_description(&self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self.clone()
        }
    }

    /// Kind of content.
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// 1-based page number.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Position within the page.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// `(page, ordinal)` sort key.
    pub fn position(&self) -> (u32, u32) {
        (self.page, self.ordinal)
    }

    /// Raw payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Resolved description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Visual asset for visual blocks.
    pub fn asset(&self) -> Option<&VisualAsset> {
        match &self.payload {
            Payload::Visual(asset) => Some(asset),
            Payload::Text(_) => None,
        }
    }
}

/// Renders blocks as page-delimited prompt context.
///
/// Visuals appear inline at their position followed by their description.
pub fn render_blocks(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    let mut current_page = None;

    for block in blocks {
        if current_page != Some(block.page) {
            if current_page.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("--- Page {} ---\n", block.page));
            current_page = Some(block.page);
        }

        match &block.payload {
            Payload::Text(text) => {
                out.push_str(text.trim_end());
                out.push('\n');
            }
            Payload::Visual(_) => {
                out.push_str(&format!(
                    "[VISUAL page {} #{}: {}]\n",
                    block.page, block.ordinal, block.kind
                ));
                match &block.description {
                    Some(description) => out.push_str(description.trim_end()),
                    None => out.push_str("(no description available)"),
                }
                out.push_str("\n[/VISUAL]\n");
            }
        }
    }

    out
}

/// Parses the `(page, ordinal)` out of a `[VISUAL page P #k]` marker.
///
/// Accepts the `: kind` suffix [`render_blocks`] emits and is case-insensitive.
pub fn marker_position(marker: &str) -> Option<(u32, u32)> {
    let lower = marker.to_ascii_lowercase();
    let rest = &lower[lower.find("page")? + "page".len()..];
    let (page, rest) = rest.split_once('#')?;
    let ordinal: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    Some((page.trim().parse().ok()?, ordinal.parse().ok()?))
}

/// A resolved visual that a task answer cites.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferencedVisual {
    /// Marker as cited in the answer.
    pub marker:      String,
    /// Kind of the visual block.
    pub kind:        BlockKind,
    /// Resolved description, or the unresolved placeholder.
    pub description: String,
}

/// Descriptions of resolved visual blocks keyed by `(page, ordinal)`.
#[derive(Debug, Clone, Default)]
pub struct VisualIndex {
    /// Kind and description per visual block position.
    by_position: BTreeMap<(u32, u32), (BlockKind, String)>,
}

impl VisualIndex {
    /// Indexes every visual block of `blocks` that carries a description.
    pub fn new(blocks: &[ContentBlock]) -> Self {
        let by_position = blocks
            .iter()
            .filter(|block| block.kind.is_visual())
            .filter_map(|block| {
                let description = block.description.clone()?;
                Some((block.position(), (block.kind, description)))
            })
            .collect();
        Self { by_position }
    }

    /// Resolves `markers`, skipping ones that match no described visual and
    /// repeats of the same position.
    pub fn referenced(&self, markers: &[String]) -> Vec<ReferencedVisual> {
        let mut seen = Vec::new();
        markers
            .iter()
            .filter_map(|marker| {
                let position = marker_position(marker)?;
                let (kind, description) = self.by_position.get(&position)?;
                if seen.contains(&position) {
                    return None;
                }
                seen.push(position);
                Some(ReferencedVisual {
                    marker: marker.clone(),
                    kind: *kind,
                    description: description.clone(),
                })
            })
            .collect()
    }
}
