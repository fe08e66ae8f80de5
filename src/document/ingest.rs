#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{io::Cursor, sync::Arc};

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, content::Content};
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    BlockKind, ContentBlock, VisualAsset, VisualData,
    layout::{self, Arranged},
};
use crate::error::IngestError;

/// Parent-chain depth limit when looking up inherited page resources.
const MAX_RESOURCE_DEPTH: usize = 32;

/// Output of the Document Ingestor.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedDocument {
    /// Number of pages in the PDF.
    pub page_count: u32,
    /// `Title` from the document information dictionary.
    pub title:      Option<String>,
    /// `Author` from the document information dictionary.
    pub author:     Option<String>,
    /// Blocks ordered by `(page, ordinal)`.
    pub blocks:     Vec<ContentBlock>,
}

impl IngestedDocument {
    /// Number of blocks that need visual resolution.
    pub fn visual_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.kind().is_visual()).count()
    }
}

/// Extracts an ordered sequence of content blocks from PDF bytes.
///
/// Text blocks carry the exact extracted text. Visual regions become
/// placeholder blocks with an opaque reference and no description; they are
/// never dropped.
pub fn ingest(pdf_bytes: &[u8]) -> Result<IngestedDocument, IngestError> {
    let doc =
        Document::load_mem(pdf_bytes).map_err(|e| IngestError::Unparseable(e.to_string()))?;

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(IngestError::NoPages);
    }

    let mut blocks = Vec::new();
    for (&number, &page_id) in &pages {
        blocks.extend(ingest_page(&doc, number, page_id)?);
    }

    let (title, author) = info_strings(&doc);
    debug!(pages = pages.len(), blocks = blocks.len(), "Ingested PDF");

    Ok(IngestedDocument {
        page_count: pages.len() as u32,
        title,
        author,
        blocks,
    })
}

/// Produces the blocks for one page in reading order.
fn ingest_page(
    doc: &Document,
    number: u32,
    page_id: ObjectId,
) -> Result<Vec<ContentBlock>, IngestError> {
    let content = doc
        .get_and_decode_page_content(page_id)
        .map_err(|e| IngestError::Page {
            page:   number,
            reason: e.to_string(),
        })?;
    let scan = layout::scan(&content.operations);

    let text = doc.extract_text(&[number]).unwrap_or_else(|e| {
        warn!("Could not extract text from page {number}: {e}");
        String::new()
    });
    let lines: Vec<String> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    let mut visuals: Vec<(f64, (BlockKind, VisualData))> = Vec::new();
    for used in &scan.xobjects {
        let name = String::from_utf8_lossy(&used.name);
        let Some(stream) = page_xobject(doc, page_id, &used.name) else {
            warn!("XObject /{name} on page {number} could not be resolved");
            let reason = format!("XObject /{name} is missing from the page resources");
            let data = VisualData::Undecodable(reason);
            visuals.push((used.top, (BlockKind::Figure, data)));
            continue;
        };
        let visual = match name_of(&stream.dict, b"Subtype").as_deref() {
            Some("Image") => (BlockKind::Image, raster(stream)),
            Some("Form") => (BlockKind::Figure, form_listing(stream)),
            other => {
                debug!("XObject /{name} on page {number} has subtype {other:?}");
                let reason = format!("unsupported XObject subtype {other:?}");
                (BlockKind::Figure, VisualData::Undecodable(reason))
            }
        };
        visuals.push((used.top, visual));
    }
    if let Some(drawing) = &scan.vector {
        let kind = if drawing.axis_aligned {
            BlockKind::Table
        } else {
            BlockKind::Figure
        };
        visuals.push((drawing.top, (kind, VisualData::Vector(drawing.listing.as_str().into()))));
    }

    let blocks = layout::arrange(lines, &scan.text_ys, visuals)
        .into_iter()
        .enumerate()
        .map(|(ordinal, item)| {
            let ordinal = ordinal as u32;
            match item {
                Arranged::Text(text) => ContentBlock::text(number, ordinal, text),
                Arranged::Visual((kind, data)) => {
                    let asset = VisualAsset {
                        reference: format!("p{number}-{kind}-{ordinal}"),
                        data,
                    };
                    ContentBlock::visual(kind, number, ordinal, asset)
                }
            }
        })
        .collect();

    Ok(blocks)
}

/// Follows a reference, if `obj` is one.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Resolves `obj` into a dictionary.
fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj)?.as_dict().ok()
}

/// Reads a name entry as a string.
fn name_of(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

/// Looks up an XObject by resource name, honouring inherited resources.
fn page_xobject<'a>(doc: &'a Document, page_id: ObjectId, name: &[u8]) -> Option<&'a Stream> {
    let mut node = doc.get_dictionary(page_id).ok()?;

    for _ in 0..MAX_RESOURCE_DEPTH {
        if let Some(resources) = node.get(b"Resources").ok().and_then(|r| resolve_dict(doc, r))
            && let Some(xobjects) = resources.get(b"XObject").ok().and_then(|x| resolve_dict(doc, x))
            && let Ok(entry) = xobjects.get(name)
        {
            return resolve(doc, entry)?.as_stream().ok();
        }

        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Names listed under `Filter`, in order.
fn filters(dict: &Dictionary) -> Vec<String> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![String::from_utf8_lossy(name).into_owned()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Converts an image XObject into bytes an image-capable model accepts.
fn raster(stream: &Stream) -> VisualData {
    let dict = &stream.dict;
    let filters = filters(dict);

    if filters.iter().any(|f| f == "DCTDecode") {
        return VisualData::Raster {
            media_type: "image/jpeg",
            bytes:      Arc::from(stream.content.as_slice()),
        };
    }

    let pixels = match filters.as_slice() {
        [] => stream.content.clone(),
        [only] if only == "FlateDecode" => match stream.decompressed_content() {
            Ok(bytes) => bytes,
            Err(e) => return VisualData::Undecodable(format!("corrupt Flate image data: {e}")),
        },
        other => return VisualData::Undecodable(format!("unsupported image filters {other:?}")),
    };

    let dimension = |key: &[u8]| dict.get(key).ok().and_then(|o| o.as_i64().ok());
    let (Some(width), Some(height)) = (dimension(b"Width"), dimension(b"Height")) else {
        return VisualData::Undecodable("image without dimensions".to_string());
    };
    if dimension(b"BitsPerComponent").unwrap_or(8) != 8 {
        return VisualData::Undecodable("only 8-bit images are supported".to_string());
    }
    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        return VisualData::Undecodable(format!("invalid image size {width}x{height}"));
    };

    let image = match name_of(dict, b"ColorSpace").as_deref() {
        Some("DeviceRGB") => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        Some("DeviceGray") => {
            GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        }
        other => {
            return VisualData::Undecodable(format!("unsupported color space {other:?}"));
        }
    };
    let Some(image) = image else {
        return VisualData::Undecodable("image data shorter than its dimensions".to_string());
    };

    let mut encoded = Cursor::new(Vec::new());
    match image.write_to(&mut encoded, ImageFormat::Png) {
        Ok(()) => VisualData::Raster {
            media_type: "image/png",
            bytes:      Arc::from(encoded.into_inner()),
        },
        Err(e) => VisualData::Undecodable(format!("PNG encoding failed: {e}")),
    }
}

/// Lists a form XObject's drawing operators.
fn form_listing(stream: &Stream) -> VisualData {
    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    match Content::decode(&data) {
        Ok(content) => VisualData::Vector(layout::operator_listing(&content.operations).into()),
        Err(e) => VisualData::Undecodable(format!("form content could not be decoded: {e}")),
    }
}

/// Title and author from the document information dictionary.
fn info_strings(doc: &Document) -> (Option<String>, Option<String>) {
    let Some(info) = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|info| resolve_dict(doc, info))
    else {
        return (None, None);
    };

    let read = |key: &[u8]| match info.get(key).ok()? {
        Object::String(bytes, _) => {
            let value = String::from_utf8(bytes.clone())
                .unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect());
            let value = value.trim().to_string();
            (!value.is_empty()).then_some(value)
        }
        _ => None,
    };

    (read(b"Title"), read(b"Author"))
}
