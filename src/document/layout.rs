#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::cmp::Ordering;

use itertools::Itertools;
use lopdf::{Object, content::Operation};

/// Minimum number of path segments before page-level vector drawing is
/// treated as a visual region.
pub const DIAGRAM_DETECTION_THRESHOLD: usize = 12;

/// Upper bound on operator lines kept for a vector drawing listing.
const MAX_LISTING_LINES: usize = 400;

/// Two-dimensional affine matrix `[a b c d e f]` as used by PDF.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    /// Identity transform.
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// Reads six numeric operands.
    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Vec<f64> = operands.iter().filter_map(number).collect();
        let values: [f64; 6] = values.try_into().ok()?;
        Some(Matrix(values))
    }

    /// Pure translation.
    fn translate(tx: f64, ty: f64) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// Returns `self × other` (apply `self` first, then `other`).
    fn then(self, other: Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    /// Transforms a point.
    fn apply(self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }
}

/// Reads an integer or real operand.
fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// An XObject painted with `Do`.
#[derive(Debug, Clone, PartialEq)]
pub struct XObjectUse {
    /// Resource name of the XObject.
    pub name: Vec<u8>,
    /// Device-space y of its top edge.
    pub top:  f64,
}

/// Page-level vector drawing that was dense enough to count as a visual.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDrawing {
    /// Device-space y of the highest path point.
    pub top:          f64,
    /// Number of path segments.
    pub segments:     usize,
    /// Whether every segment is horizontal or vertical.
    pub axis_aligned: bool,
    /// Operator listing, one operation per line.
    pub listing:      String,
}

/// Positions recovered from one page's content stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageScan {
    /// Baseline y of each text object that shows non-blank text, in stream
    /// order.
    pub text_ys:  Vec<f64>,
    /// XObjects in stream order.
    pub xobjects: Vec<XObjectUse>,
    /// Dense vector drawing, if any.
    pub vector:   Option<VectorDrawing>,
}

/// Accumulates path statistics while scanning.
#[derive(Default)]
struct PathStats {
    /// Segment count.
    segments:     usize,
    /// Horizontal segment seen.
    horizontal:   bool,
    /// Vertical segment seen.
    vertical:     bool,
    /// Any curve or diagonal seen.
    irregular:    bool,
    /// Highest device y.
    top:          Option<f64>,
    /// Operator listing.
    listing:      Vec<String>,
    /// Current point in user space.
    current:      Option<(f64, f64)>,
}

impl PathStats {
    /// Records a device-space point for the top edge.
    fn touch(&mut self, ctm: Matrix, x: f64, y: f64) {
        let (_, dy) = ctm.apply(x, y);
        self.top = Some(self.top.map_or(dy, |top| top.max(dy)));
    }

    /// Records a straight segment to `(x, y)`.
    fn line_to(&mut self, ctm: Matrix, x: f64, y: f64) {
        if let Some((cx, cy)) = self.current {
            let (dx, dy) = ((x - cx).abs(), (y - cy).abs());
            if dy < 0.5 {
                self.horizontal = true;
            } else if dx < 0.5 {
                self.vertical = true;
            } else {
                self.irregular = true;
            }
        }
        self.segments += 1;
        self.current = Some((x, y));
        self.touch(ctm, x, y);
    }

    /// Keeps an operator line for the listing.
    fn log(&mut self, op: &Operation) {
        if self.listing.len() < MAX_LISTING_LINES {
            self.listing.push(format_operation(op));
        }
    }

    /// Converts the statistics into a drawing if dense enough.
    fn finish(self) -> Option<VectorDrawing> {
        if self.segments < DIAGRAM_DETECTION_THRESHOLD {
            return None;
        }
        Some(VectorDrawing {
            top:          self.top.unwrap_or_default(),
            segments:     self.segments,
            axis_aligned: !self.irregular && self.horizontal && self.vertical,
            listing:      self.listing.join("\n"),
        })
    }
}

/// Formats an operation as `operands operator`.
pub fn format_operation(op: &Operation) -> String {
    let operands: Vec<String> = op
        .operands
        .iter()
        .filter_map(|operand| match operand {
            Object::Name(name) => Some(format!("/{}", String::from_utf8_lossy(name))),
            Object::String(bytes, _) => Some(format!("({})", String::from_utf8_lossy(bytes))),
            other => number(other).map(|n| format!("{n:.1}")),
        })
        .collect();
    format!("{} {}", operands.join(" "), op.operator)
        .trim()
        .to_string()
}

/// Listing of the first operations of a content stream, one per line.
pub fn operator_listing(operations: &[Operation]) -> String {
    operations
        .iter()
        .take(MAX_LISTING_LINES)
        .map(format_operation)
        .join("\n")
}

/// Whether a text-showing operand carries non-blank bytes.
fn shows_text(operands: &[Object]) -> bool {
    operands.iter().any(|operand| match operand {
        Object::String(bytes, _) => bytes.iter().any(|b| !b.is_ascii_whitespace()),
        Object::Array(items) => shows_text(items),
        _ => false,
    })
}

/// Walks a decoded content stream and records where text objects, XObjects
/// and vector paths sit on the page.
pub fn scan(operations: &[Operation]) -> PageScan {
    let mut result = PageScan::default();
    let mut ctm = Matrix::IDENTITY;
    let mut stack: Vec<Matrix> = Vec::new();

    let mut line_matrix = Matrix::IDENTITY;
    let mut leading = 0.0;
    let mut object_y: Option<f64> = None;
    let mut object_shows = false;
    let mut paths = PathStats::default();

    for op in operations {
        let operands = op.operands.as_slice();
        match op.operator.as_str() {
            "q" => stack.push(ctm),
            "Q" => ctm = stack.pop().unwrap_or(Matrix::IDENTITY),
            "cm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    ctm = m.then(ctm);
                }
            }
            "BT" => {
                line_matrix = Matrix::IDENTITY;
                object_y = None;
                object_shows = false;
            }
            "ET" => {
                if object_shows {
                    let (_, y) = line_matrix.then(ctm).apply(0.0, 0.0);
                    result.text_ys.push(object_y.unwrap_or(y));
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    line_matrix = m;
                }
            }
            "Td" | "TD" => {
                let values: Vec<f64> = operands.iter().filter_map(number).collect();
                if let [tx, ty] = values[..] {
                    line_matrix = Matrix::translate(tx, ty).then(line_matrix);
                    if op.operator == "TD" {
                        leading = -ty;
                    }
                }
            }
            "TL" => {
                if let Some(value) = operands.first().and_then(number) {
                    leading = value;
                }
            }
            "T*" => line_matrix = Matrix::translate(0.0, -leading).then(line_matrix),
            "Tj" | "TJ" | "'" | "\"" => {
                if matches!(op.operator.as_str(), "'" | "\"") {
                    line_matrix = Matrix::translate(0.0, -leading).then(line_matrix);
                }
                if shows_text(operands) {
                    if object_y.is_none() {
                        let (_, y) = line_matrix.then(ctm).apply(0.0, 0.0);
                        object_y = Some(y);
                    }
                    object_shows = true;
                }
            }
            "Do" => {
                if let Some(Object::Name(name)) = operands.first() {
                    let top = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
                        .into_iter()
                        .map(|(x, y)| ctm.apply(x, y).1)
                        .fold(f64::MIN, f64::max);
                    result.xobjects.push(XObjectUse {
                        name: name.clone(),
                        top,
                    });
                }
            }
            "m" => {
                let values: Vec<f64> = operands.iter().filter_map(number).collect();
                if let [x, y] = values[..] {
                    paths.current = Some((x, y));
                    paths.touch(ctm, x, y);
                    paths.log(op);
                }
            }
            "l" => {
                let values: Vec<f64> = operands.iter().filter_map(number).collect();
                if let [x, y] = values[..] {
                    paths.line_to(ctm, x, y);
                    paths.log(op);
                }
            }
            "c" | "v" | "y" => {
                let values: Vec<f64> = operands.iter().filter_map(number).collect();
                if values.len() >= 4 {
                    let (x, y) = (values[values.len() - 2], values[values.len() - 1]);
                    paths.segments += 1;
                    paths.irregular = true;
                    paths.current = Some((x, y));
                    paths.touch(ctm, x, y);
                    paths.log(op);
                }
            }
            "re" => {
                let values: Vec<f64> = operands.iter().filter_map(number).collect();
                if let [x, y, w, h] = values[..] {
                    paths.segments += 4;
                    paths.horizontal = true;
                    paths.vertical = true;
                    paths.current = Some((x, y));
                    paths.touch(ctm, x, y);
                    paths.touch(ctm, x + w, y + h);
                    paths.log(op);
                }
            }
            _ => {}
        }
    }

    result.vector = paths.finish();
    result
}

/// An item placed in reading order.
#[derive(Debug, Clone, PartialEq)]
pub enum Arranged<V> {
    /// Consecutive text lines merged into one run.
    Text(String),
    /// A visual region.
    Visual(V),
}

/// Interleaves text lines and visuals top-to-bottom.
///
/// `lines` are the page's extracted text lines in stream order. When their
/// count matches `text_ys`, each line takes the position of its text object;
/// otherwise the page text is kept as one run ahead of the visuals. Ties keep
/// text before visuals, and visuals keep their stream order.
pub fn arrange<V>(lines: Vec<String>, text_ys: &[f64], visuals: Vec<(f64, V)>) -> Vec<Arranged<V>> {
    enum Item<V> {
        Line(String),
        Visual(V),
    }

    let mut items: Vec<(f64, Item<V>)> = Vec::new();
    if lines.len() == text_ys.len() {
        items.extend(
            lines
                .into_iter()
                .zip(text_ys.iter().copied())
                .map(|(line, y)| (y, Item::Line(line))),
        );
    } else if !lines.is_empty() {
        items.push((f64::INFINITY, Item::Line(lines.join("\n"))));
    }
    items.extend(visuals.into_iter().map(|(y, v)| (y, Item::Visual(v))));

    items.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(Ordering::Equal));

    let mut arranged: Vec<Arranged<V>> = Vec::new();
    for (_, item) in items {
        match item {
            Item::Line(line) => match arranged.last_mut() {
                Some(Arranged::Text(run)) => {
                    run.push('\n');
                    run.push_str(&line);
                }
                _ => arranged.push(Arranged::Text(line)),
            },
            Item::Visual(v) => arranged.push(Arranged::Visual(v)),
        }
    }
    arranged
}
