// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Recovery of a function from a source image: shape classification of
//! the body glyphs and assembly into reading order.

use crate::img::contours::{self, Contour, Rect};
use crate::img::preprocess;
use crate::ir::{Function, FunctionSignature, Instruction};
use crate::ocr::{Ocr, OcrError, TesseractOcr};
use nalgebra::{DMatrix, Point2};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Slope angle of a triangle's sides, measured against the horizontal.
const TRIANGLE_SLOPE_ANGLE: f64 = 30.0;
/// Slope angle of an arrow head's sides.
const ARROW_SLOPE_ANGLE: f64 = 45.0;
/// Half-width of the band around a slope angle that still matches.
const SLOPE_TOLERANCE: f64 = 15.0;
/// Stroke radius used to erase a call circle before reading its label.
const CALL_ERASE_RADIUS: usize = 5;
/// Padding around a recognised line in debug renders.
const LINE_PADDING: usize = 15;

/// A classified instruction together with the box it was found in,
/// in body-region coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionData {
    pub bounding_box: Rect,
    pub instruction: Instruction,
}

/// A single shape the classifier could not make sense of. The box is in
/// full-image coordinates so the offending pixels can be pointed at.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct ShapeError {
    pub reason: String,
    pub bounding_box: Rect,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("could not read {}: {}", .path.display(), .source)]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("could not locate the function signature at the top of the image")]
    Signature,
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error("could not read a function name from the signature")]
    EmptyFunctionName,
    #[error("the function name {0:?} is not a valid identifier")]
    BadFunctionName(String),
    #[error("the argument count {0:?} is not a nonnegative integer")]
    BadArgCount(String),
    #[error("{} shape(s) were not recognised", .0.len())]
    Shapes(Vec<ShapeError>),
}

/// Everything recovered from one source image.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub function: Function,
    /// Recognised instructions grouped into reading-order lines, with
    /// their boxes in body-region coordinates.
    pub lines: Vec<Vec<InstructionData>>,
    /// Vertical offset of the body region in the source image.
    pub band_bottom: usize,
}

impl Parsed {
    /// One padded box per recognised line, in full-image coordinates
    /// clamped to the given image shape, for debug renders.
    pub fn line_boxes(&self, shape: (usize, usize)) -> Vec<Rect> {
        let (rows, cols) = shape;
        self.lines
            .iter()
            .filter(|line| !line.is_empty())
            .map(|line| {
                let first = &line[0].bounding_box;
                let last = &line[line.len() - 1].bounding_box;
                let min_y = line
                    .iter()
                    .map(|i| i.bounding_box.y)
                    .min()
                    .unwrap_or(first.y);
                let x0 = first.x.saturating_sub(LINE_PADDING);
                let y0 = (min_y + self.band_bottom).saturating_sub(LINE_PADDING);
                let x1 = (last.right() + LINE_PADDING).min(cols);
                let y1 = (last.bottom() + self.band_bottom + LINE_PADDING).min(rows);
                Rect {
                    x: x0,
                    y: y0,
                    w: x1.saturating_sub(x0),
                    h: y1.saturating_sub(y0),
                }
            })
            .collect()
    }
}

/// Parser for vizh source images. Owns the OCR adapter for its lifetime.
pub struct Parser {
    ocr: Box<dyn Ocr>,
}

impl Parser {
    pub fn new() -> Result<Self, OcrError> {
        Ok(Parser::with_ocr(Box::new(TesseractOcr::new()?)))
    }

    /// Use a specific recogniser, e.g. a scripted one in tests.
    pub fn with_ocr(ocr: Box<dyn Ocr>) -> Self {
        Parser { ocr }
    }

    /// Parse a source image file into a function.
    pub fn parse<P: AsRef<Path>>(&mut self, path: P) -> Result<Function, ParseError> {
        self.parse_file(path).map(|parsed| parsed.function)
    }

    /// Parse a source image file, keeping the layout information around
    /// for debug renders.
    pub fn parse_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Parsed, ParseError> {
        let path = path.as_ref();
        let gray = preprocess::load_grayscale(path).map_err(|source| ParseError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("parsing {}", path.display());
        self.parse_image(&gray)
    }

    /// Parse an already decoded grayscale image.
    pub fn parse_image(&mut self, gray: &DMatrix<u8>) -> Result<Parsed, ParseError> {
        let binary = preprocess::binarise(gray);
        let band = preprocess::find_signature_band(&binary).ok_or(ParseError::Signature)?;
        let signature = self.parse_signature(gray, &band)?;
        log::debug!("signature: {}/{}", signature.name, signature.n_args);

        let (band_bottom, body) = preprocess::body_region(&binary, &band);
        let (instructions, errors) = self.parse_contours(&body, band_bottom);
        if !errors.is_empty() {
            return Err(ParseError::Shapes(errors));
        }

        let lines = recognise_instruction_lines(instructions);
        let stream = lines
            .iter()
            .flat_map(|line| line.iter().map(|data| data.instruction.clone()))
            .collect();
        Ok(Parsed {
            function: Function::new(signature, stream),
            lines,
            band_bottom,
        })
    }

    /// Read the function name and argument count. The crops are taken
    /// from the grayscale image; the binary one only locates the boxes.
    fn parse_signature(
        &mut self,
        gray: &DMatrix<u8>,
        band: &preprocess::SignatureBand,
    ) -> Result<FunctionSignature, ParseError> {
        let name = self.ocr.recognise(&contours::crop(gray, band.name_box))?;
        if name.is_empty() {
            return Err(ParseError::EmptyFunctionName);
        }
        let args_text = self.ocr.recognise(&contours::crop(gray, band.args_box))?;
        let n_args: usize = args_text
            .parse()
            .map_err(|_| ParseError::BadArgCount(args_text))?;
        FunctionSignature::new(&name, n_args).map_err(|_| ParseError::BadFunctionName(name))
    }

    /// Classify every shape in the body region, collecting all failures
    /// so the user sees every offending glyph in one pass.
    fn parse_contours(
        &mut self,
        body: &DMatrix<u8>,
        band_bottom: usize,
    ) -> (Vec<InstructionData>, Vec<ShapeError>) {
        let mut instructions = Vec::new();
        let mut errors = Vec::new();
        for contour in find_external_contours(body) {
            let epsilon = 0.01 * contours::arc_length(&contour);
            let polygon = contours::approx_polygon(&contour, epsilon);
            let bounding_box = contours::bounding_rect(&contour);
            match self.parse_polygon(body, &contour, &polygon) {
                Ok(Some(instruction)) => instructions.push(InstructionData {
                    bounding_box,
                    instruction,
                }),
                Ok(None) => {} // comment
                Err(reason) => errors.push(ShapeError {
                    reason,
                    bounding_box: Rect {
                        y: bounding_box.y + band_bottom,
                        ..bounding_box
                    },
                }),
            }
        }
        (instructions, errors)
    }

    /// Map one approximated polygon to an instruction. `Ok(None)` means
    /// the shape is a comment and emits nothing.
    fn parse_polygon(
        &mut self,
        body: &DMatrix<u8>,
        contour: &Contour,
        polygon: &[Point2<f64>],
    ) -> Result<Option<Instruction>, String> {
        match polygon.len() {
            // Triangle: either read or write.
            3 => match detect_direction(polygon, TRIANGLE_SLOPE_ANGLE) {
                ArrowDirection::Up => Ok(Some(Instruction::Read)),
                ArrowDirection::Down => Ok(Some(Instruction::Write)),
                _ => Err("Found a triangle, but not sure what direction it's pointing".to_string()),
            },

            // Minus sign: decrement, unless the quadrilateral encloses
            // enough contours to be a comment box.
            4 => {
                let symbol = contours::crop(body, contours::bounding_rect(contour));
                if contours::count_nested_contours(&symbol) > 2 {
                    Ok(None)
                } else {
                    Ok(Some(Instruction::Dec))
                }
            }

            // Brace: either loop start or end.
            6 => Ok(Some(classify_brace(polygon))),

            // Arrow: either up, down, left, or right.
            7 => {
                let instruction = match detect_direction(polygon, ARROW_SLOPE_ANGLE) {
                    ArrowDirection::Left => Instruction::Left,
                    ArrowDirection::Right => Instruction::Right,
                    ArrowDirection::Up => Instruction::Up,
                    ArrowDirection::Down => Instruction::Down,
                    ArrowDirection::Unknown => {
                        return Err(
                            "Found an arrow, but not sure what direction it's pointing".to_string()
                        )
                    }
                };
                Ok(Some(instruction))
            }

            // Plus: increment.
            8 => Ok(Some(Instruction::Inc)),

            // Probably a circle: look for a function call.
            n if n >= 11 => {
                let rect = contours::bounding_rect(contour);
                let mut symbol = contours::crop(body, rect);
                // Erase the ring so only the label is left to read.
                contours::erase_contour(&mut symbol, contour, (rect.y, rect.x), CALL_ERASE_RADIUS);
                let callee = self
                    .ocr
                    .recognise(&symbol)
                    .map_err(|err| err.to_string())?;
                if callee.is_empty() {
                    return Err(
                        "Found a circle, but couldn't parse a function name inside it".to_string()
                    );
                }
                Instruction::call(callee)
                    .map(Some)
                    .map_err(|err| err.to_string())
            }

            _ => Err("Didn't recognise the instruction".to_string()),
        }
    }
}

/// Body contours with speckle noise dropped.
fn find_external_contours(body: &DMatrix<u8>) -> Vec<Contour> {
    contours::find_external_contours(body)
        .into_iter()
        .filter(|contour| contour.len() >= 4 || contours::contour_area(contour) > 4.0)
        .collect()
}

/// Group the recognised instructions into reading-order lines, then
/// left-to-right within each line. Never adds, drops, or reshapes
/// instructions.
pub fn recognise_instruction_lines(mut instructions: Vec<InstructionData>) -> Vec<Vec<InstructionData>> {
    if instructions.is_empty() {
        return Vec::new();
    }

    // Sort by the lowest point of each symbol's bounding box.
    instructions.sort_by_key(|i| i.bounding_box.bottom());

    // Split into lines: a symbol starting strictly below the bottom of
    // the previous symbol opens a new line.
    let mut lines = Vec::new();
    let mut current_line = vec![instructions[0].clone()];
    for pair in instructions.windows(2) {
        let (previous, next) = (&pair[0], &pair[1]);
        if next.bounding_box.y > previous.bounding_box.bottom() {
            lines.push(std::mem::replace(&mut current_line, Vec::new()));
        }
        current_line.push(next.clone());
    }
    lines.push(current_line);

    // Sort the lines horizontally.
    for line in lines.iter_mut() {
        line.sort_by_key(|i| i.bounding_box.x);
    }
    lines
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrowDirection {
    Left,
    Right,
    Up,
    Down,
    Unknown,
}

/// Adjacent vertex pairs of the polygon, cyclically.
fn adjacent_edges(polygon: &[Point2<f64>]) -> Vec<(Point2<f64>, Point2<f64>)> {
    let n = polygon.len();
    (0..n).map(|i| (polygon[i], polygon[(i + n - 1) % n])).collect()
}

/// Find the edges sloping down-rightwards and up-rightwards at the given
/// angle, within tolerance. Edges are oriented left-to-right first.
fn find_slopes(
    polygon: &[Point2<f64>],
    slope_angle: f64,
) -> (
    Option<(Point2<f64>, Point2<f64>)>,
    Option<(Point2<f64>, Point2<f64>)>,
) {
    let mut downward = None;
    let mut upward = None;
    for (a, b) in adjacent_edges(polygon) {
        let (p1, p2) = if a.x > b.x { (b, a) } else { (a, b) };
        let vector = p2 - p1;
        let norm = vector.norm();
        if norm == 0.0 {
            continue;
        }
        // Which side of 90 degrees the angle is tells us if it's a down
        // or up slope.
        let deg = (vector.y / norm).acos().to_degrees();
        if deg >= slope_angle - SLOPE_TOLERANCE && deg <= slope_angle + SLOPE_TOLERANCE {
            downward = Some((p1, p2));
        } else if deg >= 180.0 - slope_angle - SLOPE_TOLERANCE
            && deg <= 180.0 - slope_angle + SLOPE_TOLERANCE
        {
            upward = Some((p1, p2));
        }
    }
    (downward, upward)
}

/// Direction a triangle or arrow points, from the relative placement of
/// its two slopes.
fn detect_direction(polygon: &[Point2<f64>], slope_angle: f64) -> ArrowDirection {
    let (downward, upward) = match find_slopes(polygon, slope_angle) {
        (Some(d), Some(u)) => (d, u),
        _ => return ArrowDirection::Unknown,
    };

    let (d_x0, d_x1) = minmax(downward.0.x, downward.1.x);
    let (u_x0, u_x1) = minmax(upward.0.x, upward.1.x);
    let (d_y0, d_y1) = minmax(downward.0.y, downward.1.y);
    let (u_y0, u_y1) = minmax(upward.0.y, upward.1.y);

    if d_x0 < u_x0 && d_x1 < u_x1 {
        ArrowDirection::Down
    } else if d_x0 > u_x0 && d_x1 > u_x1 {
        ArrowDirection::Up
    } else if d_y0 < u_y0 && d_y1 < u_y1 {
        ArrowDirection::Right
    } else if d_y0 > u_y0 && d_y1 > u_y1 {
        ArrowDirection::Left
    } else {
        ArrowDirection::Unknown
    }
}

fn minmax(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A brace is a loop end if its long vertical stroke sits strictly to the
/// right of the leftmost vertex, otherwise a loop start.
fn classify_brace(polygon: &[Point2<f64>]) -> Instruction {
    let edges = adjacent_edges(polygon);
    let mut longest = edges[0];
    let mut longest_dy = (longest.1.y - longest.0.y).abs();
    for edge in &edges[1..] {
        let dy = (edge.1.y - edge.0.y).abs();
        if dy > longest_dy {
            longest_dy = dy;
            longest = *edge;
        }
    }
    let leftmost_x = polygon
        .iter()
        .map(|p| p.x)
        .fold(f64::MAX, f64::min);

    if longest.0.x.min(longest.1.x) > leftmost_x {
        Instruction::LoopEnd
    } else {
        Instruction::LoopStart
    }
}
