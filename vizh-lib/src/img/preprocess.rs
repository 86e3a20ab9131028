// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Preprocessing of a source image: binarisation and isolation of the
//! signature band from the instruction body.

use crate::img::contours::{self, Rect};
use crate::interop;
use nalgebra::DMatrix;
use std::path::Path;

/// Intensity above which a pixel counts as background. Load-bearing: the
/// recognition heuristics are calibrated against it.
pub const BINARY_THRESHOLD: u8 = 240;

/// Side of the rectangular dilation kernel used to fuse the signature
/// tokens into two solid boxes. Load-bearing, like the threshold.
pub const SIGNATURE_KERNEL: usize = 18;

/// The two text boxes of the signature band, in full-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureBand {
    pub name_box: Rect,
    pub args_box: Rect,
}

impl SignatureBand {
    /// First row below both signature boxes; the body region starts here.
    pub fn bottom(&self) -> usize {
        self.name_box.bottom().max(self.args_box.bottom())
    }
}

/// Decode an image file into a grayscale matrix.
pub fn load_grayscale<P: AsRef<Path>>(path: P) -> Result<DMatrix<u8>, image::ImageError> {
    let img = image::open(path)?;
    Ok(interop::matrix_from_image(img.into_luma8()))
}

/// Binarise a grayscale image into a white-on-black glyph mask: ink
/// pixels (below the threshold) become 255, background becomes 0.
pub fn binarise(gray: &DMatrix<u8>) -> DMatrix<u8> {
    gray.map(|intensity| if intensity >= BINARY_THRESHOLD { 0 } else { 255 })
}

/// Rectangular binary dilation.
pub fn dilate(bin: &DMatrix<u8>, kernel: usize) -> DMatrix<u8> {
    let back = kernel / 2;
    let forward = kernel - 1 - back;
    let (rows, cols) = bin.shape();

    // Separable: rows first, then columns.
    let mut horizontal: DMatrix<u8> = DMatrix::zeros(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let lo = c.saturating_sub(back);
            let hi = (c + forward).min(cols - 1);
            if (lo..=hi).any(|cc| bin[(r, cc)] > 0) {
                horizontal[(r, c)] = 255;
            }
        }
    }
    let mut dilated = DMatrix::zeros(rows, cols);
    for r in 0..rows {
        let lo = r.saturating_sub(back);
        let hi = (r + forward).min(rows - 1);
        for c in 0..cols {
            if (lo..=hi).any(|rr| horizontal[(rr, c)] > 0) {
                dilated[(r, c)] = 255;
            }
        }
    }
    dilated
}

/// Locate the function-name and argument-count boxes.
///
/// The binary image is dilated so the characters of each token fuse into
/// one blob, then the two blobs closest to the top of the image are taken;
/// the left one is the function name, the right one the argument count.
pub fn find_signature_band(bin: &DMatrix<u8>) -> Option<SignatureBand> {
    let dilated = dilate(bin, SIGNATURE_KERNEL);
    let mut boxes: Vec<Rect> = find_boxes(&dilated);
    if boxes.len() < 2 {
        return None;
    }
    boxes.sort_by_key(|b| b.y);
    let mut topmost = [boxes[0], boxes[1]];
    topmost.sort_by_key(|b| b.x);
    Some(SignatureBand {
        name_box: topmost[0],
        args_box: topmost[1],
    })
}

fn find_boxes(bin: &DMatrix<u8>) -> Vec<Rect> {
    contours::find_external_contours(bin)
        .iter()
        .map(|contour| contours::bounding_rect(contour))
        .collect()
}

/// Crop the rows at or below the signature band, yielding the body region
/// together with its vertical offset in the source image.
pub fn body_region(bin: &DMatrix<u8>, band: &SignatureBand) -> (usize, DMatrix<u8>) {
    let (rows, cols) = bin.shape();
    let split = band.bottom().min(rows);
    let body = bin.slice((split, 0), (rows - split, cols)).into_owned();
    (split, body)
}
