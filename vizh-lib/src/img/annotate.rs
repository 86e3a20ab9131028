// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Annotated renders of a source image, for parser debugging.

use crate::img::contours::Rect;
use crate::interop;
use image::{Rgb, RgbImage};
use nalgebra::DMatrix;

/// Stroke colour for contours the classifier rejected.
pub const ERROR_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Stroke colour for recognised instruction lines.
pub const LINE_COLOR: Rgb<u8> = Rgb([0, 0, 250]);

const STROKE: usize = 3;

/// Render the source image with a box stroked around each rect.
pub fn render_boxes(gray: &DMatrix<u8>, boxes: &[Rect], color: Rgb<u8>) -> RgbImage {
    let mut img = interop::rgb_from_matrix(gray);
    for rect in boxes {
        draw_rect(&mut img, *rect, color);
    }
    img
}

/// Stroke a hollow rectangle, clamped to the image bounds.
pub fn draw_rect(img: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let x0 = rect.x.min(width);
    let y0 = rect.y.min(height);
    let x1 = rect.right().min(width);
    let y1 = rect.bottom().min(height);

    let mut paint = |xa: usize, xb: usize, ya: usize, yb: usize| {
        for y in ya..yb {
            for x in xa..xb {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    };
    paint(x0, x1, y0, (y0 + STROKE).min(y1));
    paint(x0, x1, y1.saturating_sub(STROKE).max(y0), y1);
    paint(x0, (x0 + STROKE).min(x1), y0, y1);
    paint(x1.saturating_sub(STROKE).max(x0), x1, y0, y1);
}
