// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! External contour extraction and polygon approximation.
//!
//! Works on binary matrices where glyph pixels are non-zero. Contours are
//! traced clockwise with Moore neighbourhood boundary following, one outer
//! boundary per 8-connected white component.

use nalgebra::{DMatrix, Point2};

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

impl Rect {
    pub fn right(&self) -> usize {
        self.x + self.w
    }

    pub fn bottom(&self) -> usize {
        self.y + self.h
    }
}

/// Boundary of one white component, as `(x, y)` pixel positions.
pub type Contour = Vec<Point2<f64>>;

/// Moore neighbourhood, clockwise from east, as `(row, col)` offsets.
const MOORE: [(i64, i64); 8] = [
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
];

/// Extract the external contour of every white 8-connected component.
///
/// Components are found by flood fill, then each outer boundary is traced
/// exactly once from the component's first pixel in row-major order, so
/// hole boundaries are never reported.
pub fn find_external_contours(bin: &DMatrix<u8>) -> Vec<Contour> {
    let (rows, cols) = bin.shape();
    let mut labelled = vec![false; rows * cols];
    let mut contours = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            if bin[(r, c)] == 0 || labelled[r * cols + c] {
                continue;
            }
            flood_fill(bin, &mut labelled, (r, c));
            contours.push(trace_boundary(bin, (r, c)));
        }
    }
    log::debug!("found {} external contours", contours.len());
    contours
}

/// Mark every pixel of the component containing `start`.
fn flood_fill(bin: &DMatrix<u8>, labelled: &mut [bool], start: (usize, usize)) {
    let (rows, cols) = bin.shape();
    let mut stack = vec![start];
    labelled[start.0 * cols + start.1] = true;
    while let Some((r, c)) = stack.pop() {
        for &(dr, dc) in MOORE.iter() {
            let (nr, nc) = (r as i64 + dr, c as i64 + dc);
            if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                continue;
            }
            let (nr, nc) = (nr as usize, nc as usize);
            if bin[(nr, nc)] > 0 && !labelled[nr * cols + nc] {
                labelled[nr * cols + nc] = true;
                stack.push((nr, nc));
            }
        }
    }
}

/// Trace the outer boundary clockwise, starting at the topmost-leftmost
/// pixel of a component. Stops on re-entering the start pixel by the same
/// move that began the trace (Jacob's criterion).
fn trace_boundary(bin: &DMatrix<u8>, start: (usize, usize)) -> Contour {
    let (rows, cols) = bin.shape();
    let white = |r: i64, c: i64| {
        r >= 0 && c >= 0 && r < rows as i64 && c < cols as i64 && bin[(r as usize, c as usize)] > 0
    };

    let s = (start.0 as i64, start.1 as i64);
    let mut points = vec![s];
    let mut current = s;
    // The scan found `start` first in row-major order, so its west
    // neighbour is background.
    let mut backtrack = 4usize;
    let mut first_move = None;

    let max_steps = 4 * rows * cols + 8;
    'trace: for _ in 0..max_steps {
        for k in 1..=8 {
            let d = (backtrack + k) % 8;
            let (dr, dc) = MOORE[d];
            let (nr, nc) = (current.0 + dr, current.1 + dc);
            if !white(nr, nc) {
                continue;
            }
            if current == s && first_move == Some(d) {
                break 'trace;
            }
            if first_move.is_none() {
                first_move = Some(d);
            }
            points.push((nr, nc));
            current = (nr, nc);
            backtrack = (d + 5) % 8;
            continue 'trace;
        }
        // Isolated pixel: no white neighbour at all.
        break;
    }

    if points.len() > 1 && points.last() == Some(&s) {
        points.pop();
    }
    points
        .into_iter()
        .map(|(r, c)| Point2::new(c as f64, r as f64))
        .collect()
}

/// Perimeter of the closed contour.
pub fn arc_length(contour: &[Point2<f64>]) -> f64 {
    if contour.len() < 2 {
        return 0.0;
    }
    let mut length = 0.0;
    for i in 0..contour.len() {
        let next = contour[(i + 1) % contour.len()];
        length += (next - contour[i]).norm();
    }
    length
}

/// Area of the closed contour (shoelace formula).
pub fn contour_area(contour: &[Point2<f64>]) -> f64 {
    if contour.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..contour.len() {
        let a = contour[i];
        let b = contour[(i + 1) % contour.len()];
        twice_area += a.x * b.y - b.x * a.y;
    }
    twice_area.abs() / 2.0
}

/// Douglas-Peucker approximation of a closed contour.
///
/// The contour is split at the point farthest from its first vertex and
/// each half is simplified independently, so that at least two vertices
/// anchor the result.
pub fn approx_polygon(contour: &[Point2<f64>], epsilon: f64) -> Vec<Point2<f64>> {
    if contour.len() < 3 {
        return contour.to_vec();
    }

    let mut split = 0;
    let mut best = 0.0;
    for (i, point) in contour.iter().enumerate() {
        let dist = (point - contour[0]).norm();
        if dist > best {
            best = dist;
            split = i;
        }
    }

    let mut closing = contour[split..].to_vec();
    closing.push(contour[0]);

    let mut polygon = Vec::new();
    douglas_peucker(&contour[..=split], epsilon, &mut polygon);
    polygon.pop();
    douglas_peucker(&closing, epsilon, &mut polygon);
    polygon.pop();
    polygon
}

fn douglas_peucker(points: &[Point2<f64>], epsilon: f64, result: &mut Vec<Point2<f64>>) {
    if points.len() < 3 {
        result.extend_from_slice(points);
        return;
    }

    let first = points[0];
    let last = points[points.len() - 1];
    let mut max_dist = 0.0;
    let mut max_idx = 0;
    for (i, point) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let dist = perpendicular_distance(*point, first, last);
        if dist > max_dist {
            max_dist = dist;
            max_idx = i;
        }
    }

    if max_dist > epsilon {
        douglas_peucker(&points[..=max_idx], epsilon, result);
        result.pop();
        douglas_peucker(&points[max_idx..], epsilon, result);
    } else {
        result.push(first);
        result.push(last);
    }
}

fn perpendicular_distance(point: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    let segment = b - a;
    let length = segment.norm();
    if length == 0.0 {
        return (point - a).norm();
    }
    ((b.x - a.x) * (a.y - point.y) - (a.x - point.x) * (b.y - a.y)).abs() / length
}

/// Smallest pixel-aligned box containing the contour.
pub fn bounding_rect(contour: &[Point2<f64>]) -> Rect {
    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;
    for point in contour {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Rect {
        x: min_x as usize,
        y: min_y as usize,
        w: (max_x - min_x) as usize + 1,
        h: (max_y - min_y) as usize + 1,
    }
}

/// Copy of the matrix restricted to the given box.
pub fn crop(mat: &DMatrix<u8>, rect: Rect) -> DMatrix<u8> {
    mat.slice((rect.y, rect.x), (rect.h, rect.w)).into_owned()
}

/// Count the contours nested inside a cropped symbol: one per white
/// component plus one per enclosed hole. Matches an all-contours retrieval
/// over the crop, which the comment heuristic is defined against.
pub fn count_nested_contours(symbol: &DMatrix<u8>) -> usize {
    let (rows, cols) = symbol.shape();
    let mut white_components = 0;
    let mut labelled = vec![false; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            if symbol[(r, c)] > 0 && !labelled[r * cols + c] {
                flood_fill(symbol, &mut labelled, (r, c));
                white_components += 1;
            }
        }
    }
    white_components + count_holes(symbol)
}

/// Black 4-connected regions that do not touch the crop border.
fn count_holes(symbol: &DMatrix<u8>) -> usize {
    let (rows, cols) = symbol.shape();
    let mut seen = vec![false; rows * cols];
    let mut holes = 0;
    for r in 0..rows {
        for c in 0..cols {
            if symbol[(r, c)] > 0 || seen[r * cols + c] {
                continue;
            }
            let mut touches_border = false;
            let mut stack = vec![(r, c)];
            seen[r * cols + c] = true;
            while let Some((br, bc)) = stack.pop() {
                if br == 0 || bc == 0 || br == rows - 1 || bc == cols - 1 {
                    touches_border = true;
                }
                for &(dr, dc) in &[(0i64, 1i64), (1, 0), (0, -1), (-1, 0)] {
                    let (nr, nc) = (br as i64 + dr, bc as i64 + dc);
                    if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if symbol[(nr, nc)] == 0 && !seen[nr * cols + nc] {
                        seen[nr * cols + nc] = true;
                        stack.push((nr, nc));
                    }
                }
            }
            if !touches_border {
                holes += 1;
            }
        }
    }
    holes
}

/// Over-draw the contour in background colour with the given stroke
/// radius. `origin` translates contour coordinates into the matrix.
pub fn erase_contour(mat: &mut DMatrix<u8>, contour: &[Point2<f64>], origin: (usize, usize), radius: usize) {
    let (rows, cols) = mat.shape();
    let radius = radius as i64;
    for point in contour {
        let cr = point.y as i64 - origin.0 as i64;
        let cc = point.x as i64 - origin.1 as i64;
        for dr in -radius..=radius {
            for dc in -radius..=radius {
                let (r, c) = (cr + dr, cc + dc);
                if r >= 0 && c >= 0 && r < rows as i64 && c < cols as i64 {
                    mat[(r as usize, c as usize)] = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_rect(rows: usize, cols: usize, rect: Rect) -> DMatrix<u8> {
        let mut mat = DMatrix::zeros(rows, cols);
        for r in rect.y..rect.bottom() {
            for c in rect.x..rect.right() {
                mat[(r, c)] = 255;
            }
        }
        mat
    }

    #[test]
    fn traces_the_outline_of_a_square() {
        let mat = filled_rect(8, 8, Rect { x: 2, y: 2, w: 4, h: 4 });
        let contours = find_external_contours(&mat);
        assert_eq!(contours.len(), 1);
        // 4x4 component has 12 boundary pixels.
        assert_eq!(contours[0].len(), 12);
        assert_eq!(bounding_rect(&contours[0]), Rect { x: 2, y: 2, w: 4, h: 4 });
    }

    #[test]
    fn square_approximates_to_four_corners() {
        let mat = filled_rect(20, 20, Rect { x: 3, y: 4, w: 10, h: 8 });
        let contours = find_external_contours(&mat);
        let polygon = approx_polygon(&contours[0], 0.01 * arc_length(&contours[0]));
        assert_eq!(polygon.len(), 4);
    }

    #[test]
    fn isolated_pixel_is_a_single_point_contour() {
        let mut mat = DMatrix::zeros(5, 5);
        mat[(2, 2)] = 255;
        let contours = find_external_contours(&mat);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].len(), 1);
        assert_eq!(contour_area(&contours[0]), 0.0);
    }

    #[test]
    fn hole_boundaries_are_not_external_contours() {
        // A ring: 6x6 block with a 2x2 hole.
        let mut mat = filled_rect(10, 10, Rect { x: 2, y: 2, w: 6, h: 6 });
        mat[(4, 4)] = 0;
        mat[(4, 5)] = 0;
        mat[(5, 4)] = 0;
        mat[(5, 5)] = 0;
        assert_eq!(find_external_contours(&mat).len(), 1);
    }

    #[test]
    fn counts_components_and_holes() {
        // Solid bar: a single contour.
        let bar = filled_rect(6, 12, Rect { x: 2, y: 2, w: 8, h: 2 });
        assert_eq!(count_nested_contours(&bar), 1);

        // Ring with a glyph inside: outline + hole + glyph.
        let mut boxed = filled_rect(12, 12, Rect { x: 1, y: 1, w: 10, h: 10 });
        for r in 3..9 {
            for c in 3..9 {
                boxed[(r, c)] = 0;
            }
        }
        boxed[(5, 5)] = 255;
        assert_eq!(count_nested_contours(&boxed), 3);
    }

    #[test]
    fn erase_blanks_a_neighbourhood_of_the_contour() {
        let mut mat = filled_rect(10, 10, Rect { x: 0, y: 0, w: 10, h: 10 });
        let ring: Contour = vec![Point2::new(5.0, 0.0)];
        erase_contour(&mut mat, &ring, (0, 0), 2);
        assert_eq!(mat[(0, 5)], 0);
        assert_eq!(mat[(2, 7)], 0);
        assert_eq!(mat[(3, 5)], 255);
    }
}
