// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image analysis: preprocessing, contour extraction and debug renders.

pub mod annotate;
pub mod contours;
pub mod preprocess;
