// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # vizh
//!
//! Compiler toolchain for the vizh visual programming language.
//! Source files are raster images: a signature band (function name and
//! argument count) above a body of instruction glyphs. The parser recovers
//! an instruction stream from the glyph geometry, the compiler lowers it to
//! portable C, and the linker produces a native executable against the
//! hand-written runtime (libv).

// #![warn(missing_docs)]

pub mod compiler;
pub mod img;
pub mod interop;
pub mod ir;
pub mod libv;
pub mod linker;
pub mod ocr;
pub mod parser;
pub mod toolchain;
