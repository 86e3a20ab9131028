// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Text recognition for the signature band and callee names.
//!
//! Recognition itself is an external service; the compiler only relies on
//! the [`Ocr`] contract. The shipped implementation drives the `tesseract`
//! executable in single-line mode, staging each crop as a PNG inside a
//! scratch directory that lives exactly as long as the adapter.

use crate::interop;
use nalgebra::DMatrix;
use std::process::Command;
use tempfile::TempDir;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to run the text recogniser: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("the text recogniser reported an error:\n{0}")]
    Engine(String),
    #[error("could not stage the image for recognition: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode the image for recognition: {0}")]
    Encode(#[from] image::ImageError),
    #[error("the text recogniser produced invalid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A recogniser for short single-line alphanumeric strings.
pub trait Ocr {
    /// Decode the text in the crop, trimmed of surrounding whitespace.
    /// An empty string means nothing was recognised.
    fn recognise(&mut self, image: &DMatrix<u8>) -> Result<String, OcrError>;
}

/// Adapter over an external `tesseract` installation.
pub struct TesseractOcr {
    command: String,
    workdir: TempDir,
    staged: usize,
}

impl TesseractOcr {
    /// Acquire a recogniser and its scratch directory. The directory is
    /// removed when the adapter is dropped.
    pub fn new() -> Result<Self, OcrError> {
        let command =
            std::env::var("VIZH_TESSERACT").unwrap_or_else(|_| "tesseract".to_string());
        let workdir = tempfile::Builder::new().prefix("vizh-ocr").tempdir()?;
        Ok(TesseractOcr {
            command,
            workdir,
            staged: 0,
        })
    }
}

impl Ocr for TesseractOcr {
    fn recognise(&mut self, image: &DMatrix<u8>) -> Result<String, OcrError> {
        self.staged += 1;
        let png = self.workdir.path().join(format!("crop{}.png", self.staged));
        interop::image_from_matrix(image).save(&png)?;

        let output = Command::new(&self.command)
            .arg(&png)
            .arg("stdout")
            .args(&["--psm", "7"])
            .args(&["-c", "user_defined_dpi=300"])
            .output()
            .map_err(OcrError::Spawn)?;
        if !output.status.success() {
            return Err(OcrError::Engine(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        let text = String::from_utf8(output.stdout)?;
        let text = text.trim().to_string();
        log::debug!("ocr read {:?}", text);
        Ok(text)
    }
}
