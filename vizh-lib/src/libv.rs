// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The runtime's contribution to name resolution, and the helper that
//! builds the runtime archive from its sources.

use crate::compiler::{Compiler, CompilerError};
use crate::ir::FunctionSignature;
use crate::linker::{CRTV_NAME, LIBV_NAME};
use crate::ocr::OcrError;
use crate::parser::{ParseError, Parser};
use crate::toolchain::{CToolchain, ToolchainError};
use std::path::{Path, PathBuf};
use thiserror::Error;

const LIBV_HEADER_NAME: &str = "libv.h";
const LIBV_VIZH_HEADER_NAME: &str = "libv_vizh.h";

/// Signatures of the standard-library functions callable from vizh code.
/// `newtape` and `freetape` are not listed: they take the tape metadata
/// by reference and the lowerer treats them specially.
pub fn declarations() -> Vec<FunctionSignature> {
    ["putstr", "print", "readin"]
        .iter()
        .map(|name| FunctionSignature {
            name: name.to_string(),
            n_args: 1,
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum LibvError {
    #[error("could not scan {}: {}", .path.display(), .source)]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no crtv.c startup source found in {}", .0.display())]
    MissingCrtv(PathBuf),
    #[error("could not initialise the OCR adapter: {0}")]
    Ocr(#[from] OcrError),
    #[error("failed to parse {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Compiler(#[from] CompilerError),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error("could not stage runtime artefacts: {0}")]
    Io(#[from] std::io::Error),
}

/// Sort the runtime sources: C sources, image sources, and the startup
/// source `crtv.c`, searching recursively.
fn find_libv_files(
    path: &Path,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>, Option<PathBuf>), LibvError> {
    let mut c_files = Vec::new();
    let mut image_files = Vec::new();
    let mut crtv_file = None;

    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|source| LibvError::Scan {
            path: dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| LibvError::Scan {
                path: dir.clone(),
                source,
            })?;
            let file = entry.path();
            if file.is_dir() {
                pending.push(file);
            } else if file.extension().and_then(|e| e.to_str()) == Some("c") {
                if file.file_name().and_then(|n| n.to_str()) == Some("crtv.c") {
                    crtv_file = Some(file);
                } else {
                    c_files.push(file);
                }
            } else if file.extension().and_then(|e| e.to_str()) == Some("png") {
                image_files.push(file);
            }
        }
    }
    c_files.sort();
    image_files.sort();
    Ok((c_files, image_files, crtv_file))
}

/// Build the runtime from its sources: every C file except `crtv.c` goes
/// into the static archive, `crtv.c` becomes the startup object, and
/// image sources run through the full parse and lower pipeline. The
/// archive, startup object, and headers land in `output_dir`.
pub fn compile_libv(source_dir: &Path, output_dir: &Path) -> Result<(), LibvError> {
    let (c_files, image_files, crtv_file) = find_libv_files(source_dir)?;
    let crtv_file = crtv_file.ok_or_else(|| LibvError::MissingCrtv(source_dir.to_path_buf()))?;
    log::info!(
        "building runtime from {} ({} C files, {} image files)",
        source_dir.display(),
        c_files.len(),
        image_files.len()
    );

    let toolchain = CToolchain::from_env();
    let scratch = tempfile::Builder::new().prefix("vizh-libv").tempdir()?;
    let includes = vec![source_dir.to_path_buf()];
    std::fs::create_dir_all(output_dir)?;

    let mut objects = toolchain.compile(&c_files, scratch.path(), &includes)?;
    let crtv_object = toolchain.compile_one(&crtv_file, scratch.path(), &includes)?;

    if !image_files.is_empty() {
        let mut parser = Parser::new()?;
        let mut functions = Vec::with_capacity(image_files.len());
        for file in &image_files {
            functions.push(parser.parse(file).map_err(|source| LibvError::Parse {
                path: file.clone(),
                source,
            })?);
        }

        let compiler = Compiler::new();
        let code = compiler.compile_functions_to_c(&mut functions, &[])?;
        let c_file = scratch.path().join("libv_vizh.c");
        std::fs::write(&c_file, code + "\n")?;
        objects.push(toolchain.compile_one(&c_file, scratch.path(), &includes)?);

        // Declarations of the vizh-written runtime parts, for C callers.
        let mut header = String::from("#include <stdint.h>\n");
        for function in &functions {
            header.push_str(&format!("{};\n", function.signature.c_decl()));
        }
        std::fs::write(output_dir.join(LIBV_VIZH_HEADER_NAME), header)?;
    }

    toolchain.create_static_lib(&objects, &output_dir.join(LIBV_NAME))?;
    std::fs::copy(crtv_object, output_dir.join(CRTV_NAME))?;
    let header = source_dir.join(LIBV_HEADER_NAME);
    let installed_header = output_dir.join(LIBV_HEADER_NAME);
    if header != installed_header {
        std::fs::copy(&header, &installed_header)?;
    }
    log::info!("runtime installed into {}", output_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_table_covers_the_standard_library() {
        let decls = declarations();
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["putstr", "print", "readin"]);
        assert!(decls.iter().all(|d| d.n_args == 1));
        // Tape management is special-cased by the lowerer, not listed.
        assert!(!names.contains(&"newtape"));
    }
}
