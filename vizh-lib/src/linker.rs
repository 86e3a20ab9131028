// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Linking against the installed runtime.

use crate::toolchain::{CToolchain, ToolchainError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Static archive holding the runtime and standard library.
pub const LIBV_NAME: &str = if cfg!(windows) { "libv.lib" } else { "libv.a" };
/// Startup object defining the real `main`, which calls `vizh_main`.
pub const CRTV_NAME: &str = if cfg!(windows) { "crtv.obj" } else { "crtv.o" };

/// Directory holding the installed runtime artefacts. `VIZH_RUNTIME_DIR`
/// overrides the default, which is the directory of the running
/// executable. Read-only configuration after startup.
pub fn runtime_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("VIZH_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Error)]
pub enum LinkerError {
    #[error("runtime artefact {} is missing (set VIZH_RUNTIME_DIR or build it with --build-runtime)", .0.display())]
    MissingRuntime(PathBuf),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
}

/// Links object files into an executable against the runtime archive.
pub struct Linker {
    toolchain: CToolchain,
}

impl Default for Linker {
    fn default() -> Self {
        Linker::new()
    }
}

impl Linker {
    pub fn new() -> Self {
        Linker {
            toolchain: CToolchain::from_env(),
        }
    }

    /// Link the given object files into an executable with the given
    /// name. `link_crtv` attaches the startup object that defines `main`;
    /// pass it whenever the unit defines `vizh_main`.
    pub fn link(
        &self,
        object_files: &[PathBuf],
        output: &Path,
        link_crtv: bool,
    ) -> Result<(), LinkerError> {
        let runtime = runtime_dir();
        let mut objects = object_files.to_vec();

        let libv = runtime.join(LIBV_NAME);
        if !libv.exists() {
            return Err(LinkerError::MissingRuntime(libv));
        }
        objects.push(libv);

        if link_crtv {
            let crtv = runtime.join(CRTV_NAME);
            if !crtv.exists() {
                return Err(LinkerError::MissingRuntime(crtv));
            }
            objects.push(crtv);
        }

        log::info!("linking {}", output.display());
        self.toolchain.link_executable(&objects, output)?;
        Ok(())
    }
}
