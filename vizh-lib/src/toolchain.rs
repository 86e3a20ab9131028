// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Invocation of the system C toolchain: compiler, archiver, linker.
//!
//! Everything here is an external collaborator; we only shell out and
//! capture what it says. Diagnostics are surfaced verbatim.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Object file extension on this platform.
pub const OBJECT_EXT: &str = if cfg!(windows) { "obj" } else { "o" };

#[cfg(not(windows))]
const DEFAULT_CC: &str = "cc";
#[cfg(windows)]
const DEFAULT_CC: &str = "cl";

#[cfg(not(windows))]
const DEFAULT_AR: &str = "ar";
#[cfg(windows)]
const DEFAULT_AR: &str = "lib";

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} failed:\n{stderr}")]
    Failed { command: String, stderr: String },
}

/// Handle on the system C compiler and archiver.
pub struct CToolchain {
    cc: String,
    archiver: String,
}

impl CToolchain {
    /// Resolve the toolchain from `CC`/`AR`, with platform defaults.
    pub fn from_env() -> Self {
        CToolchain {
            cc: std::env::var("CC").unwrap_or_else(|_| DEFAULT_CC.to_string()),
            archiver: std::env::var("AR").unwrap_or_else(|_| DEFAULT_AR.to_string()),
        }
    }

    /// Compile one C source to an object file in `out_dir`.
    pub fn compile_one(
        &self,
        source: &Path,
        out_dir: &Path,
        include_dirs: &[PathBuf],
    ) -> Result<PathBuf, ToolchainError> {
        let stem = source.file_stem().unwrap_or_else(|| OsStr::new("out"));
        let object = out_dir.join(stem).with_extension(OBJECT_EXT);

        let mut command = Command::new(&self.cc);
        #[cfg(not(windows))]
        {
            command.arg("-c").arg("-O3").arg(source).arg("-o").arg(&object);
            for dir in include_dirs {
                command.arg("-I").arg(dir);
            }
        }
        #[cfg(windows)]
        {
            command
                .arg("/nologo")
                .arg("/c")
                .arg("/O2")
                .arg(source)
                .arg(format!("/Fo{}", object.display()));
            for dir in include_dirs {
                command.arg(format!("/I{}", dir.display()));
            }
        }
        self.run(command)?;
        Ok(object)
    }

    /// Compile several C sources, stopping at the first failure.
    pub fn compile(
        &self,
        sources: &[PathBuf],
        out_dir: &Path,
        include_dirs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, ToolchainError> {
        sources
            .iter()
            .map(|source| self.compile_one(source, out_dir, include_dirs))
            .collect()
    }

    /// Link object files (and archives) into an executable.
    pub fn link_executable(
        &self,
        objects: &[PathBuf],
        output: &Path,
    ) -> Result<(), ToolchainError> {
        let mut command = Command::new(&self.cc);
        #[cfg(not(windows))]
        {
            command.args(objects).arg("-o").arg(output);
        }
        #[cfg(windows)]
        {
            command
                .arg("/nologo")
                .args(objects)
                .arg(format!("/Fe{}", output.display()));
        }
        self.run(command)
    }

    /// Bundle object files into a static archive.
    pub fn create_static_lib(
        &self,
        objects: &[PathBuf],
        output: &Path,
    ) -> Result<(), ToolchainError> {
        let mut command = Command::new(&self.archiver);
        #[cfg(not(windows))]
        {
            command.arg("rcs").arg(output).args(objects);
        }
        #[cfg(windows)]
        {
            command
                .arg("/nologo")
                .arg(format!("/OUT:{}", output.display()))
                .args(objects);
        }
        self.run(command)
    }

    fn run(&self, mut command: Command) -> Result<(), ToolchainError> {
        let rendered = format!("{:?}", command);
        log::debug!("running {}", rendered);
        let output = command.output().map_err(|source| ToolchainError::Spawn {
            command: rendered.clone(),
            source,
        })?;
        if output.status.success() {
            return Ok(());
        }
        // cl reports diagnostics on stdout; cc on stderr.
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if stderr.trim().is_empty() {
            stderr = String::from_utf8_lossy(&output.stdout).into_owned();
        }
        Err(ToolchainError::Failed {
            command: rendered,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_land_in_the_output_directory() {
        let toolchain = CToolchain::from_env();
        // A compiler that cannot be spawned is a Spawn error, not a panic.
        let missing = CToolchain {
            cc: "definitely-not-a-c-compiler".to_string(),
            archiver: toolchain.archiver.clone(),
        };
        let err = missing
            .compile_one(Path::new("x.c"), Path::new("."), &[])
            .unwrap_err();
        match err {
            ToolchainError::Spawn { .. } => {}
            other => panic!("expected spawn error, got {:?}", other),
        }
    }
}
