// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lowering of parsed functions to portable C.
//!
//! Each function body runs against a bank of byte tapes: the caller's
//! tape pointers plus any tapes created with `newtape`. Loops become
//! label pairs, calls pull their arguments from the tapes at and after
//! the active one.

use crate::ir::{Function, FunctionSignature, Instruction};
use crate::libv;
use crate::linker;
use crate::toolchain::{CToolchain, ToolchainError};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name the runtime's entry shim expects the user entry point under.
pub const MANGLED_MAIN: &str = "vizh_main";

/// Why a single function could not be lowered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LowerError {
    #[error("the loop brackets in this function are unbalanced")]
    UnbalancedLoops,
    #[error("Unrecognised function call: {0}")]
    UnknownCall(String),
}

/// Lowering failures for a whole translation unit, by function name.
#[derive(Debug)]
pub struct FunctionErrors(pub Vec<(String, LowerError)>);

impl fmt::Display for FunctionErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let messages: Vec<String> = self
            .0
            .iter()
            .map(|(name, err)| format!("Error while compiling {}: {}", name, err))
            .collect();
        write!(f, "{}", messages.join("\n"))
    }
}

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("{0}")]
    Lower(FunctionErrors),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error("could not stage the generated C: {0}")]
    Io(#[from] std::io::Error),
}

/// Keeps track of the stack of labels generated for a given function.
struct Labels {
    stack: Vec<usize>,
    current_label: usize,
}

impl Labels {
    fn new() -> Self {
        Labels {
            stack: Vec::new(),
            current_label: 0,
        }
    }

    fn generate(&mut self) -> usize {
        let label = self.current_label;
        self.stack.push(label);
        self.current_label += 1;
        label
    }

    fn pop(&mut self) -> Option<usize> {
        self.stack.pop()
    }

    fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Lowers functions to C and drives the external C compiler.
pub struct Compiler {
    toolchain: CToolchain,
    runtime_decls: Vec<FunctionSignature>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler::with_toolchain(CToolchain::from_env())
    }

    pub fn with_toolchain(toolchain: CToolchain) -> Self {
        Compiler {
            toolchain,
            runtime_decls: libv::declarations(),
        }
    }

    /// The prologue sets up the available tapes and read head.
    ///
    /// The tape array gets one slot per argument plus one per `newtape`
    /// in the body (and at least one slot, since a zero-length array is
    /// not portable C); the tape count still starts at the argument
    /// count.
    fn emit_prologue(&self, function: &Function, code: &mut Vec<String>) {
        let n_args = function.signature.n_args;
        let new_tapes = function
            .instructions
            .iter()
            .filter(|i| matches!(i, Instruction::Call(name) if name == "newtape"))
            .count();
        let slots = (n_args + new_tapes).max(1);

        code.push(format!("{} {{", function.signature.c_decl()));
        code.push(format!("  uint8_t* static_tapes[{}] = {{", slots));
        let args: Vec<String> = (0..n_args).map(|n| format!("arg{}", n)).collect();
        if args.is_empty() {
            // An empty initializer list is not portable C.
            code.push("    NULL".to_string());
        } else {
            code.push(format!("    {}", args.join(", ")));
        }
        code.push("  };".to_string());
        code.push("  vizh_tapes_t vizh_tapes;".to_string());
        code.push("  vizh_tapes.tapes = static_tapes;".to_string());
        code.push(format!("  vizh_tapes.n_tapes = {};", n_args));
        code.push("  vizh_tapes.to_free = NULL;".to_string());
        code.push("  vizh_tapes.capacity = 0;".to_string());
        code.push("  size_t current_tape = 0;".to_string());
        code.push("  uint8_t head_storage = 0;".to_string());
    }

    /// The epilogue tears down the function, deallocating any leftover
    /// tapes beyond the arguments.
    fn emit_epilogue(&self, function: &Function, code: &mut Vec<String>) {
        code.push(format!(
            "  while (vizh_tapes.n_tapes > {}) {{",
            function.signature.n_args
        ));
        code.push("    freetape(&vizh_tapes);".to_string());
        code.push("  }".to_string());
        code.push("}".to_string());
    }

    fn emit_instruction(
        &self,
        instruction: &Instruction,
        labels: &mut Labels,
        signatures: &HashMap<String, FunctionSignature>,
        code: &mut Vec<String>,
    ) -> Result<(), LowerError> {
        match instruction {
            Instruction::Left => code.push("  --vizh_tapes.tapes[current_tape];".to_string()),
            Instruction::Right => code.push("  ++vizh_tapes.tapes[current_tape];".to_string()),
            Instruction::Up => code.push("  --current_tape;".to_string()),
            Instruction::Down => code.push("  ++current_tape;".to_string()),
            Instruction::Inc => code.push("  ++*vizh_tapes.tapes[current_tape];".to_string()),
            Instruction::Dec => code.push("  --*vizh_tapes.tapes[current_tape];".to_string()),
            Instruction::Read => {
                code.push("  head_storage = *vizh_tapes.tapes[current_tape];".to_string())
            }
            Instruction::Write => {
                code.push("  *vizh_tapes.tapes[current_tape] = head_storage;".to_string())
            }

            // Loops are implemented by outputting a start label where the
            // loop opens, then checking if the read head is pointing to 0.
            // If it is, we jump to the end label for this loop.
            Instruction::LoopStart => {
                let label = labels.generate();
                code.push(format!("label{}_start:", label));
                code.push(format!(
                    "  if (*vizh_tapes.tapes[current_tape] == 0) goto label{}_end;",
                    label
                ));
            }
            Instruction::LoopEnd => {
                let label = labels.pop().ok_or(LowerError::UnbalancedLoops)?;
                code.push(format!("  goto label{}_start;", label));
                code.push(format!("label{}_end: ;", label));
            }

            // Function calls fulfil arguments from the tape which is
            // currently active. Creating or destroying tapes needs access
            // to our tape metadata, so those go by reference.
            Instruction::Call(callee) if callee == "newtape" => {
                code.push("  newtape(&vizh_tapes);".to_string())
            }
            Instruction::Call(callee) if callee == "freetape" => {
                code.push("  freetape(&vizh_tapes);".to_string())
            }
            Instruction::Call(callee) => {
                let signature = signatures
                    .get(callee)
                    .ok_or_else(|| LowerError::UnknownCall(callee.clone()))?;
                code.push(format!("  {}(", callee));
                let args: Vec<String> = (0..signature.n_args)
                    .map(|arg| format!("    vizh_tapes.tapes[current_tape + {}]", arg))
                    .collect();
                code.push(args.join(",\n"));
                code.push("  );".to_string());
            }
        }
        Ok(())
    }

    /// Compile one function to C. Every function it calls must be
    /// present in `signatures` so the code generator knows how many
    /// arguments to pass.
    fn compile_function_to_c(
        &self,
        function: &Function,
        signatures: &HashMap<String, FunctionSignature>,
    ) -> Result<String, LowerError> {
        let mut code = Vec::new();
        self.emit_prologue(function, &mut code);
        let mut labels = Labels::new();
        for instruction in &function.instructions {
            self.emit_instruction(instruction, &mut labels, signatures, &mut code)?;
        }
        if !labels.is_empty() {
            return Err(LowerError::UnbalancedLoops);
        }
        self.emit_epilogue(function, &mut code);
        Ok(code.join("\n"))
    }

    /// Compile the given functions into one C translation unit.
    ///
    /// Functions which are called but not defined here (they'll be
    /// linked against later) must have their signatures passed as
    /// externs. Every function of a failing unit is reported.
    pub fn compile_functions_to_c(
        &self,
        functions: &mut [Function],
        externs: &[FunctionSignature],
    ) -> Result<String, CompilerError> {
        // Mangle the main function: the real main is provided by libv.
        for function in functions.iter_mut() {
            if function.signature.name == "main" {
                function.signature.name = MANGLED_MAIN.to_string();
            }
        }

        let mut signature_list: Vec<FunctionSignature> = externs.to_vec();
        signature_list.extend(functions.iter().map(|f| f.signature.clone()));

        // We need size_t and the libv runtime.
        let mut code = vec![
            "#include <stddef.h>".to_string(),
            "#include \"libv.h\"".to_string(),
        ];

        // Forward declarations for all functions and externs.
        code.extend(signature_list.iter().map(|s| format!("{};", s.c_decl())));

        let mut signatures = HashMap::new();
        for signature in signature_list.iter().chain(self.runtime_decls.iter()) {
            signatures.insert(signature.name.clone(), signature.clone());
        }

        let mut errors = Vec::new();
        for function in functions.iter() {
            match self.compile_function_to_c(function, &signatures) {
                Ok(body) => code.push(body),
                Err(err) => errors.push((function.signature.name.clone(), err)),
            }
        }
        if !errors.is_empty() {
            return Err(CompilerError::Lower(FunctionErrors(errors)));
        }
        Ok(code.join("\n"))
    }

    /// Lower the functions and compile the result to an object file in
    /// the given scratch directory.
    pub fn compile_functions(
        &self,
        functions: &mut [Function],
        externs: &[FunctionSignature],
        scratch: &Path,
    ) -> Result<PathBuf, CompilerError> {
        let code = self.compile_functions_to_c(functions, externs)?;
        let c_file = scratch.join("vizh.c");
        std::fs::write(&c_file, code + "\n")?;
        log::debug!("lowered translation unit staged at {}", c_file.display());
        let object = self
            .toolchain
            .compile_one(&c_file, scratch, &[linker::runtime_dir()])?;
        Ok(object)
    }

    /// Compile a hand-written C source against the runtime header.
    pub fn compile_c_program(
        &self,
        source: &Path,
        out_dir: &Path,
    ) -> Result<PathBuf, CompilerError> {
        Ok(self
            .toolchain
            .compile_one(source, out_dir, &[linker::runtime_dir()])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, FunctionSignature, Instruction};
    use pretty_assertions::assert_eq;

    fn function(name: &str, n_args: usize, instructions: Vec<Instruction>) -> Function {
        Function::new(FunctionSignature::new(name, n_args).unwrap(), instructions)
    }

    fn lower(functions: &mut [Function]) -> Result<String, CompilerError> {
        Compiler::new().compile_functions_to_c(functions, &[])
    }

    #[test]
    fn empty_body_is_prologue_and_epilogue_only() {
        let mut unit = [function("idle", 2, vec![])];
        let code = lower(&mut unit).unwrap();
        let expected = r#"#include <stddef.h>
#include "libv.h"
void idle (uint8_t* arg0, uint8_t* arg1);
void idle (uint8_t* arg0, uint8_t* arg1) {
  uint8_t* static_tapes[2] = {
    arg0, arg1
  };
  vizh_tapes_t vizh_tapes;
  vizh_tapes.tapes = static_tapes;
  vizh_tapes.n_tapes = 2;
  vizh_tapes.to_free = NULL;
  vizh_tapes.capacity = 0;
  size_t current_tape = 0;
  uint8_t head_storage = 0;
  while (vizh_tapes.n_tapes > 2) {
    freetape(&vizh_tapes);
  }
}"#;
        assert_eq!(code, expected);
    }

    #[test]
    fn single_loop_is_a_label_pair() {
        let mut unit = [function(
            "spin",
            1,
            vec![Instruction::LoopStart, Instruction::LoopEnd],
        )];
        let code = lower(&mut unit).unwrap();
        assert!(code.contains(
            "label0_start:\n  if (*vizh_tapes.tapes[current_tape] == 0) goto label0_end;\n  goto label0_start;\nlabel0_end: ;"
        ));
    }

    #[test]
    fn nested_loops_use_fresh_labels() {
        let mut unit = [function(
            "nest",
            1,
            vec![
                Instruction::LoopStart,
                Instruction::LoopStart,
                Instruction::LoopEnd,
                Instruction::LoopEnd,
            ],
        )];
        let code = lower(&mut unit).unwrap();
        // Inner loop closes first, so label1 closes before label0.
        let pos_inner = code.find("label1_end: ;").unwrap();
        let pos_outer = code.find("label0_end: ;").unwrap();
        assert!(pos_inner < pos_outer);
        // Every start label has exactly one end label.
        assert_eq!(code.matches("label0_start:").count(), 1);
        assert_eq!(code.matches("label0_end: ;").count(), 1);
    }

    #[test]
    fn dangling_loop_end_is_an_error() {
        let mut unit = [function(
            "broken",
            1,
            vec![Instruction::Inc, Instruction::LoopEnd],
        )];
        match lower(&mut unit) {
            Err(CompilerError::Lower(FunctionErrors(errors))) => {
                assert_eq!(errors, vec![("broken".to_string(), LowerError::UnbalancedLoops)]);
            }
            other => panic!("expected lower error, got {:?}", other),
        }
    }

    #[test]
    fn unclosed_loop_is_an_error() {
        let mut unit = [function("broken", 1, vec![Instruction::LoopStart])];
        match lower(&mut unit) {
            Err(CompilerError::Lower(FunctionErrors(errors))) => {
                assert_eq!(errors[0].1, LowerError::UnbalancedLoops);
            }
            other => panic!("expected lower error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_call_is_an_error() {
        let mut unit = [function(
            "caller",
            1,
            vec![Instruction::call("mystery").unwrap()],
        )];
        match lower(&mut unit) {
            Err(CompilerError::Lower(FunctionErrors(errors))) => {
                assert_eq!(
                    errors,
                    vec![(
                        "caller".to_string(),
                        LowerError::UnknownCall("mystery".to_string())
                    )]
                );
            }
            other => panic!("expected unknown call error, got {:?}", other),
        }
    }

    #[test]
    fn calls_pass_tapes_from_the_active_one() {
        let mut unit = [
            function("helper", 2, vec![]),
            function("caller", 2, vec![Instruction::call("helper").unwrap()]),
        ];
        let code = lower(&mut unit).unwrap();
        assert!(code.contains(
            "  helper(\n    vizh_tapes.tapes[current_tape + 0],\n    vizh_tapes.tapes[current_tape + 1]\n  );"
        ));
    }

    #[test]
    fn zero_argument_call_emits_an_empty_argument_list() {
        let mut unit = [
            function("nullary", 0, vec![]),
            function("caller", 1, vec![Instruction::call("nullary").unwrap()]),
        ];
        let code = lower(&mut unit).unwrap();
        assert!(code.contains("  nullary(\n\n  );"));
        // The nullary callee still gets a non-empty stack tape array.
        assert!(code.contains("void nullary () {\n  uint8_t* static_tapes[1] = {"));
    }

    #[test]
    fn runtime_calls_resolve_without_externs() {
        let mut unit = [function(
            "greet",
            1,
            vec![
                Instruction::call("newtape").unwrap(),
                Instruction::call("putstr").unwrap(),
                Instruction::call("freetape").unwrap(),
            ],
        )];
        let code = lower(&mut unit).unwrap();
        assert!(code.contains("  newtape(&vizh_tapes);"));
        assert!(code.contains("  freetape(&vizh_tapes);"));
        assert!(code.contains("  putstr(\n    vizh_tapes.tapes[current_tape + 0]\n  );"));
        // One extra slot for the newtape call.
        assert!(code.contains("uint8_t* static_tapes[2] = {"));
    }

    #[test]
    fn main_is_renamed_exactly_once() {
        let mut unit = [function("main", 1, vec![])];
        let code = lower(&mut unit).unwrap();
        assert!(code.contains("void vizh_main (uint8_t* arg0) {"));
        assert!(!code.contains("void main"));
        assert_eq!(unit[0].signature.name, "vizh_main");

        // Renaming is idempotent: lowering again changes nothing.
        let again = lower(&mut unit).unwrap();
        assert_eq!(code, again);
    }

    #[test]
    fn lowering_is_deterministic() {
        let mut unit = [
            function("helper", 1, vec![Instruction::Inc]),
            function(
                "main",
                1,
                vec![
                    Instruction::LoopStart,
                    Instruction::call("helper").unwrap(),
                    Instruction::Dec,
                    Instruction::LoopEnd,
                ],
            ),
        ];
        let first = lower(&mut unit).unwrap();
        let second = lower(&mut unit).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn externs_resolve_calls_and_are_declared() {
        let externs = vec![FunctionSignature::new("blit", 2).unwrap()];
        let mut unit = [function("caller", 2, vec![Instruction::call("blit").unwrap()])];
        let code = Compiler::new()
            .compile_functions_to_c(&mut unit, &externs)
            .unwrap();
        assert!(code.contains("void blit (uint8_t* arg0, uint8_t* arg1);"));
        assert!(code.contains("  blit("));
    }
}
