// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-memory representation of parsed functions.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("'{0}' is not a valid vizh identifier")]
    BadIdentifier(String),
}

/// One vizh instruction. Only calls carry a payload: the callee name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Move the active tape's head one cell left.
    Left,
    /// Move the active tape's head one cell right.
    Right,
    /// Select the previous tape.
    Up,
    /// Select the next tape.
    Down,
    /// Increment the byte under the head.
    Inc,
    /// Decrement the byte under the head.
    Dec,
    /// Copy the byte under the head into head storage.
    Read,
    /// Copy head storage into the byte under the head.
    Write,
    LoopStart,
    LoopEnd,
    Call(String),
}

impl Instruction {
    /// Build a call instruction, rejecting invalid callee names.
    pub fn call<S: Into<String>>(callee: S) -> Result<Self, IrError> {
        let callee = callee.into();
        if is_identifier(&callee) {
            Ok(Instruction::Call(callee))
        } else {
            Err(IrError::BadIdentifier(callee))
        }
    }
}

impl fmt::Display for Instruction {
    /// Compact dump form, e.g. `LOOP_START;` or `CALL(putstr);`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Left => write!(f, "LEFT;"),
            Instruction::Right => write!(f, "RIGHT;"),
            Instruction::Up => write!(f, "UP;"),
            Instruction::Down => write!(f, "DOWN;"),
            Instruction::Inc => write!(f, "INC;"),
            Instruction::Dec => write!(f, "DEC;"),
            Instruction::Read => write!(f, "READ;"),
            Instruction::Write => write!(f, "WRITE;"),
            Instruction::LoopStart => write!(f, "LOOP_START;"),
            Instruction::LoopEnd => write!(f, "LOOP_END;"),
            Instruction::Call(callee) => write!(f, "CALL({});", callee),
        }
    }
}

/// Does `text` match `[A-Za-z_][A-Za-z0-9_]*`?
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A function's name and how many tape arguments it takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub n_args: usize,
}

impl FunctionSignature {
    pub fn new<S: Into<String>>(name: S, n_args: usize) -> Result<Self, IrError> {
        let name = name.into();
        if is_identifier(&name) {
            Ok(FunctionSignature { name, n_args })
        } else {
            Err(IrError::BadIdentifier(name))
        }
    }

    /// The equivalent C declaration, without the trailing semicolon.
    pub fn c_decl(&self) -> String {
        let arguments: Vec<String> = (0..self.n_args)
            .map(|n| format!("uint8_t* arg{}", n))
            .collect();
        format!("void {} ({})", self.name, arguments.join(", "))
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.c_decl())
    }
}

/// A parsed function: its signature and instructions in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub signature: FunctionSignature,
    pub instructions: Vec<Instruction>,
}

impl Function {
    pub fn new(signature: FunctionSignature, instructions: Vec<Instruction>) -> Self {
        Function {
            signature,
            instructions,
        }
    }

    /// Whether the loop brackets form a well-matched parenthesis string.
    pub fn has_balanced_loops(&self) -> bool {
        let mut depth = 0i64;
        for instruction in &self.instructions {
            match instruction {
                Instruction::LoopStart => depth += 1,
                Instruction::LoopEnd => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
        depth == 0
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {{", self.signature)?;
        for instruction in &self.instructions {
            write!(f, "\n\t{}", instruction)?;
        }
        write!(f, "\n}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_rejects_non_identifiers() {
        assert!(Instruction::call("putstr").is_ok());
        assert!(Instruction::call("_tape2").is_ok());
        assert_eq!(
            Instruction::call("2fast"),
            Err(IrError::BadIdentifier("2fast".to_string()))
        );
        assert!(Instruction::call("").is_err());
        assert!(Instruction::call("hello world").is_err());
    }

    #[test]
    fn signature_renders_as_c_declaration() {
        let sig = FunctionSignature::new("memcopy", 3).unwrap();
        assert_eq!(
            sig.c_decl(),
            "void memcopy (uint8_t* arg0, uint8_t* arg1, uint8_t* arg2)"
        );
        let nullary = FunctionSignature::new("noop", 0).unwrap();
        assert_eq!(nullary.c_decl(), "void noop ()");
    }

    #[test]
    fn function_dump_lists_instructions() {
        let function = Function::new(
            FunctionSignature::new("call_hello", 0).unwrap(),
            vec![Instruction::call("hello").unwrap()],
        );
        assert_eq!(function.to_string(), "void call_hello () {\n\tCALL(hello);\n}");
    }

    #[test]
    fn loop_balance_check() {
        let balanced = Function::new(
            FunctionSignature::new("f", 1).unwrap(),
            vec![
                Instruction::LoopStart,
                Instruction::Inc,
                Instruction::LoopStart,
                Instruction::LoopEnd,
                Instruction::LoopEnd,
            ],
        );
        assert!(balanced.has_balanced_loops());

        let dangling = Function::new(
            FunctionSignature::new("f", 1).unwrap(),
            vec![Instruction::Inc, Instruction::LoopEnd],
        );
        assert!(!dangling.has_balanced_loops());
    }
}
