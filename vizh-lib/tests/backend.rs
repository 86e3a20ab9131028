// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end lowering scenarios: hand-built IR through the C backend.

use vizh::compiler::{Compiler, CompilerError, FunctionErrors, LowerError};
use vizh::ir::{Function, FunctionSignature, Instruction};

fn function(name: &str, n_args: usize, instructions: Vec<Instruction>) -> Function {
    Function::new(FunctionSignature::new(name, n_args).unwrap(), instructions)
}

fn repeat(instruction: Instruction, times: usize) -> Vec<Instruction> {
    std::iter::repeat(instruction).take(times).collect()
}

fn lower(functions: &mut [Function]) -> Result<String, CompilerError> {
    Compiler::new().compile_functions_to_c(functions, &[])
}

#[test]
fn hello_putstr() {
    // Builds "Hi!\0" on the tape, then prints it from the start.
    let mut body = Vec::new();
    for increments in &[72usize, 29, 7] {
        body.extend(repeat(Instruction::Inc, *increments));
        body.push(Instruction::Read);
        body.push(Instruction::Right);
        body.push(Instruction::Write);
    }
    body.push(Instruction::Right);
    body.push(Instruction::Write);
    body.extend(repeat(Instruction::Inc, 3));
    body.extend(repeat(Instruction::Left, 4));
    body.push(Instruction::call("putstr").unwrap());

    let mut unit = [function("main", 1, body)];
    let code = lower(&mut unit).expect("hello program failed to lower");

    // main is renamed so the runtime's entry shim can call it.
    assert!(code.contains("void vizh_main (uint8_t* arg0) {"));
    assert!(!code.contains("void main "));
    assert_eq!(unit[0].signature.name, "vizh_main");

    // The cell arithmetic that spells the bytes out must be intact.
    assert_eq!(code.matches("  ++*vizh_tapes.tapes[current_tape];").count(), 111);
    assert_eq!(code.matches("  --vizh_tapes.tapes[current_tape];").count(), 4);
    assert!(code.contains("  putstr(\n    vizh_tapes.tapes[current_tape + 0]\n  );"));
}

#[test]
fn memcopy() {
    // Copies tape 0 into tape 1, length taken from tape 2.
    let mut unit = [function(
        "memcopy",
        3,
        vec![
            Instruction::LoopStart,
            Instruction::Down,
            Instruction::Read,
            Instruction::Down,
            Instruction::Write,
            Instruction::Right,
            Instruction::Up,
            Instruction::Right,
            Instruction::Up,
            Instruction::Dec,
            Instruction::LoopEnd,
        ],
    )];
    let code = lower(&mut unit).expect("memcopy failed to lower");

    assert!(code.contains("void memcopy (uint8_t* arg0, uint8_t* arg1, uint8_t* arg2) {"));
    // Exactly one loop, opened and closed with the same label.
    assert_eq!(code.matches("label0_start:").count(), 1);
    assert_eq!(code.matches("label0_end: ;").count(), 1);
    assert!(code.contains("  if (*vizh_tapes.tapes[current_tape] == 0) goto label0_end;"));
    assert!(code.contains("  goto label0_start;"));
    // Tape switching in both directions.
    assert_eq!(code.matches("  ++current_tape;").count(), 2);
    assert_eq!(code.matches("  --current_tape;").count(), 2);
}

#[test]
fn read_print() {
    let mut unit = [function(
        "main",
        1,
        vec![
            Instruction::call("readin").unwrap(),
            Instruction::Inc,
            Instruction::call("print").unwrap(),
        ],
    )];
    let code = lower(&mut unit).expect("read_print failed to lower");

    assert!(code.contains("void vizh_main (uint8_t* arg0) {"));
    assert!(code.contains("  readin(\n    vizh_tapes.tapes[current_tape + 0]\n  );"));
    assert!(code.contains("  print(\n    vizh_tapes.tapes[current_tape + 0]\n  );"));
    let read_pos = code.find("readin(").unwrap();
    let inc_pos = code.find("++*vizh_tapes.tapes").unwrap();
    let print_pos = code.find("print(").unwrap();
    assert!(read_pos < inc_pos && inc_pos < print_pos);
}

#[test]
fn unbalanced_loop_produces_no_translation_unit() {
    let mut unit = [function(
        "main",
        1,
        vec![Instruction::Inc, Instruction::LoopEnd],
    )];
    match lower(&mut unit) {
        Err(CompilerError::Lower(FunctionErrors(errors))) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].1, LowerError::UnbalancedLoops);
        }
        other => panic!("expected an unbalanced-loops error, got {:?}", other),
    }
}

#[test]
fn unknown_call_names_the_callee() {
    let mut unit = [function(
        "main",
        1,
        vec![Instruction::call("mystery").unwrap()],
    )];
    match lower(&mut unit) {
        Err(CompilerError::Lower(FunctionErrors(errors))) => {
            assert_eq!(errors[0].1, LowerError::UnknownCall("mystery".to_string()));
        }
        other => panic!("expected an unknown-call error, got {:?}", other),
    }
}

#[test]
fn sibling_functions_resolve_in_input_order() {
    let mut unit = [
        function("main", 1, vec![Instruction::call("memcopy").unwrap()]),
        function("memcopy", 3, vec![]),
    ];
    let code = lower(&mut unit).expect("unit failed to lower");
    // Forward declarations come before either body, in input order.
    let decl_main = code.find("void vizh_main (uint8_t* arg0);").unwrap();
    let decl_memcopy = code
        .find("void memcopy (uint8_t* arg0, uint8_t* arg1, uint8_t* arg2);")
        .unwrap();
    let body_main = code.find("void vizh_main (uint8_t* arg0) {").unwrap();
    assert!(decl_main < decl_memcopy);
    assert!(decl_memcopy < body_main);
    assert!(code.contains(
        "  memcopy(\n    vizh_tapes.tapes[current_tape + 0],\n    vizh_tapes.tapes[current_tape + 1],\n    vizh_tapes.tapes[current_tape + 2]\n  );"
    ));
}
