#![no_main]

use libfuzzer_sys::fuzz_target;
use pawk::Interpreter;
use std::io::{BufReader, Cursor};

fuzz_target!(|data: &[u8]| {
    // Split the data into program and input:
    // first 1/3 is the program, rest is input
    let split_point = data.len() / 3;
    let (program_bytes, input_bytes) = data.split_at(split_point);

    let program = match std::str::from_utf8(program_bytes) {
        Ok(s) => s,
        Err(_) => return,
    };

    let input = match std::str::from_utf8(input_bytes) {
        Ok(s) => s,
        Err(_) => return,
    };

    // Limit input sizes to prevent hangs
    if program.len() > 10000 || input.len() > 100000 {
        return;
    }

    let program = match pawk::compile(program) {
        Ok(p) => p,
        Err(_) => return,
    };

    let mut interpreter = Interpreter::new(&program);
    let mut output = Vec::new();
    let _ = interpreter.run(BufReader::new(Cursor::new(input.to_string())), &mut output);
});
