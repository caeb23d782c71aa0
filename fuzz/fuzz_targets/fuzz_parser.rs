#![no_main]

use libfuzzer_sys::fuzz_target;
use pawk::{Lexer, Parser};

fuzz_target!(|data: &str| {
    // Try to lex the input
    let mut lexer = Lexer::new(data);
    if let Ok(tokens) = lexer.tokenize() {
        // Try to parse (and resolve) if lexing succeeds
        let mut parser = Parser::new(tokens);
        if let Ok(mut program) = parser.parse() {
            let _ = pawk::resolver::resolve(&mut program);
        }
    }
});
