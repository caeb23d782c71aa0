use std::env;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::process;

use log::debug;

use pawk::Interpreter;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    match run(&args[1..]) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("pawk: {}", e);
            process::exit(2);
        }
    }
}

fn run(args: &[String]) -> Result<i32, Box<dyn std::error::Error>> {
    let mut field_separator: Option<String> = None;
    let mut program_source: Option<String> = None;
    let mut program_from_files = false;
    let mut operands: Vec<String> = Vec::new();
    let mut assignments: Vec<(String, String)> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];

        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(0);
        }

        if arg == "--version" {
            println!("pawk {}", env!("CARGO_PKG_VERSION"));
            return Ok(0);
        }

        if arg == "-F" {
            i += 1;
            if i >= args.len() {
                return Err("option -F requires an argument".into());
            }
            field_separator = Some(args[i].clone());
        } else if let Some(fs) = arg.strip_prefix("-F") {
            field_separator = Some(fs.to_string());
        } else if arg == "-v" {
            i += 1;
            if i >= args.len() {
                return Err("option -v requires an argument".into());
            }
            let assignment = &args[i];
            match split_assignment(assignment) {
                Some((name, value)) => assignments.push((name.to_string(), value.to_string())),
                None => {
                    return Err(format!("invalid variable assignment: {}", assignment).into());
                }
            }
        } else if arg == "-f" {
            i += 1;
            if i >= args.len() {
                return Err("option -f requires an argument".into());
            }
            // Multiple -f files concatenate into one program
            let mut source = program_source.take().unwrap_or_default();
            source.push_str(&fs::read_to_string(&args[i])?);
            source.push('\n');
            program_source = Some(source);
            program_from_files = true;
        } else if arg == "--" {
            i += 1;
            if program_source.is_none() && i < args.len() {
                program_source = Some(args[i].clone());
                i += 1;
            }
            operands.extend(args[i..].iter().cloned());
            break;
        } else if arg.starts_with('-') && arg != "-" {
            return Err(format!("unknown option: {}", arg).into());
        } else if program_source.is_none() && !program_from_files {
            // First non-option argument is the program text
            program_source = Some(arg.clone());
        } else {
            // The rest are operands: files, `-`, or name=value assignments
            operands.push(arg.clone());
        }

        i += 1;
    }

    let program_source = program_source.ok_or("no program provided")?;
    debug!("program source: {} byte(s)", program_source.len());

    let program = pawk::compile(&program_source)?;

    let mut interpreter = Interpreter::new(&program);

    if let Some(fs) = &field_separator {
        interpreter.assign_command_line("FS", fs)?;
    }

    // -v preassignments apply before BEGIN rules run
    for (name, value) in &assignments {
        interpreter.assign_command_line(name, value)?;
    }

    let mut argv = vec!["pawk".to_string()];
    argv.extend(operands);
    interpreter.set_args(argv);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let code = interpreter.run(stdin.lock(), &mut output)?;
    output.flush()?;

    Ok(code)
}

/// Split a `name=value` option argument; the name must be an identifier
fn split_assignment(arg: &str) -> Option<(&str, &str)> {
    let (name, value) = arg.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name, value))
}

fn print_help() {
    println!(
        r#"Usage: pawk [OPTIONS] 'program' [argument ...]
       pawk [OPTIONS] -f progfile [argument ...]

A POSIX AWK interpreter in Rust.

Arguments are input files, `-` for standard input, or `name=value`
assignments applied when the record loop reaches them.

Options:
  -F fs            Set the input field separator to fs
  -v var=val       Assign val to var before the program runs
  -f progfile      Read the program from progfile (repeatable)
  --version        Print version information
  --help           Print this help message

Examples:
  pawk '{{ print $1 }}' file.txt
  pawk -F: '{{ print $1 }}' /etc/passwd
  pawk 'BEGIN {{ print "Hello" }}'
  pawk '/pattern/ {{ print }}' file.txt
"#
    );
}
