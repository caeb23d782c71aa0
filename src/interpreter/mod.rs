mod builtins;
mod env;
mod expr;
mod fields;
mod native;
mod records;
mod rng;
pub mod stmt;
mod streams;

pub use env::{Array, Cell, Environment};
pub use native::{NativeParam, NativeRegistry, NativeResult, NativeValue};
pub use stmt::Signal;

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use log::{debug, trace};
use regex::Regex;

use crate::ast::{BuiltinVar, Pattern, Program};
use crate::error::{Error, Result};
use crate::format::{DEFAULT_CONVFMT, FormatCache};
use crate::lexer::process_escapes;
use crate::value::Value;

use fields::FieldEngine;
use records::{InputSource, parse_assignment, read_record, separator_for};
use rng::Rng;
use streams::StreamRegistry;

/// Dynamically computed regexes are compiled on demand and kept on a small
/// bounded cache so tight loops do not recompile per record
struct RegexCache {
    map: HashMap<String, Regex>,
    order: VecDeque<String>,
}

const REGEX_CACHE_CAP: usize = 64;

impl RegexCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, pattern: &str) -> std::result::Result<Regex, regex::Error> {
        if let Some(re) = self.map.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern)?;
        if self.map.len() >= REGEX_CACHE_CAP {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.map.insert(pattern.to_string(), re.clone());
        self.order.push_back(pattern.to_string());
        Ok(re)
    }
}

/// The AWK interpreter runtime: owns all mutable state for one program run
pub struct Interpreter<'p> {
    program: &'p Program,

    pub(crate) env: Environment,
    pub(crate) fields: FieldEngine,
    pub(crate) streams: StreamRegistry,
    pub(crate) rng: Rng,
    pub(crate) natives: NativeRegistry,
    pub(crate) formats: FormatCache,
    regex_cache: RegexCache,

    /// Per-rule state for range patterns
    range_active: Vec<bool>,

    /// `next`/`exit` raised inside a function call mid-expression; the
    /// statement executor re-raises it as a signal
    pub(crate) pending: Option<Signal>,

    pub(crate) exit_status: i32,

    // Main-loop input state
    stdin: Option<Box<dyn BufRead + 'p>>,
    source: Option<InputSource<'p>>,
    arg_index: usize,
    used_stdin: bool,
    read_any_operand: bool,
}

impl<'p> Interpreter<'p> {
    /// Build an interpreter for a resolved program. ENVIRON is captured from
    /// the process environment here.
    pub fn new(program: &'p Program) -> Self {
        let mut env = Environment::new(program.globals.len());

        let defaults = [
            (BuiltinVar::Fs, Value::from_string(" ".into())),
            (BuiltinVar::Ofs, Value::from_string(" ".into())),
            (BuiltinVar::Rs, Value::from_string("\n".into())),
            (BuiltinVar::Ors, Value::from_string("\n".into())),
            (BuiltinVar::Ofmt, Value::from_string(DEFAULT_CONVFMT.into())),
            (BuiltinVar::Convfmt, Value::from_string(DEFAULT_CONVFMT.into())),
            (BuiltinVar::Subsep, Value::from_string("\x1c".into())),
            (BuiltinVar::Filename, Value::from_string(String::new())),
            (BuiltinVar::Nr, Value::Num(0.0)),
            (BuiltinVar::Fnr, Value::Num(0.0)),
            (BuiltinVar::Nf, Value::Num(0.0)),
            (BuiltinVar::Rstart, Value::Num(0.0)),
            (BuiltinVar::Rlength, Value::Num(-1.0)),
            (BuiltinVar::Argc, Value::Num(0.0)),
        ];
        for (var, value) in defaults {
            env.set_builtin_value(var, value);
        }

        if let Cell::Arr(environ) = env.builtin_mut(BuiltinVar::Environ) {
            for (key, value) in std::env::vars() {
                environ.insert(key, Value::from_input(value));
            }
        }

        Self {
            program,
            env,
            fields: FieldEngine::new(),
            streams: StreamRegistry::new(),
            rng: Rng::new(),
            natives: NativeRegistry::new(),
            formats: FormatCache::new(),
            regex_cache: RegexCache::new(),
            range_active: vec![false; program.rules.len()],
            pending: None,
            exit_status: 0,
            stdin: None,
            source: None,
            arg_index: 1,
            used_stdin: false,
            read_any_operand: false,
        }
    }

    /// Install ARGV/ARGC. ARGV[0] is the program name; the rest are operands.
    pub fn set_args(&mut self, args: Vec<String>) {
        self.env
            .set_builtin_value(BuiltinVar::Argc, Value::Num(args.len() as f64));
        if let Cell::Arr(argv) = self.env.builtin_mut(BuiltinVar::Argv) {
            argv.clear();
            for (i, arg) in args.into_iter().enumerate() {
                argv.insert(i.to_string(), Value::from_input(arg));
            }
        }
    }

    /// Install host callbacks. The program must have been resolved with the
    /// matching signatures.
    pub fn set_natives(&mut self, natives: NativeRegistry) {
        self.natives = natives;
    }

    /// Apply a `name=value` assignment from -v or an ARGV operand: the value
    /// is escape-processed and bound as a numeric string. Assignments to
    /// names the program never mentions are dropped.
    pub fn assign_command_line(&mut self, name: &str, value: &str) -> Result<()> {
        let value = Value::from_input(process_escapes(value));
        if let Some(builtin) = BuiltinVar::lookup(name) {
            if builtin.is_array() {
                return Err(Error::runtime(format!("cannot assign to array {}", name)));
            }
            return self.set_builtin(builtin, value);
        }
        if let Some(index) = self.program.globals.iter().position(|g| g == name) {
            let cell = self.env.global_mut(index);
            if matches!(cell, Cell::Arr(_)) {
                return Err(Error::runtime(format!("cannot assign to array {}", name)));
            }
            *cell = Cell::Val(value);
        }
        Ok(())
    }

    // ===== Builtin variable access =====

    pub(crate) fn builtin_str(&self, var: BuiltinVar) -> String {
        self.env.builtin_value(var).as_str().into_owned()
    }

    pub(crate) fn builtin_num(&self, var: BuiltinVar) -> f64 {
        self.env.builtin_value(var).to_num()
    }

    pub(crate) fn convfmt(&self) -> String {
        self.builtin_str(BuiltinVar::Convfmt)
    }

    pub(crate) fn ofmt(&self) -> String {
        self.builtin_str(BuiltinVar::Ofmt)
    }

    pub(crate) fn ofs(&self) -> String {
        self.builtin_str(BuiltinVar::Ofs)
    }

    pub(crate) fn ors(&self) -> String {
        self.builtin_str(BuiltinVar::Ors)
    }

    pub(crate) fn subsep(&self) -> String {
        self.builtin_str(BuiltinVar::Subsep)
    }

    /// Whether records are currently read in paragraph mode (RS == "")
    pub(crate) fn paragraph_mode(&self) -> bool {
        self.builtin_str(BuiltinVar::Rs).is_empty()
    }

    /// Write a builtin, applying its side effects: FS recompiles the split
    /// policy, NF resizes the field vector and rebuilds $0
    pub(crate) fn set_builtin(&mut self, var: BuiltinVar, value: Value) -> Result<()> {
        match var {
            BuiltinVar::Fs => {
                let fs = value.to_str(&self.convfmt());
                let policy = fields::policy_for(&fs)
                    .map_err(|e| Error::runtime(format!("invalid FS regex: {}", e)))?;
                self.fields.set_policy(policy);
                self.env.set_builtin_value(var, value);
            }
            BuiltinVar::Nf => {
                let nf = value.to_num();
                if nf < 0.0 {
                    return Err(Error::runtime("NF set to a negative value"));
                }
                let (ofs, convfmt) = (self.ofs(), self.convfmt());
                self.fields.set_nf(nf as usize, &ofs, &convfmt);
                self.env
                    .set_builtin_value(var, Value::Num(nf.trunc()));
            }
            BuiltinVar::Argv | BuiltinVar::Environ => {
                return Err(Error::runtime(format!(
                    "cannot assign to array {}",
                    var.name()
                )));
            }
            _ => self.env.set_builtin_value(var, value),
        }
        Ok(())
    }

    // ===== Record and field plumbing =====

    /// Load a freshly read input record into the field engine
    pub(crate) fn load_record(&mut self, text: String) {
        let paragraph = self.paragraph_mode();
        self.fields.load_record(text, paragraph);
        self.sync_nf();
    }

    /// Assign $0 from program code
    pub(crate) fn set_record_value(&mut self, value: Value) {
        let paragraph = self.paragraph_mode();
        let convfmt = self.convfmt();
        self.fields.set_record(value, paragraph, &convfmt);
        self.sync_nf();
    }

    pub(crate) fn sync_nf(&mut self) {
        let nf = self.fields.nf() as f64;
        self.env.set_builtin_value(BuiltinVar::Nf, Value::Num(nf));
    }

    // ===== Regexes =====

    /// A regex literal pre-compiled by the resolver
    pub(crate) fn literal_regex(&self, index: usize) -> Regex {
        self.program.regexes[index].clone()
    }

    /// A regex computed at runtime; compile errors are fatal
    pub(crate) fn dynamic_regex(&mut self, pattern: &str) -> Result<Regex> {
        self.regex_cache
            .get(pattern)
            .map_err(|e| Error::runtime(format!("invalid regex /{}/: {}", pattern, e)))
    }

    // ===== The pattern driver =====

    /// Run the program: BEGIN rules, the record loop over ARGV sources and
    /// the given stdin, then END rules. Returns the process exit status.
    pub fn run<R, W>(&mut self, stdin: R, output: &mut W) -> Result<i32>
    where
        R: BufRead + 'p,
        W: Write,
    {
        self.stdin = Some(Box::new(stdin));
        let result = self.execute(output);

        let _ = output.flush();
        for (name, error) in self.streams.close_all() {
            eprintln!("pawk: error closing {}: {}", name, error);
        }

        result.map(|_| self.exit_status)
    }

    fn execute<W: Write>(&mut self, output: &mut W) -> Result<()> {
        let program = self.program;
        let mut exited = false;

        // BEGIN rules in program order
        for rule in &program.rules {
            if !matches!(rule.pattern, Some(Pattern::Begin)) {
                continue;
            }
            let action = rule.action.as_ref().expect("BEGIN requires an action");
            match self.exec_block(action, output)? {
                Signal::Exit => {
                    exited = true;
                    break;
                }
                Signal::Next => {
                    return Err(Error::runtime("next called from a BEGIN rule"));
                }
                _ => {}
            }
        }

        let has_main = program
            .rules
            .iter()
            .any(|r| !matches!(r.pattern, Some(Pattern::Begin)));

        // Main record loop
        if !exited && has_main {
            'records: while let Some(text) = self.next_main_record()? {
                self.bump_record_counters();
                self.load_record(text);
                trace!("record {}: {:?}", self.builtin_num(BuiltinVar::Nr), self.fields.record_str());

                for (index, rule) in program.rules.iter().enumerate() {
                    if matches!(rule.pattern, Some(Pattern::Begin) | Some(Pattern::End)) {
                        continue;
                    }

                    let matched = self.pattern_matches(index, rule.pattern.as_ref(), output)?;
                    if let Some(signal) = self.pending.take() {
                        match signal {
                            Signal::Exit => break 'records,
                            Signal::Next => continue 'records,
                            _ => {}
                        }
                    }
                    if !matched {
                        continue;
                    }

                    match &rule.action {
                        Some(action) => match self.exec_block(action, output)? {
                            Signal::Next => continue 'records,
                            Signal::Exit => break 'records,
                            _ => {}
                        },
                        None => {
                            // Default action prints the record
                            let ors = self.ors();
                            write!(output, "{}{}", self.fields.record_str(), ors)?;
                        }
                    }
                }
            }
        }

        // END rules run even after exit; exit inside END stops the rest
        for rule in &program.rules {
            if !matches!(rule.pattern, Some(Pattern::End)) {
                continue;
            }
            let action = rule.action.as_ref().expect("END requires an action");
            match self.exec_block(action, output)? {
                Signal::Exit => break,
                Signal::Next => {
                    return Err(Error::runtime("next called from an END rule"));
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn bump_record_counters(&mut self) {
        let nr = self.builtin_num(BuiltinVar::Nr);
        let fnr = self.builtin_num(BuiltinVar::Fnr);
        self.env
            .set_builtin_value(BuiltinVar::Nr, Value::Num(nr + 1.0));
        self.env
            .set_builtin_value(BuiltinVar::Fnr, Value::Num(fnr + 1.0));
    }

    fn pattern_matches<W: Write>(
        &mut self,
        rule_index: usize,
        pattern: Option<&Pattern>,
        output: &mut W,
    ) -> Result<bool> {
        match pattern {
            None => Ok(true),
            Some(Pattern::Begin) | Some(Pattern::End) => Ok(false),
            Some(Pattern::Expr(expr)) => Ok(self.eval(expr, output)?.is_truthy()),
            Some(Pattern::Range { start, end }) => {
                if !self.range_active[rule_index] {
                    if self.eval(start, output)?.is_truthy() {
                        // The range can open and close on the same record
                        if !self.eval(end, output)?.is_truthy() {
                            self.range_active[rule_index] = true;
                        }
                        return Ok(true);
                    }
                    Ok(false)
                } else {
                    if self.eval(end, output)?.is_truthy() {
                        self.range_active[rule_index] = false;
                    }
                    Ok(true)
                }
            }
        }
    }

    // ===== Main-loop input =====

    /// Produce the next record, advancing across ARGV: empty entries are
    /// skipped, `name=value` entries apply as assignments, `-` reads stdin,
    /// anything else opens as a file. Falls back to stdin when ARGV holds no
    /// file operands at all.
    pub(crate) fn next_main_record(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(source) = &mut self.source {
                let sep = separator_for(&self.env.builtin_value(BuiltinVar::Rs).as_str());
                match read_record(source.reader(), sep)? {
                    Some(text) => return Ok(Some(text)),
                    None => self.source = None,
                }
            }

            if !self.advance_source()? {
                return Ok(None);
            }
        }
    }

    /// Open the next input source. Returns false when input is exhausted.
    fn advance_source(&mut self) -> Result<bool> {
        loop {
            let argc = self.builtin_num(BuiltinVar::Argc) as usize;
            if self.arg_index >= argc {
                break;
            }
            let index = self.arg_index;
            self.arg_index += 1;

            let arg = match self.env.builtin(BuiltinVar::Argv) {
                Cell::Arr(argv) => argv
                    .get(&index.to_string())
                    .map(|v| v.as_str().into_owned())
                    .unwrap_or_default(),
                Cell::Val(_) => String::new(),
            };

            if arg.is_empty() {
                continue;
            }

            if let Some((name, value)) = parse_assignment(&arg) {
                debug!("command-line assignment: {}={}", name, value);
                self.assign_command_line(name, value)?;
                continue;
            }

            self.read_any_operand = true;
            self.env
                .set_builtin_value(BuiltinVar::Fnr, Value::Num(0.0));

            if arg == "-" {
                let Some(stdin) = self.stdin.take() else {
                    continue;
                };
                self.used_stdin = true;
                self.env
                    .set_builtin_value(BuiltinVar::Filename, Value::from_string("-".into()));
                self.source = Some(InputSource::Stdin(stdin));
                return Ok(true);
            }

            debug!("opening input file: {}", arg);
            // A missing file keeps its io kind so getline can report -1;
            // any other open failure aborts
            let file = File::open(&arg).map_err(|e| {
                let message = format!("can't open file {}: {}", arg, e);
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::Io(std::io::Error::new(e.kind(), message))
                } else {
                    Error::runtime(message)
                }
            })?;
            self.env
                .set_builtin_value(BuiltinVar::Filename, Value::from_input(arg));
            self.source = Some(InputSource::File(BufReader::new(file)));
            return Ok(true);
        }

        // ARGV held no file operands: read stdin once
        if !self.read_any_operand && !self.used_stdin {
            if let Some(stdin) = self.stdin.take() {
                self.used_stdin = true;
                self.env
                    .set_builtin_value(BuiltinVar::Fnr, Value::Num(0.0));
                self.source = Some(InputSource::Stdin(stdin));
                return Ok(true);
            }
        }

        Ok(false)
    }
}
