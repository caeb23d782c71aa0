//! The built-in function catalogue: arithmetic, string, regex, and I/O
//! builtins, plus the binding layer for host callbacks.

use std::io::Write;
use std::process::Command;

use regex::Regex;

use crate::ast::{BuiltinFn, BuiltinVar, Expr};
use crate::error::{Error, Result, SourceLocation};
use crate::format::render;
use crate::value::Value;

use super::env::Cell;
use super::fields::{SplitPolicy, policy_for, split_text};
use super::native::{NativeParam, NativeValue};
use super::Interpreter;

impl<'p> Interpreter<'p> {
    pub(crate) fn call_builtin<W: Write>(
        &mut self,
        builtin: BuiltinFn,
        args: &[Expr],
        location: SourceLocation,
        out: &mut W,
    ) -> Result<Value> {
        match builtin {
            BuiltinFn::Atan2 => {
                let y = self.eval(&args[0], out)?.to_num();
                let x = self.eval(&args[1], out)?.to_num();
                Ok(Value::Num(y.atan2(x)))
            }
            BuiltinFn::Cos => {
                let n = self.eval(&args[0], out)?.to_num();
                Ok(Value::Num(n.cos()))
            }
            BuiltinFn::Sin => {
                let n = self.eval(&args[0], out)?.to_num();
                Ok(Value::Num(n.sin()))
            }
            BuiltinFn::Exp => {
                let n = self.eval(&args[0], out)?.to_num();
                Ok(Value::Num(n.exp()))
            }
            BuiltinFn::Log => {
                let n = self.eval(&args[0], out)?.to_num();
                if n <= 0.0 {
                    return Err(Error::runtime_at(
                        format!("log: argument {} out of domain", n),
                        "log",
                        location,
                    ));
                }
                Ok(Value::Num(n.ln()))
            }
            BuiltinFn::Sqrt => {
                let n = self.eval(&args[0], out)?.to_num();
                if n < 0.0 {
                    return Err(Error::runtime_at(
                        format!("sqrt: argument {} out of domain", n),
                        "sqrt",
                        location,
                    ));
                }
                Ok(Value::Num(n.sqrt()))
            }
            BuiltinFn::Int => {
                let n = self.eval(&args[0], out)?.to_num();
                Ok(Value::Num(n.trunc()))
            }
            BuiltinFn::Rand => Ok(Value::Num(self.rng.next())),
            BuiltinFn::Srand => {
                let seed = match args.first() {
                    Some(arg) => self.eval(arg, out)?.to_num().trunc() as i64 as u64,
                    None => std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
                        .unwrap_or(0),
                };
                let previous = self.rng.reseed(seed);
                Ok(Value::Num(previous as f64))
            }

            BuiltinFn::Length => self.builtin_length(args, out),
            BuiltinFn::Index => {
                let convfmt = self.convfmt();
                let haystack = self.eval(&args[0], out)?.to_str(&convfmt);
                let needle = self.eval(&args[1], out)?.to_str(&convfmt);
                let position = haystack
                    .find(&needle)
                    .map(|byte| haystack[..byte].chars().count() + 1)
                    .unwrap_or(0);
                Ok(Value::Num(position as f64))
            }
            BuiltinFn::Substr => self.builtin_substr(args, out),
            BuiltinFn::Tolower => {
                let convfmt = self.convfmt();
                let s = self.eval(&args[0], out)?.to_str(&convfmt);
                Ok(Value::from_string(s.to_lowercase()))
            }
            BuiltinFn::Toupper => {
                let convfmt = self.convfmt();
                let s = self.eval(&args[0], out)?.to_str(&convfmt);
                Ok(Value::from_string(s.to_uppercase()))
            }
            BuiltinFn::Split => self.builtin_split(args, out),
            BuiltinFn::Match => self.builtin_match(args, out),
            BuiltinFn::Sub => self.builtin_sub(args, false, out),
            BuiltinFn::Gsub => self.builtin_sub(args, true, out),
            BuiltinFn::Sprintf => self.builtin_sprintf(args, location, out),

            BuiltinFn::Close => {
                let convfmt = self.convfmt();
                let name = self.eval(&args[0], out)?.to_str(&convfmt);
                let held = self.streams.close(&name);
                Ok(Value::Num(if held > 0 { 1.0 } else { 0.0 }))
            }
            BuiltinFn::Fflush => {
                let name = match args.first() {
                    Some(arg) => {
                        let convfmt = self.convfmt();
                        Some(self.eval(arg, out)?.to_str(&convfmt))
                    }
                    None => None,
                };
                match name.as_deref() {
                    None | Some("") => {
                        out.flush().map_err(Error::Io)?;
                        self.streams.flush(None);
                        Ok(Value::Num(0.0))
                    }
                    Some(name) => {
                        if self.streams.flush(Some(name)) {
                            Ok(Value::Num(0.0))
                        } else {
                            Ok(Value::Num(-1.0))
                        }
                    }
                }
            }
            BuiltinFn::System => {
                let convfmt = self.convfmt();
                let command = self.eval(&args[0], out)?.to_str(&convfmt);
                // Pending output must land before the child's
                out.flush().map_err(Error::Io)?;
                self.streams.flush(None);
                let status = Command::new("sh")
                    .arg("-c")
                    .arg(&command)
                    .status()
                    .map(|s| s.code().unwrap_or(-1))
                    .unwrap_or(-1);
                Ok(Value::Num(status as f64))
            }
        }
    }

    /// length: character count of $0, a scalar, or the entry count of an
    /// array argument
    fn builtin_length<W: Write>(&mut self, args: &[Expr], out: &mut W) -> Result<Value> {
        let Some(arg) = args.first() else {
            let count = self.fields.record_str().chars().count();
            return Ok(Value::Num(count as f64));
        };

        if let Expr::Var(var) = arg {
            let cell = match var.slot {
                crate::ast::Slot::Global(index) => Some(self.env.global(index)),
                crate::ast::Slot::Local(index) => Some(self.env.local(index)),
                crate::ast::Slot::Builtin(builtin) if builtin.is_array() => {
                    Some(self.env.builtin(builtin))
                }
                _ => None,
            };
            if let Some(Cell::Arr(array)) = cell {
                return Ok(Value::Num(array.len() as f64));
            }
        }

        let convfmt = self.convfmt();
        let s = self.eval(arg, out)?.to_str(&convfmt);
        Ok(Value::Num(s.chars().count() as f64))
    }

    /// substr(s, m[, n]): 1-based by code point; m clamps into [1, len+1],
    /// n clamps so the span stays inside the string
    fn builtin_substr<W: Write>(&mut self, args: &[Expr], out: &mut W) -> Result<Value> {
        let convfmt = self.convfmt();
        let s = self.eval(&args[0], out)?.to_str(&convfmt);
        let chars: Vec<char> = s.chars().collect();
        let len = chars.len() as i64;

        let m = self.eval(&args[1], out)?.to_num().trunc() as i64;
        let start = m.clamp(1, len + 1);

        let end = match args.get(2) {
            Some(arg) => {
                let n = self.eval(arg, out)?.to_num().trunc() as i64;
                (start + n - 1).min(len)
            }
            None => len,
        };

        if end < start {
            return Ok(Value::from_string(String::new()));
        }
        let result: String = chars[(start - 1) as usize..end as usize].iter().collect();
        Ok(Value::from_string(result))
    }

    /// split(s, a[, fs]): replace a with the 1-based pieces of s
    fn builtin_split<W: Write>(&mut self, args: &[Expr], out: &mut W) -> Result<Value> {
        let convfmt = self.convfmt();
        let s = self.eval(&args[0], out)?.to_str(&convfmt);

        let policy = match args.get(2) {
            None => self.fields.policy(),
            Some(Expr::Regex(regex, _)) => SplitPolicy::Re(self.literal_regex(regex.index)),
            Some(sep_expr) => {
                let sep = self.eval(sep_expr, out)?.to_str(&convfmt);
                match policy_for(&sep) {
                    Ok(SplitPolicy::Re(_)) => SplitPolicy::Re(self.dynamic_regex(&sep)?),
                    Ok(policy) => policy,
                    Err(e) => {
                        return Err(Error::runtime(format!("split: invalid separator: {}", e)));
                    }
                }
            }
        };

        let parts = split_text(&s, &policy, false);
        let count = parts.len();

        let Expr::Var(var) = &args[1] else {
            return Err(Error::runtime("split: second argument must be an array"));
        };
        let array = self.array_cell_mut(var)?;
        array.clear();
        for (i, part) in parts.into_iter().enumerate() {
            array.insert((i + 1).to_string(), Value::from_input(part));
        }

        Ok(Value::Num(count as f64))
    }

    /// match(s, re): set RSTART/RLENGTH (1-based, in code points) and return
    /// RSTART
    fn builtin_match<W: Write>(&mut self, args: &[Expr], out: &mut W) -> Result<Value> {
        let convfmt = self.convfmt();
        let s = self.eval(&args[0], out)?.to_str(&convfmt);
        let re = self.regex_operand(&args[1], out)?;

        match re.find(&s) {
            Some(m) => {
                let rstart = s[..m.start()].chars().count() + 1;
                let rlength = m.as_str().chars().count();
                self.env
                    .set_builtin_value(BuiltinVar::Rstart, Value::Num(rstart as f64));
                self.env
                    .set_builtin_value(BuiltinVar::Rlength, Value::Num(rlength as f64));
                Ok(Value::Num(rstart as f64))
            }
            None => {
                self.env
                    .set_builtin_value(BuiltinVar::Rstart, Value::Num(0.0));
                self.env
                    .set_builtin_value(BuiltinVar::Rlength, Value::Num(-1.0));
                Ok(Value::Num(0.0))
            }
        }
    }

    /// sub/gsub: substitute the first/all matches in the target (default $0).
    /// With zero substitutions the target is left untouched, so an unmodified
    /// $0 keeps its input field typing.
    fn builtin_sub<W: Write>(
        &mut self,
        args: &[Expr],
        global: bool,
        out: &mut W,
    ) -> Result<Value> {
        let convfmt = self.convfmt();
        let re = self.regex_operand(&args[0], out)?;
        let replacement = self.eval(&args[1], out)?.to_str(&convfmt);

        let target = match args.get(2) {
            Some(target) => self.eval(target, out)?.to_str(&convfmt),
            None => self.fields.record_str().into_owned(),
        };

        let (result, count) = substitute(&re, &replacement, &target, global);

        if count > 0 {
            match args.get(2) {
                Some(target) => self.assign_lvalue(target, Value::Str(result), out)?,
                None => self.set_record_value(Value::Str(result)),
            }
        }

        Ok(Value::Num(count as f64))
    }

    fn builtin_sprintf<W: Write>(
        &mut self,
        args: &[Expr],
        location: SourceLocation,
        out: &mut W,
    ) -> Result<Value> {
        let convfmt = self.convfmt();
        let format_str = self.eval(&args[0], out)?.to_str(&convfmt);

        let parsed = self.formats.get(&format_str).map_err(|e| match e {
            Error::Runtime { message } => Error::runtime_at(message, &format_str, location),
            other => other,
        })?;

        let mut values = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            values.push(self.eval(arg, out)?);
        }

        let rendered = render(&parsed, &values, &convfmt).map_err(|e| match e {
            Error::Runtime { message } => Error::runtime_at(message, &format_str, location),
            other => other,
        })?;
        Ok(Value::from_string(rendered))
    }

    // ===== host callbacks =====

    /// Call a host callback, coercing AWK values to the declared parameter
    /// types. Map parameters bound to a caller array are written back after
    /// the call.
    pub(crate) fn call_native<W: Write>(
        &mut self,
        index: usize,
        args: &[Expr],
        location: SourceLocation,
        out: &mut W,
    ) -> Result<Value> {
        let params = self.natives.params(index).to_vec();
        let name = self.natives.name(index).to_string();
        let convfmt = self.convfmt();

        let mut native_args = Vec::with_capacity(params.len());
        let mut map_links = Vec::new();

        for (position, param) in params.iter().enumerate() {
            let arg = args.get(position);
            match param {
                NativeParam::Num => {
                    let n = match arg {
                        Some(expr) => self.eval(expr, out)?.to_num(),
                        None => 0.0,
                    };
                    native_args.push(NativeValue::Num(n));
                }
                NativeParam::Str => {
                    let s = match arg {
                        Some(expr) => self.eval(expr, out)?.to_str(&convfmt),
                        None => String::new(),
                    };
                    native_args.push(NativeValue::Str(s));
                }
                NativeParam::Map => match arg {
                    Some(Expr::Var(var)) => {
                        let array = self.array_cell_mut(var)?;
                        let map = array
                            .iter()
                            .map(|(k, v)| (k.clone(), v.as_str().into_owned()))
                            .collect();
                        map_links.push((position, var.clone()));
                        native_args.push(NativeValue::Map(map));
                    }
                    Some(other) => {
                        return Err(Error::runtime_at(
                            format!("host function {} expects an array argument", name),
                            name.clone(),
                            other.location(),
                        ));
                    }
                    None => native_args.push(NativeValue::Map(Default::default())),
                },
            }
        }

        let result = self
            .natives
            .call(index, &mut native_args)
            .map_err(|message| Error::runtime_at(message, name.clone(), location))?;

        // Post-call map values flow back into the bound arrays
        for (position, var) in map_links {
            if let NativeValue::Map(map) = &native_args[position] {
                let array = self.array_cell_mut(&var)?;
                array.clear();
                for (k, v) in map {
                    array.insert(k.clone(), Value::from_input(v.clone()));
                }
            }
        }

        Ok(match result {
            NativeValue::Num(n) => Value::Num(n),
            NativeValue::Str(s) => Value::from_input(s),
            NativeValue::Map(_) => {
                return Err(Error::runtime_at(
                    format!("host function {} returned a map", name),
                    name,
                    location,
                ));
            }
        })
    }
}

/// Apply one or all substitutions, expanding `&` (the matched text), `\&`
/// (a literal ampersand), and `\\` (a literal backslash) in the replacement
fn substitute(re: &Regex, replacement: &str, target: &str, global: bool) -> (String, usize) {
    let mut out = String::with_capacity(target.len());
    let mut copied = 0;
    let mut search = 0;
    let mut count = 0;

    while search <= target.len() {
        let Some(m) = re.find_at(target, search) else {
            break;
        };

        out.push_str(&target[copied..m.start()]);
        expand_replacement(replacement, m.as_str(), &mut out);
        count += 1;
        copied = m.end();

        if m.start() == m.end() {
            // Empty match: keep the next character and move past it
            match target[m.end()..].chars().next() {
                Some(c) => {
                    out.push(c);
                    copied = m.end() + c.len_utf8();
                    search = copied;
                }
                None => {
                    search = target.len() + 1;
                }
            }
        } else {
            search = m.end();
        }

        if !global {
            break;
        }
    }

    out.push_str(&target[copied..]);
    (out, count)
}

fn expand_replacement(replacement: &str, matched: &str, out: &mut String) {
    let mut chars = replacement.chars();
    while let Some(c) = chars.next() {
        match c {
            '&' => out.push_str(matched),
            '\\' => match chars.next() {
                Some('&') => out.push('&'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            other => out.push(other),
        }
    }
}
