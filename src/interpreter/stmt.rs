//! Statement execution and control-flow signals.

use std::io::Write;

use crate::ast::*;
use crate::error::{Error, Result, SourceLocation};
use crate::format::render;
use crate::value::Value;

use super::env::Cell;
use super::Interpreter;

/// Result of executing a statement. Signals propagate outward until the
/// scope that owns them consumes them: `Break`/`Continue` at the enclosing
/// loop, `Next` at the record loop, `Return` at function entry, `Exit` at
/// the program driver.
pub enum Signal {
    Normal,
    Break,
    Continue,
    Next,
    Exit,
    Return(Value),
}

impl<'p> Interpreter<'p> {
    pub(crate) fn exec_block<W: Write>(&mut self, block: &Block, out: &mut W) -> Result<Signal> {
        for stmt in &block.statements {
            match self.exec_stmt(stmt, out)? {
                Signal::Normal => continue,
                other => return Ok(other),
            }
        }
        Ok(Signal::Normal)
    }

    /// Re-raise a `next`/`exit` that surfaced inside a function call during
    /// expression evaluation
    fn check_pending(&mut self) -> Option<Signal> {
        self.pending.take()
    }

    pub(crate) fn exec_stmt<W: Write>(&mut self, stmt: &Stmt, out: &mut W) -> Result<Signal> {
        match stmt {
            Stmt::Empty => Ok(Signal::Normal),

            Stmt::Expr(expr) => {
                self.eval(expr, out)?;
                Ok(self.check_pending().unwrap_or(Signal::Normal))
            }

            Stmt::Print { args, output, location } => {
                self.exec_print(args, output, *location, out)?;
                Ok(self.check_pending().unwrap_or(Signal::Normal))
            }

            Stmt::Printf {
                format,
                args,
                output,
                location,
            } => {
                self.exec_printf(format, args, output, *location, out)?;
                Ok(self.check_pending().unwrap_or(Signal::Normal))
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                let cond = self.eval(condition, out)?;
                if let Some(signal) = self.check_pending() {
                    return Ok(signal);
                }
                if cond.is_truthy() {
                    self.exec_stmt(then_branch, out)
                } else if let Some(else_stmt) = else_branch {
                    self.exec_stmt(else_stmt, out)
                } else {
                    Ok(Signal::Normal)
                }
            }

            Stmt::While {
                condition, body, ..
            } => {
                loop {
                    let cond = self.eval(condition, out)?;
                    if let Some(signal) = self.check_pending() {
                        return Ok(signal);
                    }
                    if !cond.is_truthy() {
                        break;
                    }
                    match self.exec_stmt(body, out)? {
                        Signal::Normal | Signal::Continue => {}
                        Signal::Break => break,
                        other => return Ok(other),
                    }
                }
                Ok(Signal::Normal)
            }

            Stmt::DoWhile {
                body, condition, ..
            } => {
                loop {
                    match self.exec_stmt(body, out)? {
                        Signal::Normal | Signal::Continue => {}
                        Signal::Break => break,
                        other => return Ok(other),
                    }
                    let cond = self.eval(condition, out)?;
                    if let Some(signal) = self.check_pending() {
                        return Ok(signal);
                    }
                    if !cond.is_truthy() {
                        break;
                    }
                }
                Ok(Signal::Normal)
            }

            Stmt::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                if let Some(init) = init {
                    match self.exec_stmt(init, out)? {
                        Signal::Normal => {}
                        other => return Ok(other),
                    }
                }

                loop {
                    // An absent condition is true
                    if let Some(condition) = condition {
                        let cond = self.eval(condition, out)?;
                        if let Some(signal) = self.check_pending() {
                            return Ok(signal);
                        }
                        if !cond.is_truthy() {
                            break;
                        }
                    }

                    match self.exec_stmt(body, out)? {
                        Signal::Normal | Signal::Continue => {}
                        Signal::Break => break,
                        other => return Ok(other),
                    }

                    if let Some(update) = update {
                        self.eval(update, out)?;
                        if let Some(signal) = self.check_pending() {
                            return Ok(signal);
                        }
                    }
                }
                Ok(Signal::Normal)
            }

            Stmt::ForIn {
                var, array, body, ..
            } => {
                // Iterate over a snapshot of the keys: entries added during
                // the walk need not be visited
                let keys = self.array_keys(array)?;
                for key in keys {
                    self.assign_var(var, Value::from_input(key))?;
                    match self.exec_stmt(body, out)? {
                        Signal::Normal | Signal::Continue => {}
                        Signal::Break => break,
                        other => return Ok(other),
                    }
                }
                Ok(Signal::Normal)
            }

            Stmt::Block(block) => self.exec_block(block, out),

            Stmt::Break { .. } => Ok(Signal::Break),

            Stmt::Continue { .. } => Ok(Signal::Continue),

            Stmt::Next { .. } => Ok(Signal::Next),

            Stmt::Exit { code, .. } => {
                if let Some(code) = code {
                    let status = self.eval(code, out)?.to_num() as i32;
                    self.exit_status = status;
                    let _ = self.check_pending();
                }
                Ok(Signal::Exit)
            }

            Stmt::Return { value, .. } => {
                let result = match value {
                    Some(expr) => self.eval(expr, out)?,
                    None => Value::Uninit,
                };
                if let Some(signal) = self.check_pending() {
                    return Ok(signal);
                }
                Ok(Signal::Return(result))
            }

            Stmt::Delete {
                array, indices, ..
            } => {
                if indices.is_empty() {
                    // delete a: reset to an empty array
                    self.array_cell_mut(array)?.clear();
                } else {
                    let key = self.make_key(indices, out)?;
                    self.array_cell_mut(array)?.remove(&key);
                }
                Ok(self.check_pending().unwrap_or(Signal::Normal))
            }
        }
    }

    /// Snapshot of an array's keys for for-in iteration
    fn array_keys(&mut self, var: &VarRef) -> Result<Vec<String>> {
        let cell = match var.slot {
            Slot::Global(index) => self.env.global(index),
            Slot::Local(index) => self.env.local(index),
            Slot::Builtin(builtin) => {
                if !builtin.is_array() {
                    return Err(Error::runtime_at(
                        "attempt to use scalar as array",
                        var.name.clone(),
                        var.location,
                    ));
                }
                self.env.builtin(builtin)
            }
            Slot::Unresolved => {
                return Err(Error::runtime_at(
                    "identifier was never resolved",
                    var.name.clone(),
                    var.location,
                ));
            }
        };
        match cell {
            Cell::Arr(array) => Ok(array.keys().cloned().collect()),
            Cell::Val(Value::Uninit) => Ok(Vec::new()),
            Cell::Val(_) => Err(Error::runtime_at(
                "attempt to use scalar as array",
                var.name.clone(),
                var.location,
            )),
        }
    }

    fn exec_print<W: Write>(
        &mut self,
        args: &[Expr],
        redirect: &Option<OutputRedirect>,
        _location: SourceLocation,
        out: &mut W,
    ) -> Result<()> {
        let ofmt = self.ofmt();

        let line = if args.is_empty() {
            self.fields.record_str().into_owned()
        } else {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg, out)?.to_str(&ofmt));
            }
            values.join(&self.ofs())
        };
        let ors = self.ors();

        self.write_payload(&line, &ors, redirect, out)
    }

    fn exec_printf<W: Write>(
        &mut self,
        format: &Expr,
        args: &[Expr],
        redirect: &Option<OutputRedirect>,
        location: SourceLocation,
        out: &mut W,
    ) -> Result<()> {
        let convfmt = self.convfmt();
        let format_str = self.eval(format, out)?.to_str(&convfmt);

        let parsed = self
            .formats
            .get(&format_str)
            .map_err(|e| locate(e, &format_str, location))?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, out)?);
        }

        let rendered =
            render(&parsed, &values, &convfmt).map_err(|e| locate(e, &format_str, location))?;

        self.write_payload(&rendered, "", redirect, out)
    }

    /// Send formatted text to stdout or a redirected stream
    fn write_payload<W: Write>(
        &mut self,
        payload: &str,
        terminator: &str,
        redirect: &Option<OutputRedirect>,
        out: &mut W,
    ) -> Result<()> {
        match redirect {
            None => {
                write!(out, "{}{}", payload, terminator)?;
            }
            Some(OutputRedirect::Truncate(target)) => {
                let name = self.redirect_name(target, out)?;
                let file = self.streams.out_file(&name, false)?;
                write!(file, "{}{}", payload, terminator)?;
            }
            Some(OutputRedirect::Append(target)) => {
                let name = self.redirect_name(target, out)?;
                let file = self.streams.out_file(&name, true)?;
                write!(file, "{}{}", payload, terminator)?;
            }
            Some(OutputRedirect::Pipe(target)) => {
                let command = self.redirect_name(target, out)?;
                // Keep the child's output ordered after ours
                out.flush()?;
                let pipe = self.streams.out_command(&command)?;
                write!(pipe.writer(), "{}{}", payload, terminator)?;
            }
        }
        Ok(())
    }

    fn redirect_name<W: Write>(&mut self, target: &Expr, out: &mut W) -> Result<String> {
        let convfmt = self.convfmt();
        Ok(self.eval(target, out)?.to_str(&convfmt))
    }
}

/// Attach the source position and offending lexeme to a bare runtime error
fn locate(error: Error, lexeme: &str, location: SourceLocation) -> Error {
    match error {
        Error::Runtime { message } => Error::runtime_at(message, lexeme, location),
        other => other,
    }
}
