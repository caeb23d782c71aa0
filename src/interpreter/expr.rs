//! Expression evaluation: arithmetic, comparison, matching, lvalues,
//! getline, and function invocation.

use std::io::Write;

use regex::Regex;

use crate::ast::*;
use crate::error::{Error, Result, SourceLocation};
use crate::value::{Value, compare_values};

use super::env::Cell;
use super::records::{read_record, separator_for};
use super::{Interpreter, Signal};

/// Upper bound on `$n` to keep a stray huge index from exhausting memory
const MAX_FIELD_INDEX: usize = 1_000_000;

impl<'p> Interpreter<'p> {
    /// Evaluate an expression. `out` receives anything printed by user
    /// functions invoked along the way.
    pub(crate) fn eval<W: Write>(&mut self, expr: &Expr, out: &mut W) -> Result<Value> {
        match expr {
            Expr::Number(n, _) => Ok(Value::Num(*n)),

            Expr::Str(s, _) => Ok(Value::from_string(s.clone())),

            Expr::Regex(regex, _) => {
                // A bare regex in value position matches against $0
                let re = self.literal_regex(regex.index);
                let record = self.fields.record_str().into_owned();
                Ok(Value::Num(if re.is_match(&record) { 1.0 } else { 0.0 }))
            }

            Expr::Var(var) => self.read_var(var),

            Expr::Field(index, location) => {
                let index = self.field_index(index, *location, out)?;
                Ok(self.fields.get(index))
            }

            Expr::Index {
                array, indices, ..
            } => {
                let key = self.make_key(indices, out)?;
                let cell = self.array_cell_mut(array)?;
                // Mere mention creates the entry, so `in` tests written
                // after an indexing succeed
                Ok(cell.entry(key).or_insert(Value::Uninit).clone())
            }

            Expr::Binary {
                left,
                op,
                right,
                location,
            } => self.eval_binary(left, *op, right, *location, out),

            Expr::Unary { op, operand, .. } => {
                let value = self.eval(operand, out)?;
                Ok(match op {
                    UnaryOp::Neg => Value::Num(-value.to_num()),
                    UnaryOp::Pos => Value::Num(value.to_num()),
                    UnaryOp::Not => Value::Num(if value.is_truthy() { 0.0 } else { 1.0 }),
                })
            }

            Expr::Assign {
                target,
                op,
                value,
                location,
            } => self.eval_assignment(target, *op, value, *location, out),

            Expr::PreIncrement(target, _) => {
                let next = Value::Num(self.eval(target, out)?.to_num() + 1.0);
                self.assign_lvalue(target, next.clone(), out)?;
                Ok(next)
            }

            Expr::PreDecrement(target, _) => {
                let next = Value::Num(self.eval(target, out)?.to_num() - 1.0);
                self.assign_lvalue(target, next.clone(), out)?;
                Ok(next)
            }

            Expr::PostIncrement(target, _) => {
                let current = self.eval(target, out)?.to_num();
                self.assign_lvalue(target, Value::Num(current + 1.0), out)?;
                Ok(Value::Num(current))
            }

            Expr::PostDecrement(target, _) => {
                let current = self.eval(target, out)?.to_num();
                self.assign_lvalue(target, Value::Num(current - 1.0), out)?;
                Ok(Value::Num(current))
            }

            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                if self.eval(condition, out)?.is_truthy() {
                    self.eval(then_expr, out)
                } else {
                    self.eval(else_expr, out)
                }
            }

            Expr::Call {
                args,
                target,
                location,
                name,
            } => match target {
                CallTarget::User(index) => self.call_user(*index, args, out),
                CallTarget::Builtin(builtin) => self.call_builtin(*builtin, args, *location, out),
                CallTarget::Native(index) => self.call_native(*index, args, *location, out),
                CallTarget::Unresolved => Err(Error::runtime_at(
                    "call site was never resolved",
                    name.clone(),
                    *location,
                )),
            },

            Expr::InArray { key, array, .. } => {
                let key = self.make_key(key, out)?;
                // Membership tests never create the entry
                let found = self.array_contains(array, &key)?;
                Ok(Value::Num(if found { 1.0 } else { 0.0 }))
            }

            Expr::Match {
                expr,
                pattern,
                negated,
                ..
            } => {
                let convfmt = self.convfmt();
                let subject = self.eval(expr, out)?.to_str(&convfmt);
                let re = self.regex_operand(pattern, out)?;
                let matched = re.is_match(&subject) != *negated;
                Ok(Value::Num(if matched { 1.0 } else { 0.0 }))
            }

            Expr::Getline {
                var,
                input,
                location,
            } => self.eval_getline(var.as_deref(), input.as_ref(), *location, out),

            Expr::Group(inner, _) => self.eval(inner, out),
        }
    }

    fn eval_binary<W: Write>(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        location: SourceLocation,
        out: &mut W,
    ) -> Result<Value> {
        // Short-circuit logical operators
        match op {
            BinaryOp::And => {
                if !self.eval(left, out)?.is_truthy() {
                    return Ok(Value::Num(0.0));
                }
                let r = self.eval(right, out)?;
                return Ok(Value::Num(if r.is_truthy() { 1.0 } else { 0.0 }));
            }
            BinaryOp::Or => {
                if self.eval(left, out)?.is_truthy() {
                    return Ok(Value::Num(1.0));
                }
                let r = self.eval(right, out)?;
                return Ok(Value::Num(if r.is_truthy() { 1.0 } else { 0.0 }));
            }
            _ => {}
        }

        let l = self.eval(left, out)?;
        let r = self.eval(right, out)?;

        match op {
            BinaryOp::Add => Ok(Value::Num(l.to_num() + r.to_num())),
            BinaryOp::Sub => Ok(Value::Num(l.to_num() - r.to_num())),
            BinaryOp::Mul => Ok(Value::Num(l.to_num() * r.to_num())),
            BinaryOp::Div => {
                let divisor = r.to_num();
                if divisor == 0.0 {
                    return Err(Error::runtime_at(
                        "division by zero",
                        op.lexeme(),
                        location,
                    ));
                }
                Ok(Value::Num(l.to_num() / divisor))
            }
            BinaryOp::Mod => {
                let divisor = r.to_num();
                if divisor == 0.0 {
                    return Err(Error::runtime_at(
                        "division by zero in %",
                        op.lexeme(),
                        location,
                    ));
                }
                Ok(Value::Num(l.to_num() % divisor))
            }
            BinaryOp::Pow => Ok(Value::Num(l.to_num().powf(r.to_num()))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq
            | BinaryOp::Ne => {
                let convfmt = self.convfmt();
                let ordering = compare_values(&l, &r, &convfmt);
                let truth = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::Ge => ordering.is_ge(),
                    BinaryOp::Eq => ordering.is_eq(),
                    BinaryOp::Ne => ordering.is_ne(),
                    _ => unreachable!(),
                };
                Ok(Value::Num(if truth { 1.0 } else { 0.0 }))
            }
            BinaryOp::Concat => {
                let convfmt = self.convfmt();
                let mut s = l.to_str(&convfmt);
                s.push_str(&r.to_str(&convfmt));
                Ok(Value::Str(s))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }

    fn eval_assignment<W: Write>(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        location: SourceLocation,
        out: &mut W,
    ) -> Result<Value> {
        let new_value = match op {
            AssignOp::Assign => self.eval(value, out)?,
            _ => {
                let current = self.eval(target, out)?.to_num();
                let rhs = self.eval(value, out)?.to_num();
                let result = match op {
                    AssignOp::AddAssign => current + rhs,
                    AssignOp::SubAssign => current - rhs,
                    AssignOp::MulAssign => current * rhs,
                    AssignOp::DivAssign => {
                        if rhs == 0.0 {
                            return Err(Error::runtime_at("division by zero", "/=", location));
                        }
                        current / rhs
                    }
                    AssignOp::ModAssign => {
                        if rhs == 0.0 {
                            return Err(Error::runtime_at("division by zero in %", "%=", location));
                        }
                        current % rhs
                    }
                    AssignOp::PowAssign => current.powf(rhs),
                    AssignOp::Assign => unreachable!(),
                };
                Value::Num(result)
            }
        };

        self.assign_lvalue(target, new_value.clone(), out)?;
        Ok(new_value)
    }

    /// Read a variable in scalar context
    pub(crate) fn read_var(&mut self, var: &VarRef) -> Result<Value> {
        let cell = match var.slot {
            Slot::Global(index) => self.env.global(index),
            Slot::Local(index) => self.env.local(index),
            Slot::Builtin(builtin) => self.env.builtin(builtin),
            Slot::Unresolved => {
                return Err(Error::runtime_at(
                    "identifier was never resolved",
                    var.name.clone(),
                    var.location,
                ));
            }
        };
        match cell {
            Cell::Val(value) => Ok(value.clone()),
            Cell::Arr(_) => Err(Error::runtime_at(
                "attempt to use array in scalar context",
                var.name.clone(),
                var.location,
            )),
        }
    }

    /// Store into an lvalue: a variable, a field, or an array element
    pub(crate) fn assign_lvalue<W: Write>(
        &mut self,
        target: &Expr,
        value: Value,
        out: &mut W,
    ) -> Result<()> {
        match target {
            Expr::Var(var) => self.assign_var(var, value),

            Expr::Field(index, location) => {
                let index = self.field_index(index, *location, out)?;
                if index == 0 {
                    self.set_record_value(value);
                } else {
                    let (ofs, convfmt) = (self.ofs(), self.convfmt());
                    self.fields.set(index, value, &ofs, &convfmt);
                    self.sync_nf();
                }
                Ok(())
            }

            Expr::Index {
                array, indices, ..
            } => {
                let key = self.make_key(indices, out)?;
                let cell = self.array_cell_mut(array)?;
                cell.insert(key, value);
                Ok(())
            }

            other => Err(Error::runtime_at(
                "expression is not assignable",
                "=",
                other.location(),
            )),
        }
    }

    /// Store a scalar into a named variable
    pub(crate) fn assign_var(&mut self, var: &VarRef, value: Value) -> Result<()> {
        match var.slot {
            Slot::Global(index) => {
                let cell = self.env.global_mut(index);
                if matches!(cell, Cell::Arr(_)) {
                    return Err(Error::runtime_at(
                        "attempt to use array in scalar context",
                        var.name.clone(),
                        var.location,
                    ));
                }
                *cell = Cell::Val(value);
                Ok(())
            }
            Slot::Local(index) => {
                let cell = self.env.local_mut(index);
                if matches!(cell, Cell::Arr(_)) {
                    return Err(Error::runtime_at(
                        "attempt to use array in scalar context",
                        var.name.clone(),
                        var.location,
                    ));
                }
                *cell = Cell::Val(value);
                Ok(())
            }
            Slot::Builtin(builtin) => self.set_builtin(builtin, value),
            Slot::Unresolved => Err(Error::runtime_at(
                "identifier was never resolved",
                var.name.clone(),
                var.location,
            )),
        }
    }

    /// Evaluate a field index expression: coerced to integer, must not be
    /// negative or absurdly large
    fn field_index<W: Write>(
        &mut self,
        expr: &Expr,
        location: SourceLocation,
        out: &mut W,
    ) -> Result<usize> {
        let n = self.eval(expr, out)?.to_num();
        if n < 0.0 {
            return Err(Error::runtime_at(
                format!("field index {} is negative", n),
                "$",
                location,
            ));
        }
        let index = n as usize;
        if index > MAX_FIELD_INDEX {
            return Err(Error::runtime_at(
                format!("field index {} out of range", index),
                "$",
                location,
            ));
        }
        Ok(index)
    }

    /// Join subscript expressions with SUBSEP into an array key
    pub(crate) fn make_key<W: Write>(&mut self, indices: &[Expr], out: &mut W) -> Result<String> {
        let convfmt = self.convfmt();
        if indices.len() == 1 {
            return Ok(self.eval(&indices[0], out)?.to_str(&convfmt));
        }
        let subsep = self.subsep();
        let mut parts = Vec::with_capacity(indices.len());
        for index in indices {
            parts.push(self.eval(index, out)?.to_str(&convfmt));
        }
        Ok(parts.join(&subsep))
    }

    /// The array behind a variable reference, promoting an uninitialized
    /// scalar cell to an empty array on first use
    pub(crate) fn array_cell_mut(&mut self, var: &VarRef) -> Result<&mut super::Array> {
        let cell = match var.slot {
            Slot::Global(index) => self.env.global_mut(index),
            Slot::Local(index) => self.env.local_mut(index),
            Slot::Builtin(builtin) => {
                if !builtin.is_array() {
                    return Err(Error::runtime_at(
                        "attempt to use scalar as array",
                        var.name.clone(),
                        var.location,
                    ));
                }
                self.env.builtin_mut(builtin)
            }
            Slot::Unresolved => {
                return Err(Error::runtime_at(
                    "identifier was never resolved",
                    var.name.clone(),
                    var.location,
                ));
            }
        };

        if cell.is_uninit() {
            *cell = Cell::Arr(super::Array::new());
        }
        match cell {
            Cell::Arr(array) => Ok(array),
            Cell::Val(_) => Err(Error::runtime_at(
                "attempt to use scalar as array",
                var.name.clone(),
                var.location,
            )),
        }
    }

    /// Membership test that does not create the entry
    fn array_contains(&mut self, var: &VarRef, key: &str) -> Result<bool> {
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
            Cell::Arr(array) => Ok(array.contains_key(key)),
            Cell::Val(Value::Uninit) => Ok(false),
            Cell::Val(_) => Err(Error::runtime_at(
                "attempt to use scalar as array",
                var.name.clone(),
                var.location,
            )),
        }
    }

    /// The regex for a match operand: a literal uses its compiled form, any
    /// other expression is coerced to a string and compiled on use
    pub(crate) fn regex_operand<W: Write>(
        &mut self,
        pattern: &Expr,
        out: &mut W,
    ) -> Result<Regex> {
        if let Expr::Regex(regex, _) = pattern {
            return Ok(self.literal_regex(regex.index));
        }
        let convfmt = self.convfmt();
        let source = self.eval(pattern, out)?.to_str(&convfmt);
        self.dynamic_regex(&source)
    }

    // ===== getline =====

    fn eval_getline<W: Write>(
        &mut self,
        var: Option<&Expr>,
        input: Option<&GetlineInput>,
        location: SourceLocation,
        out: &mut W,
    ) -> Result<Value> {
        match input {
            // Plain getline: next record from the main input, NR/FNR advance
            None => match self.next_main_record() {
                Ok(Some(text)) => {
                    self.bump_record_counters();
                    match var {
                        Some(lvalue) => {
                            self.assign_lvalue(lvalue, Value::from_input(text), out)?;
                        }
                        None => self.load_record(text),
                    }
                    Ok(Value::Num(1.0))
                }
                Ok(None) => Ok(Value::Num(0.0)),
                // A main-loop file that is simply missing reports -1
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(Value::Num(-1.0))
                }
                Err(e) => Err(e),
            },

            Some(GetlineInput::File(file_expr)) => {
                let convfmt = self.convfmt();
                let name = self.eval(file_expr, out)?.to_str(&convfmt);
                let sep = separator_for(&self.builtin_str(BuiltinVar::Rs));

                let record = match self.streams.in_file(&name) {
                    Ok(reader) => read_record(reader, sep),
                    Err(_) => return Ok(Value::Num(-1.0)),
                };
                self.finish_getline(record, var, location, out)
            }

            Some(GetlineInput::Cmd(cmd_expr)) => {
                let convfmt = self.convfmt();
                let command = self.eval(cmd_expr, out)?.to_str(&convfmt);
                let sep = separator_for(&self.builtin_str(BuiltinVar::Rs));

                // Keep command output ordered after anything we printed
                out.flush().map_err(Error::Io)?;

                let record = match self.streams.in_command(&command) {
                    Ok(cmd) => read_record(&mut cmd.reader, sep),
                    Err(_) => return Ok(Value::Num(-1.0)),
                };
                self.finish_getline(record, var, location, out)
            }
        }
    }

    /// Common tail of the redirected getline forms: assign the record and
    /// map I/O results to 1/0/-1. NR and FNR stay untouched here.
    fn finish_getline<W: Write>(
        &mut self,
        record: std::io::Result<Option<String>>,
        var: Option<&Expr>,
        _location: SourceLocation,
        out: &mut W,
    ) -> Result<Value> {
        match record {
            Ok(Some(text)) => {
                match var {
                    Some(lvalue) => {
                        self.assign_lvalue(lvalue, Value::from_input(text), out)?;
                    }
                    None => self.load_record(text),
                }
                Ok(Value::Num(1.0))
            }
            Ok(None) => Ok(Value::Num(0.0)),
            Err(_) => Ok(Value::Num(-1.0)),
        }
    }

    // ===== user function calls =====

    /// Call a user-defined function. Bare array (or not-yet-typed) names
    /// bind by reference: the cell moves into the frame and is written back
    /// after the call.
    pub(crate) fn call_user<W: Write>(
        &mut self,
        func_index: usize,
        args: &[Expr],
        out: &mut W,
    ) -> Result<Value> {
        let program = self.program;
        let func = &program.functions[func_index];
        let param_count = func.params.len();

        let mut cells: Vec<Cell> = Vec::with_capacity(param_count.min(args.len()));
        let mut links: Vec<(usize, Slot)> = Vec::new();

        for (position, arg) in args.iter().enumerate() {
            if position >= param_count {
                // Extra arguments: evaluated for side effects, then dropped
                self.eval(arg, out)?;
                continue;
            }

            if let Expr::Var(var) = arg {
                match var.slot {
                    Slot::Global(index) => {
                        let cell = self.env.global_mut(index);
                        if matches!(cell, Cell::Arr(_)) || cell.is_uninit() {
                            links.push((position, var.slot));
                            cells.push(std::mem::take(cell));
                            continue;
                        }
                    }
                    Slot::Local(index) => {
                        let cell = self.env.local_mut(index);
                        if matches!(cell, Cell::Arr(_)) || cell.is_uninit() {
                            links.push((position, var.slot));
                            cells.push(std::mem::take(cell));
                            continue;
                        }
                    }
                    Slot::Builtin(builtin) if builtin.is_array() => {
                        // Builtin arrays copy in and write back on return
                        links.push((position, var.slot));
                        cells.push(self.env.builtin(builtin).clone());
                        continue;
                    }
                    _ => {}
                }
            }

            let value = self.eval(arg, out)?;
            cells.push(Cell::Val(value));
        }

        log::trace!("calling function {}", func.name);
        self.env.push_frame(param_count, cells);
        let result = self.exec_block(&func.body, out);
        let mut frame = self.env.pop_frame();
        let signal = result?;

        // Link-back: arrays the callee created or modified return to the
        // caller's binding
        for (position, slot) in links {
            let cell = std::mem::take(&mut frame[position]);
            if !matches!(cell, Cell::Arr(_)) {
                continue;
            }
            match slot {
                Slot::Global(index) => *self.env.global_mut(index) = cell,
                Slot::Local(index) => *self.env.local_mut(index) = cell,
                Slot::Builtin(builtin) => *self.env.builtin_mut(builtin) = cell,
                Slot::Unresolved => {}
            }
        }

        match signal {
            Signal::Return(value) => Ok(value),
            Signal::Next | Signal::Exit => {
                // Re-raised by the enclosing statement executor
                self.pending = Some(signal);
                Ok(Value::Uninit)
            }
            _ => Ok(Value::Uninit),
        }
    }
}
