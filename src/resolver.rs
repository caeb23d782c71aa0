//! Name resolution for the parsed AST.
//!
//! Every identifier is annotated with exactly one storage slot - global,
//! local, or builtin - and every call site with its target. Regex literals
//! are compiled once here; the interpreter never re-parses them. Resolution
//! also rejects programs that misuse names (scalar/array conflicts, calls to
//! undefined functions, `next` in BEGIN/END, `return` outside a function).

use std::collections::HashMap;

use regex::Regex;

use crate::ast::*;
use crate::error::{Error, Result, SourceLocation};

/// How a name is used at one site. Scalar and array uses of the same name
/// within a scope are incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    /// Context that accepts either (function-call argument, `length` arg)
    Neutral,
    Scalar,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    Unknown,
    Scalar,
    Array,
}

/// Resolves a parsed program in place
pub struct Resolver {
    natives: Vec<(String, usize)>,

    globals: HashMap<String, usize>,
    global_names: Vec<String>,
    global_seen: Vec<Seen>,
    functions: HashMap<String, usize>,
    regexes: Vec<Regex>,

    // State for the scope currently being walked
    locals: HashMap<String, usize>,
    local_seen: Vec<Seen>,
    in_function: bool,
    in_begin_end: bool,
    loop_depth: usize,
}

/// Resolve a program with no host callbacks registered
pub fn resolve(program: &mut Program) -> Result<()> {
    Resolver::new().resolve_program(program)
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            natives: Vec::new(),
            globals: HashMap::new(),
            global_names: Vec::new(),
            global_seen: Vec::new(),
            functions: HashMap::new(),
            regexes: Vec::new(),
            locals: HashMap::new(),
            local_seen: Vec::new(),
            in_function: false,
            in_begin_end: false,
            loop_depth: 0,
        }
    }

    /// Declare host callbacks as (name, parameter count) pairs so call sites
    /// can resolve against them
    pub fn with_natives(natives: Vec<(String, usize)>) -> Self {
        let mut resolver = Self::new();
        resolver.natives = natives;
        resolver
    }

    pub fn resolve_program(mut self, program: &mut Program) -> Result<()> {
        // Pass 1: collect function names so forward calls resolve
        for (index, func) in program.functions.iter().enumerate() {
            if BuiltinFn::lookup(&func.name).is_some() {
                return Err(Error::resolve(
                    format!("cannot redefine built-in function '{}'", func.name),
                    func.location,
                ));
            }
            if self.functions.insert(func.name.clone(), index).is_some() {
                return Err(Error::resolve(
                    format!("function '{}' defined twice", func.name),
                    func.location,
                ));
            }
        }

        // Pass 2: function bodies, each with a fresh local scope
        for func in &mut program.functions {
            self.locals.clear();
            self.local_seen.clear();
            for (i, param) in func.params.iter().enumerate() {
                if self.functions.contains_key(param) {
                    return Err(Error::resolve(
                        format!("parameter '{}' shadows a function", param),
                        func.location,
                    ));
                }
                if BuiltinVar::lookup(param).is_some() {
                    return Err(Error::resolve(
                        format!("parameter '{}' shadows a built-in variable", param),
                        func.location,
                    ));
                }
                if self.locals.insert(param.clone(), i).is_some() {
                    return Err(Error::resolve(
                        format!("duplicate parameter '{}'", param),
                        func.location,
                    ));
                }
                self.local_seen.push(Seen::Unknown);
            }
            self.in_function = true;
            self.resolve_block(&mut func.body)?;
            self.in_function = false;
        }
        self.locals.clear();
        self.local_seen.clear();

        // Pass 3: rules
        for rule in &mut program.rules {
            self.in_begin_end = matches!(
                rule.pattern,
                Some(Pattern::Begin) | Some(Pattern::End)
            );
            match &mut rule.pattern {
                Some(Pattern::Expr(expr)) => self.resolve_expr(expr, Usage::Scalar)?,
                Some(Pattern::Range { start, end }) => {
                    self.resolve_expr(start, Usage::Scalar)?;
                    self.resolve_expr(end, Usage::Scalar)?;
                }
                _ => {}
            }
            if let Some(action) = &mut rule.action {
                self.resolve_block(action)?;
            }
            self.in_begin_end = false;
        }

        program.globals = self.global_names;
        program.regexes = self.regexes;
        Ok(())
    }

    fn resolve_block(&mut self, block: &mut Block) -> Result<()> {
        for stmt in &mut block.statements {
            self.resolve_stmt(stmt)?;
        }
        Ok(())
    }

    fn resolve_stmt(&mut self, stmt: &mut Stmt) -> Result<()> {
        match stmt {
            Stmt::Empty => Ok(()),

            Stmt::Expr(expr) => self.resolve_expr(expr, Usage::Scalar),

            Stmt::Print { args, output, .. } => {
                for arg in args {
                    self.resolve_expr(arg, Usage::Scalar)?;
                }
                self.resolve_redirect(output)
            }

            Stmt::Printf {
                format,
                args,
                output,
                ..
            } => {
                self.resolve_expr(format, Usage::Scalar)?;
                for arg in args {
                    self.resolve_expr(arg, Usage::Scalar)?;
                }
                self.resolve_redirect(output)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(condition, Usage::Scalar)?;
                self.resolve_stmt(then_branch)?;
                if let Some(else_stmt) = else_branch {
                    self.resolve_stmt(else_stmt)?;
                }
                Ok(())
            }

            Stmt::While {
                condition, body, ..
            } => {
                self.resolve_expr(condition, Usage::Scalar)?;
                self.loop_depth += 1;
                self.resolve_stmt(body)?;
                self.loop_depth -= 1;
                Ok(())
            }

            Stmt::DoWhile {
                body, condition, ..
            } => {
                self.loop_depth += 1;
                self.resolve_stmt(body)?;
                self.loop_depth -= 1;
                self.resolve_expr(condition, Usage::Scalar)
            }

            Stmt::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                if let Some(init) = init {
                    self.resolve_stmt(init)?;
                }
                if let Some(condition) = condition {
                    self.resolve_expr(condition, Usage::Scalar)?;
                }
                if let Some(update) = update {
                    self.resolve_expr(update, Usage::Scalar)?;
                }
                self.loop_depth += 1;
                self.resolve_stmt(body)?;
                self.loop_depth -= 1;
                Ok(())
            }

            Stmt::ForIn {
                var, array, body, ..
            } => {
                self.resolve_var(var, Usage::Scalar)?;
                self.resolve_var(array, Usage::Array)?;
                self.loop_depth += 1;
                self.resolve_stmt(body)?;
                self.loop_depth -= 1;
                Ok(())
            }

            Stmt::Block(block) => self.resolve_block(block),

            Stmt::Break { location } => {
                if self.loop_depth == 0 {
                    return Err(Error::resolve("break is only allowed inside a loop", *location));
                }
                Ok(())
            }

            Stmt::Continue { location } => {
                if self.loop_depth == 0 {
                    return Err(Error::resolve(
                        "continue is only allowed inside a loop",
                        *location,
                    ));
                }
                Ok(())
            }

            Stmt::Next { location } => {
                if self.in_begin_end {
                    return Err(Error::resolve(
                        "next cannot be used inside BEGIN or END",
                        *location,
                    ));
                }
                Ok(())
            }

            Stmt::Exit { code, .. } => {
                if let Some(code) = code {
                    self.resolve_expr(code, Usage::Scalar)?;
                }
                Ok(())
            }

            Stmt::Return { value, location } => {
                if !self.in_function {
                    return Err(Error::resolve(
                        "return is only allowed inside a function",
                        *location,
                    ));
                }
                if let Some(value) = value {
                    self.resolve_expr(value, Usage::Scalar)?;
                }
                Ok(())
            }

            Stmt::Delete { array, indices, .. } => {
                self.resolve_var(array, Usage::Array)?;
                for index in indices {
                    self.resolve_expr(index, Usage::Scalar)?;
                }
                Ok(())
            }
        }
    }

    fn resolve_redirect(&mut self, output: &mut Option<OutputRedirect>) -> Result<()> {
        match output {
            None => Ok(()),
            Some(OutputRedirect::Truncate(expr))
            | Some(OutputRedirect::Append(expr))
            | Some(OutputRedirect::Pipe(expr)) => self.resolve_expr(expr, Usage::Scalar),
        }
    }

    fn resolve_expr(&mut self, expr: &mut Expr, usage: Usage) -> Result<()> {
        match expr {
            Expr::Number(_, _) | Expr::Str(_, _) => Ok(()),

            Expr::Regex(regex, location) => self.resolve_regex(regex, *location),

            Expr::Var(var) => self.resolve_var(var, usage),

            Expr::Field(index, _) => self.resolve_expr(index, Usage::Scalar),

            Expr::Index { array, indices, .. } => {
                self.resolve_var(array, Usage::Array)?;
                for index in indices {
                    self.resolve_expr(index, Usage::Scalar)?;
                }
                Ok(())
            }

            Expr::Binary { left, right, .. } => {
                self.resolve_expr(left, Usage::Scalar)?;
                self.resolve_expr(right, Usage::Scalar)
            }

            Expr::Unary { operand, .. } => self.resolve_expr(operand, Usage::Scalar),

            Expr::Assign { target, value, .. } => {
                self.resolve_lvalue(target)?;
                self.resolve_expr(value, Usage::Scalar)
            }

            Expr::PreIncrement(target, _)
            | Expr::PreDecrement(target, _)
            | Expr::PostIncrement(target, _)
            | Expr::PostDecrement(target, _) => self.resolve_lvalue(target),

            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                self.resolve_expr(condition, Usage::Scalar)?;
                self.resolve_expr(then_expr, Usage::Scalar)?;
                self.resolve_expr(else_expr, Usage::Scalar)
            }

            Expr::Call {
                name,
                args,
                target,
                location,
            } => self.resolve_call(name, args, target, *location),

            Expr::InArray { key, array, .. } => {
                for part in key {
                    self.resolve_expr(part, Usage::Scalar)?;
                }
                self.resolve_var(array, Usage::Array)
            }

            Expr::Match { expr, pattern, .. } => {
                self.resolve_expr(expr, Usage::Scalar)?;
                self.resolve_expr(pattern, Usage::Scalar)
            }

            Expr::Getline { var, input, .. } => {
                if let Some(var) = var {
                    self.resolve_lvalue(var)?;
                }
                match input {
                    Some(GetlineInput::File(expr)) | Some(GetlineInput::Cmd(expr)) => {
                        self.resolve_expr(expr, Usage::Scalar)?;
                    }
                    None => {}
                }
                Ok(())
            }

            Expr::Group(inner, _) => self.resolve_expr(inner, usage),
        }
    }

    /// Assignment and increment/decrement targets must denote a writable cell
    fn resolve_lvalue(&mut self, target: &mut Expr) -> Result<()> {
        match target {
            Expr::Var(_) | Expr::Field(_, _) | Expr::Index { .. } => {
                self.resolve_expr(target, Usage::Scalar)
            }
            other => Err(Error::resolve(
                "expression is not assignable",
                other.location(),
            )),
        }
    }

    fn resolve_call(
        &mut self,
        name: &str,
        args: &mut [Expr],
        target: &mut CallTarget,
        location: SourceLocation,
    ) -> Result<()> {
        if let Some(builtin) = BuiltinFn::lookup(name) {
            let (min, max) = builtin.arity();
            if args.len() < min || args.len() > max {
                return Err(Error::resolve(
                    format!(
                        "{} expects {} argument(s), got {}",
                        name,
                        if min == max {
                            min.to_string()
                        } else {
                            format!("{} to {}", min, max)
                        },
                        args.len()
                    ),
                    location,
                ));
            }
            *target = CallTarget::Builtin(builtin);
            return self.resolve_builtin_args(builtin, args, location);
        }

        if let Some(&index) = self.functions.get(name) {
            // Extra arguments are legal: they are evaluated and discarded.
            // Bare names stay neutral so arrays can bind by reference.
            for arg in args {
                self.resolve_expr(arg, Usage::Neutral)?;
            }
            *target = CallTarget::User(index);
            return Ok(());
        }

        if let Some(index) = self.natives.iter().position(|(n, _)| n == name) {
            let params = self.natives[index].1;
            if args.len() > params {
                return Err(Error::resolve(
                    format!(
                        "host function {} takes {} argument(s), got {}",
                        name,
                        params,
                        args.len()
                    ),
                    location,
                ));
            }
            for arg in args {
                self.resolve_expr(arg, Usage::Neutral)?;
            }
            *target = CallTarget::Native(index);
            return Ok(());
        }

        Err(Error::resolve(
            format!("call to undefined function '{}'", name),
            location,
        ))
    }

    /// Builtins whose arguments are not plain scalars: split writes an array,
    /// length accepts either kind
    fn resolve_builtin_args(
        &mut self,
        builtin: BuiltinFn,
        args: &mut [Expr],
        location: SourceLocation,
    ) -> Result<()> {
        match builtin {
            BuiltinFn::Split => {
                self.resolve_expr(&mut args[0], Usage::Scalar)?;
                match &mut args[1] {
                    Expr::Var(var) => self.resolve_var(var, Usage::Array)?,
                    other => {
                        return Err(Error::resolve(
                            "split: second argument must be an array name",
                            other.location(),
                        ));
                    }
                }
                if let Some(sep) = args.get_mut(2) {
                    self.resolve_expr(sep, Usage::Scalar)?;
                }
                Ok(())
            }
            BuiltinFn::Length => {
                match args.first_mut() {
                    Some(Expr::Var(var)) => self.resolve_var(var, Usage::Neutral)?,
                    Some(other) => self.resolve_expr(other, Usage::Scalar)?,
                    None => {}
                }
                Ok(())
            }
            BuiltinFn::Sub | BuiltinFn::Gsub => {
                self.resolve_expr(&mut args[0], Usage::Scalar)?;
                self.resolve_expr(&mut args[1], Usage::Scalar)?;
                if let Some(target) = args.get_mut(2) {
                    match target {
                        Expr::Var(_) | Expr::Field(_, _) | Expr::Index { .. } => {
                            self.resolve_expr(target, Usage::Scalar)?;
                        }
                        other => {
                            return Err(Error::resolve(
                                "sub/gsub: third argument must be assignable",
                                other.location(),
                            ));
                        }
                    }
                }
                Ok(())
            }
            _ => {
                let _ = location;
                for arg in args {
                    self.resolve_expr(arg, Usage::Scalar)?;
                }
                Ok(())
            }
        }
    }

    fn resolve_var(&mut self, var: &mut VarRef, usage: Usage) -> Result<()> {
        if var.slot == Slot::Unresolved {
            var.slot = if let Some(&index) = self.locals.get(&var.name) {
                Slot::Local(index)
            } else if let Some(builtin) = BuiltinVar::lookup(&var.name) {
                Slot::Builtin(builtin)
            } else if self.functions.contains_key(&var.name) {
                return Err(Error::resolve(
                    format!("function '{}' used as a variable", var.name),
                    var.location,
                ));
            } else {
                let next = self.global_names.len();
                let index = *self.globals.entry(var.name.clone()).or_insert(next);
                if index == next {
                    self.global_names.push(var.name.clone());
                    self.global_seen.push(Seen::Unknown);
                }
                Slot::Global(index)
            };
        }

        self.record_usage(var, usage)
    }

    fn record_usage(&mut self, var: &VarRef, usage: Usage) -> Result<()> {
        if usage == Usage::Neutral {
            return Ok(());
        }

        let seen = match var.slot {
            Slot::Global(index) => &mut self.global_seen[index],
            Slot::Local(index) => &mut self.local_seen[index],
            Slot::Builtin(builtin) => {
                let is_array = builtin.is_array();
                if is_array && usage == Usage::Scalar {
                    return Err(Error::resolve(
                        format!("{} is an array, not a scalar", var.name),
                        var.location,
                    ));
                }
                if !is_array && usage == Usage::Array {
                    return Err(Error::resolve(
                        format!("{} is a scalar, not an array", var.name),
                        var.location,
                    ));
                }
                return Ok(());
            }
            Slot::Unresolved => return Ok(()),
        };

        let wants = if usage == Usage::Array {
            Seen::Array
        } else {
            Seen::Scalar
        };
        match (*seen, wants) {
            (Seen::Unknown, w) => {
                *seen = w;
                Ok(())
            }
            (s, w) if s == w => Ok(()),
            _ => Err(Error::resolve(
                format!("'{}' used as both scalar and array", var.name),
                var.location,
            )),
        }
    }

    fn resolve_regex(&mut self, regex: &mut RegexRef, location: SourceLocation) -> Result<()> {
        if regex.index != usize::MAX {
            return Ok(());
        }
        let compiled = Regex::new(&regex.source).map_err(|e| {
            Error::resolve(format!("invalid regex /{}/: {}", regex.source, e), location)
        })?;
        regex.index = self.regexes.len();
        self.regexes.push(compiled);
        Ok(())
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}
