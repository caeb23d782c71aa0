//! Variable storage: globals, builtins, and the local frame stack.
//!
//! Each store is a flat vector indexed by the slots the resolver assigned.
//! Locals live in one shared pool; a function call pushes a frame of
//! parameter-count cells and releases it on return.

use std::collections::HashMap;

use crate::ast::BuiltinVar;
use crate::value::Value;

/// An AWK array: string keys to scalar values
pub type Array = HashMap<String, Value>;

/// A storage cell holds a scalar or an array, never both. An uninitialized
/// scalar is promoted to an array on first array use.
#[derive(Debug, Clone)]
pub enum Cell {
    Val(Value),
    Arr(Array),
}

impl Default for Cell {
    fn default() -> Self {
        Cell::Val(Value::Uninit)
    }
}

impl Cell {
    /// Whether this cell can still become either a scalar or an array
    pub fn is_uninit(&self) -> bool {
        matches!(self, Cell::Val(Value::Uninit))
    }
}

/// The three variable stores
pub struct Environment {
    globals: Vec<Cell>,
    builtins: Vec<Cell>,
    /// Shared pool for all local frames
    locals: Vec<Cell>,
    /// Base offset of each active frame
    frames: Vec<usize>,
}

impl Environment {
    pub fn new(global_count: usize) -> Self {
        let mut builtins = Vec::with_capacity(BuiltinVar::COUNT);
        for i in 0..BuiltinVar::COUNT {
            if i == BuiltinVar::Argv.index() || i == BuiltinVar::Environ.index() {
                builtins.push(Cell::Arr(Array::new()));
            } else {
                builtins.push(Cell::Val(Value::Uninit));
            }
        }
        Self {
            globals: vec![Cell::default(); global_count],
            builtins,
            locals: Vec::with_capacity(64),
            frames: Vec::new(),
        }
    }

    pub fn global(&self, index: usize) -> &Cell {
        &self.globals[index]
    }

    pub fn global_mut(&mut self, index: usize) -> &mut Cell {
        &mut self.globals[index]
    }

    fn frame_base(&self) -> usize {
        *self.frames.last().expect("no active local frame")
    }

    pub fn local(&self, index: usize) -> &Cell {
        &self.locals[self.frame_base() + index]
    }

    pub fn local_mut(&mut self, index: usize) -> &mut Cell {
        let base = self.frame_base();
        &mut self.locals[base + index]
    }

    pub fn in_function(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Push a frame of `size` cells, moving the given cells into the leading
    /// slots. Missing parameters stay uninitialized.
    pub fn push_frame(&mut self, size: usize, cells: Vec<Cell>) {
        self.frames.push(self.locals.len());
        self.locals.extend(cells);
        while self.locals.len() < self.frames.last().unwrap() + size {
            self.locals.push(Cell::default());
        }
    }

    /// Pop the top frame and hand its cells back for array link-back
    pub fn pop_frame(&mut self) -> Vec<Cell> {
        let base = self.frames.pop().expect("no active local frame");
        self.locals.split_off(base)
    }

    pub fn builtin(&self, var: BuiltinVar) -> &Cell {
        &self.builtins[var.index()]
    }

    pub fn builtin_mut(&mut self, var: BuiltinVar) -> &mut Cell {
        &mut self.builtins[var.index()]
    }

    /// Scalar value of a builtin; array builtins never go through here
    pub fn builtin_value(&self, var: BuiltinVar) -> &Value {
        match self.builtin(var) {
            Cell::Val(value) => value,
            Cell::Arr(_) => panic!("builtin {} is an array", var.name()),
        }
    }

    pub fn set_builtin_value(&mut self, var: BuiltinVar, value: Value) {
        self.builtins[var.index()] = Cell::Val(value);
    }
}
