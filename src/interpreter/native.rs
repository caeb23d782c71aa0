//! Minimal typed registry for host-provided callbacks.
//!
//! The embedding driver can expose functions to AWK programs. Parameters are
//! declared as numbers, strings, or string maps; the binding layer coerces
//! AWK values on the way in and writes map parameters back to the caller's
//! array after the call.

use std::collections::HashMap;

/// Declared parameter type of a host callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeParam {
    Num,
    Str,
    Map,
}

/// A value crossing the host boundary
#[derive(Debug, Clone)]
pub enum NativeValue {
    Num(f64),
    Str(String),
    Map(HashMap<String, String>),
}

/// Host callbacks return a scalar or an error message; the message becomes a
/// located runtime error at the call site
pub type NativeResult = std::result::Result<NativeValue, String>;

/// Callbacks receive their arguments in place so map parameters can be
/// mutated and written back to the caller's array afterwards
type NativeCallback = Box<dyn FnMut(&mut [NativeValue]) -> NativeResult>;

struct NativeFunction {
    name: String,
    params: Vec<NativeParam>,
    callback: NativeCallback,
}

/// Name-keyed callback table. Indices are stable once registered, so the
/// resolver can annotate call sites with them.
#[derive(Default)]
pub struct NativeRegistry {
    functions: Vec<NativeFunction>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Register a callback. A repeated name replaces the earlier entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        params: Vec<NativeParam>,
        callback: impl FnMut(&mut [NativeValue]) -> NativeResult + 'static,
    ) {
        let name = name.into();
        if let Some(existing) = self.functions.iter_mut().find(|f| f.name == name) {
            existing.params = params;
            existing.callback = Box::new(callback);
        } else {
            self.functions.push(NativeFunction {
                name,
                params,
                callback: Box::new(callback),
            });
        }
    }

    /// (name, parameter count) pairs for the resolver
    pub fn signatures(&self) -> Vec<(String, usize)> {
        self.functions
            .iter()
            .map(|f| (f.name.clone(), f.params.len()))
            .collect()
    }

    pub fn params(&self, index: usize) -> &[NativeParam] {
        &self.functions[index].params
    }

    pub fn name(&self, index: usize) -> &str {
        &self.functions[index].name
    }

    pub fn call(&mut self, index: usize, args: &mut [NativeValue]) -> NativeResult {
        (self.functions[index].callback)(args)
    }
}
