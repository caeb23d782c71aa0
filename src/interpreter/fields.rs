//! The field engine: maintains `$0`, `$1..$NF`, and their re-split/re-join
//! invariants under mutation.

use regex::Regex;

use crate::value::Value;

/// How a record splits into fields, derived from FS
#[derive(Debug, Clone)]
pub enum SplitPolicy {
    /// FS == " ": runs of whitespace, leading/trailing trimmed
    Whitespace,
    /// Single-character FS
    Char(char),
    /// Multi-character FS compiles to a regex
    Re(Regex),
}

/// Build the split policy for an FS value. Compilation happens here, once
/// per FS assignment, not per record.
pub fn policy_for(fs: &str) -> Result<SplitPolicy, regex::Error> {
    if fs == " " {
        Ok(SplitPolicy::Whitespace)
    } else {
        let mut chars = fs.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(SplitPolicy::Char(c)),
            (None, _) => Ok(SplitPolicy::Char(' ')),
            _ => Ok(SplitPolicy::Re(Regex::new(fs)?)),
        }
    }
}

/// Split text by a policy. With `newline_splits` (paragraph-mode records),
/// newline separates fields in addition to FS.
pub fn split_text(text: &str, policy: &SplitPolicy, newline_splits: bool) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if newline_splits && !matches!(policy, SplitPolicy::Whitespace) {
        return text
            .split('\n')
            .flat_map(|line| split_text(line, policy, false))
            .collect();
    }
    match policy {
        SplitPolicy::Whitespace => text.split_whitespace().map(String::from).collect(),
        SplitPolicy::Char(c) => text.split(*c).map(String::from).collect(),
        SplitPolicy::Re(re) => re.split(text).map(String::from).collect(),
    }
}

/// `$0` and the field vector
pub struct FieldEngine {
    record: Value,
    fields: Vec<Value>,
    policy: SplitPolicy,
}

impl FieldEngine {
    pub fn new() -> Self {
        Self {
            record: Value::Str(String::new()),
            fields: Vec::new(),
            policy: SplitPolicy::Whitespace,
        }
    }

    pub fn set_policy(&mut self, policy: SplitPolicy) {
        self.policy = policy;
    }

    /// Current FS-derived policy, for `split()` with no separator argument
    pub fn policy(&self) -> SplitPolicy {
        self.policy.clone()
    }

    pub fn nf(&self) -> usize {
        self.fields.len()
    }

    /// Load a fresh input record: `$0` becomes a numeric string and the
    /// fields re-split
    pub fn load_record(&mut self, text: String, newline_splits: bool) {
        self.fields = split_text(&text, &self.policy, newline_splits)
            .into_iter()
            .map(Value::from_input)
            .collect();
        self.record = Value::from_input(text);
    }

    /// Assign `$0`: keeps the assigned value's type and re-splits
    pub fn set_record(&mut self, value: Value, newline_splits: bool, convfmt: &str) {
        let text = value.to_str(convfmt);
        self.fields = split_text(&text, &self.policy, newline_splits)
            .into_iter()
            .map(Value::from_input)
            .collect();
        self.record = value;
    }

    /// Read `$i`. Reading past NF yields uninitialized without growing.
    pub fn get(&self, index: usize) -> Value {
        if index == 0 {
            self.record.clone()
        } else if index <= self.fields.len() {
            self.fields[index - 1].clone()
        } else {
            Value::Uninit
        }
    }

    pub fn record_str(&self) -> std::borrow::Cow<'_, str> {
        self.record.as_str()
    }

    /// Assign `$i` for i >= 1, growing with empty fields as needed, and
    /// rebuild `$0` from the fields joined with OFS
    pub fn set(&mut self, index: usize, value: Value, ofs: &str, convfmt: &str) {
        debug_assert!(index >= 1);
        while self.fields.len() < index {
            self.fields.push(Value::Uninit);
        }
        self.fields[index - 1] = value;
        self.rejoin(ofs, convfmt);
    }

    /// Assign NF directly: truncate or extend, then rebuild `$0`
    pub fn set_nf(&mut self, nf: usize, ofs: &str, convfmt: &str) {
        if nf < self.fields.len() {
            self.fields.truncate(nf);
        } else {
            while self.fields.len() < nf {
                self.fields.push(Value::Uninit);
            }
        }
        self.rejoin(ofs, convfmt);
    }

    fn rejoin(&mut self, ofs: &str, convfmt: &str) {
        let joined = self
            .fields
            .iter()
            .map(|f| f.to_str(convfmt))
            .collect::<Vec<_>>()
            .join(ofs);
        self.record = Value::Str(joined);
    }
}

impl Default for FieldEngine {
    fn default() -> Self {
        Self::new()
    }
}
