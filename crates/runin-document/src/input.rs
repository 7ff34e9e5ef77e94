//! The runtime-input sentinel: `<+input>` plus optional modifiers.
//!
//! Recognised modifiers:
//! - `.default(value)`
//! - `.allowedValues(a,b,c)`
//! - `.regex(expr)`
//! - `.executionInput()`
//!
//! Unknown modifiers are preserved verbatim so a template round-trips.

use std::fmt;

/// The bare sentinel text.
pub const INPUT_SENTINEL: &str = "<+input>";

/// A single `.name(arg)` suffix on the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Default(String),
    AllowedValues(Vec<String>),
    Regex(String),
    ExecutionInput,
    Other { name: String, arg: String },
}

/// A placeholder whose concrete value is deferred to execution time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeInput {
    modifiers: Vec<Modifier>,
}

impl RuntimeInput {
    /// The bare `<+input>` placeholder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Parse `text` as a runtime input. Returns `None` for anything that is not
    /// the sentinel, including the empty string.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix(INPUT_SENTINEL)?;
        let mut modifiers = Vec::new();
        let mut rest = rest;
        while !rest.is_empty() {
            let after_dot = rest.strip_prefix('.')?;
            let open = after_dot.find('(')?;
            let name = &after_dot[..open];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
                return None;
            }
            let close = matching_paren(after_dot, open)?;
            let arg = &after_dot[open + 1..close];
            modifiers.push(Modifier::from_call(name, arg));
            rest = &after_dot[close + 1..];
        }
        Some(Self { modifiers })
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn default_value(&self) -> Option<&str> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::Default(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn allowed_values(&self) -> Option<&[String]> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::AllowedValues(v) => Some(v.as_slice()),
            _ => None,
        })
    }

    pub fn regex(&self) -> Option<&str> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::Regex(r) => Some(r.as_str()),
            _ => None,
        })
    }

    /// Inputs marked `.executionInput()` are supplied while the pipeline runs,
    /// not before it starts.
    pub fn is_execution_input(&self) -> bool {
        self.modifiers
            .iter()
            .any(|m| matches!(m, Modifier::ExecutionInput))
    }

    /// Check a concrete value against `allowedValues` and `regex`.
    ///
    /// A regex that fails to compile accepts every value.
    pub fn accepts(&self, value: &str) -> bool {
        if let Some(allowed) = self.allowed_values() {
            if !allowed.iter().any(|a| a == value) {
                return false;
            }
        }
        if let Some(expr) = self.regex() {
            match regex::Regex::new(expr) {
                Ok(re) => return re.is_match(value),
                Err(e) => {
                    tracing::debug!(regex = %expr, error = %e, "Ignoring unparseable input regex");
                }
            }
        }
        true
    }

    /// Canonical text form, modifiers in their original order.
    pub fn render(&self) -> String {
        let mut out = String::from(INPUT_SENTINEL);
        for m in &self.modifiers {
            match m {
                Modifier::Default(v) => out.push_str(&format!(".default({v})")),
                Modifier::AllowedValues(vs) => {
                    out.push_str(&format!(".allowedValues({})", vs.join(",")))
                }
                Modifier::Regex(r) => out.push_str(&format!(".regex({r})")),
                Modifier::ExecutionInput => out.push_str(".executionInput()"),
                Modifier::Other { name, arg } => out.push_str(&format!(".{name}({arg})")),
            }
        }
        out
    }
}

impl fmt::Display for RuntimeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Modifier {
    fn from_call(name: &str, arg: &str) -> Self {
        match name {
            "default" => Modifier::Default(unquote(arg.trim()).to_string()),
            "allowedValues" => Modifier::AllowedValues(split_top_level(arg)),
            "regex" => Modifier::Regex(arg.to_string()),
            "executionInput" if arg.trim().is_empty() => Modifier::ExecutionInput,
            _ => Modifier::Other {
                name: name.to_string(),
                arg: arg.to_string(),
            },
        }
    }
}

/// Index of the `)` closing the `(` at `open`, honouring nesting.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas outside parentheses and quotes.
fn split_top_level(arg: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in arg.chars() {
        match (c, quote) {
            ('\'' | '"', None) => quote = Some(c),
            (q, Some(open)) if q == open => quote = None,
            ('(', None) => depth += 1,
            (')', None) => depth = depth.saturating_sub(1),
            (',', None) if depth == 0 => {
                parts.push(unquote(current.trim()).to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(unquote(current.trim()).to_string());
    }
    parts
}

fn unquote(s: &str) -> &str {
    for q in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
