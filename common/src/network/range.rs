//! # Address Range Expressions
//!
//! A range expression is an address template with at most one bracketed
//! `[from:to]` integer span, e.g. `192.168.1.[10:20]`. Expanding it yields one
//! address per integer in the span, in ascending order.
//!
//! Expansion never fails: a pattern whose span cannot be parsed is used
//! verbatim as a single address.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// A parsed address template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeExpression {
    /// No usable span, the pattern is a single address.
    Literal(String),
    /// `prefix` + n + `suffix` for every n in `from..=to`.
    Span {
        prefix: String,
        from: u32,
        to: u32,
        suffix: String,
    },
}

impl RangeExpression {
    pub fn parse(pattern: &str) -> Self {
        match parse_span(pattern) {
            Some((prefix, from, to, suffix)) => RangeExpression::Span {
                prefix: prefix.to_string(),
                from,
                to,
                suffix: suffix.to_string(),
            },
            None => RangeExpression::Literal(pattern.to_string()),
        }
    }

    /// Concrete addresses in order, produced one at a time.
    pub fn addresses(&self) -> Box<dyn Iterator<Item = String> + '_> {
        match self {
            RangeExpression::Literal(addr) => Box::new(std::iter::once(addr.clone())),
            RangeExpression::Span {
                prefix,
                from,
                to,
                suffix,
            } => Box::new((*from..=*to).map(move |n| format!("{prefix}{n}{suffix}"))),
        }
    }

    /// Expands the template into concrete addresses, in order.
    pub fn expand(&self) -> Vec<String> {
        self.addresses().collect()
    }

    pub fn len(&self) -> usize {
        match self {
            RangeExpression::Literal(_) => 1,
            RangeExpression::Span { from, to, .. } => (to - from) as usize + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl FromStr for RangeExpression {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RangeExpression::parse(s))
    }
}

impl fmt::Display for RangeExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeExpression::Literal(addr) => write!(f, "{addr}"),
            RangeExpression::Span {
                prefix,
                from,
                to,
                suffix,
            } => write!(f, "{prefix}[{from}:{to}]{suffix}"),
        }
    }
}

/// Splits `pre[from:to]post` into its parts.
///
/// The span runs from the first `[` to the last `]`, and the bounds are split
/// at the last `:` inside it. Returns `None` for non-integer bounds or a
/// descending span so the caller falls back to the literal pattern.
fn parse_span(pattern: &str) -> Option<(&str, u32, u32, &str)> {
    let open = pattern.find('[')?;
    let close = pattern.rfind(']')?;
    if close <= open {
        return None;
    }

    let inner = &pattern[open + 1..close];
    let (from_str, to_str) = inner.rsplit_once(':')?;

    let from = from_str.trim().parse::<u32>().ok()?;
    let to = to_str.trim().parse::<u32>().ok()?;

    if from > to {
        return None;
    }

    Some((&pattern[..open], from, to, &pattern[close + 1..]))
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
