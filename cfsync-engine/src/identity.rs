//! Composite identities for relational resources.
//!
//! A relational resource (a domain shared with an org) has no remote-assigned
//! identifier of its own, so its durable identity is built from the ordered
//! identifiers it relates. Parts are joined with `/`; a literal `/` or `\`
//! inside a part is escaped with `\`, which keeps decoding unambiguous.

use crate::error::{EngineError, Result};

const SEPARATOR: char = '/';
const ESCAPE: char = '\\';

/// Join parts into a single identity string.
pub fn encode<S: AsRef<str>>(parts: &[S]) -> String {
    let mut id = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            id.push(SEPARATOR);
        }
        for c in part.as_ref().chars() {
            if c == SEPARATOR || c == ESCAPE {
                id.push(ESCAPE);
            }
            id.push(c);
        }
    }
    id
}

/// Split an identity produced by [`encode`] back into `expected` parts.
pub fn decode(id: &str, expected: usize) -> Result<Vec<String>> {
    let malformed = |reason: String| EngineError::MalformedIdentity {
        id: id.to_string(),
        reason,
    };

    let mut parts = Vec::with_capacity(expected);
    let mut current = String::new();
    let mut chars = id.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some(next @ (SEPARATOR | ESCAPE)) => current.push(next),
                Some(other) => return Err(malformed(format!("invalid escape \\{}", other))),
                None => return Err(malformed("dangling escape".to_string())),
            },
            SEPARATOR => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    if parts.len() != expected {
        return Err(malformed(format!(
            "expected {} parts, found {}",
            expected,
            parts.len()
        )));
    }
    Ok(parts)
}
