//! Path pattern parsing and segment representation (spec.md §4.1).
//!
//! Tokens: literal; `{name}` (optionally `{name:pattern}`, one segment);
//! `{+name}` (greedy, must be terminal); `{/name}` (optional — absent
//! segment reuses the parent node's value). Grounded on the teacher's
//! radix-tree segment model (`router/radix.rs`), extended with the three
//! modifier kinds the distilled spec requires.

use regex::Regex;

#[derive(Debug, Clone)]
pub enum Segment {
    Literal(String),
    Param { name: String, pattern: Option<Regex> },
    Greedy { name: String },
    Optional { name: String },
}

impl Segment {
    pub fn name(&self) -> Option<&str> {
        match self {
            Segment::Literal(_) => None,
            Segment::Param { name, .. } | Segment::Greedy { name } | Segment::Optional { name } => {
                Some(name)
            }
        }
    }

    pub fn is_terminal_only(&self) -> bool {
        matches!(self, Segment::Greedy { .. })
    }
}

/// Parse a raw OpenAPI-style path pattern (e.g. `/users/{id}/posts{/rest}`)
/// into an ordered list of segments. Validates the invariant that a `+`
/// segment is terminal.
pub fn parse_pattern(pattern: &str) -> anyhow::Result<Vec<Segment>> {
    let trimmed = pattern.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for (idx, raw) in split_pattern_segments(trimmed).into_iter().enumerate() {
        let seg = parse_segment(&raw)?;
        if let Some(prev) = segments.last() {
            let prev: &Segment = prev;
            if prev.is_terminal_only() {
                anyhow::bail!(
                    "invalid path pattern '{}': segment {} follows a terminal '+' segment",
                    pattern,
                    idx
                );
            }
        }
        segments.push(seg);
    }
    Ok(segments)
}

/// Splits on `/`, but ignores slashes inside `{...}` tokens so a glued
/// optional segment like "test{/rest}" doesn't have its own `/` treated
/// as a path separator.
fn split_pattern_segments(trimmed: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0u32;
    for ch in trimmed.chars() {
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '/' if depth == 0 => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
        .into_iter()
        .flat_map(|part| {
            // `{/rest}` appears glued to the previous literal, e.g. "test{/rest}".
            if let Some(pos) = part.find("{/") {
                if pos > 0 {
                    return vec![part[..pos].to_string(), part[pos..].to_string()];
                }
            }
            vec![part]
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_segment(raw: &str) -> anyhow::Result<Segment> {
    if let Some(inner) = raw.strip_prefix("{+").and_then(|s| s.strip_suffix('}')) {
        return Ok(Segment::Greedy {
            name: inner.to_string(),
        });
    }
    if let Some(inner) = raw.strip_prefix("{/").and_then(|s| s.strip_suffix('}')) {
        return Ok(Segment::Optional {
            name: inner.to_string(),
        });
    }
    if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        return match inner.split_once(':') {
            Some((name, pattern)) => Ok(Segment::Param {
                name: name.to_string(),
                pattern: Some(Regex::new(&format!("^{pattern}$"))?),
            }),
            None => Ok(Segment::Param {
                name: inner.to_string(),
                pattern: None,
            }),
        };
    }
    Ok(Segment::Literal(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_and_param_segments() {
        let segs = parse_pattern("/users/{id}/posts").unwrap();
        assert_eq!(segs.len(), 3);
        assert!(matches!(segs[0], Segment::Literal(ref s) if s == "users"));
        assert!(matches!(segs[1], Segment::Param { ref name, .. } if name == "id"));
        assert!(matches!(segs[2], Segment::Literal(ref s) if s == "posts"));
    }

    #[test]
    fn parses_greedy_segment() {
        let segs = parse_pattern("/test/{+rest}").unwrap();
        assert!(matches!(segs[1], Segment::Greedy { ref name } if name == "rest"));
    }

    #[test]
    fn rejects_segments_after_greedy() {
        assert!(parse_pattern("/test/{+rest}/more").is_err());
    }

    #[test]
    fn parses_optional_segment() {
        let segs = parse_pattern("/test{/rest}").unwrap();
        assert_eq!(segs.len(), 2);
        assert!(matches!(segs[1], Segment::Optional { ref name } if name == "rest"));
    }

    #[test]
    fn parses_constrained_param() {
        let segs = parse_pattern("/users/{id:[0-9]+}").unwrap();
        match &segs[1] {
            Segment::Param { name, pattern } => {
                assert_eq!(name, "id");
                assert!(pattern.as_ref().unwrap().is_match("123"));
                assert!(!pattern.as_ref().unwrap().is_match("abc"));
            }
            _ => panic!("expected param segment"),
        }
    }
}
