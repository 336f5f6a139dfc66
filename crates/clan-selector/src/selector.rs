//! Parsed selector types.

use std::fmt;

use serde_json::{json, Value};

use crate::path::{Path, Segment};

/// Reserved attribute that names the realised store path of a derivation.
pub const OUT_PATH: &str = "outPath";

/// A member of a `{...}` set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SetMember {
    /// Must be present.
    Literal(Segment),
    /// Omitted from the result when absent.
    Maybe(Segment),
}

impl SetMember {
    pub fn segment(&self) -> &Segment {
        match self {
            SetMember::Literal(s) | SetMember::Maybe(s) => s,
        }
    }

    pub fn is_maybe(&self) -> bool {
        matches!(self, SetMember::Maybe(_))
    }
}

/// One level of a selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectorSegment {
    /// Exactly this key or index; an error if absent.
    Literal(Segment),
    /// This key if present, otherwise an empty result.
    Maybe(Segment),
    /// Every key or index of the current node.
    All,
    /// Exactly the listed keys or indices.
    Set(Vec<SetMember>),
}

impl SelectorSegment {
    /// Wire representation understood by the evaluation backend.
    ///
    /// Segment values are always sent as strings.
    pub fn to_wire(&self) -> Value {
        match self {
            SelectorSegment::Literal(s) => json!({"type": "str", "value": s.to_key()}),
            SelectorSegment::Maybe(s) => json!({"type": "maybe", "value": s.to_key()}),
            SelectorSegment::All => json!({"type": "all"}),
            SelectorSegment::Set(members) => {
                let members: Vec<Value> = members
                    .iter()
                    .map(|m| {
                        let kind = if m.is_maybe() { "maybe" } else { "str" };
                        json!({"type": kind, "value": m.segment().to_key()})
                    })
                    .collect();
                json!({"type": "set", "value": members})
            }
        }
    }
}

/// A parsed selector: an ordered list of [`SelectorSegment`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Selector(Vec<SelectorSegment>);

impl Selector {
    pub fn new(segments: Vec<SelectorSegment>) -> Self {
        Selector(segments)
    }

    pub fn segments(&self) -> &[SelectorSegment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The path this selector names, if every segment is a literal.
    pub fn to_path(&self) -> Option<Path> {
        self.0
            .iter()
            .map(|segment| match segment {
                SelectorSegment::Literal(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wire representation: a JSON list with one object per segment.
    pub fn to_wire(&self) -> Value {
        Value::Array(self.0.iter().map(SelectorSegment::to_wire).collect())
    }

    /// Wire representation as a compact JSON string.
    pub fn to_wire_json(&self) -> String {
        self.to_wire().to_string()
    }
}

impl fmt::Display for SelectorSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorSegment::Literal(s) => write!(f, "{}", Path::new(vec![s.clone()])),
            SelectorSegment::Maybe(s) => write!(f, "?{}", Path::new(vec![s.clone()])),
            SelectorSegment::All => f.write_str("*"),
            SelectorSegment::Set(members) => {
                f.write_str("{")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if member.is_maybe() {
                        f.write_str("?")?;
                    }
                    write!(f, "{}", Path::new(vec![member.segment().clone()]))?;
                }
                f.write_str("}")
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_selector;

    #[test]
    fn test_wire_format() {
        let selector = parse_selector("x.?zzz.{y,?z}.*").unwrap();
        assert_eq!(
            selector.to_wire(),
            json!([
                {"type": "str", "value": "x"},
                {"type": "maybe", "value": "zzz"},
                {"type": "set", "value": [
                    {"type": "str", "value": "y"},
                    {"type": "maybe", "value": "z"},
                ]},
                {"type": "all"},
            ])
        );
    }

    #[test]
    fn test_wire_indices_are_strings() {
        let selector = parse_selector("x.{0,1}").unwrap();
        assert_eq!(
            selector.to_wire()[1]["value"],
            json!([{"type": "str", "value": "0"}, {"type": "str", "value": "1"}])
        );
    }

    #[test]
    fn test_display_reparses() {
        for input in ["a.b.c", "x.*.z", "x.?y.{a,?b}", r#"x."a.b".1"#, "x.{0,2}"] {
            let selector = parse_selector(input).unwrap();
            let rendered = selector.to_string();
            assert_eq!(parse_selector(&rendered).unwrap(), selector, "{}", rendered);
        }
    }

    #[test]
    fn test_to_path() {
        let selector = parse_selector(r#"machines."a.b".0"#).unwrap();
        assert_eq!(
            selector.to_path(),
            Some(Path::new(vec![
                Segment::key("machines"),
                Segment::key("a.b"),
                Segment::Index(0),
            ]))
        );
        assert_eq!(parse_selector("machines.*").unwrap().to_path(), None);
        assert_eq!(parse_selector("a.?b").unwrap().to_path(), None);
    }
}
