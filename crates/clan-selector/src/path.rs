//! Attribute paths.
//!
//! A [`Path`] is an owned, immutable sequence of [`Segment`]s. It is the
//! addressing unit shared by the evaluation cache and the patch engine, so
//! keys containing literal dots never get confused with nesting.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step in a path: an attribute name or a list index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// Build a key segment.
    pub fn key(name: impl Into<String>) -> Self {
        Segment::Key(name.into())
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            Segment::Index(_) => None,
        }
    }

    /// Interpret the segment as a list index.
    ///
    /// Keys consisting only of ASCII digits are accepted as well, since the
    /// evaluation backend reports list positions as strings.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(k) if is_digits(k) => k.parse().ok(),
            Segment::Key(_) => None,
        }
    }

    /// The attribute-name form of this segment (`Index(3)` becomes `"3"`).
    pub fn to_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }

    /// Render the segment so that the selector parser reads it back as the
    /// same literal.
    fn write_quoted(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(i) => write!(f, "{}", i),
            Segment::Key(k) if needs_quoting(k) => {
                f.write_str("\"")?;
                for c in k.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"")
            }
            Segment::Key(k) => f.write_str(k),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Key(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Key(s)
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i)
    }
}

pub(crate) fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn needs_quoting(key: &str) -> bool {
    key.is_empty()
        || is_digits(key)
        || key
            .chars()
            .any(|c| matches!(c, '.' | '*' | '?' | ',' | '{' | '}' | '"' | '\\'))
}

/// An owned attribute path.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<Segment>);

impl Path {
    /// The empty path (the root of a tree).
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        Path(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// A new path with `segment` appended.
    pub fn child(&self, segment: impl Into<Segment>) -> Path {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend(self.0.iter().cloned());
        segments.push(segment.into());
        Path(segments)
    }

    /// The path without its last segment, or `None` at the root.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            return None;
        }
        Some(Path(self.0[..self.0.len() - 1].to_vec()))
    }

    /// True if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Iterate over this path and all its ancestors, longest first, ending
    /// with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> + '_ {
        (0..=self.0.len()).rev().map(move |n| Path(self.0[..n].to_vec()))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            segment.write_quoted(f)?;
        }
        Ok(())
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl<'a> From<&[&'a str]> for Path {
    fn from(keys: &[&'a str]) -> Self {
        keys.iter().map(|k| Segment::key(*k)).collect()
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for Path {
    fn from(keys: [&'a str; N]) -> Self {
        keys.iter().map(|k| Segment::key(*k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_and_parent() {
        let path = Path::from(["machines", "foo"]);
        let child = path.child("deploy");
        assert_eq!(child.len(), 3);
        assert_eq!(child.parent(), Some(path.clone()));
        assert_eq!(Path::root().parent(), None);
    }

    #[test]
    fn test_starts_with() {
        let path = Path::from(["a", "b", "c"]);
        assert!(path.starts_with(&Path::from(["a", "b"])));
        assert!(path.starts_with(&path));
        assert!(path.starts_with(&Path::root()));
        assert!(!path.starts_with(&Path::from(["a", "c"])));
        assert!(!Path::from(["a"]).starts_with(&path));
    }

    #[test]
    fn test_ancestors_longest_first() {
        let path = Path::from(["a", "b"]);
        let ancestors: Vec<Path> = path.ancestors().collect();
        assert_eq!(
            ancestors,
            vec![Path::from(["a", "b"]), Path::from(["a"]), Path::root()]
        );
    }

    #[test]
    fn test_display_quotes_special_keys() {
        let path = Path::new(vec![
            Segment::key("x"),
            Segment::key("a.b"),
            Segment::key(""),
            Segment::key("12"),
            Segment::Index(3),
            Segment::key("say \"hi\""),
        ]);
        assert_eq!(path.to_string(), r##"x."a.b".""."12".3."say \"hi\"""##);
    }

    #[test]
    fn test_serde_as_array() {
        let path = Path::new(vec![Segment::key("machines"), Segment::Index(0)]);
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!(["machines", 0]));

        let back: Path = serde_json::from_value(json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_digit_key_as_index() {
        assert_eq!(Segment::key("7").as_index(), Some(7));
        assert_eq!(Segment::key("x7").as_index(), None);
        assert_eq!(Segment::Index(2).to_key(), "2");
    }
}
