//! Evaluation backend boundary
//!
//! The real backend (a Nix evaluation) lives outside this crate. Anything
//! that can answer a batch of selectors with one JSON value each can stand
//! in for it.

use clan_selector::{Path, Segment, Selector, SelectorSegment, OUT_PATH};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Evaluation backend errors
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("attribute '{path}' missing (selector '{selector}')")]
    MissingAttribute { path: Path, selector: String },

    #[error("cannot select '{segment}' from {found} at '{path}'")]
    NotAContainer {
        path: Path,
        segment: String,
        found: &'static str,
    },

    #[error("evaluation failed: {0}")]
    Backend(String),
}

/// Answers selectors against an evaluated attribute tree.
pub trait Evaluator {
    /// Evaluate every selector; the result holds one value per selector, in
    /// the same order.
    fn evaluate(&self, selectors: &[Selector]) -> Result<Vec<Value>, EvalError>;

    /// Identifier of the evaluated content; changes whenever results may.
    /// `None` means the backend cannot tell, so nothing is cached on disk.
    fn revision(&self) -> Result<Option<String>, EvalError> {
        Ok(None)
    }
}

impl<E: Evaluator + ?Sized> Evaluator for &E {
    fn evaluate(&self, selectors: &[Selector]) -> Result<Vec<Value>, EvalError> {
        (**self).evaluate(selectors)
    }

    fn revision(&self) -> Result<Option<String>, EvalError> {
        (**self).revision()
    }
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn evaluate(&self, selectors: &[Selector]) -> Result<Vec<Value>, EvalError> {
        (**self).evaluate(selectors)
    }

    fn revision(&self) -> Result<Option<String>, EvalError> {
        (**self).revision()
    }
}

/// Evaluator backed by a JSON document.
///
/// Shapes results the way the real backend does: `?x` yields `{x: ..}` or
/// `{}`, sets yield attrsets (or lists when applied to a list) and
/// attrsets carrying an `outPath` render as that path.
#[derive(Debug, Clone, Default)]
pub struct JsonEvaluator {
    document: Value,
    store_dir: String,
}

impl JsonEvaluator {
    pub fn new(document: Value) -> Self {
        Self::with_store_dir(document, crate::cache::DEFAULT_STORE_DIR)
    }

    pub fn with_store_dir(document: Value, store_dir: impl Into<String>) -> Self {
        Self {
            document,
            store_dir: store_dir.into(),
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    fn is_store_path(&self, value: &Value) -> bool {
        value
            .as_str()
            .and_then(|s| s.strip_prefix(self.store_dir.trim_end_matches('/')))
            .is_some_and(|rest| rest.starts_with('/'))
    }

    fn apply(
        &self,
        value: &Value,
        selectors: &[SelectorSegment],
        path: &Path,
        rendered: &str,
    ) -> Result<Value, EvalError> {
        let Some((selector, rest)) = selectors.split_first() else {
            return Ok(render(value));
        };

        let missing = |segment: &Segment| EvalError::MissingAttribute {
            path: path.child(segment.clone()),
            selector: rendered.to_string(),
        };

        match (selector, value) {
            (SelectorSegment::Literal(segment), Value::String(_))
                if segment.as_key() == Some(OUT_PATH) && self.is_store_path(value) =>
            {
                self.apply(value, rest, &path.child(segment.clone()), rendered)
            }
            (SelectorSegment::Literal(segment), _) => {
                let child = lookup(value, segment, path)?.ok_or_else(|| missing(segment))?;
                self.apply(child, rest, &path.child(segment.clone()), rendered)
            }
            (SelectorSegment::Maybe(segment), _) => {
                let mut result = Map::new();
                if let Some(child) = lookup(value, segment, path)? {
                    let child = self.apply(child, rest, &path.child(segment.clone()), rendered)?;
                    result.insert(segment.to_key(), child);
                }
                Ok(Value::Object(result))
            }
            (SelectorSegment::All, Value::Object(map)) => map
                .iter()
                .map(|(key, child)| {
                    self.apply(child, rest, &path.child(key.as_str()), rendered)
                        .map(|v| (key.clone(), v))
                })
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object),
            (SelectorSegment::All, Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, child)| self.apply(child, rest, &path.child(i), rendered))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (SelectorSegment::Set(members), Value::Array(_)) => {
                let mut result = Vec::new();
                for member in members {
                    match lookup(value, member.segment(), path)? {
                        Some(child) => result.push(self.apply(
                            child,
                            rest,
                            &path.child(member.segment().clone()),
                            rendered,
                        )?),
                        None if member.is_maybe() => {}
                        None => return Err(missing(member.segment())),
                    }
                }
                Ok(Value::Array(result))
            }
            (SelectorSegment::Set(members), _) => {
                let mut result = Map::new();
                for member in members {
                    match lookup(value, member.segment(), path)? {
                        Some(child) => {
                            let child = self.apply(
                                child,
                                rest,
                                &path.child(member.segment().clone()),
                                rendered,
                            )?;
                            result.insert(member.segment().to_key(), child);
                        }
                        None if member.is_maybe() => {}
                        None => return Err(missing(member.segment())),
                    }
                }
                Ok(Value::Object(result))
            }
            (SelectorSegment::All, other) => Err(EvalError::NotAContainer {
                path: path.clone(),
                segment: "*".to_string(),
                found: kind_of(other),
            }),
        }
    }
}

impl Evaluator for JsonEvaluator {
    fn evaluate(&self, selectors: &[Selector]) -> Result<Vec<Value>, EvalError> {
        selectors
            .iter()
            .map(|selector| {
                self.apply(
                    &self.document,
                    selector.segments(),
                    &Path::root(),
                    &selector.to_string(),
                )
            })
            .collect()
    }

    /// SHA-256 of the serialized document.
    fn revision(&self) -> Result<Option<String>, EvalError> {
        let bytes =
            serde_json::to_vec(&self.document).map_err(|e| EvalError::Backend(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Some(hex::encode(hasher.finalize())))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an attrset",
    }
}

fn lookup<'v>(value: &'v Value, segment: &Segment, path: &Path) -> Result<Option<&'v Value>, EvalError> {
    match value {
        Value::Object(map) => Ok(map.get(&segment.to_key())),
        Value::Array(items) => Ok(segment.as_index().and_then(|i| items.get(i))),
        other => Err(EvalError::NotAContainer {
            path: path.clone(),
            segment: segment.to_string(),
            found: kind_of(other),
        }),
    }
}

/// Attrsets with an `outPath` serialize as that path.
fn render(value: &Value) -> Value {
    match value {
        Value::Object(map) => match map.get(OUT_PATH) {
            Some(out_path @ Value::String(_)) => out_path.clone(),
            _ => Value::Object(map.iter().map(|(k, v)| (k.clone(), render(v))).collect()),
        },
        Value::Array(items) => Value::Array(items.iter().map(render).collect()),
        other => other.clone(),
    }
}
