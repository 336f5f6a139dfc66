//! Cache entries
//!
//! A [`CacheEntry`] mirrors one node of the evaluated attribute tree as far
//! as it has been fetched. Nodes remember whether all of their children are
//! known (`Coverage::Complete`) so that a later `*` can be answered without
//! asking the backend again.

use std::collections::BTreeMap;

use clan_selector::{Path, Segment, SelectorSegment, OUT_PATH};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::CacheError;

/// Shape of a container node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Attrs,
    List,
}

/// How much of a node's children are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coverage {
    #[default]
    Partial,
    /// Populated by an `All` fetch: a child missing here does not exist.
    Complete,
}

/// A container node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub coverage: Coverage,
    #[serde(with = "children_as_pairs")]
    pub children: BTreeMap<Segment, CacheEntry>,
}

/// One cached node of the attribute tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEntry {
    /// A string, number, bool or null.
    Scalar(Value),
    Node(Node),
    /// Probed through a maybe selector and reported missing.
    Absent,
}

impl Default for CacheEntry {
    fn default() -> Self {
        CacheEntry::Node(Node::default())
    }
}

/// Context shared by a single traversal.
pub(crate) struct Walk<'a> {
    pub store_dir: &'a str,
    pub selector: &'a str,
}

impl Walk<'_> {
    fn is_store_path(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => s
                .strip_prefix(self.store_dir)
                .is_some_and(|rest| rest.starts_with('/')),
            _ => false,
        }
    }

    fn conflict(&self, path: &Path, reason: impl Into<String>) -> CacheError {
        CacheError::Conflict {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    fn not_found(&self, path: Path) -> CacheError {
        CacheError::NotFound {
            path,
            selector: self.selector.to_string(),
        }
    }
}

static ALL: SelectorSegment = SelectorSegment::All;

fn is_out_path(segment: &Segment) -> bool {
    segment.as_key() == Some(OUT_PATH)
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "attrset",
    }
}

impl Node {
    fn is_fresh(&self) -> bool {
        self.children.is_empty() && self.coverage == Coverage::Partial
    }

    /// Normalise a segment to the key form used by this node's children.
    fn child_segment(&self, segment: &Segment) -> Option<Segment> {
        match self.kind {
            NodeKind::List => segment.as_index().map(Segment::Index),
            NodeKind::Attrs => Some(Segment::Key(segment.to_key())),
        }
    }

    fn child(&self, segment: &Segment) -> Option<&CacheEntry> {
        self.child_segment(segment)
            .and_then(|key| self.children.get(&key))
    }

    /// Child that is present and not marked absent.
    fn present_child(&self, segment: &Segment) -> Option<(Segment, &CacheEntry)> {
        let key = self.child_segment(segment)?;
        match self.children.get(&key) {
            Some(CacheEntry::Absent) | None => None,
            Some(entry) => Some((key, entry)),
        }
    }

    fn is_complete(&self) -> bool {
        self.coverage == Coverage::Complete
    }

    /// Adopt `kind` if the node has no data yet.
    fn settle_kind(&mut self, kind: NodeKind, path: &Path, walk: &Walk<'_>) -> Result<(), CacheError> {
        if self.kind == kind {
            return Ok(());
        }
        if self.is_fresh() {
            self.kind = kind;
            return Ok(());
        }
        let (have, got) = match kind {
            NodeKind::List => ("attrset", "list"),
            NodeKind::Attrs => ("list", "attrset"),
        };
        Err(walk.conflict(path, format!("cannot insert {} over cached {}", got, have)))
    }

    fn child_mut(
        &mut self,
        segment: &Segment,
        path: &Path,
        walk: &Walk<'_>,
    ) -> Result<(Segment, &mut CacheEntry), CacheError> {
        if self.is_fresh() {
            self.kind = match segment {
                Segment::Index(_) => NodeKind::List,
                Segment::Key(_) => NodeKind::Attrs,
            };
        }
        let key = self.child_segment(segment).ok_or_else(|| {
            walk.conflict(path, format!("'{}' is not a list index", segment))
        })?;
        let entry = self.children.entry(key.clone()).or_default();
        if matches!(entry, CacheEntry::Absent) {
            *entry = CacheEntry::default();
        }
        Ok((key, entry))
    }

    /// Record a maybe-probed key as missing.
    fn mark_absent(&mut self, segment: &Segment, path: &Path, walk: &Walk<'_>) -> Result<(), CacheError> {
        if self.is_complete() {
            return Ok(());
        }
        let Some(key) = self.child_segment(segment) else {
            return Ok(());
        };
        match self.children.get(&key) {
            None | Some(CacheEntry::Absent) => {
                self.children.insert(key, CacheEntry::Absent);
                Ok(())
            }
            Some(_) => Err(walk.conflict(
                &path.child(key),
                "backend reports a previously cached attribute as missing",
            )),
        }
    }

    fn to_value(&self, walk: &Walk<'_>, path: &Path) -> Result<Value, CacheError> {
        let present = self
            .children
            .iter()
            .filter(|(_, entry)| !matches!(entry, CacheEntry::Absent));
        match self.kind {
            NodeKind::List => present
                .map(|(key, entry)| entry.select_at(&[], &path.child(key.clone()), walk))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            NodeKind::Attrs => present
                .map(|(key, entry)| {
                    entry
                        .select_at(&[], &path.child(key.clone()), walk)
                        .map(|value| (key.to_key(), value))
                })
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object),
        }
    }

    fn collect(
        &self,
        keys: Vec<Segment>,
        rest: &[SelectorSegment],
        path: &Path,
        walk: &Walk<'_>,
    ) -> Result<Value, CacheError> {
        let mut list = Vec::new();
        let mut attrs = Map::new();
        for key in keys {
            let child_path = path.child(key.clone());
            let entry = self
                .children
                .get(&key)
                .ok_or_else(|| walk.not_found(child_path.clone()))?;
            let value = entry.select_at(rest, &child_path, walk)?;
            match self.kind {
                NodeKind::List => list.push(value),
                NodeKind::Attrs => {
                    attrs.insert(key.to_key(), value);
                }
            }
        }
        Ok(match self.kind {
            NodeKind::List => Value::Array(list),
            NodeKind::Attrs => Value::Object(attrs),
        })
    }
}

impl CacheEntry {
    /// View this entry as a container, converting a cached store path into
    /// an attrset holding it under `outPath`.
    fn as_node_mut(&mut self, path: &Path, walk: &Walk<'_>) -> Result<&mut Node, CacheError> {
        match self {
            CacheEntry::Absent => *self = CacheEntry::default(),
            CacheEntry::Scalar(value) if walk.is_store_path(value) => {
                let mut node = Node::default();
                node.children
                    .insert(Segment::key(OUT_PATH), CacheEntry::Scalar(value.clone()));
                *self = CacheEntry::Node(node);
            }
            CacheEntry::Scalar(value) => {
                return Err(walk.conflict(
                    path,
                    format!("cannot descend into cached {}", describe(value)),
                ))
            }
            CacheEntry::Node(_) => {}
        }
        match self {
            CacheEntry::Node(node) => Ok(node),
            _ => Err(walk.conflict(path, "cached entry is not a container")),
        }
    }

    fn insert_scalar(&mut self, value: Value, path: &Path, walk: &Walk<'_>) -> Result<(), CacheError> {
        match self {
            CacheEntry::Scalar(existing) if *existing == value => Ok(()),
            CacheEntry::Scalar(existing) => Err(walk.conflict(
                path,
                format!("cannot insert {} over cached {}", value, existing),
            )),
            CacheEntry::Absent => {
                *self = CacheEntry::Scalar(value);
                Ok(())
            }
            CacheEntry::Node(node) if node.is_fresh() => {
                *self = CacheEntry::Scalar(value);
                Ok(())
            }
            // A derivation fetched whole after some of its attributes.
            CacheEntry::Node(node) if node.kind == NodeKind::Attrs && walk.is_store_path(&value) => {
                let out_path = path.child(OUT_PATH);
                node.children
                    .entry(Segment::key(OUT_PATH))
                    .or_default()
                    .insert_scalar(value, &out_path, walk)
            }
            CacheEntry::Node(_) => Err(walk.conflict(
                path,
                format!("cannot insert {} over a cached container", describe(&value)),
            )),
        }
    }

    pub(crate) fn insert_at(
        &mut self,
        value: Value,
        selectors: &[SelectorSegment],
        path: &Path,
        walk: &Walk<'_>,
    ) -> Result<(), CacheError> {
        let (selector, rest) = match selectors.split_first() {
            Some((selector, rest)) => (selector, rest),
            None => (&ALL, selectors),
        };

        match selector {
            SelectorSegment::Literal(segment) => {
                let node = self.as_node_mut(path, walk)?;
                let (key, child) = node.child_mut(segment, path, walk)?;
                child.insert_at(value, rest, &path.child(key), walk)
            }
            SelectorSegment::Maybe(segment) => {
                let Value::Object(mut fetched) = value else {
                    return Err(walk.conflict(
                        path,
                        format!("expected an attrset for '?{}', got {}", segment, describe(&value)),
                    ));
                };
                let node = self.as_node_mut(path, walk)?;
                match fetched.remove(&segment.to_key()) {
                    Some(child_value) => {
                        let (key, child) = node.child_mut(segment, path, walk)?;
                        child.insert_at(child_value, rest, &path.child(key), walk)
                    }
                    None => node.mark_absent(segment, path, walk),
                }
            }
            SelectorSegment::All | SelectorSegment::Set(_) => {
                let is_all = matches!(selector, SelectorSegment::All);
                match value {
                    Value::Object(fetched) => {
                        let node = self.as_node_mut(path, walk)?;
                        node.settle_kind(NodeKind::Attrs, path, walk)?;
                        if let SelectorSegment::Set(members) = selector {
                            for member in members.iter().filter(|m| m.is_maybe()) {
                                if !fetched.contains_key(&member.segment().to_key()) {
                                    node.mark_absent(member.segment(), path, walk)?;
                                }
                            }
                        }
                        for (key, child_value) in fetched {
                            let key = Segment::Key(key);
                            let child_path = path.child(key.clone());
                            let child = node.children.entry(key).or_default();
                            if matches!(child, CacheEntry::Absent) {
                                *child = CacheEntry::default();
                            }
                            child.insert_at(child_value, rest, &child_path, walk)?;
                        }
                        if is_all {
                            node.coverage = Coverage::Complete;
                        }
                        Ok(())
                    }
                    Value::Array(items) => {
                        let node = self.as_node_mut(path, walk)?;
                        node.settle_kind(NodeKind::List, path, walk)?;
                        let indices: Vec<usize> = match selector {
                            SelectorSegment::Set(members) => members
                                .iter()
                                .map(|m| {
                                    m.segment().as_index().ok_or_else(|| {
                                        walk.conflict(
                                            path,
                                            format!("'{}' is not a list index", m.segment()),
                                        )
                                    })
                                })
                                .collect::<Result<_, _>>()?,
                            _ => (0..items.len()).collect(),
                        };
                        if indices.len() != items.len() {
                            return Err(walk.conflict(
                                path,
                                format!(
                                    "requested {} list elements, backend returned {}",
                                    indices.len(),
                                    items.len()
                                ),
                            ));
                        }
                        for (index, item) in indices.into_iter().zip(items) {
                            let child_path = path.child(index);
                            node.children
                                .entry(Segment::Index(index))
                                .or_default()
                                .insert_at(item, rest, &child_path, walk)?;
                        }
                        if is_all {
                            node.coverage = Coverage::Complete;
                        }
                        Ok(())
                    }
                    scalar if selectors.is_empty() => self.insert_scalar(scalar, path, walk),
                    scalar => Err(walk.conflict(
                        path,
                        format!("expected a container for '{}', got {}", selector, describe(&scalar)),
                    )),
                }
            }
        }
    }

    pub(crate) fn is_cached_at(&self, selectors: &[SelectorSegment]) -> bool {
        let node = match self {
            // Any further selector fails in select; refetching won't help.
            CacheEntry::Scalar(_) | CacheEntry::Absent => return true,
            CacheEntry::Node(node) => node,
        };

        let (selector, rest) = match selectors.split_first() {
            Some((selector, rest)) => (selector, rest),
            None => {
                if node.kind == NodeKind::Attrs
                    && matches!(node.children.get(&Segment::key(OUT_PATH)), Some(CacheEntry::Scalar(_)))
                {
                    return true;
                }
                (&ALL, selectors)
            }
        };

        match selector {
            SelectorSegment::All => {
                node.is_complete() && node.children.values().all(|child| child.is_cached_at(rest))
            }
            SelectorSegment::Set(members) => members.iter().all(|member| {
                match node.child(member.segment()) {
                    None => node.is_complete(),
                    Some(CacheEntry::Absent) => true,
                    Some(child) => child.is_cached_at(rest),
                }
            }),
            SelectorSegment::Literal(segment) | SelectorSegment::Maybe(segment) => {
                match node.child(segment) {
                    None => node.is_complete(),
                    Some(child) => child.is_cached_at(rest),
                }
            }
        }
    }

    pub(crate) fn select_at(
        &self,
        selectors: &[SelectorSegment],
        path: &Path,
        walk: &Walk<'_>,
    ) -> Result<Value, CacheError> {
        let node = match self {
            CacheEntry::Absent => return Err(walk.not_found(path.clone())),
            CacheEntry::Scalar(value) => {
                return match selectors.split_first() {
                    None => Ok(value.clone()),
                    Some((SelectorSegment::Literal(segment), rest))
                        if is_out_path(segment) && walk.is_store_path(value) =>
                    {
                        self.select_at(rest, &path.child(segment.clone()), walk)
                    }
                    Some((SelectorSegment::Literal(segment), _))
                    | Some((SelectorSegment::Maybe(segment), _)) => {
                        Err(walk.not_found(path.child(segment.clone())))
                    }
                    Some(_) => Err(walk.not_found(path.clone())),
                };
            }
            CacheEntry::Node(node) => node,
        };

        let Some((selector, rest)) = selectors.split_first() else {
            if node.kind == NodeKind::Attrs {
                if let Some((key, out_path)) = node.present_child(&Segment::key(OUT_PATH)) {
                    return out_path.select_at(&[], &path.child(key), walk);
                }
            }
            return node.to_value(walk, path);
        };

        match selector {
            SelectorSegment::Literal(segment) => match node.present_child(segment) {
                Some((key, child)) => child.select_at(rest, &path.child(key), walk),
                None => Err(walk.not_found(path.child(segment.clone()))),
            },
            SelectorSegment::Maybe(segment) => {
                let mut result = Map::new();
                if let Some((key, child)) = node.present_child(segment) {
                    result.insert(segment.to_key(), child.select_at(rest, &path.child(key), walk)?);
                }
                Ok(Value::Object(result))
            }
            SelectorSegment::All => {
                let keys = node
                    .children
                    .iter()
                    .filter(|(_, entry)| !matches!(entry, CacheEntry::Absent))
                    .map(|(key, _)| key.clone())
                    .collect();
                node.collect(keys, rest, path, walk)
            }
            SelectorSegment::Set(members) => {
                let mut keys = Vec::with_capacity(members.len());
                for member in members {
                    match node.present_child(member.segment()) {
                        Some((key, _)) => keys.push(key),
                        None if member.is_maybe() => {}
                        None => return Err(walk.not_found(path.child(member.segment().clone()))),
                    }
                }
                node.collect(keys, rest, path, walk)
            }
        }
    }
}

/// Children serialize as `[segment, entry]` pairs so list indices survive a
/// round trip through JSON object keys.
mod children_as_pairs {
    use std::collections::BTreeMap;

    use clan_selector::Segment;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::CacheEntry;

    pub fn serialize<S: Serializer>(
        children: &BTreeMap<Segment, CacheEntry>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(children.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Segment, CacheEntry>, D::Error> {
        let pairs: Vec<(Segment, CacheEntry)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
