//! Selector grammar for partial flake evaluation.
//!
//! A selector names which part of a nested attribute tree to fetch:
//! `machines.*.deploy.?targetHost`, `inventory.{meta,machines}`, `x."a.b".0`.
//! Parsing is confined to this crate; everything downstream works with
//! typed [`Selector`] and [`Path`] values.

mod parser;
mod path;
mod selector;

pub use parser::{parse_selector, SelectorError};
pub use path::{Path, Segment};
pub use selector::{Selector, SelectorSegment, SetMember, OUT_PATH};
