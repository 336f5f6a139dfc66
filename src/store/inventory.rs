//! Inventory reads and validated writes

use clan_selector::Path;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::sanitize::{sanitize, DEFAULT_UNWRAP_PATHS};
use super::{OverlayStore, StoreError};
use crate::config::{Settings, DEFAULT_ALL_VALUES_SELECTOR, DEFAULT_PRIORITIES_SELECTOR};
use crate::flake::{Evaluator, Flake};
use crate::persist::{
    apply_plan, calc_patches, compute_attribute_persistence, delete_by_path, merge_objects,
    AttributeMap, PatchPlan, DEFAULT_INVENTORY_FILE,
};

/// Top-level inventory keys read and written through the overlay
pub const DEFAULT_INVENTORY_KEYS: &[&str] = &["machines", "instances", "meta", "tags"];

/// Everything a write is validated against
#[derive(Debug, Clone)]
pub struct WriteInfo {
    pub attributes: AttributeMap,
    pub all_values: Map<String, Value>,
    pub persisted: Map<String, Value>,
}

/// The evaluated inventory of a flake together with its overlay.
#[derive(Debug)]
pub struct InventoryStore<E, S> {
    flake: Flake<E>,
    store: S,
    inventory_file: String,
    priorities_selector: String,
    all_values_selector: String,
    keys: Vec<String>,
    unwrap_paths: Vec<String>,
}

impl<E: Evaluator, S: OverlayStore> InventoryStore<E, S> {
    pub fn new(flake: Flake<E>, store: S) -> Self {
        Self {
            flake,
            store,
            inventory_file: DEFAULT_INVENTORY_FILE.to_string(),
            priorities_selector: DEFAULT_PRIORITIES_SELECTOR.to_string(),
            all_values_selector: DEFAULT_ALL_VALUES_SELECTOR.to_string(),
            keys: DEFAULT_INVENTORY_KEYS.iter().map(|k| k.to_string()).collect(),
            unwrap_paths: DEFAULT_UNWRAP_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Take file name and selectors from `settings`.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.inventory_file = settings.inventory_file.clone();
        self.priorities_selector = settings.selectors.priorities.clone();
        self.all_values_selector = settings.selectors.all_values.clone();
        self
    }

    /// Restrict reads to these top-level keys; empty means all of them.
    pub fn with_keys<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Paths where deferred module wrappers are unwrapped on read.
    pub fn with_unwrap_paths<P: Into<String>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.unwrap_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn flake(&self) -> &Flake<E> {
        &self.flake
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn inventory_file(&self) -> &str {
        &self.inventory_file
    }

    /// Selector for the evaluated values, narrowed to the configured keys.
    fn values_selector(&self) -> String {
        if self.keys.is_empty() {
            return self.all_values_selector.clone();
        }
        let members: Vec<String> = self
            .keys
            .iter()
            .map(|k| format!("?{}", Path::from([k.as_str()])))
            .collect();
        format!("{}.{{{}}}", self.all_values_selector, members.join(","))
    }

    fn select_object(&mut self, selector: &str) -> Result<Map<String, Value>, StoreError> {
        match self.flake.select(selector)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject(format!("selector '{}'", selector))),
        }
    }

    /// The evaluated inventory: declarative values merged with the overlay.
    pub fn read(&mut self) -> Result<Map<String, Value>, StoreError> {
        let selector = self.values_selector();
        let raw = self.select_object(&selector)?;
        sanitize(&raw, &self.unwrap_paths)
    }

    /// Current overlay contents.
    pub fn persisted(&self) -> Result<Map<String, Value>, StoreError> {
        self.store.read()
    }

    /// Evaluated values, overlay and the attribute map derived from them.
    pub fn write_info(&mut self) -> Result<WriteInfo, StoreError> {
        let values_selector = self.values_selector();
        self.flake
            .precache(&[self.priorities_selector.clone(), values_selector])?;

        let priority_selector = self.priorities_selector.clone();
        let priorities = self.select_object(&priority_selector)?;
        let all_values = self.read()?;
        let persisted = self.persisted()?;

        let attributes = compute_attribute_persistence(
            &priorities,
            &all_values,
            &persisted,
            &self.inventory_file,
        )?;

        Ok(WriteInfo {
            attributes,
            all_values,
            persisted,
        })
    }

    pub fn get_writeability(&mut self) -> Result<AttributeMap, StoreError> {
        Ok(self.write_info()?.attributes)
    }

    /// Validate `update` (the complete desired inventory) and return the
    /// changes it implies without writing anything.
    pub fn plan(&mut self, update: &Map<String, Value>) -> Result<PatchPlan, StoreError> {
        let info = self.write_info()?;
        Ok(calc_patches(
            &info.persisted,
            update,
            &info.all_values,
            &info.attributes,
        )?)
    }

    /// `update` merged on top of the current values, for callers that hold
    /// only the parts they change. Lists are concatenated.
    pub fn merged_update(
        &mut self,
        update: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let current = self.read()?;
        Ok(merge_objects(&current, update, true)?)
    }

    /// Validate `update` and persist the resulting changes. Nothing is written
    /// when the update changes nothing.
    pub fn write(
        &mut self,
        update: &Map<String, Value>,
        message: &str,
    ) -> Result<PatchPlan, StoreError> {
        let info = self.write_info()?;
        let plan = calc_patches(&info.persisted, update, &info.all_values, &info.attributes)?;
        if plan.is_empty() {
            debug!(file = %self.inventory_file, "no changes, skipping write");
            return Ok(plan);
        }

        let mut persisted = info.persisted;
        apply_plan(&mut persisted, &plan)?;
        self.commit(&persisted, message)?;
        info!(
            file = %self.inventory_file,
            patches = plan.patches.len(),
            deletes = plan.deletes.len(),
            "inventory updated"
        );
        Ok(plan)
    }

    /// Remove `paths` from the overlay as is, without consulting the
    /// declarative layer. Returns the paths that were present.
    pub fn delete(&mut self, paths: &[Path], message: &str) -> Result<Vec<Path>, StoreError> {
        let mut persisted = self.persisted()?;
        let mut removed = Vec::new();
        for path in paths {
            if delete_by_path(&mut persisted, path)?.is_some() {
                removed.push(path.clone());
            }
        }
        if removed.is_empty() {
            debug!(file = %self.inventory_file, "nothing to delete");
            return Ok(removed);
        }

        self.commit(&persisted, message)?;
        info!(file = %self.inventory_file, deleted = removed.len(), "inventory keys deleted");
        Ok(removed)
    }

    fn commit(&mut self, content: &Map<String, Value>, message: &str) -> Result<(), StoreError> {
        let message = format!("update({}): {}", self.inventory_file, message);
        self.store.write(content, &message)?;
        self.flake.refresh()?;
        Ok(())
    }
}
