//! # Decoder Registry
//!
//! Named decoding units and the device → unit assignments used to route
//! payloads. Device identifiers (sensor EUIs) are compared case-insensitively
//! by normalizing them to upper case.
//!
//! The registry is read on every decode and written only by administration,
//! so both maps live behind one `RwLock`. Lookups clone an `Arc` out of the
//! map; no lock is held while a unit runs.

use crate::config::ScriptConfig;
use crate::error::{ConfigError, DecodeError};
use crate::layout::{families, Layout};
use crate::unit::{DecodingUnit, LayoutUnit, ScriptUnit, UnitInfo};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Inner {
    units: HashMap<String, Arc<dyn DecodingUnit>>,
    /// device id -> unit name
    assignments: HashMap<String, String>,
}

#[derive(Default)]
pub struct DecoderRegistry {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("DecoderRegistry")
            .field("units", &inner.units.len())
            .field("assignments", &inner.assignments.len())
            .finish()
    }
}

/// Canonical form of a device identifier.
pub fn normalize_device_id(device_id: &str) -> String {
    device_id.trim().to_uppercase()
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in device families.
    pub fn with_builtin_families() -> Result<Self, DecodeError> {
        let registry = Self::new();
        for layout in families::builtin_families() {
            registry.register_unit(Arc::new(LayoutUnit::new(layout.clone())?));
        }
        Ok(registry)
    }

    // A panicking writer cannot leave the maps half-updated, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a unit under its own name, returning the unit it replaced.
    pub fn register_unit(&self, unit: Arc<dyn DecodingUnit>) -> Option<Arc<dyn DecodingUnit>> {
        let name = unit.name().to_string();
        let previous = self.write().units.insert(name.clone(), unit);
        if previous.is_some() {
            info!(target: "mioty::registry", "replaced decoding unit '{}'", name);
        } else {
            debug!(target: "mioty::registry", "registered decoding unit '{}'", name);
        }
        previous
    }

    /// Remove a unit and every assignment that points at it.
    pub fn remove_unit(&self, name: &str) -> Result<Arc<dyn DecodingUnit>, DecodeError> {
        let mut inner = self.write();
        let unit = inner
            .units
            .remove(name)
            .ok_or_else(|| DecodeError::UnknownUnit(name.to_string()))?;
        let before = inner.assignments.len();
        inner.assignments.retain(|_, assigned| assigned != name);
        let dropped = before - inner.assignments.len();
        info!(
            target: "mioty::registry",
            "removed decoding unit '{}' ({} assignments dropped)", name, dropped
        );
        Ok(unit)
    }

    pub fn assign(&self, device_id: &str, unit_name: &str) -> Result<(), DecodeError> {
        let mut inner = self.write();
        if !inner.units.contains_key(unit_name) {
            return Err(DecodeError::UnknownUnit(unit_name.to_string()));
        }
        let device = normalize_device_id(device_id);
        debug!(target: "mioty::registry", "assigned {} -> '{}'", device, unit_name);
        inner.assignments.insert(device, unit_name.to_string());
        Ok(())
    }

    /// Returns whether the device had an assignment.
    pub fn unassign(&self, device_id: &str) -> bool {
        self.write()
            .assignments
            .remove(&normalize_device_id(device_id))
            .is_some()
    }

    /// Unit assigned to a device, if any.
    pub fn lookup(&self, device_id: &str) -> Option<Arc<dyn DecodingUnit>> {
        let inner = self.read();
        let name = inner.assignments.get(&normalize_device_id(device_id))?;
        inner.units.get(name).cloned()
    }

    pub fn unit(&self, name: &str) -> Option<Arc<dyn DecodingUnit>> {
        self.read().units.get(name).cloned()
    }

    /// Registered units, sorted by name.
    pub fn units(&self) -> Vec<UnitInfo> {
        let mut units: Vec<UnitInfo> = self.read().units.values().map(|u| u.info()).collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        units
    }

    /// `(device id, unit name)` pairs, sorted by device id.
    pub fn assignments(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .read()
            .assignments
            .iter()
            .map(|(device, unit)| (device.clone(), unit.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Register every `*.json` layout and `*.js` script in `dir`, named by file
    /// stem. Files that fail to load are logged and skipped. Returns the number
    /// of units registered.
    pub fn load_units_from_dir(
        &self,
        dir: impl AsRef<Path>,
        script: &ScriptConfig,
    ) -> Result<usize, ConfigError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match load_unit(&path, script) {
                Ok(Some(unit)) => {
                    self.register_unit(unit);
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(target: "mioty::registry", "skipping {}: {}", path.display(), e),
            }
        }
        info!(
            target: "mioty::registry",
            "loaded {} decoding units from {}", loaded, dir.as_ref().display()
        );
        Ok(loaded)
    }
}

fn load_unit(path: &Path, script: &ScriptConfig) -> Result<Option<Arc<dyn DecodingUnit>>, DecodeError> {
    let (Some(stem), Some(extension)) = (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|s| s.to_str()),
    ) else {
        return Ok(None);
    };

    let read = || {
        std::fs::read_to_string(path).map_err(|e| DecodeError::InvalidUnit(format!("{stem}: {e}")))
    };

    let unit: Arc<dyn DecodingUnit> = match extension {
        "json" => {
            let mut layout = Layout::from_json(&read()?)?;
            layout.name = stem.to_string();
            Arc::new(LayoutUnit::new(layout)?)
        }
        "js" => Arc::new(ScriptUnit::new(stem, read()?, script.clone())?),
        _ => return Ok(None),
    };
    Ok(Some(unit))
}
