use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::toggle::Toggle;

/// `ToggleStore` provides a Sync cache of feature toggles that allows concurrent access for
/// readers and the sync thread.
pub(crate) struct ToggleStore {
    toggles: RwLock<Toggles>,
}

#[derive(Default)]
struct Toggles {
    by_name: HashMap<String, Arc<Toggle>>,
    version: i64,
}

impl ToggleStore {
    pub fn new() -> Self {
        Self {
            toggles: RwLock::new(Toggles::default()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Toggle>> {
        // The lock is poisoned only if the sync thread panicked while holding it. Treat it as
        // missing rather than crashing the app.
        let toggles = self.toggles.read().ok()?;
        toggles.by_name.get(name).cloned()
    }

    /// Highest version applied so far.
    pub fn version(&self) -> i64 {
        self.toggles.read().map(|t| t.version).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.toggles.read().map(|t| t.by_name.len()).unwrap_or(0)
    }

    /// Apply a payload: replace toggles by name and remove the ones marked deleted.
    ///
    /// The version never moves backwards.
    pub fn apply(&self, toggles: Vec<Toggle>, version: i64) {
        // Wrapping toggles before requesting the lock to minimize lock span.
        let toggles: Vec<(bool, Arc<Toggle>)> = toggles
            .into_iter()
            .map(|toggle| (toggle.deleted_at.is_some(), Arc::new(toggle)))
            .collect();

        let Ok(mut store) = self.toggles.write() else {
            return;
        };
        for (deleted, toggle) in toggles {
            if deleted {
                store.by_name.remove(&toggle.name);
            } else {
                store.by_name.insert(toggle.name.clone(), toggle);
            }
        }
        store.version = store.version.max(version);
    }
}
