//! Ordered tab collection addressed by generated ids.
//!
//! Tabs live in an id-keyed arena; display order is a separate list of ids.
//! Holding a [`TabId`] never dangles: a closed tab's id simply stops resolving.

use std::collections::HashMap;

use kiln_types::TabId;

use crate::gateway::{FileGateway, GatewayError};
use crate::tab::EditorTab;

/// Attempts at drawing an unused id before falling back to a counter suffix.
const MAX_ID_ATTEMPTS: usize = 1024;

/// Source of candidate tab ids. Candidates may collide; the registry retries.
pub trait IdSource: Send {
    fn generate(&mut self) -> TabId;
}

/// Random lowercase-hex ids.
#[derive(Debug, Clone)]
pub struct RandomIdSource {
    len: usize,
}

impl RandomIdSource {
    pub const DEFAULT_LEN: usize = 8;

    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }
}

impl Default for RandomIdSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEN)
    }
}

impl IdSource for RandomIdSource {
    fn generate(&mut self) -> TabId {
        let mut id = String::with_capacity(self.len + 16);
        while id.len() < self.len {
            id.push_str(&format!("{:016x}", rand::random::<u64>()));
        }
        id.truncate(self.len);
        TabId::new(id)
    }
}

/// Outcome of [`TabRegistry::save_all`].
#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: Vec<TabId>,
    pub skipped: Vec<(TabId, GatewayError)>,
}

impl SaveReport {
    #[must_use]
    pub fn all_saved(&self) -> bool {
        self.skipped.is_empty()
    }
}

pub struct TabRegistry {
    tabs: HashMap<TabId, EditorTab>,
    order: Vec<TabId>,
    /// Always a valid index into `order` when `Some`.
    current: Option<usize>,
    ids: Box<dyn IdSource>,
    fallback_counter: u64,
}

impl Default for TabRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TabRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabRegistry")
            .field("order", &self.order)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl TabRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_id_source(RandomIdSource::default())
    }

    #[must_use]
    pub fn with_id_source(ids: impl IdSource + 'static) -> Self {
        Self {
            tabs: HashMap::new(),
            order: Vec::new(),
            current: None,
            ids: Box::new(ids),
            fallback_counter: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in display order.
    #[must_use]
    pub fn ids(&self) -> &[TabId] {
        &self.order
    }

    /// Tabs in display order.
    pub fn iter(&self) -> impl Iterator<Item = (&TabId, &EditorTab)> {
        self.order.iter().filter_map(|id| self.tabs.get(id).map(|t| (id, t)))
    }

    /// Append `tab` under a freshly generated id.
    pub fn add_tab(&mut self, tab: EditorTab) -> TabId {
        let id = self.fresh_id();
        tracing::debug!(tab = %id, name = tab.name(), "Tab added");
        self.tabs.insert(id.clone(), tab);
        self.order.push(id.clone());
        id
    }

    fn fresh_id(&mut self) -> TabId {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = self.ids.generate();
            if !self.tabs.contains_key(&candidate) {
                return candidate;
            }
            tracing::trace!(id = %candidate, "Tab id collision, retrying");
        }

        tracing::warn!("Tab id space exhausted, appending counter suffix");
        loop {
            self.fallback_counter += 1;
            let candidate =
                TabId::new(format!("{}-{}", self.ids.generate(), self.fallback_counter));
            if !self.tabs.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &TabId) -> Option<&EditorTab> {
        self.tabs.get(id)
    }

    pub fn get_mut(&mut self, id: &TabId) -> Option<&mut EditorTab> {
        self.tabs.get_mut(id)
    }

    #[must_use]
    pub fn index_of(&self, id: &TabId) -> Option<usize> {
        self.order.iter().position(|t| t == id)
    }

    #[must_use]
    pub fn tab_at(&self, index: usize) -> Option<&EditorTab> {
        self.order.get(index).and_then(|id| self.tabs.get(id))
    }

    pub fn tab_at_mut(&mut self, index: usize) -> Option<&mut EditorTab> {
        let id = self.order.get(index)?;
        self.tabs.get_mut(id)
    }

    #[must_use]
    pub fn id_at(&self, index: usize) -> Option<&TabId> {
        self.order.get(index)
    }

    /// Remove the tab at `index`. Out-of-range indexes are ignored.
    ///
    /// The current selection keeps pointing at the same tab when a tab before
    /// it is removed. Closing the current tab selects its right neighbour, or
    /// the new last tab, or nothing when the registry is now empty.
    pub fn close_tab(&mut self, index: usize) -> Option<(TabId, EditorTab)> {
        if index >= self.order.len() {
            return None;
        }
        let id = self.order.remove(index);
        let tab = self.tabs.remove(&id)?;

        self.current = match self.current {
            Some(cur) if index < cur => Some(cur - 1),
            Some(cur) if index == cur => {
                if self.order.is_empty() {
                    None
                } else {
                    Some(cur.min(self.order.len() - 1))
                }
            }
            other => other,
        };

        tracing::debug!(tab = %id, "Tab closed");
        Some((id, tab))
    }

    pub fn close_tab_by_id(&mut self, id: &TabId) -> Option<EditorTab> {
        let index = self.index_of(id)?;
        self.close_tab(index).map(|(_, tab)| tab)
    }

    pub fn close_all(&mut self) {
        self.tabs.clear();
        self.order.clear();
        self.current = None;
    }

    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Select the tab at `index`; an out-of-range index clears the selection.
    pub fn set_current_index(&mut self, index: usize) {
        self.current = (index < self.order.len()).then_some(index);
    }

    pub fn set_current_id(&mut self, id: &TabId) -> bool {
        self.current = self.index_of(id);
        self.current.is_some()
    }

    pub fn clear_selection(&mut self) {
        self.current = None;
    }

    #[must_use]
    pub fn current_id(&self) -> Option<&TabId> {
        self.current.and_then(|i| self.order.get(i))
    }

    #[must_use]
    pub fn current_tab(&self) -> Option<&EditorTab> {
        self.current.and_then(|i| self.tab_at(i))
    }

    pub fn current_tab_mut(&mut self) -> Option<&mut EditorTab> {
        let index = self.current?;
        self.tab_at_mut(index)
    }

    /// Save every tab. A tab that cannot be saved is logged and skipped; the
    /// remaining tabs are still written.
    pub fn save_all(&mut self, gateway: &dyn FileGateway) -> SaveReport {
        let mut report = SaveReport::default();
        for id in &self.order {
            let Some(tab) = self.tabs.get_mut(id) else {
                tracing::warn!(tab = %id, "Tab does not exist");
                continue;
            };
            match tab.save(gateway) {
                Ok(path) => {
                    tracing::debug!(tab = %id, path = %path.display(), "Tab saved");
                    report.saved.push(id.clone());
                }
                Err(e) => {
                    tracing::warn!(tab = %id, name = tab.name(), "Couldn't save tab: {e}");
                    report.skipped.push((id.clone(), e));
                }
            }
        }
        report
    }

    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.tabs.values().any(EditorTab::is_dirty)
    }
}
