//! Bookkeeping for descendant-to-provider subscriptions.
//!
//! Each dependent holds at most one entry per provider type, which doubles as
//! the cache of its nearest provider of that type. Every entry is mirrored in
//! the provider's subscriber set so a publish fans out without a tree walk.

use std::any::TypeId;

use crate::arena::InstanceId;
use crate::collections::map::{HashMap, HashSet};
use crate::descriptor::Aspect;

#[derive(Debug, Clone)]
pub(crate) struct Dependency {
    pub(crate) ancestor: InstanceId,
    /// `None` means the dependent reads everything the provider exposes.
    pub(crate) aspects: Option<HashSet<Aspect>>,
    pub(crate) suspended: bool,
}

impl Dependency {
    fn wants(&self, changed: Option<Aspect>) -> bool {
        match (&self.aspects, changed) {
            (Some(aspects), Some(changed)) => aspects.contains(&changed),
            _ => true,
        }
    }
}

#[derive(Default)]
pub(crate) struct DependencyRegistry {
    by_dependent: HashMap<InstanceId, HashMap<TypeId, Dependency>>,
    by_ancestor: HashMap<InstanceId, HashSet<InstanceId>>,
}

impl DependencyRegistry {
    /// Provider previously resolved for `dependent`, unless the entry is suspended.
    pub(crate) fn cached(&self, dependent: InstanceId, provider: TypeId) -> Option<InstanceId> {
        self.by_dependent
            .get(&dependent)?
            .get(&provider)
            .filter(|entry| !entry.suspended)
            .map(|entry| entry.ancestor)
    }

    /// Records that `dependent` reads `ancestor`. Re-binding the same pair
    /// merges the aspect instead of adding a second entry; binding a
    /// different ancestor for the same provider type replaces the old entry.
    pub(crate) fn bind(
        &mut self,
        dependent: InstanceId,
        provider: TypeId,
        ancestor: InstanceId,
        aspect: Option<Aspect>,
    ) {
        let entries = self.by_dependent.entry(dependent).or_default();
        let mut replaced = None;
        if let Some(entry) = entries
            .get_mut(&provider)
            .filter(|entry| entry.ancestor == ancestor)
        {
            entry.suspended = false;
            match (aspect, entry.aspects.as_mut()) {
                (None, _) => entry.aspects = None,
                (Some(aspect), Some(aspects)) => {
                    aspects.insert(aspect);
                }
                (Some(_), None) => {}
            }
        } else {
            let aspects = aspect.map(|aspect| {
                let mut set: HashSet<Aspect> = HashSet::default();
                set.insert(aspect);
                set
            });
            let dependency = Dependency {
                ancestor,
                aspects,
                suspended: false,
            };
            replaced = entries.insert(provider, dependency).map(|old| old.ancestor);
        }
        if let Some(old) = replaced {
            self.unlink(old, dependent);
        }
        self.by_ancestor.entry(ancestor).or_default().insert(dependent);
    }

    pub(crate) fn dependents_of(&self, ancestor: InstanceId) -> Vec<InstanceId> {
        let mut dependents: Vec<InstanceId> = self
            .by_ancestor
            .get(&ancestor)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    pub(crate) fn dependencies_of(&self, dependent: InstanceId) -> Vec<InstanceId> {
        let mut ancestors: Vec<InstanceId> = self
            .by_dependent
            .get(&dependent)
            .map(|entries| entries.values().map(|entry| entry.ancestor).collect())
            .unwrap_or_default();
        ancestors.sort();
        ancestors
    }

    fn entry_for(&self, dependent: InstanceId, ancestor: InstanceId) -> Option<&Dependency> {
        self.by_dependent
            .get(&dependent)?
            .values()
            .find(|entry| entry.ancestor == ancestor)
    }

    /// Whether a change of `changed` on `ancestor` concerns `dependent`.
    pub(crate) fn wants(
        &self,
        dependent: InstanceId,
        ancestor: InstanceId,
        changed: Option<Aspect>,
    ) -> bool {
        self.entry_for(dependent, ancestor)
            .is_some_and(|entry| entry.wants(changed))
    }

    pub(crate) fn is_suspended(&self, dependent: InstanceId, ancestor: InstanceId) -> bool {
        self.entry_for(dependent, ancestor)
            .is_some_and(|entry| entry.suspended)
    }

    pub(crate) fn suspend(&mut self, dependent: InstanceId) {
        if let Some(entries) = self.by_dependent.get_mut(&dependent) {
            for entry in entries.values_mut() {
                entry.suspended = true;
            }
        }
    }

    pub(crate) fn suspended(&self, dependent: InstanceId) -> Vec<(TypeId, InstanceId)> {
        self.by_dependent
            .get(&dependent)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| entry.suspended)
                    .map(|(provider, entry)| (*provider, entry.ancestor))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn resume(&mut self, dependent: InstanceId, provider: TypeId) {
        if let Some(entry) = self
            .by_dependent
            .get_mut(&dependent)
            .and_then(|entries| entries.get_mut(&provider))
        {
            entry.suspended = false;
        }
    }

    pub(crate) fn forget(&mut self, dependent: InstanceId, provider: TypeId) {
        let Some(entries) = self.by_dependent.get_mut(&dependent) else {
            return;
        };
        let Some(entry) = entries.remove(&provider) else {
            return;
        };
        if entries.is_empty() {
            self.by_dependent.remove(&dependent);
        }
        self.unlink(entry.ancestor, dependent);
    }

    /// Drops every entry that references `id` on either side. Returns how
    /// many entries were removed.
    pub(crate) fn remove_instance(&mut self, id: InstanceId) -> usize {
        let mut removed = 0;
        if let Some(entries) = self.by_dependent.remove(&id) {
            removed += entries.len();
            for entry in entries.values() {
                self.unlink(entry.ancestor, id);
            }
        }
        if let Some(dependents) = self.by_ancestor.remove(&id) {
            for dependent in dependents {
                let Some(entries) = self.by_dependent.get_mut(&dependent) else {
                    continue;
                };
                let before = entries.len();
                entries.retain(|_, entry| entry.ancestor != id);
                removed += before - entries.len();
                if entries.is_empty() {
                    self.by_dependent.remove(&dependent);
                }
            }
        }
        removed
    }

    fn unlink(&mut self, ancestor: InstanceId, dependent: InstanceId) {
        if let Some(set) = self.by_ancestor.get_mut(&ancestor) {
            set.remove(&dependent);
            if set.is_empty() {
                self.by_ancestor.remove(&ancestor);
            }
        }
    }

    pub(crate) fn references(&self, id: InstanceId) -> bool {
        self.by_dependent.contains_key(&id) || self.by_ancestor.contains_key(&id)
    }

    /// Number of (dependent, provider) entries.
    pub(crate) fn len(&self) -> usize {
        self.by_dependent.values().map(|entries| entries.len()).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.by_dependent.clear();
        self.by_ancestor.clear();
    }
}
