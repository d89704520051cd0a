//! Child-list reconciliation.
//!
//! New descriptors are matched against the previous children by key, or by
//! position among the unkeyed ones. A match that still has the same type and
//! key is updated in place; anything else is replaced. Global keys can pull a
//! matching instance in from anywhere in the tree, including subtrees
//! deactivated earlier in the same pass.

use crate::arena::InstanceId;
use crate::collections::map::{HashMap, HashSet};
use crate::config::DuplicateKeyPolicy;
use crate::descriptor::{Descriptor, Key};
use crate::diagnostics::{DiagnosticKind, Severity};
use crate::error::TreeError;
use crate::instance::Lifecycle;
use crate::tree::Tree;

/// First key that appears twice among `descriptors`.
pub(crate) fn duplicate_key(descriptors: &[Descriptor]) -> Option<Key> {
    let mut seen: HashSet<Key> = HashSet::default();
    descriptors
        .iter()
        .filter_map(Descriptor::key)
        .find(|key| !seen.insert(*key))
}

impl Tree {
    pub(crate) fn reconcile_children(
        &mut self,
        parent: InstanceId,
        descriptors: &[Descriptor],
    ) -> Result<(), TreeError> {
        if let Some(key) = duplicate_key(descriptors) {
            let error = TreeError::DuplicateKey { parent, key };
            return match self.config.duplicate_keys {
                DuplicateKeyPolicy::Fail => Err(self.diagnostics.misuse(error)),
                DuplicateKeyPolicy::KeepPrevious => {
                    self.diagnostics.report(
                        DiagnosticKind::ReconciliationAmbiguity,
                        Severity::Error,
                        Some(parent),
                        format!("{error}; keeping the previous children"),
                    );
                    Ok(())
                }
            };
        }

        // Reconciling the same parent again replaces its earlier claims.
        self.claimed_globals.retain(|_, owner| *owner != parent);

        let previous = self.children(parent).to_vec();
        let mut keyed: HashMap<Key, InstanceId> = previous
            .iter()
            .filter_map(|id| Some((self.descriptor(*id)?.key()?, *id)))
            .collect();
        let mut claimed: HashSet<InstanceId> = HashSet::default();
        let mut result = Vec::with_capacity(descriptors.len());

        let outcome = self.match_children(
            parent,
            &previous,
            descriptors,
            &mut keyed,
            &mut claimed,
            &mut result,
        );

        for id in previous {
            if claimed.contains(&id) || !self.is_child_of(id, parent) {
                continue;
            }
            if outcome.is_ok() {
                self.deactivate(id)?;
            } else {
                // Keep what was not reached so the subtree stays whole.
                result.push(id);
            }
        }
        if let Some(instance) = self.instances.get_mut(parent) {
            instance.children = result;
        }
        outcome
    }

    fn match_children(
        &mut self,
        parent: InstanceId,
        previous: &[InstanceId],
        descriptors: &[Descriptor],
        keyed: &mut HashMap<Key, InstanceId>,
        claimed: &mut HashSet<InstanceId>,
        result: &mut Vec<InstanceId>,
    ) -> Result<(), TreeError> {
        for (index, descriptor) in descriptors.iter().enumerate() {
            let candidate = match descriptor.key() {
                Some(key) => keyed.remove(&key),
                None => previous.get(index).copied().filter(|id| {
                    !claimed.contains(id) && self.descriptor(*id).is_some_and(|d| d.key().is_none())
                }),
            }
            .filter(|id| self.is_child_of(*id, parent));

            if let Some(key) = descriptor.key().filter(Key::is_global) {
                if self.claimed_globals.insert(key, parent).is_some_and(|owner| owner != parent) {
                    return Err(self.diagnostics.misuse(TreeError::DuplicateGlobalKey { key }));
                }
            }

            match candidate {
                Some(id) if self.descriptor(id).is_some_and(|d| d.can_update(descriptor)) => {
                    claimed.insert(id);
                    result.push(id);
                    self.update(id, descriptor)?;
                }
                Some(id) => {
                    tracing::trace!(parent = %parent, old = %id, "child type changed; replacing");
                    self.deactivate(id)?;
                    let id = self.inflate(parent, descriptor)?;
                    result.push(id);
                }
                None => {
                    let id = self.inflate(parent, descriptor)?;
                    result.push(id);
                }
            }
        }
        Ok(())
    }

    /// Produces an instance for a descriptor with no local match: either an
    /// existing instance carrying the same global key, or a fresh mount.
    fn inflate(&mut self, parent: InstanceId, descriptor: &Descriptor) -> Result<InstanceId, TreeError> {
        if let Some(key) = descriptor.key().filter(Key::is_global) {
            if let Some(existing) = self.global_keys.get(&key).copied() {
                if self.is_ancestor_or_self(existing, parent) {
                    return Err(self.diagnostics.misuse(TreeError::GlobalKeyCycle { key, id: existing }));
                }
                let compatible = self
                    .descriptor(existing)
                    .is_some_and(|d| d.can_update(descriptor));
                if compatible {
                    self.retake(existing, parent, key)?;
                    self.update(existing, descriptor)?;
                    return Ok(existing);
                }
                if self.is_active(existing) {
                    self.deactivate(existing)?;
                }
            }
        }
        self.mount(Some(parent), descriptor)
    }

    /// Moves the instance registered under a global key beneath `parent`,
    /// which must not lie inside that instance's subtree.
    fn retake(&mut self, id: InstanceId, parent: InstanceId, key: Key) -> Result<(), TreeError> {
        if self.lifecycle(id) == Lifecycle::Active {
            self.deactivate(id)?;
        }
        tracing::debug!(id = %id, parent = %parent, key = %key, "moving globally keyed instance");
        self.reactivate(id, Some(parent))
    }

    fn is_child_of(&self, id: InstanceId, parent: InstanceId) -> bool {
        self.instances
            .get(id)
            .is_some_and(|instance| instance.is_active() && instance.parent == Some(parent))
    }

    fn is_ancestor_or_self(&self, candidate: InstanceId, mut id: InstanceId) -> bool {
        loop {
            if id == candidate {
                return true;
            }
            match self.parent(id) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }
}
