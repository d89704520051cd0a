//! Provider lookup, binding and change fan-out.

use std::any::TypeId;
use std::sync::Arc;

use crate::arena::InstanceId;
use crate::descriptor::{Aspect, Kind, Provider};
use crate::error::TreeError;
use crate::tree::Tree;

impl Tree {
    /// Resolves the nearest `P` above `dependent` and records the dependency.
    ///
    /// Only legal while `dependent` is running its own build. Re-binding the
    /// same provider is idempotent; aspects accumulate and a bind without an
    /// aspect subscribes to every change. Returns `Ok(None)` when no
    /// ancestor provides `P`.
    pub fn depend_on<P: Provider>(
        &mut self,
        dependent: InstanceId,
        aspect: Option<Aspect>,
    ) -> Result<Option<Arc<P>>, TreeError> {
        if self.current_build != Some(dependent) {
            return Err(self.diagnostics.misuse(TreeError::BindOutsideBuild { id: dependent }));
        }
        let provider = TypeId::of::<P>();
        let ancestor = self
            .registry
            .cached(dependent, provider)
            .filter(|ancestor| self.is_active(*ancestor))
            .or_else(|| self.find_provider(dependent, provider));
        let Some(ancestor) = ancestor else {
            self.registry.forget(dependent, provider);
            return Ok(None);
        };
        self.registry.bind(dependent, provider, ancestor, aspect);
        Ok(self.descriptor(ancestor).and_then(|d| d.config_arc::<P>()))
    }

    /// Nearest `P` above `from`, without subscribing to it.
    pub fn find_ancestor<P: Provider>(&self, from: InstanceId) -> Option<Arc<P>> {
        let ancestor = self.find_provider(from, TypeId::of::<P>())?;
        self.descriptor(ancestor)?.config_arc::<P>()
    }

    pub(crate) fn find_provider(&self, from: InstanceId, provider: TypeId) -> Option<InstanceId> {
        let mut current = self.parent(from);
        while let Some(id) = current {
            let instance = self.instances.get(id)?;
            let descriptor = &instance.descriptor;
            if instance.is_active()
                && descriptor.kind() == Kind::Provider
                && descriptor.type_tag().type_id() == provider
            {
                return Some(id);
            }
            current = instance.parent;
        }
        None
    }

    /// Marks every dependent of `ancestor` interested in `changed`. Instances
    /// in the middle of their own rebuild are left alone, and suspended
    /// dependents only remember the change until they are reactivated.
    pub(crate) fn publish_change(&mut self, ancestor: InstanceId, changed: Option<Aspect>) -> usize {
        let mut notified = 0;
        for dependent in self.registry.dependents_of(ancestor) {
            if !self.registry.wants(dependent, ancestor, changed) {
                continue;
            }
            if self.rebuild_stack.contains(&dependent) {
                tracing::trace!(dependent = %dependent, "dependent already rebuilding");
                continue;
            }
            let suspended = self.registry.is_suspended(dependent, ancestor);
            let Some(instance) = self.instances.get_mut(dependent) else {
                continue;
            };
            instance.dependencies_changed = true;
            if suspended || !instance.is_active() {
                continue;
            }
            if self.schedule_rebuild(dependent) {
                notified += 1;
            }
        }
        notified
    }

    /// Re-resolves the suspended entries of a reactivated instance. Entries
    /// whose provider is still the nearest one resume; the rest are dropped
    /// and the instance rebuilds to bind again.
    pub(crate) fn revalidate_dependencies(&mut self, id: InstanceId) {
        let mut stale = false;
        for (provider, ancestor) in self.registry.suspended(id) {
            if self.find_provider(id, provider) == Some(ancestor) {
                self.registry.resume(id, provider);
            } else {
                self.registry.forget(id, provider);
                stale = true;
            }
        }
        let Some(instance) = self.instances.get_mut(id) else {
            return;
        };
        if stale {
            instance.dependencies_changed = true;
        }
        if instance.dependencies_changed {
            tracing::trace!(id = %id, "dependencies changed while inactive");
            self.schedule_rebuild(id);
        }
    }
}
