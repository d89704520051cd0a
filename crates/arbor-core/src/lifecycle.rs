//! Lifecycle transitions of individual instances: mount, update, rebuild,
//! deactivate, reactivate and unmount.

use std::mem;

use crate::arena::InstanceId;
use crate::context::BuildContext;
use crate::descriptor::{BuildResult, Descriptor, DescriptorKind};
use crate::error::TreeError;
use crate::instance::{Instance, Lifecycle};
use crate::observer::LifecycleEvent;
use crate::tree::Tree;

impl Tree {
    /// Creates an instance for `descriptor` under `parent` and builds it.
    ///
    /// A failed first build leaves nothing behind: the half-built subtree is
    /// deactivated and unmounted when the pass finishes.
    pub(crate) fn mount(
        &mut self,
        parent: Option<InstanceId>,
        descriptor: &Descriptor,
    ) -> Result<InstanceId, TreeError> {
        let depth = match parent {
            Some(parent) => self.depth(parent).map_or(0, |depth| depth + 1),
            None => 0,
        };
        let mut instance = Instance::new(descriptor.clone(), parent, depth);
        if let DescriptorKind::Stateful(stateful) = descriptor.descriptor_kind() {
            instance.state = Some(stateful.make_state());
        }
        instance.lifecycle = Lifecycle::Active;
        let id = self.instances.insert(instance);
        if let Some(key) = descriptor.key().filter(|key| key.is_global()) {
            self.global_keys.insert(key, id);
        }
        self.report.mounted += 1;
        tracing::trace!(id = %id, parent = ?parent, depth, tag = descriptor.type_tag().name(), "mount");
        self.emit(LifecycleEvent::Mounted {
            id,
            parent,
            tag: descriptor.type_tag(),
            key: descriptor.key(),
            depth,
        });

        if let Err(error) = self.rebuild(id) {
            if self.is_active(id) {
                // Already reported; the slot goes away with the pass.
                let _ = self.deactivate(id);
            }
            return Err(error);
        }
        Ok(id)
    }

    /// Replaces the descriptor of a live instance and rebuilds it.
    ///
    /// An identical descriptor on a clean instance is skipped outright.
    pub(crate) fn update(&mut self, id: InstanceId, descriptor: &Descriptor) -> Result<(), TreeError> {
        self.expect_active(id)?;
        let Some(instance) = self.instances.get_mut(id) else {
            return Err(TreeError::Defunct { id });
        };
        if instance.descriptor.same_as(descriptor) && !instance.dirty {
            return Ok(());
        }
        let old = mem::replace(&mut instance.descriptor, descriptor.clone());
        self.emit(LifecycleEvent::Updated { id });

        match descriptor.descriptor_kind() {
            DescriptorKind::Stateful(stateful) => {
                let stateful = stateful.clone();
                if let Some(instance) = self.instances.get_mut(id) {
                    if let Some(state) = instance.state.as_deref_mut() {
                        stateful.notify_update(old.erased_config(), state);
                    }
                }
            }
            DescriptorKind::Provider(provider) => {
                if provider.notifies(old.erased_config()) {
                    let aspect = provider.aspect_changed(old.erased_config());
                    let notified = self.publish_change(id, aspect);
                    tracing::trace!(id = %id, notified, "provider changed");
                }
            }
            DescriptorKind::Component(_) | DescriptorKind::Element(_) => {}
        }
        self.rebuild(id)
    }

    /// Produces the children of `id` again and reconciles them.
    pub(crate) fn rebuild(&mut self, id: InstanceId) -> Result<(), TreeError> {
        self.scheduler.remove(id);
        let Some(instance) = self.instances.get_mut(id) else {
            return Err(self.diagnostics.misuse(TreeError::Defunct { id }));
        };
        // Stays set for the whole build so self-marking is a no-op.
        instance.dirty = true;
        let descriptor = instance.descriptor.clone();
        let dependencies_changed = mem::take(&mut instance.dependencies_changed);
        if dependencies_changed {
            self.emit(LifecycleEvent::DependenciesChanged { id });
        }

        self.rebuild_stack.push(id);
        let built = self.produce_children(id, &descriptor, dependencies_changed);
        // Requests the build made for itself are satisfied by this rebuild.
        self.runtime.discard_requests(id);
        let outcome = built.and_then(|children| self.reconcile_children(id, &children));
        self.rebuild_stack.pop();

        match outcome {
            Ok(()) => {
                if let Some(instance) = self.instances.get_mut(id) {
                    instance.dirty = false;
                }
                if self.scheduler.is_flushing() {
                    self.rebuilt_in_flush.insert(id);
                }
                self.report.rebuilt += 1;
                self.emit(LifecycleEvent::Rebuilt { id });
                Ok(())
            }
            Err(error) => {
                // Stays dirty and queued so the next flush retries it.
                if let Some(depth) = self.instances.get(id).filter(|i| i.is_active()).map(|i| i.depth) {
                    self.enqueue(id, depth);
                }
                Err(error)
            }
        }
    }

    fn produce_children(
        &mut self,
        id: InstanceId,
        descriptor: &Descriptor,
        dependencies_changed: bool,
    ) -> BuildResult {
        match descriptor.descriptor_kind() {
            DescriptorKind::Component(component) => {
                let component = component.clone();
                self.with_build(id, |cx| component.build(cx))
            }
            DescriptorKind::Stateful(stateful) => {
                let stateful = stateful.clone();
                let Some(mut state) = self.instances.get_mut(id).and_then(|i| i.state.take()) else {
                    return Err(self.diagnostics.misuse(TreeError::StateTypeMismatch {
                        id,
                        expected: stateful.state_type(),
                    }));
                };
                if dependencies_changed {
                    stateful.notify_dependencies(&mut *state);
                }
                let built = self.with_build(id, |cx| stateful.run_build(&mut *state, cx));
                if let Some(instance) = self.instances.get_mut(id) {
                    instance.state = Some(state);
                }
                match built {
                    Some(result) => result,
                    None => Err(self.diagnostics.misuse(TreeError::StateTypeMismatch {
                        id,
                        expected: stateful.state_type(),
                    })),
                }
            }
            DescriptorKind::Provider(provider) => Ok(vec![provider.provided_child()]),
            DescriptorKind::Element(children) => Ok(children.to_vec()),
        }
    }

    fn with_build<R>(&mut self, id: InstanceId, f: impl FnOnce(&mut BuildContext<'_>) -> R) -> R {
        let previous = self.current_build.replace(id);
        let result = f(&mut BuildContext::new(self, id));
        self.current_build = previous;
        result
    }

    /// Detaches `id` from its parent and takes its subtree out of service.
    /// The subtree lands in the pass's inactive pool and is unmounted when
    /// the pass finishes unless something reclaims it first.
    pub(crate) fn deactivate(&mut self, id: InstanceId) -> Result<(), TreeError> {
        self.expect_active(id)?;
        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(instance) = self.instances.get_mut(current) else {
                continue;
            };
            instance.lifecycle = Lifecycle::Inactive;
            stack.extend(instance.children.iter().copied());
            self.scheduler.remove(current);
            self.registry.suspend(current);
            self.emit(LifecycleEvent::Deactivated { id: current });
        }
        tracing::trace!(id = %id, "deactivated");
        self.inactive.push(id);
        Ok(())
    }

    /// Brings an inactive subtree back under `parent`, refreshing depths and
    /// re-resolving the dependencies it had suspended.
    pub(crate) fn reactivate(&mut self, id: InstanceId, parent: Option<InstanceId>) -> Result<(), TreeError> {
        let actual = self.lifecycle(id);
        if actual != Lifecycle::Inactive {
            return Err(self.diagnostics.misuse(TreeError::InvalidLifecycle {
                id,
                expected: Lifecycle::Inactive,
                actual,
            }));
        }
        let depth = match parent {
            Some(parent) => {
                self.expect_active(parent)?;
                self.depth(parent).map_or(0, |depth| depth + 1)
            }
            None => 0,
        };
        self.inactive.retain(|pooled| *pooled != id);
        self.detach(id);
        if let Some(instance) = self.instances.get_mut(id) {
            instance.parent = parent;
        }

        let mut stack = vec![(id, depth)];
        while let Some((current, depth)) = stack.pop() {
            let Some(instance) = self.instances.get_mut(current) else {
                continue;
            };
            instance.lifecycle = Lifecycle::Active;
            instance.depth = depth;
            let dirty = instance.dirty;
            let parent = instance.parent;
            stack.extend(instance.children.iter().map(|child| (*child, depth + 1)));
            if dirty {
                self.enqueue(current, depth);
            }
            self.emit(LifecycleEvent::Reactivated { id: current, parent });
            self.revalidate_dependencies(current);
        }
        tracing::trace!(id = %id, parent = ?parent, depth, "reactivated");
        Ok(())
    }

    /// Removes `id` from its parent's child list.
    pub(crate) fn detach(&mut self, id: InstanceId) {
        let Some(parent) = self.instances.get_mut(id).and_then(|instance| instance.parent.take()) else {
            return;
        };
        if let Some(parent) = self.instances.get_mut(parent) {
            parent.children.retain(|child| *child != id);
        }
    }

    /// Unmounts an inactive subtree, children before their parents.
    pub(crate) fn unmount(&mut self, id: InstanceId) -> Result<(), TreeError> {
        let actual = self.lifecycle(id);
        if actual != Lifecycle::Inactive {
            let error = match actual {
                Lifecycle::Defunct => TreeError::Defunct { id },
                actual => TreeError::InvalidLifecycle {
                    id,
                    expected: Lifecycle::Inactive,
                    actual,
                },
            };
            return Err(self.diagnostics.misuse(error));
        }
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(instance) = self.instances.get(current) {
                order.push(current);
                stack.extend(instance.children.iter().copied());
            }
        }
        for current in order.into_iter().rev() {
            self.dispose(current);
        }
        Ok(())
    }

    fn dispose(&mut self, id: InstanceId) {
        let Some(mut instance) = self.instances.remove(id) else {
            return;
        };
        instance.lifecycle = Lifecycle::Defunct;
        if let (DescriptorKind::Stateful(stateful), Some(state)) =
            (instance.descriptor.descriptor_kind(), instance.state.as_deref_mut())
        {
            stateful.dispose_state(state);
        }
        instance.cancel_requests();
        let dropped = self.registry.remove_instance(id);
        self.scheduler.remove(id);
        if let Some(key) = instance.descriptor.key().filter(|key| key.is_global()) {
            if self.global_keys.get(&key) == Some(&id) {
                self.global_keys.remove(&key);
            }
        }
        self.report.unmounted += 1;
        tracing::trace!(id = %id, dependencies = dropped, "unmounted");
        self.emit(LifecycleEvent::Unmounted { id });
    }
}
