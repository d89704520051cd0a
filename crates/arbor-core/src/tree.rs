use std::fmt;
use std::mem;

use crate::arena::{Arena, InstanceId};
use crate::collections::map::{HashMap, HashSet};
use crate::config::TreeConfig;
use crate::descriptor::{Aspect, Descriptor, Key};
use crate::diagnostics::{DiagnosticKind, Diagnostics, Severity};
use crate::error::TreeError;
use crate::instance::{Instance, Lifecycle};
use crate::observer::{LifecycleEvent, LifecycleObserver};
use crate::registry::DependencyRegistry;
use crate::runtime::{RebuildHandle, Runtime};
use crate::scheduler::{Scheduled, Scheduler};

/// Counters for one pass over the tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Build steps run, including instances rebuilt inline by an ancestor.
    pub rebuilt: usize,
    pub mounted: usize,
    pub unmounted: usize,
    /// Rebuild requests pushed to the next flush because they arrived late.
    pub deferred: usize,
}

/// The retained instance tree together with its dependency registry, rebuild
/// scheduler and runtime. One tree belongs to one frame-driver thread.
pub struct Tree {
    pub(crate) instances: Arena<Instance>,
    pub(crate) registry: DependencyRegistry,
    pub(crate) scheduler: Scheduler,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) config: TreeConfig,
    pub(crate) runtime: Runtime,
    root: Option<InstanceId>,
    /// Instance whose build callback is running; the only one allowed to bind.
    pub(crate) current_build: Option<InstanceId>,
    /// Instances between the start of their build and the end of their
    /// children's reconciliation.
    pub(crate) rebuild_stack: Vec<InstanceId>,
    /// Roots of subtrees deactivated during the current pass.
    pub(crate) inactive: Vec<InstanceId>,
    pub(crate) global_keys: HashMap<Key, InstanceId>,
    /// Global keys claimed during the current pass, with the parent that claimed them.
    pub(crate) claimed_globals: HashMap<Key, InstanceId>,
    /// Instances rebuilt by the running flush.
    pub(crate) rebuilt_in_flush: HashSet<InstanceId>,
    pub(crate) report: PassReport,
    observer: Option<Box<dyn LifecycleObserver>>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self::with_runtime(config, Runtime::default())
    }

    pub fn with_runtime(config: TreeConfig, runtime: Runtime) -> Self {
        Self {
            instances: Arena::default(),
            registry: DependencyRegistry::default(),
            scheduler: Scheduler::default(),
            diagnostics: Diagnostics::new(config.capture_diagnostics, config.diagnostics_capacity),
            config,
            runtime,
            root: None,
            current_build: None,
            rebuild_stack: Vec::new(),
            inactive: Vec::new(),
            global_keys: HashMap::default(),
            claimed_globals: HashMap::default(),
            rebuilt_in_flush: HashSet::default(),
            report: PassReport::default(),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn LifecycleObserver>) {
        self.observer = Some(observer);
    }

    pub fn take_observer(&mut self) -> Option<Box<dyn LifecycleObserver>> {
        self.observer.take()
    }

    pub(crate) fn emit(&mut self, event: LifecycleEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
    }

    // ---------------------------------------------------------------------
    // Root passes
    // ---------------------------------------------------------------------

    pub fn mount_root(&mut self, descriptor: Descriptor) -> Result<InstanceId, TreeError> {
        if self.root.is_some() {
            return Err(self.diagnostics.misuse(TreeError::RootAlreadyMounted));
        }
        self.begin_pass();
        let mounted = self.mount(None, &descriptor);
        self.finish_pass();
        let id = mounted?;
        self.root = Some(id);
        tracing::debug!(root = %id, "mounted root");
        Ok(id)
    }

    /// Reconciles the root against a new descriptor, replacing it when the
    /// type or key changed. Mounts a root if there is none yet.
    pub fn update_root(&mut self, descriptor: Descriptor) -> Result<InstanceId, TreeError> {
        let Some(root) = self.root else {
            return self.mount_root(descriptor);
        };
        self.begin_pass();
        let compatible = self
            .instances
            .get(root)
            .is_some_and(|instance| instance.descriptor.can_update(&descriptor));
        let outcome = if compatible {
            self.update(root, &descriptor).map(|()| root)
        } else {
            tracing::debug!(root = %root, "root type changed; replacing");
            self.root = None;
            self.deactivate(root)
                .and_then(|()| self.mount(None, &descriptor))
        };
        self.finish_pass();
        let id = outcome?;
        self.root = Some(id);
        Ok(id)
    }

    pub fn unmount_root(&mut self) -> Result<PassReport, TreeError> {
        let Some(root) = self.root.take() else {
            return Err(self.diagnostics.misuse(TreeError::NoRoot));
        };
        self.begin_pass();
        let outcome = self.deactivate(root);
        self.finish_pass();
        outcome.map(|()| self.report)
    }

    // ---------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------

    /// Marks `id` for rebuild in the next (or running) flush.
    ///
    /// Returns `Ok(false)` when the instance was already dirty. Marking a
    /// defunct instance is reported as misuse.
    pub fn mark_dirty(&mut self, id: InstanceId) -> Result<bool, TreeError> {
        let Some(instance) = self.instances.get_mut(id) else {
            return Err(self.diagnostics.misuse(TreeError::Defunct { id }));
        };
        match instance.lifecycle {
            Lifecycle::Active => Ok(self.schedule_rebuild(id)),
            _ => {
                // Picked up again if the instance is reactivated in this pass.
                let newly = !instance.dirty;
                instance.dirty = true;
                Ok(newly)
            }
        }
    }

    pub(crate) fn schedule_rebuild(&mut self, id: InstanceId) -> bool {
        let Some(instance) = self.instances.get_mut(id) else {
            return false;
        };
        if instance.dirty {
            return false;
        }
        instance.dirty = true;
        let depth = instance.depth;
        self.enqueue(id, depth);
        true
    }

    pub(crate) fn enqueue(&mut self, id: InstanceId, depth: usize) {
        let already_rebuilt = self.scheduler.is_flushing() && self.rebuilt_in_flush.contains(&id);
        let scheduled = if already_rebuilt {
            self.scheduler.defer(id)
        } else {
            self.scheduler.schedule(id, depth)
        };
        match scheduled {
            Scheduled::Queued => tracing::trace!(id = %id, depth, "scheduled rebuild"),
            Scheduled::AlreadyQueued => {}
            Scheduled::Deferred => {
                self.report.deferred += 1;
                let message = if already_rebuilt {
                    "rebuild requested for an instance this flush already rebuilt; \
                     deferred to the next frame"
                        .to_string()
                } else {
                    format!(
                        "rebuild at depth {depth} requested after the flush passed that depth; \
                         deferred to the next frame"
                    )
                };
                self.diagnostics.report(
                    DiagnosticKind::SchedulingAnomaly,
                    Severity::Warning,
                    Some(id),
                    message,
                );
            }
        }
        if !self.scheduler.is_flushing() || self.scheduler.deferred_len() > 0 {
            self.runtime.schedule();
        }
    }

    /// Rebuilds every dirty instance, shallowest first, folding in work that
    /// becomes dirty along the way.
    ///
    /// On error the flush stops where it is: instances already rebuilt keep
    /// their new children, the failing instance and everything not yet
    /// reached stay dirty for the next flush.
    pub fn flush(&mut self) -> Result<PassReport, TreeError> {
        let span = tracing::debug_span!("flush", pending = self.scheduler.len());
        let _entered = span.enter();
        self.begin_pass();
        self.rebuilt_in_flush.clear();
        for id in self.scheduler.begin() {
            if let Some(instance) = self.instances.get(id).filter(|instance| instance.is_active()) {
                let depth = instance.depth;
                self.enqueue(id, depth);
            }
        }
        let outcome = loop {
            self.drain_requests();
            let Some((id, depth)) = self.scheduler.pop_next() else {
                break Ok(());
            };
            let ready = self
                .instances
                .get(id)
                .is_some_and(|instance| instance.is_active() && instance.dirty);
            if !ready {
                continue;
            }
            tracing::trace!(id = %id, depth, "flushing");
            if let Err(error) = self.rebuild(id) {
                break Err(error);
            }
        };
        self.scheduler.end();
        self.rebuilt_in_flush.clear();
        self.finish_pass();
        self.runtime.set_needs_frame(self.has_pending_work());
        outcome.map(|()| self.report)
    }

    fn drain_requests(&mut self) {
        for id in self.runtime.take_requests() {
            match self.instances.get(id).map(|instance| instance.lifecycle) {
                Some(Lifecycle::Active) => {
                    self.schedule_rebuild(id);
                }
                Some(_) => {
                    if let Some(instance) = self.instances.get_mut(id) {
                        instance.dirty = true;
                    }
                }
                None => self.diagnostics.report(
                    DiagnosticKind::CancelledRequest,
                    Severity::Info,
                    Some(id),
                    "rebuild request for an unmounted instance dropped",
                ),
            }
        }
    }

    /// Returns a handle that callbacks can use to request a rebuild of `id`
    /// later. The handle goes inert when `id` is unmounted.
    pub fn rebuild_handle(&mut self, id: InstanceId) -> Result<RebuildHandle, TreeError> {
        let runtime = self.runtime.handle();
        let Some(instance) = self.instances.get_mut(id) else {
            return Err(self.diagnostics.misuse(TreeError::Defunct { id }));
        };
        Ok(RebuildHandle::new(id, runtime, instance.cancellation()))
    }

    /// Notifies the dependents of `ancestor` that its data changed, for
    /// providers whose data changes without a new descriptor. Returns how
    /// many dependents were newly marked dirty.
    pub fn publish(&mut self, ancestor: InstanceId, changed: Option<Aspect>) -> Result<usize, TreeError> {
        self.expect_active(ancestor)?;
        Ok(self.publish_change(ancestor, changed))
    }

    pub(crate) fn begin_pass(&mut self) {
        self.claimed_globals.clear();
        self.report = PassReport::default();
    }

    /// Unmounts whatever was deactivated during the pass and not reclaimed.
    pub(crate) fn finish_pass(&mut self) {
        for id in mem::take(&mut self.inactive) {
            let still_inactive = self
                .instances
                .get(id)
                .is_some_and(|instance| instance.lifecycle == Lifecycle::Inactive);
            if still_inactive {
                if let Err(error) = self.unmount(id) {
                    tracing::error!(id = %id, %error, "failed to finalize inactive instance");
                }
            }
        }
        if self.root.is_some_and(|root| !self.instances.contains(root)) {
            self.root = None;
        }
    }

    /// Unmounts everything and drops pending work, handing back the
    /// diagnostics captured over the tree's lifetime.
    pub fn shutdown(mut self) -> Diagnostics {
        if self.root.is_some() {
            if let Err(error) = self.unmount_root() {
                tracing::error!(%error, "failed to unmount root during shutdown");
            }
        }
        self.scheduler.clear();
        self.registry.clear();
        self.runtime.take_requests();
        self.runtime.set_needs_frame(false);
        mem::take(&mut self.diagnostics)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub(crate) fn expect_active(&mut self, id: InstanceId) -> Result<(), TreeError> {
        match self.instances.get(id).map(|instance| instance.lifecycle) {
            Some(Lifecycle::Active) => Ok(()),
            Some(actual) => Err(self.diagnostics.misuse(TreeError::InvalidLifecycle {
                id,
                expected: Lifecycle::Active,
                actual,
            })),
            None => Err(self.diagnostics.misuse(TreeError::Defunct { id })),
        }
    }

    pub(crate) fn is_active(&self, id: InstanceId) -> bool {
        self.instances.get(id).is_some_and(Instance::is_active)
    }

    pub fn root(&self) -> Option<InstanceId> {
        self.root
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// Number of live (active or inactive) instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.len() == 0
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains(id)
    }

    /// Freed handles report `Defunct`.
    pub fn lifecycle(&self, id: InstanceId) -> Lifecycle {
        self.instances
            .get(id)
            .map_or(Lifecycle::Defunct, |instance| instance.lifecycle)
    }

    pub fn children(&self, id: InstanceId) -> &[InstanceId] {
        self.instances
            .get(id)
            .map(|instance| instance.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: InstanceId) -> Option<InstanceId> {
        self.instances.get(id)?.parent
    }

    pub fn depth(&self, id: InstanceId) -> Option<usize> {
        self.instances.get(id).map(|instance| instance.depth)
    }

    pub fn is_dirty(&self, id: InstanceId) -> bool {
        self.instances.get(id).is_some_and(|instance| instance.dirty)
    }

    pub fn is_scheduled(&self, id: InstanceId) -> bool {
        self.scheduler.contains(id)
    }

    pub fn pending_rebuilds(&self) -> usize {
        self.scheduler.len()
    }

    pub fn has_pending_work(&self) -> bool {
        self.scheduler.len() > 0 || self.runtime.has_requests()
    }

    pub fn descriptor(&self, id: InstanceId) -> Option<&Descriptor> {
        self.instances.get(id).map(|instance| &instance.descriptor)
    }

    /// State payload of a stateful instance.
    pub fn state<T: 'static>(&self, id: InstanceId) -> Option<&T> {
        self.instances.get(id)?.state.as_deref()?.downcast_ref::<T>()
    }

    pub fn find_global(&self, key: Key) -> Option<InstanceId> {
        self.global_keys.get(&key).copied()
    }

    pub fn dependencies_of(&self, id: InstanceId) -> Vec<InstanceId> {
        self.registry.dependencies_of(id)
    }

    pub fn dependents_of(&self, id: InstanceId) -> Vec<InstanceId> {
        self.registry.dependents_of(id)
    }

    /// Number of (dependent, provider) registry entries.
    pub fn dependency_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether any registry entry still names `id` on either side.
    pub fn is_referenced(&self, id: InstanceId) -> bool {
        self.registry.references(id)
    }

    /// Live instances in slot order.
    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.ids()
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root)
            .field("instances", &self.instances.len())
            .field("dependencies", &self.registry.len())
            .field("pending", &self.scheduler.len())
            .finish()
    }
}
