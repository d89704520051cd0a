use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::arena::InstanceId;
use crate::platform::{DefaultScheduler, FrameScheduler};

struct RuntimeInner {
    scheduler: Arc<dyn FrameScheduler>,
    needs_frame: Cell<bool>,
    requests: RefCell<Vec<InstanceId>>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn FrameScheduler>) -> Self {
        Self {
            scheduler,
            needs_frame: Cell::new(false),
            requests: RefCell::new(Vec::new()),
        }
    }

    fn schedule(&self) {
        self.needs_frame.set(true);
        self.scheduler.schedule_frame();
    }

    fn enqueue_request(&self, id: InstanceId) {
        self.requests.borrow_mut().push(id);
        self.schedule();
    }

    fn take_requests(&self) -> Vec<InstanceId> {
        self.requests.borrow_mut().drain(..).collect()
    }

    fn has_requests(&self) -> bool {
        !self.requests.borrow().is_empty()
    }

    fn discard_requests(&self, id: InstanceId) {
        self.requests.borrow_mut().retain(|request| *request != id);
    }
}

/// Per-tree runtime: the frame-request channel and the inbox of rebuild
/// requests made from outside a flush.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn FrameScheduler>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub fn needs_frame(&self) -> bool {
        self.inner.needs_frame.get()
    }

    pub fn set_needs_frame(&self, value: bool) {
        self.inner.needs_frame.set(value);
    }

    pub fn schedule(&self) {
        self.inner.schedule();
    }

    pub(crate) fn take_requests(&self) -> Vec<InstanceId> {
        self.inner.take_requests()
    }

    pub fn has_requests(&self) -> bool {
        self.inner.has_requests()
    }

    /// Drops pending requests for `id`, which is being rebuilt right now.
    pub(crate) fn discard_requests(&self, id: InstanceId) {
        self.inner.discard_requests(id);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Arc::new(DefaultScheduler))
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("needs_frame", &self.needs_frame())
            .field("requests", &self.inner.requests.borrow().len())
            .finish()
    }
}

#[derive(Clone)]
pub struct RuntimeHandle(Weak<RuntimeInner>);

impl RuntimeHandle {
    pub fn schedule(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.schedule();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    fn request_rebuild(&self, id: InstanceId) -> bool {
        match self.0.upgrade() {
            Some(inner) => {
                inner.enqueue_request(id);
                true
            }
            None => false,
        }
    }
}

/// Lets callbacks running outside a build ask for an instance to rebuild.
///
/// The handle stops working once its instance is unmounted or the handle is
/// cancelled; requests made after that are dropped on the floor.
#[derive(Clone)]
pub struct RebuildHandle {
    id: InstanceId,
    runtime: RuntimeHandle,
    unmounted: Rc<Cell<bool>>,
    revoked: Rc<Cell<bool>>,
}

impl RebuildHandle {
    pub(crate) fn new(id: InstanceId, runtime: RuntimeHandle, unmounted: Rc<Cell<bool>>) -> Self {
        Self {
            id,
            runtime,
            unmounted,
            revoked: Rc::new(Cell::new(false)),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.unmounted.get() || self.revoked.get() || !self.runtime.is_alive()
    }

    /// Queues a rebuild for the next flush. Returns `false` when the handle
    /// is no longer live.
    pub fn request(&self) -> bool {
        if self.is_cancelled() {
            tracing::trace!(id = %self.id, "dropping rebuild request from cancelled handle");
            return false;
        }
        self.runtime.request_rebuild(self.id)
    }

    /// Revokes this handle and its clones.
    pub fn cancel(&self) {
        self.revoked.set(true);
    }
}

impl fmt::Debug for RebuildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
