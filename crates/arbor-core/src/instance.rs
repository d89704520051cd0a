use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use crate::arena::InstanceId;
use crate::descriptor::Descriptor;

/// Lifecycle of an instance.
///
/// `Created` is never observed from outside: mounting moves an instance
/// straight to `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Created,
    Active,
    Inactive,
    Defunct,
}

pub(crate) struct Instance {
    pub(crate) descriptor: Descriptor,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) dirty: bool,
    pub(crate) dependencies_changed: bool,
    pub(crate) children: Vec<InstanceId>,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) depth: usize,
    /// `None` for kinds without state, and while a stateful build borrows it.
    pub(crate) state: Option<Box<dyn Any>>,
    /// Shared with every [`RebuildHandle`](crate::RebuildHandle) handed out for this instance.
    pub(crate) cancelled: Option<Rc<Cell<bool>>>,
}

impl Instance {
    pub(crate) fn new(descriptor: Descriptor, parent: Option<InstanceId>, depth: usize) -> Self {
        Self {
            descriptor,
            lifecycle: Lifecycle::Created,
            dirty: false,
            dependencies_changed: false,
            children: Vec::new(),
            parent,
            depth,
            state: None,
            cancelled: None,
        }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    pub(crate) fn cancellation(&mut self) -> Rc<Cell<bool>> {
        self.cancelled
            .get_or_insert_with(|| Rc::new(Cell::new(false)))
            .clone()
    }

    pub(crate) fn cancel_requests(&mut self) {
        if let Some(flag) = self.cancelled.take() {
            flag.set(true);
        }
    }
}
