//! Lifecycle notifications for collaborators that mirror the instance tree,
//! such as render-node bridges or test recorders.

use crate::arena::InstanceId;
use crate::descriptor::{Key, TypeTag};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Mounted {
        id: InstanceId,
        parent: Option<InstanceId>,
        tag: TypeTag,
        key: Option<Key>,
        depth: usize,
    },
    /// The descriptor was replaced in place.
    Updated { id: InstanceId },
    /// Children were produced again and reconciled.
    Rebuilt { id: InstanceId },
    DependenciesChanged { id: InstanceId },
    Deactivated { id: InstanceId },
    Reactivated {
        id: InstanceId,
        parent: Option<InstanceId>,
    },
    Unmounted { id: InstanceId },
}

impl LifecycleEvent {
    pub fn id(&self) -> InstanceId {
        match self {
            LifecycleEvent::Mounted { id, .. }
            | LifecycleEvent::Updated { id }
            | LifecycleEvent::Rebuilt { id }
            | LifecycleEvent::DependenciesChanged { id }
            | LifecycleEvent::Deactivated { id }
            | LifecycleEvent::Reactivated { id, .. }
            | LifecycleEvent::Unmounted { id } => *id,
        }
    }
}

pub trait LifecycleObserver {
    fn on_event(&mut self, event: &LifecycleEvent);
}
