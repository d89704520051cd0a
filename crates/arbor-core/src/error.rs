use thiserror::Error;

use crate::arena::InstanceId;
use crate::descriptor::Key;
use crate::instance::Lifecycle;

/// Structural misuse of the instance tree.
///
/// These are programming errors: the frame driver is expected to abort the
/// current flush when one surfaces instead of continuing with a tree it can
/// no longer trust. Every variant is also recorded in the tree's
/// [`Diagnostics`](crate::Diagnostics) before it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("instance {id} is defunct")]
    Defunct { id: InstanceId },

    #[error("instance {id} is {actual:?}; expected {expected:?}")]
    InvalidLifecycle {
        id: InstanceId,
        expected: Lifecycle,
        actual: Lifecycle,
    },

    #[error("duplicate key {key} among the children of {parent}")]
    DuplicateKey { parent: InstanceId, key: Key },

    #[error("global key {key} claimed more than once in the same pass")]
    DuplicateGlobalKey { key: Key },

    #[error("moving {id} (global key {key}) would place it under its own subtree")]
    GlobalKeyCycle { key: Key, id: InstanceId },

    #[error("dependency lookup from {id} outside of its build")]
    BindOutsideBuild { id: InstanceId },

    #[error("state payload of {id} is not a {expected}")]
    StateTypeMismatch { id: InstanceId, expected: &'static str },

    #[error("no root instance is mounted")]
    NoRoot,

    #[error("a root instance is already mounted")]
    RootAlreadyMounted,
}

impl TreeError {
    /// The instance the error is about, when there is one.
    pub fn instance(&self) -> Option<InstanceId> {
        match self {
            TreeError::Defunct { id }
            | TreeError::InvalidLifecycle { id, .. }
            | TreeError::GlobalKeyCycle { id, .. }
            | TreeError::BindOutsideBuild { id }
            | TreeError::StateTypeMismatch { id, .. } => Some(*id),
            TreeError::DuplicateKey { parent, .. } => Some(*parent),
            TreeError::DuplicateGlobalKey { .. } | TreeError::NoRoot | TreeError::RootAlreadyMounted => {
                None
            }
        }
    }
}
