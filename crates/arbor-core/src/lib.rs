#![doc = r"Retained instance tree for the Arbor UI engine: descriptors, reconciliation, provider dependencies and depth-ordered rebuilds."]

pub mod collections;
pub mod config;
pub mod diagnostics;
pub mod hash;
pub mod observer;
pub mod platform;
pub mod runtime;

mod arena;
mod context;
mod dependencies;
mod descriptor;
mod error;
mod instance;
mod lifecycle;
mod reconcile;
mod registry;
mod scheduler;
mod tree;

pub use arena::InstanceId;
pub use config::{DuplicateKeyPolicy, TreeConfig};
pub use context::BuildContext;
pub use descriptor::{
    Aspect, BuildResult, Component, Descriptor, Key, Kind, Provider, StatefulComponent, TypeTag,
};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use error::TreeError;
pub use instance::Lifecycle;
pub use observer::{LifecycleEvent, LifecycleObserver};
pub use platform::{DefaultScheduler, FrameScheduler};
pub use runtime::{RebuildHandle, Runtime, RuntimeHandle};
pub use scheduler::Scheduled;
pub use tree::{PassReport, Tree};

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tree_tests;

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod lifecycle_tests;
