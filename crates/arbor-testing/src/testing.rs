use std::cell::RefCell;
use std::rc::Rc;

use arbor_core::{
    Descriptor, Diagnostics, InstanceId, LifecycleEvent, LifecycleObserver, PassReport, Tree,
    TreeConfig, TreeError,
};

/// Shared record of every lifecycle event a tree emitted.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<LifecycleEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer feeding this log; install it with [`Tree::set_observer`].
    pub fn recorder(&self) -> Box<dyn LifecycleObserver> {
        Box::new(Recorder {
            events: self.events.clone(),
        })
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.borrow().clone()
    }

    pub fn take(&self) -> Vec<LifecycleEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn count(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|event| predicate(event)).count()
    }

    /// Ids of rebuilt instances, in the order they were rebuilt.
    pub fn rebuilt(&self) -> Vec<InstanceId> {
        self.ids(|event| matches!(event, LifecycleEvent::Rebuilt { .. }))
    }

    pub fn mounted(&self) -> Vec<InstanceId> {
        self.ids(|event| matches!(event, LifecycleEvent::Mounted { .. }))
    }

    pub fn unmounted(&self) -> Vec<InstanceId> {
        self.ids(|event| matches!(event, LifecycleEvent::Unmounted { .. }))
    }

    fn ids(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> Vec<InstanceId> {
        self.events
            .borrow()
            .iter()
            .filter(|event| predicate(event))
            .map(LifecycleEvent::id)
            .collect()
    }
}

struct Recorder {
    events: Rc<RefCell<Vec<LifecycleEvent>>>,
}

impl LifecycleObserver for Recorder {
    fn on_event(&mut self, event: &LifecycleEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Headless harness for exercising an instance tree in tests.
///
/// Owns the tree, records its lifecycle events and offers path-based lookup
/// so assertions can name instances by position instead of by id.
pub struct TreeTestRule {
    tree: Tree,
    log: EventLog,
}

impl TreeTestRule {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        let mut tree = Tree::with_config(config);
        let log = EventLog::new();
        tree.set_observer(log.recorder());
        Self { tree, log }
    }

    /// Mounts `content` as the root, or reconciles the existing root against it.
    pub fn set_content(&mut self, content: Descriptor) -> Result<InstanceId, TreeError> {
        self.tree.update_root(content)
    }

    pub fn flush(&mut self) -> Result<PassReport, TreeError> {
        self.tree.flush()
    }

    /// Flushes until nothing is pending. Returns the number of flushes run.
    pub fn pump_until_idle(&mut self) -> Result<usize, TreeError> {
        let mut flushes = 0;
        while self.tree.has_pending_work() {
            self.tree.flush()?;
            flushes += 1;
            assert!(flushes < 64, "tree never became idle");
        }
        Ok(flushes)
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn root_id(&self) -> Option<InstanceId> {
        self.tree.root()
    }

    /// Follows child indices from the root.
    pub fn at(&self, path: &[usize]) -> Option<InstanceId> {
        let mut current = self.tree.root()?;
        for index in path {
            current = *self.tree.children(current).get(*index)?;
        }
        Some(current)
    }

    pub fn shutdown(self) -> Diagnostics {
        self.tree.shutdown()
    }
}

impl Default for TreeTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to a
/// `TreeTestRule`.
pub fn run_test_tree<R>(f: impl FnOnce(&mut TreeTestRule) -> R) -> R {
    let mut rule = TreeTestRule::new();
    f(&mut rule)
}
