use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;

#[derive(Clone, Debug)]
struct Node(&'static str);

fn node(label: &'static str, children: Vec<Descriptor>) -> Descriptor {
    Descriptor::element(Node(label), children)
}

struct Tally {
    children: Vec<Descriptor>,
    disposed: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
struct TallyState {
    builds: usize,
    updates: usize,
}

impl StatefulComponent for Tally {
    type State = TallyState;

    fn create_state(&self) -> TallyState {
        TallyState::default()
    }

    fn build(&self, state: &mut TallyState, _cx: &mut BuildContext<'_>) -> BuildResult {
        state.builds += 1;
        Ok(self.children.clone())
    }

    fn did_update(&self, _old: &Self, state: &mut TallyState) {
        state.updates += 1;
    }

    fn dispose(&self, _state: &mut TallyState) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

fn tally(children: Vec<Descriptor>, disposed: &Arc<AtomicUsize>) -> Descriptor {
    Descriptor::stateful(Tally {
        children,
        disposed: disposed.clone(),
    })
}

struct Palette(u32, Descriptor);

impl Provider for Palette {
    fn child(&self) -> Descriptor {
        self.1.clone()
    }

    fn should_notify(&self, old: &Self) -> bool {
        self.0 != old.0
    }
}

struct PaletteReader;

impl Component for PaletteReader {
    fn build(&self, cx: &mut BuildContext<'_>) -> BuildResult {
        cx.depend_on::<Palette>()?;
        Ok(Vec::new())
    }
}

thread_local! {
    static SELF_BUILDS: Cell<usize> = const { Cell::new(0) };
    static FAIL: Cell<bool> = const { Cell::new(false) };
    static BUILD_LOG: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

/// Asks for its own rebuild from inside its build.
struct SelfMarker;

impl Component for SelfMarker {
    fn build(&self, cx: &mut BuildContext<'_>) -> BuildResult {
        SELF_BUILDS.with(|builds| builds.set(builds.get() + 1));
        cx.rebuild_handle()?.request();
        Ok(Vec::new())
    }
}

/// Fails its build while the thread-local switch is on.
struct Flaky;

impl Component for Flaky {
    fn build(&self, cx: &mut BuildContext<'_>) -> BuildResult {
        BUILD_LOG.with(|log| log.borrow_mut().push("flaky"));
        if FAIL.with(Cell::get) {
            return Err(TreeError::StateTypeMismatch {
                id: cx.id(),
                expected: "nothing",
            });
        }
        Ok(Vec::new())
    }
}

#[test]
fn state_survives_updates_and_is_disposed_once() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node("root", vec![tally(vec![], &disposed)]))
        .expect("mount");
    let stateful = tree.children(root)[0];
    let before = tree.state::<TallyState>(stateful).expect("state") as *const TallyState;

    tree.update_root(node("root", vec![tally(vec![], &disposed)]))
        .expect("update");
    assert_eq!(tree.children(root), &[stateful]);
    let state = tree.state::<TallyState>(stateful).expect("state");
    assert_eq!(state as *const TallyState, before);
    assert_eq!((state.builds, state.updates), (2, 1));

    tree.update_root(node("root", vec![])).expect("remove");
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    tree.shutdown();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn deactivated_subtree_is_unmounted_at_the_end_of_the_pass() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node(
            "root",
            vec![tally(vec![tally(vec![], &disposed)], &disposed)],
        ))
        .expect("mount");
    let outer = tree.children(root)[0];
    let inner = tree.children(outer)[0];

    tree.begin_pass();
    tree.deactivate(outer).expect("deactivate");
    assert_eq!(tree.lifecycle(outer), Lifecycle::Inactive);
    assert_eq!(tree.lifecycle(inner), Lifecycle::Inactive);
    assert!(tree.children(root).is_empty());
    assert_eq!(tree.mark_dirty(inner), Ok(true));
    assert!(!tree.is_scheduled(inner));

    tree.finish_pass();
    assert_eq!(tree.lifecycle(outer), Lifecycle::Defunct);
    assert_eq!(tree.lifecycle(inner), Lifecycle::Defunct);
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert_eq!(tree.pending_rebuilds(), 0);
}

#[test]
fn reactivation_restores_the_subtree_under_a_new_parent() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node(
            "root",
            vec![
                node("left", vec![node("deep", vec![tally(vec![], &disposed)])]),
                node("right", vec![]),
            ],
        ))
        .expect("mount");
    let left = tree.children(root)[0];
    let right = tree.children(root)[1];
    let deep = tree.children(left)[0];
    let stateful = tree.children(deep)[0];

    tree.begin_pass();
    tree.deactivate(deep).expect("deactivate");
    tree.mark_dirty(stateful).expect("mark");
    tree.reactivate(deep, Some(right)).expect("reactivate");
    tree.finish_pass();

    assert_eq!(tree.parent(deep), Some(right));
    assert!(tree.children(left).is_empty());
    assert_eq!(tree.depth(deep), Some(2));
    assert_eq!(tree.depth(stateful), Some(3));
    assert_eq!(tree.lifecycle(stateful), Lifecycle::Active);
    assert!(tree.is_scheduled(stateful));
    assert_eq!(disposed.load(Ordering::SeqCst), 0);
}

#[test]
fn lifecycle_transitions_are_checked() {
    let mut tree = Tree::new();
    let root = tree.mount_root(node("root", vec![node("a", vec![])])).expect("mount");
    let a = tree.children(root)[0];

    assert!(matches!(
        tree.unmount(a),
        Err(TreeError::InvalidLifecycle {
            expected: Lifecycle::Inactive,
            actual: Lifecycle::Active,
            ..
        })
    ));
    assert!(matches!(
        tree.reactivate(a, Some(root)),
        Err(TreeError::InvalidLifecycle { .. })
    ));
}

#[test]
fn suspended_dependents_remember_changes_until_reactivated() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(Descriptor::provider(Palette(
            1,
            node("body", vec![Descriptor::component(PaletteReader)]),
        )))
        .expect("mount");
    let body = tree.children(root)[0];
    let reader = tree.children(body)[0];

    tree.begin_pass();
    tree.deactivate(reader).expect("deactivate");
    assert_eq!(tree.publish(root, None), Ok(0));
    assert!(!tree.is_scheduled(reader));

    tree.reactivate(reader, Some(body)).expect("reactivate");
    tree.finish_pass();
    assert!(tree.is_scheduled(reader));
    assert_eq!(tree.dependencies_of(reader), vec![root]);
}

#[test]
fn publish_skips_instances_that_are_mid_rebuild() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(Descriptor::provider(Palette(
            1,
            Descriptor::component(PaletteReader),
        )))
        .expect("mount");
    let reader = tree.children(root)[0];

    tree.rebuild_stack.push(reader);
    assert_eq!(tree.publish_change(root, None), 0);
    tree.rebuild_stack.pop();
    assert!(!tree.is_dirty(reader));

    assert_eq!(tree.publish_change(root, None), 1);
    assert!(tree.is_dirty(reader));
}

#[test]
fn self_requests_during_build_are_ignored() {
    let mut tree = Tree::new();
    let root = tree.mount_root(Descriptor::component(SelfMarker)).expect("mount");
    assert_eq!(SELF_BUILDS.with(Cell::get), 1);
    assert!(!tree.has_pending_work());

    tree.mark_dirty(root).expect("mark");
    tree.flush().expect("flush");
    assert_eq!(SELF_BUILDS.with(Cell::get), 2);
    assert!(!tree.has_pending_work());
}

#[test]
fn failed_rebuild_stays_queued_for_the_next_flush() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node("root", vec![Descriptor::component(Flaky)]))
        .expect("mount");
    let flaky = tree.children(root)[0];

    FAIL.with(|fail| fail.set(true));
    tree.mark_dirty(flaky).expect("mark");
    assert!(tree.flush().is_err());
    assert!(tree.is_dirty(flaky));
    assert!(tree.is_scheduled(flaky));
    assert_eq!(tree.lifecycle(flaky), Lifecycle::Active);

    FAIL.with(|fail| fail.set(false));
    let report = tree.flush().expect("retry");
    assert_eq!(report.rebuilt, 1);
    assert!(!tree.is_dirty(flaky));
    assert_eq!(BUILD_LOG.with(|log| log.borrow().len()), 3);
}

#[test]
fn failed_first_build_leaves_no_instance_behind() {
    FAIL.with(|fail| fail.set(true));
    let mut tree = Tree::new();
    let root = tree.mount_root(node("root", vec![])).expect("mount");

    let result = tree.update_root(node("root", vec![Descriptor::component(Flaky)]));
    assert!(result.is_err());
    assert_eq!(tree.len(), 1);
    assert!(tree.children(root).is_empty());
    FAIL.with(|fail| fail.set(false));
}

#[test]
fn reconciling_a_parent_twice_in_one_pass_keeps_its_global_claims() {
    let pinned = || node("pinned", vec![]).with_key(Key::global(&"pinned"));
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node("root", vec![node("holder", vec![pinned()])]))
        .expect("mount");
    let holder = tree.children(root)[0];
    let child = tree.children(holder)[0];

    tree.begin_pass();
    tree.rebuild(holder).expect("first reconcile");
    tree.rebuild(holder).expect("second reconcile");
    tree.finish_pass();

    assert_eq!(tree.children(holder), &[child]);
    assert_eq!(tree.find_global(Key::global(&"pinned")), Some(child));
    assert!(!tree.diagnostics().has_errors());
}

#[test]
fn global_claims_still_conflict_across_parents() {
    let pinned = || node("pinned", vec![]).with_key(Key::global(&"pinned"));
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node(
            "root",
            vec![node("left", vec![pinned()]), node("right", vec![])],
        ))
        .expect("mount");
    let left = tree.children(root)[0];

    tree.begin_pass();
    tree.rebuild(left).expect("left reconcile");
    let right = tree.children(root)[1];
    let claimed = tree.reconcile_children(right, &[pinned()]);
    tree.finish_pass();

    assert_eq!(
        claimed,
        Err(TreeError::DuplicateGlobalKey {
            key: Key::global(&"pinned"),
        })
    );
}
