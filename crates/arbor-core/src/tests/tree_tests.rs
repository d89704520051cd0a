use std::cell::RefCell;
use std::sync::Arc;

use super::*;

#[derive(Clone, Debug)]
struct Node(&'static str);

fn node(label: &'static str, children: Vec<Descriptor>) -> Descriptor {
    Descriptor::element(Node(label), children)
}

struct Shade {
    tone: u32,
    child: Descriptor,
}

impl Provider for Shade {
    fn child(&self) -> Descriptor {
        self.child.clone()
    }

    fn should_notify(&self, old: &Self) -> bool {
        self.tone != old.tone
    }
}

fn shade(tone: u32, child: Descriptor) -> Descriptor {
    Descriptor::provider(Shade { tone, child })
}

thread_local! {
    static SEEN: RefCell<Vec<Option<u32>>> = const { RefCell::new(Vec::new()) };
    static HANDLES: RefCell<Vec<RebuildHandle>> = const { RefCell::new(Vec::new()) };
}

struct ShadeReader;

impl Component for ShadeReader {
    fn build(&self, cx: &mut BuildContext<'_>) -> BuildResult {
        let tone = cx.depend_on::<Shade>()?.map(|shade| shade.tone);
        SEEN.with(|seen| seen.borrow_mut().push(tone));
        Ok(Vec::new())
    }
}

struct HandleGrabber;

impl Component for HandleGrabber {
    fn build(&self, cx: &mut BuildContext<'_>) -> BuildResult {
        let handle = cx.rebuild_handle()?;
        HANDLES.with(|handles| handles.borrow_mut().push(handle));
        Ok(Vec::new())
    }
}

fn seen() -> Vec<Option<u32>> {
    SEEN.with(|seen| seen.borrow_mut().drain(..).collect())
}

fn take_handles() -> Vec<RebuildHandle> {
    HANDLES.with(|handles| handles.borrow_mut().drain(..).collect())
}

#[test]
fn mount_builds_the_whole_subtree_with_depths() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node("root", vec![node("a", vec![node("b", vec![])])]))
        .expect("mount");

    let a = tree.children(root)[0];
    let b = tree.children(a)[0];
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.depth(b), Some(2));
    assert_eq!(tree.parent(b), Some(a));
    assert_eq!(tree.lifecycle(b), Lifecycle::Active);
    assert!(!tree.is_dirty(root));
    assert!(!tree.has_pending_work());
}

#[test]
fn second_root_is_rejected() {
    let mut tree = Tree::new();
    tree.mount_root(node("root", vec![])).expect("mount");
    assert_eq!(
        tree.mount_root(node("other", vec![])),
        Err(TreeError::RootAlreadyMounted)
    );
    assert_eq!(tree.diagnostics().of_kind(DiagnosticKind::Misuse).count(), 1);
}

#[test]
fn unmount_root_frees_every_slot_and_entry() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(shade(1, node("body", vec![Descriptor::component(ShadeReader)])))
        .expect("mount");
    let reader = tree.children(tree.children(root)[0])[0];
    assert_eq!(tree.dependency_count(), 1);
    seen();

    let report = tree.unmount_root().expect("unmount");
    assert_eq!(report.unmounted, 3);
    assert!(tree.is_empty());
    assert_eq!(tree.root(), None);
    assert_eq!(tree.dependency_count(), 0);
    assert!(!tree.is_referenced(root));
    assert!(!tree.is_referenced(reader));
    assert_eq!(tree.lifecycle(reader), Lifecycle::Defunct);
    assert_eq!(tree.unmount_root(), Err(TreeError::NoRoot));
}

#[test]
fn marking_a_defunct_instance_is_misuse() {
    let mut tree = Tree::new();
    let root = tree.mount_root(node("root", vec![node("gone", vec![])])).expect("mount");
    let gone = tree.children(root)[0];
    tree.update_root(node("root", vec![])).expect("update");

    assert_eq!(tree.lifecycle(gone), Lifecycle::Defunct);
    assert_eq!(tree.mark_dirty(gone), Err(TreeError::Defunct { id: gone }));
    assert!(tree.diagnostics().has_errors());
    assert!(!tree.has_pending_work());
}

#[test]
fn mark_dirty_is_idempotent_until_flushed() {
    let mut tree = Tree::new();
    let root = tree.mount_root(node("root", vec![])).expect("mount");

    assert_eq!(tree.mark_dirty(root), Ok(true));
    assert_eq!(tree.mark_dirty(root), Ok(false));
    assert_eq!(tree.pending_rebuilds(), 1);
    assert!(tree.runtime().needs_frame());

    let report = tree.flush().expect("flush");
    assert_eq!(report.rebuilt, 1);
    assert!(!tree.is_dirty(root));
    assert!(!tree.runtime().needs_frame());
}

#[test]
fn binding_outside_a_build_is_rejected() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(shade(3, node("body", vec![])))
        .expect("mount");
    let body = tree.children(root)[0];

    assert_eq!(
        tree.depend_on::<Shade>(body, None).map(|found| found.is_some()),
        Err(TreeError::BindOutsideBuild { id: body })
    );
    assert_eq!(tree.dependency_count(), 0);
    // Non-subscribing lookups are fine at any time.
    assert_eq!(tree.find_ancestor::<Shade>(body).map(|s| s.tone), Some(3));
}

#[test]
fn reader_without_provider_sees_nothing_and_binds_nothing() {
    let mut tree = Tree::new();
    seen();
    tree.mount_root(Descriptor::component(ShadeReader)).expect("mount");
    assert_eq!(seen(), vec![None]);
    assert_eq!(tree.dependency_count(), 0);
}

#[test]
fn publish_reaches_dependents_of_notifier_providers() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(shade(1, Descriptor::component(ShadeReader)))
        .expect("mount");
    let reader = tree.children(root)[0];
    seen();

    assert_eq!(tree.dependents_of(root), vec![reader]);
    assert_eq!(tree.publish(root, None), Ok(1));
    assert!(tree.is_scheduled(reader));
    tree.flush().expect("flush");
    assert_eq!(seen(), vec![Some(1)]);
}

#[test]
fn rebuild_handles_fold_into_the_next_flush_and_die_with_the_instance() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node("root", vec![Descriptor::component(HandleGrabber)]))
        .expect("mount");
    let grabber = tree.children(root)[0];
    let handle = take_handles().pop().expect("handle");
    assert_eq!(handle.id(), grabber);

    assert!(handle.request());
    assert!(tree.has_pending_work());
    let report = tree.flush().expect("flush");
    assert_eq!(report.rebuilt, 1);
    take_handles();

    tree.update_root(node("root", vec![])).expect("update");
    assert!(handle.is_cancelled());
    assert!(!handle.request());
    assert!(!tree.has_pending_work());
}

#[test]
fn requests_racing_an_unmount_are_reported_as_cancelled() {
    let mut tree = Tree::new();
    let root = tree
        .mount_root(node("root", vec![Descriptor::component(HandleGrabber)]))
        .expect("mount");
    let grabber = tree.children(root)[0];
    let handle = take_handles().pop().expect("handle");

    // Queued before the unmount, drained after it.
    assert!(handle.request());
    tree.update_root(node("root", vec![])).expect("update");
    tree.flush().expect("flush");

    let cancelled: Vec<_> = tree
        .diagnostics()
        .of_kind(DiagnosticKind::CancelledRequest)
        .collect();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].instance, Some(grabber));
}

#[test]
fn replaced_root_is_unmounted() {
    let mut tree = Tree::new();
    let first = tree.mount_root(node("root", vec![])).expect("mount");
    let second = tree
        .update_root(Descriptor::component(ShadeReader))
        .expect("replace");
    seen();

    assert_ne!(first, second);
    assert_eq!(tree.root(), Some(second));
    assert_eq!(tree.lifecycle(first), Lifecycle::Defunct);
    assert_eq!(tree.len(), 1);
}

#[test]
fn identical_descriptor_skips_the_subtree() {
    let mut tree = Tree::new();
    let child = Descriptor::component(ShadeReader);
    tree.mount_root(shade(1, node("body", vec![child.clone()])))
        .expect("mount");
    seen();

    // Same configuration allocation for the reader: nothing below it runs.
    tree.update_root(shade(1, node("body", vec![child]))).expect("update");
    assert!(seen().is_empty());
}

#[test]
fn shutdown_hands_back_diagnostics() {
    let mut tree = Tree::new();
    tree.mount_root(node("root", vec![])).expect("mount");
    let _ = tree.mount_root(node("again", vec![]));

    let diagnostics = tree.shutdown();
    assert_eq!(diagnostics.len(), 1);
}

#[test]
fn configuration_is_shared_not_copied() {
    let descriptor = node("shared", vec![]);
    let mut tree = Tree::new();
    let root = tree.mount_root(descriptor.clone()).expect("mount");
    let held = tree.descriptor(root).expect("descriptor");

    assert!(held.same_as(&descriptor));
    let config: Arc<Node> = held.config_arc().expect("config");
    assert_eq!(config.0, "shared");
}
