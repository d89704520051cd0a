//! Immutable descriptions of what should exist at a tree position.
//!
//! A [`Descriptor`] is cheap to build every frame and is never mutated once
//! built. Its identity for reconciliation is its [`TypeTag`] plus an optional
//! [`Key`]; everything else is opaque configuration interpreted by the
//! authoring trait the descriptor was built from.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::context::BuildContext;
use crate::error::TreeError;
use crate::hash::hash_one;

/// What a build step hands back: the immediate child descriptors.
pub type BuildResult = Result<Vec<Descriptor>, TreeError>;

/// Runtime type identity of a descriptor's configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum KeyScope {
    Local,
    Global,
}

/// Explicit identity for a descriptor.
///
/// Local keys only disambiguate siblings. Global keys are unique across the
/// whole tree and let an instance move to a different parent without losing
/// its state.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    hash: u64,
    scope: KeyScope,
}

impl Key {
    pub fn local<K: Hash + ?Sized>(value: &K) -> Self {
        Self {
            hash: hash_one(value),
            scope: KeyScope::Local,
        }
    }

    pub fn global<K: Hash + ?Sized>(value: &K) -> Self {
        Self {
            hash: hash_one(value),
            scope: KeyScope::Global,
        }
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        self.scope == KeyScope::Global
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.hash
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            KeyScope::Local => write!(f, "key#{:016x}", self.hash),
            KeyScope::Global => write!(f, "global#{:016x}", self.hash),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Narrows which part of a provider's data a dependent reads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Aspect(u64);

impl Aspect {
    pub fn new<A: Hash + ?Sized>(value: &A) -> Self {
        Self(hash_one(value))
    }
}

/// Produces children from configuration alone.
pub trait Component: Send + Sync + 'static {
    fn build(&self, cx: &mut BuildContext<'_>) -> BuildResult;
}

/// Produces children from configuration plus a state payload that lives as
/// long as the instance does, surviving every descriptor replacement.
pub trait StatefulComponent: Send + Sync + 'static {
    type State: 'static;

    /// Called once, when the instance is first mounted.
    fn create_state(&self) -> Self::State;

    fn build(&self, state: &mut Self::State, cx: &mut BuildContext<'_>) -> BuildResult;

    /// Called after the descriptor was replaced by one of the same type and key.
    fn did_update(&self, _old: &Self, _state: &mut Self::State) {}

    /// Called before a rebuild triggered by a provider this instance depends on.
    fn dependencies_changed(&self, _state: &mut Self::State) {}

    /// Called when the instance is unmounted, right before the state is dropped.
    fn dispose(&self, _state: &mut Self::State) {}
}

/// Exposes data to descendants that look it up with
/// [`BuildContext::depend_on`].
pub trait Provider: Send + Sync + 'static {
    fn child(&self) -> Descriptor;

    /// Whether dependents should rebuild after `old` was replaced by `self`.
    fn should_notify(&self, old: &Self) -> bool;

    /// The aspect that changed, if the change is confined to one.
    fn changed_aspect(&self, _old: &Self) -> Option<Aspect> {
        None
    }
}

pub(crate) trait ErasedStateful: Send + Sync {
    fn state_type(&self) -> &'static str;
    fn make_state(&self) -> Box<dyn Any>;
    fn run_build(&self, state: &mut dyn Any, cx: &mut BuildContext<'_>) -> Option<BuildResult>;
    fn notify_update(&self, old: &dyn Any, state: &mut dyn Any);
    fn notify_dependencies(&self, state: &mut dyn Any);
    fn dispose_state(&self, state: &mut dyn Any);
}

impl<S: StatefulComponent> ErasedStateful for S {
    fn state_type(&self) -> &'static str {
        type_name::<S::State>()
    }

    fn make_state(&self) -> Box<dyn Any> {
        Box::new(self.create_state())
    }

    fn run_build(&self, state: &mut dyn Any, cx: &mut BuildContext<'_>) -> Option<BuildResult> {
        let state = state.downcast_mut::<S::State>()?;
        Some(StatefulComponent::build(self, state, cx))
    }

    fn notify_update(&self, old: &dyn Any, state: &mut dyn Any) {
        if let (Some(old), Some(state)) = (old.downcast_ref::<S>(), state.downcast_mut::<S::State>()) {
            self.did_update(old, state);
        }
    }

    fn notify_dependencies(&self, state: &mut dyn Any) {
        if let Some(state) = state.downcast_mut::<S::State>() {
            self.dependencies_changed(state);
        }
    }

    fn dispose_state(&self, state: &mut dyn Any) {
        if let Some(state) = state.downcast_mut::<S::State>() {
            self.dispose(state);
        }
    }
}

pub(crate) trait ErasedProvider: Send + Sync {
    fn provided_child(&self) -> Descriptor;
    fn notifies(&self, old: &dyn Any) -> bool;
    fn aspect_changed(&self, old: &dyn Any) -> Option<Aspect>;
}

impl<P: Provider> ErasedProvider for P {
    fn provided_child(&self) -> Descriptor {
        self.child()
    }

    fn notifies(&self, old: &dyn Any) -> bool {
        // A provider of another type never reaches here; notify if it somehow does.
        old.downcast_ref::<P>()
            .map_or(true, |old| self.should_notify(old))
    }

    fn aspect_changed(&self, old: &dyn Any) -> Option<Aspect> {
        old.downcast_ref::<P>().and_then(|old| self.changed_aspect(old))
    }
}

#[derive(Clone)]
pub(crate) enum DescriptorKind {
    Component(Arc<dyn Component>),
    Stateful(Arc<dyn ErasedStateful>),
    Provider(Arc<dyn ErasedProvider>),
    Element(Arc<[Descriptor]>),
}

/// The closed set of instance kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Kind {
    Component,
    Stateful,
    Provider,
    /// Carries its children directly; the bridge point for render nodes.
    Element,
}

#[derive(Clone)]
pub struct Descriptor {
    tag: TypeTag,
    key: Option<Key>,
    config: Arc<dyn Any + Send + Sync>,
    kind: DescriptorKind,
}

impl Descriptor {
    pub fn component<C: Component>(component: C) -> Self {
        let shared = Arc::new(component);
        Self {
            tag: TypeTag::of::<C>(),
            key: None,
            config: shared.clone(),
            kind: DescriptorKind::Component(shared),
        }
    }

    pub fn stateful<S: StatefulComponent>(component: S) -> Self {
        let shared = Arc::new(component);
        Self {
            tag: TypeTag::of::<S>(),
            key: None,
            config: shared.clone(),
            kind: DescriptorKind::Stateful(shared),
        }
    }

    pub fn provider<P: Provider>(provider: P) -> Self {
        let shared = Arc::new(provider);
        Self {
            tag: TypeTag::of::<P>(),
            key: None,
            config: shared.clone(),
            kind: DescriptorKind::Provider(shared),
        }
    }

    pub fn element<E: Send + Sync + 'static>(config: E, children: Vec<Descriptor>) -> Self {
        Self {
            tag: TypeTag::of::<E>(),
            key: None,
            config: Arc::new(config),
            kind: DescriptorKind::Element(children.into()),
        }
    }

    /// Returns a copy carrying `key`; the configuration stays shared.
    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    #[inline]
    pub fn type_tag(&self) -> TypeTag {
        self.tag
    }

    #[inline]
    pub fn key(&self) -> Option<Key> {
        self.key
    }

    pub fn kind(&self) -> Kind {
        match self.kind {
            DescriptorKind::Component(_) => Kind::Component,
            DescriptorKind::Stateful(_) => Kind::Stateful,
            DescriptorKind::Provider(_) => Kind::Provider,
            DescriptorKind::Element(_) => Kind::Element,
        }
    }

    pub fn config<T: 'static>(&self) -> Option<&T> {
        self.config.downcast_ref::<T>()
    }

    pub fn config_arc<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.config.clone().downcast::<T>().ok()
    }

    /// Children of an element descriptor; empty for every other kind.
    pub fn children(&self) -> &[Descriptor] {
        match &self.kind {
            DescriptorKind::Element(children) => children,
            _ => &[],
        }
    }

    /// Whether an instance built from `self` may be updated in place to `next`.
    #[inline]
    pub fn can_update(&self, next: &Descriptor) -> bool {
        self.tag == next.tag && self.key == next.key
    }

    /// Identical descriptor: same configuration allocation and same key.
    pub fn same_as(&self, other: &Descriptor) -> bool {
        let a = Arc::as_ptr(&self.config) as *const ();
        let b = Arc::as_ptr(&other.config) as *const ();
        a == b && self.key == other.key
    }

    pub(crate) fn erased_config(&self) -> &(dyn Any + Send + Sync) {
        &*self.config
    }

    pub(crate) fn descriptor_kind(&self) -> &DescriptorKind {
        &self.kind
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("type", &self.tag)
            .field("key", &self.key)
            .field("kind", &self.kind())
            .finish()
    }
}
