//! Small descriptor kinds for driving a tree through every code path.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arbor_core::{
    Aspect, BuildContext, BuildResult, Component, Descriptor, Provider, StatefulComponent,
};

/// Element configuration of [`leaf`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label(pub &'static str);

/// Element configuration of [`row`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Row;

/// Element configuration of [`column`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column;

pub fn leaf(label: &'static str) -> Descriptor {
    Descriptor::element(Label(label), Vec::new())
}

pub fn row(children: Vec<Descriptor>) -> Descriptor {
    Descriptor::element(Row, children)
}

pub fn column(children: Vec<Descriptor>) -> Descriptor {
    Descriptor::element(Column, children)
}

static NEXT_SERIAL: AtomicUsize = AtomicUsize::new(1);

/// Stateful fixture; its state counts what happened to the instance.
#[derive(Clone, Debug)]
pub struct Counter {
    pub label: &'static str,
    pub children: Vec<Descriptor>,
    pub disposals: Option<Arc<AtomicUsize>>,
}

#[derive(Debug)]
pub struct CounterState {
    /// Unique per created state; unchanged while the instance survives.
    pub serial: usize,
    pub builds: usize,
    pub updates: usize,
    pub dependency_changes: usize,
    pub last_label: &'static str,
}

impl StatefulComponent for Counter {
    type State = CounterState;

    fn create_state(&self) -> CounterState {
        CounterState {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            builds: 0,
            updates: 0,
            dependency_changes: 0,
            last_label: self.label,
        }
    }

    fn build(&self, state: &mut CounterState, _cx: &mut BuildContext<'_>) -> BuildResult {
        state.builds += 1;
        state.last_label = self.label;
        Ok(self.children.clone())
    }

    fn did_update(&self, _old: &Self, state: &mut CounterState) {
        state.updates += 1;
    }

    fn dependencies_changed(&self, state: &mut CounterState) {
        state.dependency_changes += 1;
    }

    fn dispose(&self, _state: &mut CounterState) {
        if let Some(disposals) = &self.disposals {
            disposals.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn counter(label: &'static str) -> Descriptor {
    counter_with(label, Vec::new())
}

pub fn counter_with(label: &'static str, children: Vec<Descriptor>) -> Descriptor {
    Descriptor::stateful(Counter {
        label,
        children,
        disposals: None,
    })
}

/// Provider with two independently observable aspects.
#[derive(Clone, Debug)]
pub struct Theme {
    pub color: u32,
    pub spacing: u32,
    pub child: Descriptor,
}

impl Theme {
    pub fn color_aspect() -> Aspect {
        Aspect::new("color")
    }

    pub fn spacing_aspect() -> Aspect {
        Aspect::new("spacing")
    }
}

impl Provider for Theme {
    fn child(&self) -> Descriptor {
        self.child.clone()
    }

    fn should_notify(&self, old: &Self) -> bool {
        self.color != old.color || self.spacing != old.spacing
    }

    fn changed_aspect(&self, old: &Self) -> Option<Aspect> {
        match (self.color != old.color, self.spacing != old.spacing) {
            (true, false) => Some(Self::color_aspect()),
            (false, true) => Some(Self::spacing_aspect()),
            _ => None,
        }
    }
}

pub fn theme(color: u32, spacing: u32, child: Descriptor) -> Descriptor {
    Descriptor::provider(Theme {
        color,
        spacing,
        child,
    })
}

/// Reads [`Theme`] during build, optionally through one aspect.
#[derive(Clone, Debug)]
pub struct ThemeReader {
    pub label: &'static str,
    pub aspect: Option<Aspect>,
}

#[derive(Debug, Default)]
pub struct ReaderState {
    pub builds: usize,
    pub dependency_changes: usize,
    /// `(color, spacing)` seen by the latest build, `None` without a provider.
    pub seen: Option<(u32, u32)>,
}

impl StatefulComponent for ThemeReader {
    type State = ReaderState;

    fn create_state(&self) -> ReaderState {
        ReaderState::default()
    }

    fn build(&self, state: &mut ReaderState, cx: &mut BuildContext<'_>) -> BuildResult {
        state.builds += 1;
        let theme = match self.aspect {
            Some(aspect) => cx.depend_on_aspect::<Theme>(aspect)?,
            None => cx.depend_on::<Theme>()?,
        };
        state.seen = theme.map(|theme| (theme.color, theme.spacing));
        Ok(Vec::new())
    }

    fn dependencies_changed(&self, state: &mut ReaderState) {
        state.dependency_changes += 1;
    }
}

pub fn reader(label: &'static str) -> Descriptor {
    Descriptor::stateful(ThemeReader {
        label,
        aspect: None,
    })
}

pub fn aspect_reader(label: &'static str, aspect: Aspect) -> Descriptor {
    Descriptor::stateful(ThemeReader {
        label,
        aspect: Some(aspect),
    })
}

type BuildFn = dyn Fn(&mut BuildContext<'_>) -> BuildResult + Send + Sync;

/// Component whose build is an arbitrary closure.
#[derive(Clone)]
pub struct FnComponent {
    build: Arc<BuildFn>,
}

impl fmt::Debug for FnComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnComponent")
    }
}

impl Component for FnComponent {
    fn build(&self, cx: &mut BuildContext<'_>) -> BuildResult {
        (self.build)(cx)
    }
}

pub fn build_fn(
    build: impl Fn(&mut BuildContext<'_>) -> BuildResult + Send + Sync + 'static,
) -> Descriptor {
    Descriptor::component(FnComponent {
        build: Arc::new(build),
    })
}
