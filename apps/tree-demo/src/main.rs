use arbor_core::{
    BuildContext, BuildResult, Component, Descriptor, InstanceId, Key, Provider,
    StatefulComponent, Tree,
};
use arbor_runtime_std::{init_tracing, FrameDriver};

struct Palette {
    dark: bool,
    child: Descriptor,
}

impl Provider for Palette {
    fn child(&self) -> Descriptor {
        self.child.clone()
    }

    fn should_notify(&self, old: &Self) -> bool {
        self.dark != old.dark
    }
}

struct TodoList {
    items: Vec<(u32, &'static str)>,
}

impl Component for TodoList {
    fn build(&self, _cx: &mut BuildContext<'_>) -> BuildResult {
        Ok(self
            .items
            .iter()
            .map(|(id, title)| Descriptor::stateful(TodoItem { title: *title }).with_key(Key::local(id)))
            .collect())
    }
}

struct TodoItem {
    title: &'static str,
}

#[derive(Debug, Default)]
struct TodoState {
    builds: usize,
    dark: bool,
}

impl StatefulComponent for TodoItem {
    type State = TodoState;

    fn create_state(&self) -> TodoState {
        TodoState::default()
    }

    fn build(&self, state: &mut TodoState, cx: &mut BuildContext<'_>) -> BuildResult {
        state.builds += 1;
        state.dark = cx.depend_on::<Palette>()?.is_some_and(|palette| palette.dark);
        Ok(Vec::new())
    }
}

fn app(dark: bool, items: Vec<(u32, &'static str)>) -> Descriptor {
    Descriptor::provider(Palette {
        dark,
        child: Descriptor::component(TodoList { items }),
    })
}

fn print_tree(tree: &Tree) {
    fn walk(tree: &Tree, id: InstanceId, out: &mut String) {
        let depth = tree.depth(id).unwrap_or_default();
        let Some(descriptor) = tree.descriptor(id) else {
            return;
        };
        let name = descriptor.type_tag().name().rsplit("::").next().unwrap_or("?");
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{name} {id}"));
        if let Some(item) = descriptor.config::<TodoItem>() {
            if let Some(state) = tree.state::<TodoState>(id) {
                out.push_str(&format!(
                    " \"{}\" builds={} dark={}",
                    item.title, state.builds, state.dark
                ));
            }
        }
        out.push('\n');
        for child in tree.children(id) {
            walk(tree, *child, out);
        }
    }

    let mut out = String::new();
    if let Some(root) = tree.root() {
        walk(tree, root, &mut out);
    }
    print!("{out}");
}

fn main() {
    init_tracing("info");
    let mut driver = FrameDriver::from_env();

    println!("=== Arbor tree demo ===");
    let steps: Vec<(&str, Descriptor)> = vec![
        ("mount", app(false, vec![(1, "write"), (2, "review"), (3, "ship")])),
        ("reorder", app(false, vec![(3, "ship"), (1, "write"), (2, "review")])),
        ("dark mode", app(true, vec![(3, "ship"), (1, "write"), (2, "review")])),
        ("remove review", app(true, vec![(3, "ship"), (1, "write")])),
    ];

    for (label, content) in steps {
        if let Err(error) = driver.set_root(content) {
            tracing::error!(%error, step = label, "reconciliation failed");
            break;
        }
        if let Err(error) = driver.run_until_idle(4) {
            tracing::error!(%error, step = label, "flush failed");
            break;
        }
        println!("-- {label} ({} instances)", driver.tree().len());
        print_tree(driver.tree());
    }

    let diagnostics = driver.shutdown();
    println!("diagnostics recorded: {}", diagnostics.len());
    for diagnostic in diagnostics.entries() {
        println!("  {diagnostic}");
    }
}
