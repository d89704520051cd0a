use std::sync::Arc;

use crate::arena::InstanceId;
use crate::descriptor::{Aspect, Provider};
use crate::error::TreeError;
use crate::runtime::RebuildHandle;
use crate::tree::Tree;

/// What a build callback can see of the tree: its own identity and the
/// providers above it.
pub struct BuildContext<'a> {
    tree: &'a mut Tree,
    id: InstanceId,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(tree: &'a mut Tree, id: InstanceId) -> Self {
        Self { tree, id }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn depth(&self) -> usize {
        self.tree.depth(self.id).unwrap_or_default()
    }

    /// Reads the nearest `P` and rebuilds this instance whenever it changes.
    pub fn depend_on<P: Provider>(&mut self) -> Result<Option<Arc<P>>, TreeError> {
        self.tree.depend_on::<P>(self.id, None)
    }

    /// Like [`depend_on`](Self::depend_on), restricted to changes of `aspect`.
    pub fn depend_on_aspect<P: Provider>(&mut self, aspect: Aspect) -> Result<Option<Arc<P>>, TreeError> {
        self.tree.depend_on::<P>(self.id, Some(aspect))
    }

    /// Reads the nearest `P` without subscribing.
    pub fn find_ancestor<P: Provider>(&self) -> Option<Arc<P>> {
        self.tree.find_ancestor::<P>(self.id)
    }

    pub fn rebuild_handle(&mut self) -> Result<RebuildHandle, TreeError> {
        self.tree.rebuild_handle(self.id)
    }
}
