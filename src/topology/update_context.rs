//! Scoped update contexts for tree mutations.
//!
//! External views (widgets, item models) need to bracket their own
//! structural changes around tree mutations. Every mutating tree operation
//! therefore runs inside a guard that announces the mutation kind to the
//! tree's [`TreeUpdateListener`] before touching nodes and closes the
//! bracket when the guard drops, on every exit path.

use super::arena::NodeHandle;

/// Receiver for structural tree notifications. All methods default to
/// no-ops so listeners only implement the brackets they care about.
pub trait TreeUpdateListener: Send + Sync {
    /// The whole tree is about to be rebuilt.
    fn reset_begin(&self) {}
    fn reset_end(&self) {}

    /// Children `first..=last` are about to appear under `parent`
    /// (`None` for the invisible root). The range is contiguous in the
    /// parent's child list.
    fn insertion_begin(&self, parent: Option<NodeHandle>, first: usize, last: usize) {
        let _ = (parent, first, last);
    }
    fn insertion_end(&self) {}

    /// The sub-tree rooted at `node` is about to disappear.
    fn removal_begin(&self, node: NodeHandle) {
        let _ = node;
    }
    fn removal_end(&self) {}

    /// All children of a still-living `parent` are about to disappear.
    fn removal_children_begin(&self, parent: NodeHandle) {
        let _ = parent;
    }
    fn removal_children_end(&self) {}

    /// Node ordering or attributes changed without structural impact.
    fn layout_begin(&self) {}
    fn layout_end(&self) {}

    /// Status or attribute refresh touched these devices, batched once
    /// per `instance_update` call.
    fn status_update(&self, device_ids: &[String]) {
        let _ = device_ids;
    }
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl TreeUpdateListener for NoopListener {}

/// Brackets a full rebuild; closes on drop.
pub struct ResetContext<'a> {
    listener: &'a dyn TreeUpdateListener,
}

impl<'a> ResetContext<'a> {
    pub fn enter(listener: &'a dyn TreeUpdateListener) -> Self {
        listener.reset_begin();
        ResetContext { listener }
    }
}

impl Drop for ResetContext<'_> {
    fn drop(&mut self) {
        self.listener.reset_end();
    }
}

/// Brackets a contiguous child insertion; closes on drop.
pub struct InsertionContext<'a> {
    listener: &'a dyn TreeUpdateListener,
}

impl<'a> InsertionContext<'a> {
    pub fn enter(
        listener: &'a dyn TreeUpdateListener,
        parent: Option<NodeHandle>,
        first: usize,
        last: usize,
    ) -> Self {
        listener.insertion_begin(parent, first, last);
        InsertionContext { listener }
    }
}

impl Drop for InsertionContext<'_> {
    fn drop(&mut self) {
        self.listener.insertion_end();
    }
}

/// Brackets the removal of one sub-tree; closes on drop.
pub struct RemovalContext<'a> {
    listener: &'a dyn TreeUpdateListener,
}

impl<'a> RemovalContext<'a> {
    pub fn enter(listener: &'a dyn TreeUpdateListener, node: NodeHandle) -> Self {
        listener.removal_begin(node);
        RemovalContext { listener }
    }
}

impl Drop for RemovalContext<'_> {
    fn drop(&mut self) {
        self.listener.removal_end();
    }
}

/// Brackets clearing the children of a surviving parent; closes on drop.
pub struct RemovalChildrenContext<'a> {
    listener: &'a dyn TreeUpdateListener,
}

impl<'a> RemovalChildrenContext<'a> {
    pub fn enter(listener: &'a dyn TreeUpdateListener, parent: NodeHandle) -> Self {
        listener.removal_children_begin(parent);
        RemovalChildrenContext { listener }
    }
}

impl Drop for RemovalChildrenContext<'_> {
    fn drop(&mut self) {
        self.listener.removal_children_end();
    }
}

/// Brackets an in-place layout change; closes on drop.
pub struct LayoutContext<'a> {
    listener: &'a dyn TreeUpdateListener,
}

impl<'a> LayoutContext<'a> {
    pub fn enter(listener: &'a dyn TreeUpdateListener) -> Self {
        listener.layout_begin();
        LayoutContext { listener }
    }
}

impl Drop for LayoutContext<'_> {
    fn drop(&mut self) {
        self.listener.layout_end();
    }
}
