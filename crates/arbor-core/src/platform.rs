//! Platform abstraction for frame scheduling.
//!
//! The tree never drives itself: when work becomes pending it asks the host,
//! through a [`FrameScheduler`], to run a flush on the frame-driver thread.

/// Requests frames from the host.
///
/// Implementations must be safe to call from any thread; the request itself
/// only signals, the flush still happens on the thread that owns the tree.
pub trait FrameScheduler: Send + Sync {
    fn schedule_frame(&self);
}

/// Scheduler for hosts that poll [`Tree::has_pending_work`](crate::Tree::has_pending_work).
#[derive(Debug, Default)]
pub struct DefaultScheduler;

impl FrameScheduler for DefaultScheduler {
    fn schedule_frame(&self) {}
}
