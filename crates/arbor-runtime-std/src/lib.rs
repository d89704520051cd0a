//! Standard frame driver backed by Rust's `std` library.
//!
//! This crate provides a concrete [`FrameScheduler`] for `arbor-core` plus a
//! [`FrameDriver`] that owns a tree and flushes it whenever a frame was
//! requested. Hosts with their own event loop register a waker and call
//! [`FrameDriver::frame`] when it fires.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use arbor_core::{
    Descriptor, Diagnostics, FrameScheduler, InstanceId, PassReport, Runtime, Tree, TreeConfig,
    TreeError,
};
use tracing_subscriber::EnvFilter;

type Waker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Scheduler that records frame requests and forwards them to a waker.
pub struct StdScheduler {
    frame_requested: AtomicBool,
    frame_waker: RwLock<Option<Waker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            frame_requested: AtomicBool::new(false),
            frame_waker: RwLock::new(None),
        }
    }

    /// Returns whether a frame has been requested since the last call.
    pub fn take_frame_request(&self) -> bool {
        self.frame_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker that will be invoked whenever a new frame is scheduled.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    /// Clears any registered frame waker.
    pub fn clear_frame_waker(&self) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn wake(&self) {
        let waker = self
            .frame_waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field(
                "frame_requested",
                &self.frame_requested.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl FrameScheduler for StdScheduler {
    fn schedule_frame(&self) {
        self.frame_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// Convenience container bundling the standard scheduler and a runtime.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    runtime: Runtime,
}

impl StdRuntime {
    pub fn new() -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        Self { scheduler, runtime }
    }

    /// Returns an [`arbor_core::Runtime`] configured with the standard scheduler.
    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn take_frame_request(&self) -> bool {
        self.scheduler.take_frame_request()
    }

    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_frame_waker(waker);
    }

    pub fn clear_frame_waker(&self) {
        self.scheduler.clear_frame_waker();
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns a tree on the frame-driver thread and flushes it once per frame.
pub struct FrameDriver {
    runtime: StdRuntime,
    tree: Tree,
    frames: u64,
}

impl FrameDriver {
    pub fn new(config: TreeConfig) -> Self {
        let runtime = StdRuntime::new();
        let tree = Tree::with_runtime(config, runtime.runtime());
        Self {
            runtime,
            tree,
            frames: 0,
        }
    }

    /// Driver configured from the process environment.
    pub fn from_env() -> Self {
        Self::new(TreeConfig::from_env())
    }

    /// Mounts `content` as the root, or reconciles the current root against it.
    pub fn set_root(&mut self, content: Descriptor) -> Result<InstanceId, TreeError> {
        self.tree.update_root(content)
    }

    /// Runs one frame if anything asked for one. Returns `Ok(None)` when the
    /// tree was idle.
    pub fn frame(&mut self) -> Result<Option<PassReport>, TreeError> {
        let requested = self.runtime.take_frame_request();
        if !requested && !self.tree.has_pending_work() {
            return Ok(None);
        }
        self.frames += 1;
        let span = tracing::debug_span!("frame", number = self.frames);
        let _entered = span.enter();
        let report = self.tree.flush()?;
        tracing::debug!(
            rebuilt = report.rebuilt,
            mounted = report.mounted,
            unmounted = report.unmounted,
            deferred = report.deferred,
            "frame complete"
        );
        Ok(Some(report))
    }

    /// Runs frames until the tree is idle or `max_frames` ran. Returns the
    /// number of frames that did work.
    pub fn run_until_idle(&mut self, max_frames: usize) -> Result<usize, TreeError> {
        let mut ran = 0;
        while ran < max_frames {
            match self.frame()? {
                Some(_) => ran += 1,
                None => break,
            }
        }
        if self.tree.has_pending_work() {
            tracing::warn!(max_frames, "tree still has pending work after frame budget");
        }
        Ok(ran)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn runtime(&self) -> &StdRuntime {
        &self.runtime
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// Unmounts the tree and hands back its diagnostics.
    pub fn shutdown(self) -> Diagnostics {
        self.runtime.clear_frame_waker();
        self.tree.shutdown()
    }
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new(TreeConfig::default())
    }
}

impl fmt::Debug for FrameDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDriver")
            .field("frames", &self.frames)
            .field("tree", &self.tree)
            .finish()
    }
}

/// Installs a global `fmt` subscriber filtered by `ARBOR_LOG`, falling back
/// to `default_directive` (for example `"arbor_core=debug"`). Returns
/// `false` when a subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env("ARBOR_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
