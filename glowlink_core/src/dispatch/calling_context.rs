use tokio::sync::mpsc;

/// A unit of work posted back to a calling context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Task queue owned by the thread (or task) that starts background work and
/// expects results back on itself, the way a UI thread owns its event loop.
///
/// Background workers never run caller callbacks directly; they post them
/// through a [`ContextHandle`] and the owner runs them with
/// [`run_pending`](Self::run_pending) or [`run_next`](Self::run_next).
/// Dropping the context tears it down: later posts are discarded.
pub struct CallingContext {
    tx: mpsc::UnboundedSender<Task>,
    rx: mpsc::UnboundedReceiver<Task>,
}

impl CallingContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Returns a cloneable handle that background work can post through.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            tx: self.tx.clone(),
        }
    }

    /// Runs every task already queued without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Waits for the next posted task and runs it on the current task.
    pub async fn run_next(&mut self) {
        // The context keeps its own sender, so the channel never closes here.
        if let Some(task) = self.rx.recv().await {
            task();
        }
    }
}

impl Default for CallingContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Posting side of a [`CallingContext`].
#[derive(Clone)]
pub struct ContextHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl ContextHandle {
    /// Queues `task` on the calling context. Returns `false` (and drops the
    /// task unrun) when the context has been torn down.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }
}
