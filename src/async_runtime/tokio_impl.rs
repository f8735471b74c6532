use std::future::Future;

pub type JoinHandle<T> = ::tokio::task::JoinHandle<T>;

pub type Runtime = ::tokio::runtime::Runtime;

/// Builds a multi-threaded runtime with `num_threads` worker threads.
pub fn init(num_threads: usize) -> Result<Runtime, ()> {
    ::tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_threads.max(1))
        .thread_name("bfcp-worker")
        .thread_stack_size(2 * 1024 * 1024)
        .enable_all()
        .build()
        .map_err(|_| ())
}

/// Spawns a future onto the ambient tokio runtime.
///
/// Must be called from within a running runtime (e.g. from `Endpoint::connect`,
/// which is itself invoked from a task, or after entering one with `init`).
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    ::tokio::spawn(fut)
}
