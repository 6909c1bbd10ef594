//! Network namespace utilities using native Linux syscalls.
//!
//! The dataplane runs in its own network namespace, reachable through
//! `/proc/<pid>/ns/net`. This module runs code inside that namespace using
//! the `setns` syscall directly, without spawning `nsenter` or `ip netns exec`.
//!
//! # Architecture
//!
//! `nix::sched::setns` switches the calling thread's network namespace. Since
//! namespace changes affect the entire thread, operations run in a dedicated
//! thread spawned with `std::thread::spawn`. A thread that entered another
//! namespace is never handed back to a pool: if restoring the original
//! namespace fails, the thread simply terminates.
//!
//! Netlink sockets are bound to the namespace they are opened in, so
//! [`run_netlink_in_namespace`] opens its rtnetlink connection after the
//! switch, on a private current-thread runtime.

use std::fs::File;
use std::future::Future;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use nix::sched::{CloneFlags, setns};
use rtnetlink::Handle;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors that can occur during namespace operations.
#[derive(Error, Debug)]
pub enum NamespaceError {
    /// Failed to open namespace file
    #[error("Failed to open namespace file {path}: {source}")]
    OpenNamespace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to enter namespace via setns
    #[error("Failed to enter namespace {path}: {source}")]
    EnterNamespace {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// Namespace path not found (process gone)
    #[error("Namespace path does not exist: {0}")]
    NamespaceNotFound(PathBuf),

    /// The namespace thread died before reporting a result
    #[error("Namespace worker thread failed: {0}")]
    ThreadFailed(String),

    /// Operation failed inside namespace
    #[error("Operation failed inside namespace: {0}")]
    OperationFailed(String),
}

/// Specifies how to locate a network namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum NamespacePath {
    /// The namespace of the agent itself (no switch needed)
    Default,

    /// The network namespace of a running process (e.g. the VPP pid)
    Pid(u32),
}

impl NamespacePath {
    /// Resolves the namespace to an actual file path.
    ///
    /// Returns `None` for the default namespace (no switch needed).
    pub fn resolve(&self) -> Result<Option<PathBuf>, NamespaceError> {
        match self {
            NamespacePath::Default => Ok(None),

            NamespacePath::Pid(pid) => {
                let path = PathBuf::from(format!("/proc/{}/ns/net", pid));
                if path.exists() {
                    Ok(Some(path))
                } else {
                    Err(NamespaceError::NamespaceNotFound(path))
                }
            }
        }
    }
}

/// Runs a synchronous closure in a specified network namespace.
///
/// This function:
/// 1. Saves the current network namespace
/// 2. Switches to the target namespace using `setns`
/// 3. Executes the provided closure
/// 4. Returns to the original namespace
///
/// # Returns
///
/// * `Ok(T)` - The closure's return value
/// * `Err(e)` - Namespace switching failed
#[instrument(skip(f), fields(namespace = ?namespace))]
pub async fn run_in_namespace<F, T>(namespace: NamespacePath, f: F) -> Result<T, NamespaceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    // For default namespace, just run the closure directly
    if matches!(namespace, NamespacePath::Default) {
        debug!("Running in default namespace, no switch needed");
        return tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| NamespaceError::ThreadFailed(e.to_string()));
    }

    let ns_path = namespace
        .resolve()?
        .ok_or_else(|| NamespaceError::NamespaceNotFound(PathBuf::from("unresolved")))?;

    debug!("Switching to namespace: {:?}", ns_path);

    let (tx, rx) = tokio::sync::oneshot::channel();

    std::thread::spawn(move || {
        let result = run_in_namespace_sync(&ns_path, f);
        // Thread terminates after sending result, ensuring namespace isolation
        let _ = tx.send(result);
    });

    rx.await
        .map_err(|_| NamespaceError::ThreadFailed("namespace thread panicked".to_string()))?
}

/// Synchronous version of namespace execution (runs on current thread).
///
/// It should only be called from a dedicated thread, never from the async
/// runtime. After the closure completes (or panics), it attempts to restore
/// the original namespace.
#[instrument(skip(f), fields(ns_path = %ns_path.display()))]
pub fn run_in_namespace_sync<F, T>(ns_path: &Path, f: F) -> Result<T, NamespaceError>
where
    F: FnOnce() -> T,
{
    let current_ns =
        File::open("/proc/self/ns/net").map_err(|e| NamespaceError::OpenNamespace {
            path: PathBuf::from("/proc/self/ns/net"),
            source: e,
        })?;

    let target_ns = File::open(ns_path).map_err(|e| NamespaceError::OpenNamespace {
        path: ns_path.to_path_buf(),
        source: e,
    })?;

    setns(target_ns.as_fd(), CloneFlags::CLONE_NEWNET).map_err(|e| {
        NamespaceError::EnterNamespace {
            path: ns_path.to_path_buf(),
            source: e,
        }
    })?;

    debug!("Entered namespace {:?}", ns_path);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    if let Err(e) = setns(current_ns.as_fd(), CloneFlags::CLONE_NEWNET) {
        // The thread exits right after, so nothing else runs in the wrong namespace
        warn!(
            "Failed to return to original namespace: {}. Thread may be in wrong namespace!",
            e
        );
    } else {
        debug!("Returned to original namespace");
    }

    match result {
        Ok(value) => Ok(value),
        Err(panic_payload) => std::panic::resume_unwind(panic_payload),
    }
}

/// Runs an rtnetlink operation inside a non-default namespace.
///
/// The closure receives a [`Handle`] whose socket lives in the target
/// namespace. It runs to completion on a current-thread runtime owned by the
/// namespace thread.
pub async fn run_netlink_in_namespace<F, Fut, T>(
    namespace: NamespacePath,
    f: F,
) -> Result<T, NamespaceError>
where
    F: FnOnce(Handle) -> Fut + Send + 'static,
    Fut: Future<Output = T>,
    T: Send + 'static,
{
    if matches!(namespace, NamespacePath::Default) {
        return Err(NamespaceError::OperationFailed(
            "netlink in the default namespace must use the agent connection".to_string(),
        ));
    }

    run_in_namespace(namespace, move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NamespaceError::OperationFailed(format!("Failed to create runtime: {}", e)))?;

        rt.block_on(async move {
            let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| {
                NamespaceError::OperationFailed(format!("Netlink connection failed: {}", e))
            })?;
            tokio::spawn(connection);
            Ok(f(handle).await)
        })
    })
    .await?
}
