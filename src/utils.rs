//! Small cross-cutting helpers: thread affinity and the log directory
//! path (§5, §10.1).

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};
use tracing::warn;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs `SIGINT`/`SIGTERM` handlers that flip a process-wide flag
/// rather than terminating the process (§5 shutdown contract: "cooperative
/// via flags + condition broadcasts"). Call once per process; the main
/// loop then polls [`shutdown_requested`].
pub fn install_shutdown_handler() {
    unsafe {
        let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(on_shutdown_signal));
        let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(on_shutdown_signal));
    }
}

/// Polls the flag flipped by the handler installed in
/// [`install_shutdown_handler`].
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Spawns `body` on a new OS thread, optionally pinned to `core_id`
/// (§5: "may pin the generator thread on platforms that support it for
/// lower jitter"), and returns immediately with a `JoinHandle` — callers
/// that want the long-running generator loop to run alongside the
/// client agent's own receive loop do not join it until shutdown.
pub fn spawn_with_affinity<F, T>(core_id: Option<usize>, body: F) -> std::thread::JoinHandle<Result<T>>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    std::thread::spawn(move || -> Result<T> {
        if let Some(id) = core_id {
            let core_ids = core_affinity::get_core_ids()
                .ok_or_else(|| anyhow!("failed to get core IDs, is this a supported platform?"))?;

            if core_ids.is_empty() {
                return Err(anyhow!("no available CPU cores found"));
            }

            let target_core = core_ids.get(id).ok_or_else(|| {
                anyhow!(
                    "invalid core ID: {}. System has {} available cores (valid IDs are 0 to {})",
                    id,
                    core_ids.len(),
                    core_ids.len() - 1
                )
            })?;

            if !core_affinity::set_for_current(*target_core) {
                warn!(core_id = id, "failed to set thread affinity");
            }
        }
        body()
    })
}

/// `$HOME/rscmng_logs/` (§6: "Diagnostic logs written under
/// `$HOME/rscmng_logs/`"). Falls back to the current directory if
/// `$HOME` is unset, matching `tracing-appender`'s own tolerance of a
/// missing directory (it creates the directory on first write).
pub fn log_directory() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("rscmng_logs"),
        None => PathBuf::from("rscmng_logs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_with_affinity_runs_and_returns_result() {
        let result = spawn_with_affinity(None, || Ok(42)).join().unwrap().unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn spawn_with_affinity_invalid_core_id_errors() {
        if let Some(cores) = core_affinity::get_core_ids() {
            let result: Result<()> = spawn_with_affinity(Some(9999), || Ok(())).join().unwrap();
            assert!(result.is_err());
            let message = result.err().unwrap().to_string();
            assert!(message.contains(&format!("System has {} available cores", cores.len())));
        }
    }

    #[test]
    fn log_directory_ends_with_rscmng_logs() {
        assert_eq!(log_directory().file_name().unwrap(), "rscmng_logs");
    }
}
