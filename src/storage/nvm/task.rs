//! Background threads that checkpoint and persist the NVM log.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{NvWalError, Result};
use crate::storage::nvm::checkpointer::{CheckpointConfig, Checkpointer, TransactionCoordinator};
use crate::storage::nvm::manager::NvmLogManager;

/// Stop flag a sleeping task can be woken from.
#[derive(Default)]
struct ShutdownSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    /// Sleeps for `timeout` or until shutdown. Returns true if shut down.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut stopped = self.stopped.lock();
        while !*stopped {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut stopped),
            }
        }
        *stopped
    }
}

/// Owns a background task thread.
///
/// Dropping the handle shuts the task down and joins it.
pub struct TaskHandle {
    name: String,
    signal: Arc<ShutdownSignal>,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(&ShutdownSignal) + Send + 'static,
    {
        let signal = Arc::new(ShutdownSignal::default());
        let task_signal = Arc::clone(&signal);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(&task_signal))
            .map_err(|e| NvWalError::TaskError(format!("Failed to spawn {name}: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            signal,
            thread: Some(thread),
        })
    }

    /// Returns the thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once the task thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wakes the task, asks it to stop, and waits for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the task thread panicked.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.signal.trigger();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| NvWalError::TaskError(format!("{} panicked", self.name))),
            None => Ok(()),
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "background task ended abnormally");
        }
    }
}

/// Runs the checkpointer on a fixed period.
pub struct CheckpointTask;

impl CheckpointTask {
    /// Thread name of the checkpoint task.
    pub const THREAD_NAME: &'static str = "nvm-checkpoint";

    /// Starts the task. The first run happens one `period` after spawning.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(
        manager: Arc<NvmLogManager>,
        coordinator: Arc<dyn TransactionCoordinator>,
        config: CheckpointConfig,
    ) -> Result<TaskHandle> {
        let checkpointer = Checkpointer::new(config.policy);
        TaskHandle::spawn(Self::THREAD_NAME, move |signal| {
            while !signal.wait(config.period) {
                if let Some(info) = checkpointer.maybe_checkpoint(&manager, coordinator.as_ref()) {
                    tracing::debug!(
                        id = info.id,
                        head_lsn = info.head_lsn.val(),
                        "periodic checkpoint"
                    );
                }
            }
        })
    }
}

/// When the persist task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistSchedule {
    /// Wait before the first persist (default: 800s).
    pub delay: Duration,
    /// Wait between later persists; `None` persists once.
    pub interval: Option<Duration>,
}

impl Default for PersistSchedule {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(800),
            interval: None,
        }
    }
}

impl PersistSchedule {
    /// Sets the initial delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Repeats every `interval` after the first persist.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

/// Folds the ring into the disk log on a schedule.
pub struct PersistTask;

impl PersistTask {
    /// Thread name of the persist task.
    pub const THREAD_NAME: &'static str = "nvm-persist";

    /// Starts the task.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(manager: Arc<NvmLogManager>, schedule: PersistSchedule) -> Result<TaskHandle> {
        TaskHandle::spawn(Self::THREAD_NAME, move |signal| {
            let mut wait = schedule.delay;
            while !signal.wait(wait) {
                if let Err(e) = manager.persist() {
                    tracing::error!(error = %e, "failed to persist NVM log buffer");
                }
                match schedule.interval {
                    Some(interval) => wait = interval,
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::nvm::{CheckpointPolicy, ControlState, LatencyModel, NvmLogConfig};
    use crate::storage::wal::LogRecord;
    use crate::types::{Lsn, TxNumber};
    use tempfile::TempDir;

    struct NoActive;

    impl TransactionCoordinator for NoActive {
        fn next_tx_number(&self) -> TxNumber {
            0
        }

        fn active_tx_numbers(&self) -> Vec<TxNumber> {
            Vec::new()
        }
    }

    fn manager(dir: &TempDir) -> Arc<NvmLogManager> {
        let config = NvmLogConfig::new()
            .with_log_dir(dir.path())
            .with_capacity(32)
            .with_latency(LatencyModel::None);
        Arc::new(NvmLogManager::open(config).unwrap())
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_shutdown_wakes_sleeping_task() {
        let temp_dir = TempDir::new().unwrap();
        let handle =
            PersistTask::spawn(manager(&temp_dir), PersistSchedule::default()).unwrap();
        assert_eq!(handle.name(), "nvm-persist");

        let started = Instant::now();
        handle.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!temp_dir.path().join("nvm.bin").exists());
    }

    #[test]
    fn test_persist_task_runs_once() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let lsn = manager.append(LogRecord::start(1)).unwrap();
        manager.flush(lsn);

        let schedule = PersistSchedule::default().with_delay(Duration::from_millis(10));
        let handle = PersistTask::spawn(Arc::clone(&manager), schedule).unwrap();

        assert!(wait_for(|| handle.is_finished()));
        let state = ControlState::read(&manager.config().control_path())
            .unwrap()
            .unwrap();
        assert_eq!(state.tail.lsn, Lsn::new(1));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_checkpoint_task_moves_head() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        manager.append(LogRecord::start(1)).unwrap();
        let lsn = manager.append(LogRecord::commit(1)).unwrap();
        manager.flush(lsn);

        let config = CheckpointConfig::default()
            .with_policy(CheckpointPolicy::Periodic)
            .with_period(Duration::from_millis(10));
        let handle =
            CheckpointTask::spawn(Arc::clone(&manager), Arc::new(NoActive), config).unwrap();

        assert!(wait_for(|| manager.ring().head_lsn() == Lsn::new(2)));
        drop(handle);
    }
}
