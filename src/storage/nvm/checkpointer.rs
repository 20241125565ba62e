//! Checkpoint coordination for the NVM log.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::nvm::manager::NvmLogManager;
use crate::types::{Lsn, TxNumber};

/// Transaction bookkeeping the checkpointer needs from the engine.
pub trait TransactionCoordinator: Send + Sync {
    /// Number the next transaction will receive.
    fn next_tx_number(&self) -> TxNumber;

    /// Transactions that have started and not yet finished.
    ///
    /// The set must be captured atomically with respect to transaction
    /// starts.
    fn active_tx_numbers(&self) -> Vec<TxNumber>;
}

/// When a checkpoint run actually reclaims log space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum CheckpointPolicy {
    /// Checkpoint on every run.
    #[default]
    Periodic,
    /// Checkpoint once more than `threshold` transactions started since the
    /// last checkpoint.
    TxCount {
        /// Transactions between checkpoints.
        threshold: u64,
    },
    /// Checkpoint on the first run, then whenever ring utilization exceeds
    /// `threshold`.
    Utilization {
        /// Fraction of the ring in `0..=1`.
        threshold: f64,
    },
}

impl CheckpointPolicy {
    /// Default transaction count between checkpoints.
    pub const DEFAULT_TX_COUNT: u64 = 1000;

    /// Default utilization threshold.
    pub const DEFAULT_UTILIZATION: f64 = 0.7;

    /// `TxCount` with the default threshold.
    #[must_use]
    pub const fn tx_count() -> Self {
        Self::TxCount {
            threshold: Self::DEFAULT_TX_COUNT,
        }
    }

    /// `Utilization` with the default threshold.
    #[must_use]
    pub const fn utilization() -> Self {
        Self::Utilization {
            threshold: Self::DEFAULT_UTILIZATION,
        }
    }
}

/// Checkpoint scheduling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Trigger policy (default: periodic).
    pub policy: CheckpointPolicy,
    /// Time between runs (default: 300s).
    pub period: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            policy: CheckpointPolicy::default(),
            period: Duration::from_secs(300),
        }
    }
}

impl CheckpointConfig {
    /// Sets the trigger policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the time between runs.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

/// Result of a completed checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Checkpoint ID.
    pub id: u64,
    /// Head LSN after retention.
    pub head_lsn: Lsn,
    /// Active transactions the checkpoint protected.
    pub active: Vec<TxNumber>,
}

/// Decides when to checkpoint and drives retention on the manager.
pub struct Checkpointer {
    policy: CheckpointPolicy,
    /// Next checkpoint ID.
    next_checkpoint_id: AtomicU64,
    /// Next transaction number seen at the last checkpoint.
    last_tx_number: AtomicI64,
    /// Set until the first checkpoint completes.
    first: AtomicBool,
}

impl Checkpointer {
    /// Creates a checkpointer with the given policy.
    #[must_use]
    pub fn new(policy: CheckpointPolicy) -> Self {
        Self {
            policy,
            next_checkpoint_id: AtomicU64::new(1),
            last_tx_number: AtomicI64::new(0),
            first: AtomicBool::new(true),
        }
    }

    /// Returns the trigger policy.
    #[must_use]
    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    /// Returns and increments the next checkpoint ID.
    pub fn next_id(&self) -> u64 {
        self.next_checkpoint_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current checkpoint ID (without incrementing).
    #[must_use]
    pub fn current_id(&self) -> u64 {
        self.next_checkpoint_id.load(Ordering::Relaxed)
    }

    /// Returns true if the policy calls for a checkpoint now.
    #[must_use]
    pub fn should_checkpoint(
        &self,
        manager: &NvmLogManager,
        coordinator: &dyn TransactionCoordinator,
    ) -> bool {
        match self.policy {
            CheckpointPolicy::Periodic => true,
            CheckpointPolicy::TxCount { threshold } => {
                let started =
                    coordinator.next_tx_number() - self.last_tx_number.load(Ordering::Acquire);
                started > threshold as i64
            }
            CheckpointPolicy::Utilization { threshold } => {
                self.first.load(Ordering::Acquire) || manager.utilization() > threshold
            }
        }
    }

    /// Checkpoints unconditionally.
    ///
    /// Captures the active set, moves the ring head past everything those
    /// transactions no longer need, and returns the new checkpoint's info.
    pub fn checkpoint(
        &self,
        manager: &NvmLogManager,
        coordinator: &dyn TransactionCoordinator,
    ) -> CheckpointInfo {
        let id = self.next_id();
        let tx_number = coordinator.next_tx_number();
        let active = coordinator.active_tx_numbers();

        let head_lsn = manager.checkpoint(&active);

        self.last_tx_number.store(tx_number, Ordering::Release);
        self.first.store(false, Ordering::Release);

        CheckpointInfo {
            id,
            head_lsn,
            active,
        }
    }

    /// Checkpoints if the policy calls for it.
    pub fn maybe_checkpoint(
        &self,
        manager: &NvmLogManager,
        coordinator: &dyn TransactionCoordinator,
    ) -> Option<CheckpointInfo> {
        if self.should_checkpoint(manager, coordinator) {
            Some(self.checkpoint(manager, coordinator))
        } else {
            None
        }
    }
}

impl Default for Checkpointer {
    fn default() -> Self {
        Self::new(CheckpointPolicy::default())
    }
}
