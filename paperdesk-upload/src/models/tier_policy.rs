//! Subscription tier policy and its shared store
//!
//! A `TierPolicy` is an immutable snapshot. The remaining quota is only ever
//! learned from the server: it starts `Unknown` and each server response that
//! reports limits replaces it wholesale.

use paperdesk_common::config::TierConfig;
use paperdesk_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::watch;

/// Remaining uploads in the current period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum RemainingQuota {
    /// No server response seen yet
    #[default]
    Unknown,
    /// Last value reported by the server
    Known(u32),
}

impl RemainingQuota {
    pub fn known(self) -> Option<u32> {
        match self {
            RemainingQuota::Known(n) => Some(n),
            RemainingQuota::Unknown => None,
        }
    }
}

impl From<Option<u32>> for RemainingQuota {
    fn from(value: Option<u32>) -> Self {
        value.map_or(RemainingQuota::Unknown, RemainingQuota::Known)
    }
}

impl From<RemainingQuota> for Option<u32> {
    fn from(value: RemainingQuota) -> Self {
        value.known()
    }
}

impl fmt::Display for RemainingQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemainingQuota::Unknown => write!(f, "unknown"),
            RemainingQuota::Known(n) => write!(f, "{}", n),
        }
    }
}

/// Tier snapshot as read from the user profile
///
/// Wire shape: `{ "tierName": "free", "maxFilesPerBatch": 5, "remaining": null }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPolicy {
    tier_name: String,
    max_files_per_batch: NonZeroU32,
    #[serde(rename = "remaining", default)]
    remaining_this_period: RemainingQuota,
}

impl TierPolicy {
    /// Create a policy with unknown remaining quota
    ///
    /// Fails if `max_files_per_batch` is zero.
    pub fn new(tier_name: impl Into<String>, max_files_per_batch: u32) -> Result<Self> {
        let tier_name = tier_name.into();
        let max_files_per_batch = NonZeroU32::new(max_files_per_batch).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Tier '{}' must allow at least one file per batch",
                tier_name
            ))
        })?;

        Ok(Self {
            tier_name,
            max_files_per_batch,
            remaining_this_period: RemainingQuota::Unknown,
        })
    }

    pub fn tier_name(&self) -> &str {
        &self.tier_name
    }

    pub fn max_files_per_batch(&self) -> u32 {
        self.max_files_per_batch.get()
    }

    pub fn remaining_this_period(&self) -> RemainingQuota {
        self.remaining_this_period
    }

    /// True if `file_count` is over the per-batch ceiling
    pub fn exceeds_batch_limit(&self, file_count: usize) -> bool {
        file_count as u64 > self.max_files_per_batch.get() as u64
    }

    /// True if the server has reported the quota as used up
    pub fn is_exhausted(&self) -> bool {
        self.remaining_this_period == RemainingQuota::Known(0)
    }

    /// New snapshot carrying the server's remaining figure
    pub fn with_server_remaining(&self, remaining: u32) -> Self {
        Self {
            remaining_this_period: RemainingQuota::Known(remaining),
            ..self.clone()
        }
    }
}

impl TryFrom<&TierConfig> for TierPolicy {
    type Error = Error;

    fn try_from(config: &TierConfig) -> Result<Self> {
        TierPolicy::new(config.name.clone(), config.max_files_per_batch)
    }
}

/// Process-wide holder of the current tier policy
///
/// Read-mostly, single-writer: sessions read snapshots and only reconciled
/// server responses write. Subscribers see every applied change.
#[derive(Clone)]
pub struct PolicyStore {
    tx: Arc<watch::Sender<TierPolicy>>,
}

impl PolicyStore {
    pub fn new(policy: TierPolicy) -> Self {
        let (tx, _) = watch::channel(policy);
        Self { tx: Arc::new(tx) }
    }

    /// Current policy snapshot
    pub fn snapshot(&self) -> TierPolicy {
        self.tx.borrow().clone()
    }

    /// Receive every future policy change
    pub fn subscribe(&self) -> watch::Receiver<TierPolicy> {
        self.tx.subscribe()
    }

    /// Install the policy produced by the result reconciler
    ///
    /// Returns true if the stored policy changed.
    pub(crate) fn apply_reconciled(&self, updated: TierPolicy) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == updated {
                false
            } else {
                *current = updated;
                true
            }
        })
    }
}
