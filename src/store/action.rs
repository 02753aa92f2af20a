use tracing::debug;

use super::swap_precondition;
use super::DynamicStatusStore;
use crate::metrics::TXN_MATCH_FAILURES;
use crate::Compare;
use crate::DssError;
use crate::DssResult;
use crate::Txn;
use crate::TxnOp;

/// One conditional mutation of a batch transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DssAction {
    /// Create `key`; requires the key to be absent
    Add { key: String, value: String },
    /// Unconditional upsert
    Update { key: String, value: String },
    /// Delete `key`; when `old_value` is set the current value must match it
    Delete {
        key: String,
        old_value: Option<String>,
    },
    /// Unconditional range delete
    DeletePrefix { prefix: String },
    /// Replace `old_value` with `new_value`; requires the current value to match
    Swap {
        key: String,
        old_value: String,
        new_value: String,
    },
}

impl DssAction {
    pub fn add(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        DssAction::Add {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn update(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        DssAction::Update {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        DssAction::Delete {
            key: key.into(),
            old_value: None,
        }
    }

    pub fn delete_if(
        key: impl Into<String>,
        old_value: impl Into<String>,
    ) -> Self {
        DssAction::Delete {
            key: key.into(),
            old_value: Some(old_value.into()),
        }
    }

    pub fn delete_prefix(prefix: impl Into<String>) -> Self {
        DssAction::DeletePrefix {
            prefix: prefix.into(),
        }
    }

    pub fn swap(
        key: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        DssAction::Swap {
            key: key.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    /// Key this action mutates; the prefix for [`DssAction::DeletePrefix`]
    pub fn key(&self) -> &str {
        match self {
            DssAction::Add { key, .. }
            | DssAction::Update { key, .. }
            | DssAction::Delete { key, .. }
            | DssAction::Swap { key, .. } => key,
            DssAction::DeletePrefix { prefix } => prefix,
        }
    }

    /// Precondition this action contributes to the transaction, if any
    pub fn precondition(&self) -> Option<Compare> {
        match self {
            DssAction::Add { key, .. } => Some(swap_precondition(key, None)),
            DssAction::Swap { key, old_value, .. } => Some(Compare::value(key, old_value)),
            DssAction::Delete {
                key,
                old_value: Some(old),
            } => Some(Compare::value(key, old)),
            DssAction::Update { .. }
            | DssAction::Delete { old_value: None, .. }
            | DssAction::DeletePrefix { .. } => None,
        }
    }

    /// Mutation this action contributes to the transaction
    pub fn mutation(&self) -> TxnOp {
        match self {
            DssAction::Add { key, value } | DssAction::Update { key, value } => {
                TxnOp::put(key, value)
            }
            DssAction::Swap { key, new_value, .. } => TxnOp::put(key, new_value),
            DssAction::Delete { key, .. } => TxnOp::delete(key),
            DssAction::DeletePrefix { prefix } => TxnOp::delete_prefix(prefix),
        }
    }

    pub(crate) fn map_keys(
        self,
        f: impl Fn(String) -> String,
    ) -> Self {
        match self {
            DssAction::Add { key, value } => DssAction::Add { key: f(key), value },
            DssAction::Update { key, value } => DssAction::Update { key: f(key), value },
            DssAction::Delete { key, old_value } => DssAction::Delete {
                key: f(key),
                old_value,
            },
            DssAction::DeletePrefix { prefix } => DssAction::DeletePrefix { prefix: f(prefix) },
            DssAction::Swap {
                key,
                old_value,
                new_value,
            } => DssAction::Swap {
                key: f(key),
                old_value,
                new_value,
            },
        }
    }
}

/// Composes the batch into one transaction.
///
/// Every precondition is ANDed into the `when` clause; every mutation is
/// appended to `then` in caller order.
pub fn compose_transaction(actions: &[DssAction]) -> Txn {
    Txn::new()
        .when(actions.iter().filter_map(DssAction::precondition))
        .and_then(actions.iter().map(DssAction::mutation))
}

impl DynamicStatusStore {
    /// Submits the actions as one all-or-nothing transaction.
    ///
    /// # Errors
    /// - [`DssError::MatchFailed`] when any precondition did not hold; nothing
    ///   was applied
    /// - [`DssError::Io`] for backend failures
    pub async fn perform_actions(
        &self,
        actions: &[DssAction],
    ) -> DssResult<()> {
        if actions.is_empty() {
            return Ok(());
        }

        let txn = compose_transaction(actions);
        debug!(
            actions = actions.len(),
            preconditions = txn.when.len(),
            "submitting batch transaction"
        );

        let succeeded = self
            .call(
                "perform_actions",
                "Problem with DSS transaction",
                self.inner.backend.txn(txn),
            )
            .await?;

        if succeeded {
            Ok(())
        } else {
            TXN_MATCH_FAILURES.inc();
            debug!(actions = actions.len(), "batch transaction preconditions failed");
            Err(DssError::MatchFailed)
        }
    }
}
