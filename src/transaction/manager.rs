// ============================================================================
// Transaction Manager
// ============================================================================

use crate::core::{ErrorClass, StoreError, StoreResult};
use crate::loader::BatchingLoader;
use crate::store::{StoreHandle, TxnHandle};
use std::fmt::Display;
use std::future::Future;
use tracing::{Instrument, debug, error, info_span, warn};

/// An open store transaction together with the loader bound to it.
pub struct Transaction {
    handle: TxnHandle,
    loader: BatchingLoader,
    parent: BatchingLoader,
}

impl Transaction {
    /// Opens a transaction on `parent`'s store.
    ///
    /// Fails if `parent` is already transaction-bound: a call chain holds at
    /// most one transaction.
    pub async fn begin(parent: &BatchingLoader) -> StoreResult<Self> {
        if let Some(id) = parent.transaction_id() {
            return Err(StoreError::Internal(format!(
                "loader is already bound to transaction '{}'",
                id
            )));
        }

        let store = parent.handle().datastore().clone();
        let transaction = store.begin_transaction().await?;
        let handle = TxnHandle { store, transaction };
        let loader = BatchingLoader::with_handle(
            StoreHandle::Txn(handle.clone()),
            parent.config().clone(),
            Some(parent.clone()),
        );
        debug!(transaction = handle.transaction.id(), "began transaction");

        Ok(Self {
            handle,
            loader,
            parent: parent.clone(),
        })
    }

    pub fn id(&self) -> &str {
        self.handle.transaction.id()
    }

    pub fn loader(&self) -> &BatchingLoader {
        &self.loader
    }

    /// Commits, then forgets everything the parent loader had cached.
    ///
    /// A failed commit is followed by a rollback attempt; the commit error is
    /// returned.
    pub async fn commit(self) -> StoreResult<()> {
        if let Err(err) = self.handle.transaction.commit().await {
            error!(transaction = self.id(), error = %err, "commit failed");
            if let Err(rollback_err) = self.handle.transaction.rollback().await {
                debug!(
                    transaction = self.id(),
                    error = %rollback_err,
                    "rollback after failed commit did not complete"
                );
            }
            return Err(err);
        }

        self.parent.clear_all();
        debug!(transaction = self.id(), "committed transaction");
        Ok(())
    }

    pub async fn rollback(self) -> StoreResult<()> {
        self.handle.transaction.rollback().await?;
        debug!(transaction = self.id(), "rolled back transaction");
        Ok(())
    }
}

/// Runs `op` inside a new transaction opened on `parent`.
///
/// Commits when `op` succeeds. When it fails the transaction is rolled back
/// and the error is returned unchanged.
pub(crate) async fn execute<F, Fut, T, E>(parent: &BatchingLoader, op: F) -> Result<T, E>
where
    F: FnOnce(BatchingLoader) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError> + ErrorClass + Display,
{
    let transaction = Transaction::begin(parent).await.map_err(E::from)?;
    let span = info_span!("transaction", id = %transaction.id());

    async move {
        match op(transaction.loader().clone()).await {
            Ok(value) => {
                transaction.commit().await.map_err(E::from)?;
                Ok(value)
            }
            Err(err) => {
                if err.is_non_fatal() {
                    debug!(error = %err, "transaction body failed, rolling back");
                } else {
                    warn!(error = %err, "transaction body failed, rolling back");
                }
                let id = transaction.id().to_string();
                if let Err(rollback_err) = transaction.rollback().await {
                    error!(transaction = %id, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}
