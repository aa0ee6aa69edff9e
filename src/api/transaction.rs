//! Purpose: Transaction lifecycle state, buffered mutations, and the public `Transaction` handle.
//! Exports: `Transaction`, `TransactionOptions`, `TransactionState`, `ExpiryHandle`.
//! Role: Transactional request context; reads run through the shared orchestrator with a
//! transaction role, writes are buffered until `commit`.
//! Invariants: `Expired` is terminal and is checked before any RPC or buffer mutation.
//! Invariants: `NotStarted -> InProgress` happens once, on the first non-empty handle.
//! Invariants: At most one begin (explicit or piggybacked on a read) is in flight at a time.
#![allow(clippy::result_large_err)]

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::options::TransactionContext;
use super::request::{ClientInner, CommitResponse, RequestOrchestrator, Role};
use crate::core::error::Error;
use crate::core::mutation::{Mutation, dedup_by_key};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
    /// Plain client context; never transitions.
    NotTransaction,
    NotStarted,
    InProgress,
    Expired,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransactionOptions {
    pub read_only: bool,
    /// Read-only snapshot time in epoch milliseconds.
    pub read_time: Option<i64>,
}

impl TransactionOptions {
    pub fn read_write() -> Self {
        Self::default()
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            read_time: None,
        }
    }

    pub fn with_read_time(mut self, millis: i64) -> Self {
        self.read_time = Some(millis);
        self
    }
}

struct TransactionInner {
    id: Option<Bytes>,
    state: TransactionState,
    mutations: Vec<Mutation>,
}

pub(crate) struct TransactionCell {
    inner: Mutex<TransactionInner>,
    begin_lock: Arc<AsyncMutex<()>>,
    options: TransactionOptions,
}

impl TransactionCell {
    pub fn new(options: TransactionOptions) -> Self {
        Self {
            inner: Mutex::new(TransactionInner {
                id: None,
                state: TransactionState::NotStarted,
                mutations: Vec::new(),
            }),
            begin_lock: Arc::new(AsyncMutex::new(())),
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransactionInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn state(&self) -> TransactionState {
        self.lock().state
    }

    pub fn id(&self) -> Option<Bytes> {
        self.lock().id.clone()
    }

    pub fn check_not_expired(&self) -> Result<(), Error> {
        if self.state() == TransactionState::Expired {
            return Err(Error::transaction_expired());
        }
        Ok(())
    }

    pub fn expire(&self) {
        let mut inner = self.lock();
        if inner.state != TransactionState::Expired {
            debug!(from = ?inner.state, "transaction expired");
            inner.state = TransactionState::Expired;
        }
    }

    /// Adopt a handle returned by the server. Only a `NotStarted` transaction moves.
    pub fn record_handle(&self, handle: Option<Bytes>) -> bool {
        let Some(handle) = handle.filter(|handle| !handle.is_empty()) else {
            return false;
        };
        let mut inner = self.lock();
        if inner.state != TransactionState::NotStarted {
            return false;
        }
        inner.id = Some(handle);
        inner.state = TransactionState::InProgress;
        debug!("transaction in progress");
        true
    }

    pub fn push_mutations(&self, mutations: Vec<Mutation>) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.state == TransactionState::Expired {
            return Err(Error::transaction_expired());
        }
        inner.mutations.extend(mutations);
        Ok(())
    }

    pub fn take_mutations(&self) -> Vec<Mutation> {
        std::mem::take(&mut self.lock().mutations)
    }

    pub fn mutation_count(&self) -> usize {
        self.lock().mutations.len()
    }

    /// Resolve the context for the next read, serialising first use.
    ///
    /// When the transaction has no handle yet, the returned guard must be held until the
    /// response that may carry one has been recorded.
    pub async fn read_context(
        &self,
    ) -> Result<(TransactionContext, Option<OwnedMutexGuard<()>>), Error> {
        self.check_not_expired()?;
        if let Some(id) = self.id() {
            return Ok((TransactionContext::Active(id), None));
        }
        let guard = Arc::clone(&self.begin_lock).lock_owned().await;
        self.check_not_expired()?;
        if let Some(id) = self.id() {
            return Ok((TransactionContext::Active(id), None));
        }
        Ok((TransactionContext::Begin(self.options.clone()), Some(guard)))
    }

    pub async fn begin_guard(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.begin_lock).lock_owned().await
    }
}

/// Lets a watchdog expire a transaction it does not own.
#[derive(Clone)]
pub struct ExpiryHandle {
    cell: Arc<TransactionCell>,
}

impl ExpiryHandle {
    pub fn expire(&self) {
        self.cell.expire();
    }

    pub fn state(&self) -> TransactionState {
        self.cell.state()
    }
}

/// A transactional request context.
///
/// Reads go out immediately (the first one begins the transaction unless `run` was
/// called); writes are buffered and sent by `commit`. Every read and write operation of
/// [`RequestOrchestrator`] is available through `Deref`.
pub struct Transaction {
    orchestrator: RequestOrchestrator,
    cell: Arc<TransactionCell>,
}

impl Transaction {
    pub(crate) fn new(inner: Arc<ClientInner>, options: TransactionOptions) -> Self {
        let cell = Arc::new(TransactionCell::new(options));
        let orchestrator =
            RequestOrchestrator::with_role(inner, Role::Transaction(Arc::clone(&cell)));
        Self { orchestrator, cell }
    }

    pub fn id(&self) -> Option<Bytes> {
        self.cell.id()
    }

    pub fn state(&self) -> TransactionState {
        self.cell.state()
    }

    pub fn options(&self) -> &TransactionOptions {
        self.cell.options()
    }

    /// Number of buffered mutations awaiting commit.
    pub fn pending_mutations(&self) -> usize {
        self.cell.mutation_count()
    }

    pub fn expiry_handle(&self) -> ExpiryHandle {
        ExpiryHandle {
            cell: Arc::clone(&self.cell),
        }
    }

    pub fn expire(&self) {
        self.cell.expire();
    }

    /// Begin the transaction explicitly with `beginTransaction`.
    pub async fn run(&self) -> Result<Bytes, Error> {
        self.begin(true).await
    }

    pub async fn commit(self) -> Result<CommitResponse, Error> {
        self.cell.check_not_expired()?;
        let handle = match self.cell.id() {
            Some(handle) => handle,
            None => self.begin(false).await?,
        };
        self.cell.check_not_expired()?;

        let mutations = dedup_by_key(self.cell.take_mutations());
        debug!(mutations = mutations.len(), "committing transaction");
        match self
            .orchestrator
            .commit_transactional(mutations, &handle)
            .await
        {
            Ok(response) => Ok(response),
            Err(err) => {
                self.rollback_quietly(&handle).await;
                Err(err)
            }
        }
    }

    pub async fn rollback(self) -> Result<(), Error> {
        self.cell.check_not_expired()?;
        let Some(handle) = self.cell.id() else {
            return Err(Error::invalid_argument("transaction has not begun"));
        };
        self.cell.take_mutations();
        self.orchestrator.rollback_handle(&handle).await
    }

    pub(crate) async fn rollback_if_begun(&self) {
        if let Some(handle) = self.cell.id() {
            self.rollback_quietly(&handle).await;
        }
    }

    async fn rollback_quietly(&self, handle: &Bytes) {
        if let Err(err) = self.orchestrator.rollback_handle(handle).await {
            warn!(error = %err, "rollback failed; keeping original error");
        }
    }

    async fn begin(&self, fail_if_begun: bool) -> Result<Bytes, Error> {
        self.cell.check_not_expired()?;
        let _guard = self.cell.begin_guard().await;
        self.cell.check_not_expired()?;
        if let Some(handle) = self.cell.id() {
            if fail_if_begun {
                return Err(Error::invalid_argument("transaction has already begun"));
            }
            return Ok(handle);
        }
        let handle = self
            .orchestrator
            .begin_transaction(self.cell.options())
            .await?;
        self.cell.record_handle(Some(handle.clone()));
        self.cell.check_not_expired()?;
        Ok(handle)
    }
}

impl Deref for Transaction {
    type Target = RequestOrchestrator;

    fn deref(&self) -> &Self::Target {
        &self.orchestrator
    }
}
