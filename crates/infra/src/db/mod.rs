//! Transactional database contract.
//!
//! Repositories take a `&dyn Executor`, which is either the database's
//! autocommit executor or an open transaction. Each unit of work opens its own
//! transaction; transactions are never shared between workers.

use std::any::Any;
use std::fmt;

use invoicemgmt_core::RequestContext;

pub mod error;
pub mod faults;
pub mod in_memory;

pub use error::DbError;
pub use faults::{Fault, FaultInjector};
pub use in_memory::{DbStats, InMemoryDatabase};

/// Identifier of an open transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Something repository calls can run against.
pub trait Executor: Send + Sync {
    /// `None` for autocommit executors.
    fn transaction_id(&self) -> Option<TxId>;

    /// Lets a repository implementation recover its own executor type.
    fn as_any(&self) -> &dyn Any;
}

/// An open transaction. Dropping it without committing rolls it back.
pub trait Transaction: Executor {
    fn commit(self: Box<Self>) -> Result<(), DbError>;

    fn rollback(self: Box<Self>) -> Result<(), DbError>;

    fn as_executor(&self) -> &dyn Executor;
}

pub trait Database: Send + Sync {
    /// Open a transaction bound to the request's deadline.
    fn begin(&self, ctx: &RequestContext) -> Result<Box<dyn Transaction>, DbError>;

    /// Autocommit executor for reads outside a transaction.
    fn executor(&self) -> &dyn Executor;
}

impl<D> Database for std::sync::Arc<D>
where
    D: Database + ?Sized,
{
    fn begin(&self, ctx: &RequestContext) -> Result<Box<dyn Transaction>, DbError> {
        (**self).begin(ctx)
    }

    fn executor(&self) -> &dyn Executor {
        (**self).executor()
    }
}

/// Run `work` inside one transaction: commit on `Ok`, roll back on `Err`.
pub fn in_transaction<T, E, F>(db: &dyn Database, ctx: &RequestContext, work: F) -> Result<T, E>
where
    E: From<DbError>,
    F: FnOnce(&dyn Executor) -> Result<T, E>,
{
    let tx = db.begin(ctx)?;
    match work(tx.as_executor()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
