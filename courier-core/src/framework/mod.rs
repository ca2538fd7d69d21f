//! Storage access.
//!
//! Every query is a plain struct with a [`Processor`] implementation on a
//! store type. [`DatabaseProcessor`] runs them against PostgreSQL;
//! [`MemoryProcessor`] keeps the same tables in process memory for tests and
//! local runs. Components are generic over the store through the
//! [`LedgerStore`] and [`UnitStore`] bundles; [`Store`] picks one at runtime.

mod memory;
mod store;

pub use memory::MemoryProcessor;
pub use store::Store;

use kanau::processor::Processor;
use sqlx::PgPool;

use crate::entities::dispatch_unit::{
    DispatchUnit, GetDispatchUnitById, InsertDispatchUnit, ListDispatchUnits,
    ListDueDispatchUnits, TransitionDispatchUnit,
};
use crate::entities::idempotency_record::{
    ClaimIdempotencyRecord, CompleteIdempotencyRecord, GetIdempotencyRecord, IdempotencyRecord,
    ReapIdempotencyRecords, RefreshIdempotencyClaim, ReleaseIdempotencyClaim,
    TakeOverIdempotencyClaim,
};

#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

/// Queries the idempotency ledger needs.
pub trait LedgerStore:
    Processor<ClaimIdempotencyRecord, Output = Option<IdempotencyRecord>, Error = sqlx::Error>
    + Processor<GetIdempotencyRecord, Output = Option<IdempotencyRecord>, Error = sqlx::Error>
    + Processor<TakeOverIdempotencyClaim, Output = Option<IdempotencyRecord>, Error = sqlx::Error>
    + Processor<RefreshIdempotencyClaim, Output = u64, Error = sqlx::Error>
    + Processor<CompleteIdempotencyRecord, Output = u64, Error = sqlx::Error>
    + Processor<ReleaseIdempotencyClaim, Output = u64, Error = sqlx::Error>
    + Processor<ReapIdempotencyRecords, Output = u64, Error = sqlx::Error>
{
}

impl<T> LedgerStore for T where
    T: Processor<ClaimIdempotencyRecord, Output = Option<IdempotencyRecord>, Error = sqlx::Error>
        + Processor<GetIdempotencyRecord, Output = Option<IdempotencyRecord>, Error = sqlx::Error>
        + Processor<
            TakeOverIdempotencyClaim,
            Output = Option<IdempotencyRecord>,
            Error = sqlx::Error,
        > + Processor<RefreshIdempotencyClaim, Output = u64, Error = sqlx::Error>
        + Processor<CompleteIdempotencyRecord, Output = u64, Error = sqlx::Error>
        + Processor<ReleaseIdempotencyClaim, Output = u64, Error = sqlx::Error>
        + Processor<ReapIdempotencyRecords, Output = u64, Error = sqlx::Error>
{
}

/// Queries the dispatch pipeline needs.
pub trait UnitStore:
    Processor<InsertDispatchUnit, Output = DispatchUnit, Error = sqlx::Error>
    + Processor<GetDispatchUnitById, Output = Option<DispatchUnit>, Error = sqlx::Error>
    + Processor<ListDueDispatchUnits, Output = Vec<DispatchUnit>, Error = sqlx::Error>
    + Processor<TransitionDispatchUnit, Output = Option<DispatchUnit>, Error = sqlx::Error>
    + Processor<ListDispatchUnits, Output = Vec<DispatchUnit>, Error = sqlx::Error>
{
}

impl<T> UnitStore for T where
    T: Processor<InsertDispatchUnit, Output = DispatchUnit, Error = sqlx::Error>
        + Processor<GetDispatchUnitById, Output = Option<DispatchUnit>, Error = sqlx::Error>
        + Processor<ListDueDispatchUnits, Output = Vec<DispatchUnit>, Error = sqlx::Error>
        + Processor<TransitionDispatchUnit, Output = Option<DispatchUnit>, Error = sqlx::Error>
        + Processor<ListDispatchUnits, Output = Vec<DispatchUnit>, Error = sqlx::Error>
{
}
