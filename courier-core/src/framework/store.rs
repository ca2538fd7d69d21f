//! Store selected at startup.

use kanau::processor::Processor;

use super::{DatabaseProcessor, MemoryProcessor};
use crate::entities::dispatch_unit::{
    DispatchUnit, GetDispatchUnitById, InsertDispatchUnit, ListDispatchUnits,
    ListDueDispatchUnits, TransitionDispatchUnit,
};
use crate::entities::idempotency_record::{
    ClaimIdempotencyRecord, CompleteIdempotencyRecord, GetIdempotencyRecord, IdempotencyRecord,
    ReapIdempotencyRecords, RefreshIdempotencyClaim, ReleaseIdempotencyClaim,
    TakeOverIdempotencyClaim,
};

/// Either store behind one concrete type, so request state does not have to
/// be generic.
#[derive(Clone)]
pub enum Store {
    Database(DatabaseProcessor),
    Memory(MemoryProcessor),
}

impl From<DatabaseProcessor> for Store {
    fn from(processor: DatabaseProcessor) -> Self {
        Store::Database(processor)
    }
}

impl From<MemoryProcessor> for Store {
    fn from(processor: MemoryProcessor) -> Self {
        Store::Memory(processor)
    }
}

macro_rules! delegate {
    ($($query:ty => $output:ty),* $(,)?) => {
        $(
            impl Processor<$query> for Store {
                type Output = $output;
                type Error = sqlx::Error;

                async fn process(&self, query: $query) -> Result<$output, sqlx::Error> {
                    match self {
                        Store::Database(processor) => processor.process(query).await,
                        Store::Memory(processor) => processor.process(query).await,
                    }
                }
            }
        )*
    };
}

delegate! {
    ClaimIdempotencyRecord => Option<IdempotencyRecord>,
    GetIdempotencyRecord => Option<IdempotencyRecord>,
    TakeOverIdempotencyClaim => Option<IdempotencyRecord>,
    RefreshIdempotencyClaim => u64,
    CompleteIdempotencyRecord => u64,
    ReleaseIdempotencyClaim => u64,
    ReapIdempotencyRecords => u64,
    InsertDispatchUnit => DispatchUnit,
    GetDispatchUnitById => Option<DispatchUnit>,
    ListDueDispatchUnits => Vec<DispatchUnit>,
    TransitionDispatchUnit => Option<DispatchUnit>,
    ListDispatchUnits => Vec<DispatchUnit>,
}
