//! Asynchronous payout settlement: a durable job queue feeds a worker loop
//! that drives share fetch, key reconstruction, transfer submission and
//! ledger finalization for one payout at a time per worker account.

pub mod pipeline;
pub mod queue;
pub mod worker;

pub use pipeline::{PgSettlementStore, PipelineConfig, PipelineOutcome, SettlementPipeline};
pub use queue::SettlementQueue;
pub use worker::SettlementWorker;
