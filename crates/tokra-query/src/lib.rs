//! tokra-query
//!
//! Read entry points over the ledger: the operation-keyed [`QueryFacade`]
//! every admin read path goes through, and the filtered listing/count
//! surface in [`admin`]. Both are libraries; the HTTP controllers that
//! expose them live with the host service.

pub mod admin;
pub mod facade;

pub use admin::{AdminQuery, EarningsReport, PagedRecords, Paging, RecordFilter};
pub use facade::{QueryFacade, QueryOperation, QueryOutcome, UserBalanceRow};
