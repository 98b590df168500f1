//! The query pipeline: statement execution, outcome selection and row streaming.
//!
//! [`QueryOrchestrator`] is the entry point; [`StatementExecution`] and
//! [`ResultStream`] are its children and can also run on their own.

mod orchestrator;
mod statement;
mod stream;

pub use orchestrator::{QueryOrchestrator, QueryTask};
pub use statement::{Outcome, RowSetHandle, StatementExecution};
pub use stream::{ResultStream, StreamStatus};
