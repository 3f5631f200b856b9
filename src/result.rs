//! Result shapes delivered to callers.

use crate::error::ServerError;
use crate::statement::Column;
use crate::types::Value;

/// One decoded result row.
pub type Row = Vec<Value>;

/// Outcome of a single SQL statement: the statement's result, or the
/// server's error response for it. Used for simple-query batches, where
/// later statements can still succeed after an earlier one fails.
pub type StatementResult = Result<QueryResult, ServerError>;

/// Result of one completed statement.
///
/// `rows_affected` is present when the CommandComplete tag carried a count;
/// `columns` is empty for statements that return no row description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Row count from the command tag, if any
    pub rows_affected: Option<u64>,
    /// Result columns
    pub columns: Vec<Column>,
    /// Decoded rows in server order
    pub rows: Vec<Row>,
}

/// Outcome of an Execute against a portal.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    /// The portal ran to completion
    Complete(QueryResult),
    /// The row limit was reached; the portal can be executed again
    Suspended(Vec<Row>),
}

/// Incremental events delivered to streaming callers.
#[derive(Debug)]
pub enum StreamEvent {
    /// Parameter types of the statement being described
    ParameterTypes(Vec<crate::protocol::types::Oid>),
    /// Result columns of the current statement
    Columns(Vec<Column>),
    /// One data row
    Row(Row),
    /// The current statement finished
    Complete {
        /// Command tag, e.g. "SELECT 5"
        tag: String,
        /// Row count from the tag, if any
        rows_affected: Option<u64>,
    },
    /// The server reported an error for the current statement
    Error(crate::error::Error),
    /// Execute hit its row limit; rows were streamed individually
    Partial(Vec<Row>),
    /// Terminal event: the request finished
    Done,
}

/// Asynchronous message from the server, delivered to the subscriber sink
/// outside of any request/reply flow.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Non-fatal notice/warning from the server
    Notice(ServerError),

    /// Server parameter value changed
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}
