//! Commands, in-flight requests and reply sinks.

use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::error::Result;
use crate::protocol::types::Oid;
use crate::result::{QueryResult, Row, StatementResult, StreamEvent};
use crate::statement::Statement;
use crate::types::Value;

/// A user command accepted by the driver's dispatcher.
///
/// Each command maps to a fixed wire recipe; commands that decode rows carry
/// the statement descriptor needed to interpret later DataRow messages.
#[derive(Debug)]
pub enum Command {
    /// Simple query protocol: one `Q` message, possibly multi-statement
    SimpleQuery {
        /// SQL text
        sql: String,
    },
    /// Bind + Execute + Close + Sync against an already-parsed statement
    ExtendedQuery {
        /// The parsed statement
        statement: Statement,
        /// Parameter values, in placeholder order
        params: Vec<Value>,
    },
    /// Parse + Describe + Flush
    Parse {
        /// Statement name; empty for the unnamed statement
        name: String,
        /// SQL with $n placeholders
        sql: String,
        /// Parameter type OIDs (0 = let the server infer)
        param_types: Vec<Oid>,
    },
    /// Bind + Flush
    Bind {
        /// The parsed statement
        statement: Statement,
        /// Portal name; empty for the unnamed portal
        portal: String,
        /// Parameter values
        params: Vec<Value>,
    },
    /// Execute + Flush against a bound portal
    Execute {
        /// Statement the portal was bound from (for row decoding)
        statement: Statement,
        /// Portal name
        portal: String,
        /// Row limit; 0 = unlimited
        max_rows: u32,
    },
    /// Describe(statement) + Flush
    DescribeStatement {
        /// Statement name
        name: String,
    },
    /// Describe(portal) + Flush
    DescribePortal {
        /// Portal name
        name: String,
    },
    /// Close(statement) + Flush
    CloseStatement {
        /// Statement name
        name: String,
    },
    /// Close(portal) + Flush
    ClosePortal {
        /// Portal name
        name: String,
    },
    /// Sync; clears the sync-required latch
    Sync,
}

/// What the head-of-queue request is waiting for; determines how each
/// inbound message is consumed.
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// The startup/auth/init handshake
    Connect,
    /// Simple query
    SimpleQuery,
    /// equery: Bind/Execute/Close/Sync group
    ExtendedQuery {
        /// Statement providing columns for row decoding
        statement: Statement,
    },
    /// Parse awaiting ParameterDescription + RowDescription/NoData
    Parse {
        /// Statement name being parsed
        name: String,
    },
    /// Bind awaiting BindComplete
    Bind,
    /// Execute awaiting rows and CommandComplete/PortalSuspended
    Execute {
        /// Statement providing columns for row decoding
        statement: Statement,
    },
    /// Describe(statement) awaiting ParameterDescription + RowDescription/NoData
    DescribeStatement {
        /// Statement name
        name: String,
    },
    /// Describe(portal) awaiting RowDescription/NoData
    DescribePortal,
    /// Close awaiting CloseComplete
    Close,
    /// Sync awaiting ReadyForQuery
    Sync,
}

/// Reply delivered to a mailbox sink when its request completes.
#[derive(Debug)]
pub enum Reply {
    /// The handshake finished; the connection is ready
    Connected,
    /// Plain acknowledgement (bind, close, sync)
    Done,
    /// Statement descriptor (parse, describe statement)
    Statement(Statement),
    /// Portal columns (describe portal)
    Columns(Vec<crate::statement::Column>),
    /// Completed execute or equery result
    Rows(QueryResult),
    /// Execute hit its row limit
    Suspended(Vec<Row>),
    /// Per-statement results of a simple query
    Batch(Vec<StatementResult>),
}

/// Where a request's outcome goes: a one-shot mailbox or a stream of
/// incremental events.
#[derive(Debug)]
pub enum ReplySink {
    /// Deliver a single final reply
    Mailbox(Option<oneshot::Sender<Result<Reply>>>),
    /// Deliver incremental events, then a terminal `Done`/`Partial`
    Stream(UnboundedSender<StreamEvent>),
}

impl ReplySink {
    /// A one-shot mailbox sink.
    pub fn mailbox(sender: oneshot::Sender<Result<Reply>>) -> Self {
        ReplySink::Mailbox(Some(sender))
    }

    /// A streaming sink.
    pub fn stream(sender: UnboundedSender<StreamEvent>) -> Self {
        ReplySink::Stream(sender)
    }

    /// True for streaming sinks.
    pub fn is_stream(&self) -> bool {
        matches!(self, ReplySink::Stream(_))
    }

    /// Emit an incremental event. No-op for mailbox sinks.
    pub(crate) fn event(&self, event: StreamEvent) {
        if let ReplySink::Stream(sender) = self {
            let _ = sender.send(event);
        }
    }

    /// Deliver the terminal outcome. A dropped receiver is ignored; the
    /// caller has abandoned the request.
    pub(crate) fn finish(&mut self, reply: Result<Reply>) {
        match self {
            ReplySink::Mailbox(sender) => {
                if let Some(sender) = sender.take() {
                    let _ = sender.send(reply);
                }
            }
            ReplySink::Stream(sender) => {
                match reply {
                    Ok(Reply::Suspended(rows)) => {
                        let _ = sender.send(StreamEvent::Partial(rows));
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = sender.send(StreamEvent::Error(e));
                    }
                }
                let _ = sender.send(StreamEvent::Done);
            }
        }
    }
}

/// An in-flight request: the command kind plus the caller's sink, kept
/// together so the queue alone defines reply routing.
#[derive(Debug)]
pub struct Request {
    /// What the request is waiting for
    pub kind: RequestKind,
    /// Where its outcome goes
    pub sink: ReplySink,
}
