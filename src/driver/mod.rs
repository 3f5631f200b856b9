//! The connection driver: a sans-io, request-queued protocol core.
//!
//! The driver owns no socket. Callers feed it user commands
//! ([`Driver::on_command`]) and decoded backend frames
//! ([`Driver::on_message`]); it appends wire bytes to an outbound buffer the
//! I/O task flushes after every step, and it answers requests through the
//! sinks queued with them. Because the backend serves one request at a time,
//! every inbound message belongs to the head of the FIFO queue; no
//! correlation ids exist on the wire.

mod command;
mod ready;
mod startup;

pub use command::{Command, Reply, ReplySink, Request, RequestKind};

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::frontend::{self, DescribeTarget};
use crate::protocol::types::TransactionStatus;
use crate::result::{AsyncMessage, StatementResult};
use crate::statement::{Column, Statement};
use crate::types::{DatetimeMode, Value};

/// Backend process id and cancellation secret from BackendKeyData.
#[derive(Debug, Clone, Copy)]
pub struct BackendKey {
    /// Backend process ID
    pub pid: i32,
    /// Cancellation secret
    pub secret: i32,
}

/// Which per-message handler is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Startup packet sent, negotiating authentication
    Auth,
    /// Authenticated, collecting parameters and the backend key
    Init,
    /// Steady state
    Ready,
}

/// Per-request scratch state, reset at every request boundary.
#[derive(Debug, Default)]
struct Accumulator {
    /// Parameter type oids from the latest ParameterDescription
    types: Vec<u32>,
    /// Columns from the latest RowDescription
    columns: Vec<Column>,
    /// Rows accumulated for the current statement
    rows: Vec<crate::result::Row>,
    /// Per-statement outcomes of the current batch
    results: Vec<StatementResult>,
}

impl Accumulator {
    fn reset(&mut self) {
        self.types.clear();
        self.columns.clear();
        self.rows.clear();
        self.results.clear();
    }
}

/// The sans-io connection driver.
pub struct Driver {
    phase: Phase,
    queue: VecDeque<Request>,
    acc: Accumulator,
    parameters: HashMap<String, String>,
    backend_key: Option<BackendKey>,
    tx_status: TransactionStatus,
    sync_required: bool,
    /// ReadyForQuery messages owed to syncs consumed by the error cascade
    owed_ready: usize,
    datetime_mode: DatetimeMode,
    subscriber: Option<UnboundedSender<AsyncMessage>>,
    user: String,
    password: Option<String>,
    outbound: Vec<u8>,
    terminated: bool,
}

impl Driver {
    /// Create a driver for a fresh connection. Writes the startup packet to
    /// the outbound buffer and queues the connect request; `connect_sink`
    /// receives [`Reply::Connected`] once the handshake completes.
    ///
    /// SSL negotiation, if any, happens on the socket before the driver sees
    /// any bytes.
    pub fn new(config: &Config, connect_sink: ReplySink) -> Self {
        let mut driver = Self {
            phase: Phase::Auth,
            queue: VecDeque::new(),
            acc: Accumulator::default(),
            parameters: HashMap::new(),
            backend_key: None,
            tx_status: TransactionStatus::Idle,
            sync_required: false,
            owed_ready: 0,
            datetime_mode: DatetimeMode::default(),
            subscriber: config.subscriber.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            outbound: Vec::with_capacity(1024),
            terminated: false,
        };

        let mut params: Vec<(&str, &str)> = vec![("user", &config.user)];
        if let Some(database) = &config.database {
            params.push(("database", database));
        }
        for (name, value) in &config.params {
            params.push((name, value));
        }
        frontend::write_startup(&mut driver.outbound, &params);

        driver.queue.push_back(Request {
            kind: RequestKind::Connect,
            sink: connect_sink,
        });
        driver
    }

    /// Accept a user command: gate on sync-required, encode the wire
    /// messages, and queue the request. The caller flushes
    /// [`Driver::take_outbound`] afterwards.
    pub fn on_command(&mut self, command: Command, mut sink: ReplySink) {
        if self.sync_required && !matches!(command, Command::Sync) {
            sink.finish(Err(Error::SyncRequired));
            return;
        }

        let kind = match command {
            Command::SimpleQuery { sql } => {
                frontend::write_query(&mut self.outbound, &sql);
                RequestKind::SimpleQuery
            }
            Command::ExtendedQuery { statement, params } => {
                let encoded = match self.encode_params(&statement, &params) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        sink.finish(Err(e));
                        return;
                    }
                };
                frontend::write_bind(
                    &mut self.outbound,
                    "",
                    &statement.name,
                    &encoded,
                    &statement.result_formats(),
                );
                frontend::write_execute(&mut self.outbound, "", 0);
                frontend::write_close(&mut self.outbound, DescribeTarget::Statement, &statement.name);
                frontend::write_sync(&mut self.outbound);
                RequestKind::ExtendedQuery { statement }
            }
            Command::Parse {
                name,
                sql,
                param_types,
            } => {
                frontend::write_parse(&mut self.outbound, &name, &sql, &param_types);
                frontend::write_describe(&mut self.outbound, DescribeTarget::Statement, &name);
                frontend::write_flush(&mut self.outbound);
                RequestKind::Parse { name }
            }
            Command::Bind {
                statement,
                portal,
                params,
            } => {
                let encoded = match self.encode_params(&statement, &params) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        sink.finish(Err(e));
                        return;
                    }
                };
                frontend::write_bind(
                    &mut self.outbound,
                    &portal,
                    &statement.name,
                    &encoded,
                    &statement.result_formats(),
                );
                frontend::write_flush(&mut self.outbound);
                RequestKind::Bind
            }
            Command::Execute {
                statement,
                portal,
                max_rows,
            } => {
                frontend::write_execute(&mut self.outbound, &portal, max_rows);
                frontend::write_flush(&mut self.outbound);
                RequestKind::Execute { statement }
            }
            Command::DescribeStatement { name } => {
                frontend::write_describe(&mut self.outbound, DescribeTarget::Statement, &name);
                frontend::write_flush(&mut self.outbound);
                RequestKind::DescribeStatement { name }
            }
            Command::DescribePortal { name } => {
                frontend::write_describe(&mut self.outbound, DescribeTarget::Portal, &name);
                frontend::write_flush(&mut self.outbound);
                RequestKind::DescribePortal
            }
            Command::CloseStatement { name } => {
                frontend::write_close(&mut self.outbound, DescribeTarget::Statement, &name);
                frontend::write_flush(&mut self.outbound);
                RequestKind::Close
            }
            Command::ClosePortal { name } => {
                frontend::write_close(&mut self.outbound, DescribeTarget::Portal, &name);
                frontend::write_flush(&mut self.outbound);
                RequestKind::Close
            }
            Command::Sync => {
                self.sync_required = false;
                frontend::write_sync(&mut self.outbound);
                RequestKind::Sync
            }
        };

        self.queue.push_back(Request { kind, sink });
    }

    /// Process one decoded backend message.
    ///
    /// An `Err` return is fatal to the connection: the caller should flush
    /// the queue with [`Driver::fail_all`] and tear down the transport.
    pub fn on_message(&mut self, tag: u8, payload: &[u8]) -> Result<()> {
        match self.phase {
            Phase::Auth => self.on_auth_message(tag, payload),
            Phase::Init => self.on_init_message(tag, payload),
            Phase::Ready => self.on_ready_message(tag, payload),
        }
    }

    /// Take the wire bytes produced since the last call.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    /// Append a Terminate message for a graceful local close.
    pub fn write_terminate(&mut self) {
        frontend::write_terminate(&mut self.outbound);
    }

    /// Fail every queued request in order and mark the driver terminated.
    pub fn fail_all(&mut self, mut make_error: impl FnMut() -> Error) {
        while let Some(mut request) = self.queue.pop_front() {
            request.sink.finish(Err(make_error()));
        }
        self.acc.reset();
        self.terminated = true;
    }

    /// True once the driver has delivered a fatal outcome; the transport
    /// should be dropped.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Look up a server parameter received via ParameterStatus.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }

    /// Backend pid/secret for the cancel side-channel.
    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    /// Transaction status byte from the most recent ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    /// True while a prior extended-query error blocks non-sync commands.
    pub fn sync_required(&self) -> bool {
        self.sync_required
    }

    fn encode_params(
        &self,
        statement: &Statement,
        params: &[Value],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        if params.len() != statement.param_types.len() {
            return Err(Error::Encode(format!(
                "statement '{}' takes {} parameters, got {}",
                statement.name,
                statement.param_types.len(),
                params.len()
            )));
        }
        params
            .iter()
            .zip(&statement.param_types)
            .map(|(value, &type_oid)| {
                crate::types::encode_param(value, type_oid, self.datetime_mode)
            })
            .collect()
    }

    /// Deliver the terminal reply to the head request and pop it.
    fn finish_head(&mut self, reply: Result<Reply>) {
        if let Some(mut request) = self.queue.pop_front() {
            request.sink.finish(reply);
        }
        self.acc.reset();
    }

    fn notify(&self, message: AsyncMessage) {
        if let Some(subscriber) = &self.subscriber {
            let _ = subscriber.send(message);
        }
    }

    /// Fail queued requests up to and including the first sync; PostgreSQL
    /// discards pipelined extended-query commands after an error until the
    /// frontend's Sync. A consumed sync still gets a ReadyForQuery from the
    /// backend, which the driver owes a swallow for. Without a queued sync,
    /// the sync-required latch closes the dispatcher.
    fn cascade_sync_required(&mut self) {
        let mut found_sync = false;
        while let Some(mut request) = self.queue.pop_front() {
            let is_sync = matches!(request.kind, RequestKind::Sync);
            request.sink.finish(Err(Error::SyncRequired));
            if is_sync {
                found_sync = true;
                self.owed_ready += 1;
                break;
            }
        }
        if !found_sync {
            self.sync_required = true;
        }
    }
}
