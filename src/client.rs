//! The public connection handle and its I/O task.
//!
//! [`Connection`] is a cheaply cloneable handle over a command channel. A
//! single spawned task owns the socket, the inbound buffer and the
//! [`Driver`]; it alternates between accepting commands and reading backend
//! bytes, and flushes the driver's outbound buffer after every step.
//! Commands from one caller reach the backend in submission order, and
//! replies come back in the same order.

use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::config::{Config, SslMode};
use crate::driver::{BackendKey, Command, Driver, Reply, ReplySink};
use crate::error::{Error, Result};
use crate::protocol::codec::decode_frame;
use crate::protocol::frontend::{write_cancel_request, write_ssl_request};
use crate::protocol::types::Oid;
use crate::result::{ExecuteOutcome, QueryResult, StatementResult, StreamEvent};
use crate::statement::{Column, Statement};
use crate::stream::Stream;
use crate::types::Value;

enum Envelope {
    Command(Command, ReplySink),
    GetParameter {
        name: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Handle to a live PostgreSQL connection.
///
/// Cloning the handle shares the same connection; requests from all clones
/// are served FIFO by the connection task.
#[derive(Clone)]
pub struct Connection {
    sender: mpsc::UnboundedSender<Envelope>,
}

impl Connection {
    /// Connect to a PostgreSQL server.
    ///
    /// Performs TCP connect, SSL negotiation per [`Config::ssl_mode`], and
    /// the authentication/initialization handshake, all bounded by
    /// [`Config::connect_timeout`].
    pub async fn connect(config: Config) -> Result<Self> {
        let deadline = config.connect_timeout;
        match tokio::time::timeout(deadline, Self::connect_inner(config)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn connect_inner(config: Config) -> Result<Self> {
        if config.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }
        let address = format!("{}:{}", config.host, config.port);
        let tcp = TcpStream::connect(&address).await?;
        tcp.set_nodelay(true)?;
        let peer = tcp.peer_addr().ok();
        let mut stream = Stream::tcp(tcp);

        let negotiate_ssl = match config.ssl_mode {
            SslMode::Disable => false,
            SslMode::Prefer => cfg!(feature = "tls"),
            SslMode::Require => {
                if !cfg!(feature = "tls") {
                    return Err(Error::InvalidUsage(
                        "SSL required but the tls feature is disabled".into(),
                    ));
                }
                true
            }
        };

        if negotiate_ssl {
            let mut request = Vec::with_capacity(8);
            write_ssl_request(&mut request);
            stream.write_all(&request).await?;
            stream.flush().await?;

            match stream.read_u8().await? {
                b'S' => {
                    #[cfg(feature = "tls")]
                    {
                        stream = stream.upgrade_to_tls(&config.host).await?;
                    }
                }
                b'N' => {
                    if config.ssl_mode == SslMode::Require {
                        return Err(Error::SslNotAvailable);
                    }
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected SSL response: {other:#04x}"
                    )));
                }
            }
        }

        Self::start(stream, peer, config).await
    }

    /// Run the connection over a caller-supplied duplex byte stream.
    ///
    /// SSL negotiation is skipped; the handshake starts directly with the
    /// startup packet. `cancel` is unavailable without a TCP peer.
    pub async fn connect_stream(stream: DuplexStream, config: Config) -> Result<Self> {
        Self::start(Stream::duplex(stream), None, config).await
    }

    async fn start(stream: Stream, peer: Option<SocketAddr>, config: Config) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = oneshot::channel();
        let driver = Driver::new(&config, ReplySink::mailbox(connect_tx));
        tokio::spawn(run(stream, driver, receiver, peer));

        match connect_rx.await {
            Ok(Ok(Reply::Connected)) => Ok(Self { sender }),
            Ok(Ok(reply)) => Err(unexpected_reply(reply)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Closed),
        }
    }

    async fn roundtrip(&self, command: Command) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Envelope::Command(command, ReplySink::mailbox(tx)))
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    fn stream_command(&self, command: Command) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender
            .send(Envelope::Command(command, ReplySink::stream(tx)))
            .map_err(|_| Error::Closed)?;
        Ok(rx)
    }

    /// Run a simple query; the SQL may batch multiple statements.
    ///
    /// Returns one [`StatementResult`] per statement, in order. A failing
    /// statement contributes its error entry without ending the connection.
    pub async fn squery(&self, sql: &str) -> Result<Vec<StatementResult>> {
        match self
            .roundtrip(Command::SimpleQuery { sql: sql.to_string() })
            .await?
        {
            Reply::Batch(results) => Ok(results),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Run a single-statement simple query, surfacing a server error as
    /// [`Error::Server`].
    pub async fn squery_one(&self, sql: &str) -> Result<QueryResult> {
        let mut results = self.squery(sql).await?;
        if results.len() != 1 {
            return Err(Error::InvalidUsage(format!(
                "expected a single statement, got {} results",
                results.len()
            )));
        }
        match results.pop() {
            Some(Ok(result)) => Ok(result),
            Some(Err(server)) => Err(server.into()),
            None => Err(Error::Protocol("empty simple query batch".into())),
        }
    }

    /// Run a parameterized query: parse an anonymous statement, then
    /// bind/execute/close/sync as one pipelined group.
    pub async fn equery(&self, sql: &str, params: Vec<Value>) -> Result<QueryResult> {
        let statement = match self.parse("", sql, &[]).await {
            Ok(statement) => statement,
            Err(e) => {
                // A failed parse poisons the extended-query flow until sync.
                let _ = self.sync().await;
                return Err(e);
            }
        };
        match self
            .roundtrip(Command::ExtendedQuery { statement, params })
            .await?
        {
            Reply::Rows(result) => Ok(result),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Streaming variant of [`Connection::squery`]; rows arrive as events
    /// instead of being accumulated.
    pub fn squery_stream(&self, sql: &str) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        self.stream_command(Command::SimpleQuery { sql: sql.to_string() })
    }

    /// Streaming variant of [`Connection::equery`].
    pub async fn equery_stream(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let statement = match self.parse("", sql, &[]).await {
            Ok(statement) => statement,
            Err(e) => {
                let _ = self.sync().await;
                return Err(e);
            }
        };
        self.stream_command(Command::ExtendedQuery { statement, params })
    }

    /// Parse a statement and describe it.
    ///
    /// `param_types` may be empty to let the server infer placeholder types;
    /// the returned [`Statement`] carries the server's answer.
    pub async fn parse(&self, name: &str, sql: &str, param_types: &[Oid]) -> Result<Statement> {
        match self
            .roundtrip(Command::Parse {
                name: name.to_string(),
                sql: sql.to_string(),
                param_types: param_types.to_vec(),
            })
            .await?
        {
            Reply::Statement(statement) => Ok(statement),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Bind a portal from a parsed statement.
    pub async fn bind(&self, statement: &Statement, portal: &str, params: Vec<Value>) -> Result<()> {
        match self
            .roundtrip(Command::Bind {
                statement: statement.clone(),
                portal: portal.to_string(),
                params,
            })
            .await?
        {
            Reply::Done => Ok(()),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Execute a bound portal, fetching at most `max_rows` rows (0 for all).
    pub async fn execute(
        &self,
        statement: &Statement,
        portal: &str,
        max_rows: u32,
    ) -> Result<ExecuteOutcome> {
        match self
            .roundtrip(Command::Execute {
                statement: statement.clone(),
                portal: portal.to_string(),
                max_rows,
            })
            .await?
        {
            Reply::Rows(result) => Ok(ExecuteOutcome::Complete(result)),
            Reply::Suspended(rows) => Ok(ExecuteOutcome::Suspended(rows)),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Streaming variant of [`Connection::execute`].
    pub fn execute_stream(
        &self,
        statement: &Statement,
        portal: &str,
        max_rows: u32,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        self.stream_command(Command::Execute {
            statement: statement.clone(),
            portal: portal.to_string(),
            max_rows,
        })
    }

    /// Describe a prepared statement.
    pub async fn describe_statement(&self, name: &str) -> Result<Statement> {
        match self
            .roundtrip(Command::DescribeStatement {
                name: name.to_string(),
            })
            .await?
        {
            Reply::Statement(statement) => Ok(statement),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Describe a bound portal, returning its result columns.
    pub async fn describe_portal(&self, name: &str) -> Result<Vec<Column>> {
        match self
            .roundtrip(Command::DescribePortal {
                name: name.to_string(),
            })
            .await?
        {
            Reply::Columns(columns) => Ok(columns),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Close a prepared statement.
    pub async fn close_statement(&self, name: &str) -> Result<()> {
        match self
            .roundtrip(Command::CloseStatement {
                name: name.to_string(),
            })
            .await?
        {
            Reply::Done => Ok(()),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Close a bound portal.
    pub async fn close_portal(&self, name: &str) -> Result<()> {
        match self
            .roundtrip(Command::ClosePortal {
                name: name.to_string(),
            })
            .await?
        {
            Reply::Done => Ok(()),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// End the current extended-query group and restore a responsive
    /// connection after an error.
    pub async fn sync(&self) -> Result<()> {
        match self.roundtrip(Command::Sync).await? {
            Reply::Done => Ok(()),
            reply => Err(unexpected_reply(reply)),
        }
    }

    /// Read a server parameter (e.g. `client_encoding`) from the driver's
    /// cache; no round trip to the server.
    pub async fn get_parameter(&self, name: &str) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Envelope::GetParameter {
                name: name.to_string(),
                reply: tx,
            })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Ask the server to abort the currently running query.
    ///
    /// Opens an ephemeral second connection to the same peer and sends a
    /// CancelRequest with the backend pid/secret. The main connection is not
    /// touched; a cancelled query fails with a regular ErrorResponse.
    pub async fn cancel(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Envelope::Cancel { reply: tx })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Close the connection. Idempotent; queued requests fail with
    /// [`Error::Closed`].
    pub fn close(&self) {
        let _ = self.sender.send(Envelope::Close);
    }

    /// Run `body` inside a transaction.
    ///
    /// Emits `BEGIN` before and `COMMIT` after; any error from `body` (or
    /// from `BEGIN`/`COMMIT`) triggers `ROLLBACK` and is returned as
    /// [`Error::RolledBack`].
    pub async fn with_transaction<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.squery_one("BEGIN").await?;
        match body(self.clone()).await {
            Ok(value) => {
                self.squery_one("COMMIT").await?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.squery_one("ROLLBACK").await;
                Err(Error::RolledBack(Box::new(e)))
            }
        }
    }
}

fn unexpected_reply(reply: Reply) -> Error {
    Error::Protocol(format!("unexpected reply: {reply:?}"))
}

/// The connection task: single owner of the socket and the driver.
async fn run(
    mut stream: Stream,
    mut driver: Driver,
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
    peer: Option<SocketAddr>,
) {
    let mut inbound: Vec<u8> = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    // Startup packet written by Driver::new.
    if flush(&mut stream, &mut driver).await.is_err() {
        driver.fail_all(|| Error::Disconnected("write failed".into()));
        return;
    }

    loop {
        tokio::select! {
            envelope = receiver.recv() => match envelope {
                None | Some(Envelope::Close) => {
                    driver.write_terminate();
                    let _ = flush(&mut stream, &mut driver).await;
                    driver.fail_all(|| Error::Closed);
                    return;
                }
                Some(Envelope::Command(command, sink)) => {
                    driver.on_command(command, sink);
                }
                Some(Envelope::GetParameter { name, reply }) => {
                    let _ = reply.send(driver.parameter(&name).map(str::to_string));
                }
                Some(Envelope::Cancel { reply }) => {
                    let key = driver.backend_key();
                    // Side-channel; never blocks the connection task.
                    tokio::spawn(async move {
                        let _ = reply.send(cancel_request(peer, key).await);
                    });
                }
            },
            read = stream.read(&mut chunk) => match read {
                Ok(0) => {
                    driver.fail_all(|| Error::Disconnected("connection closed by server".into()));
                    return;
                }
                Ok(n) => {
                    inbound.extend_from_slice(&chunk[..n]);
                    loop {
                        match decode_frame(&mut inbound) {
                            Ok(Some(frame)) => {
                                if let Err(e) = driver.on_message(frame.tag, &frame.payload) {
                                    tracing::warn!(error = %e, "fatal connection error");
                                    let reason = e.to_string();
                                    driver.fail_all(|| Error::Disconnected(reason.clone()));
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                let reason = e.to_string();
                                driver.fail_all(|| Error::Disconnected(reason.clone()));
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    driver.fail_all(|| Error::Disconnected(reason.clone()));
                    return;
                }
            },
        }

        if flush(&mut stream, &mut driver).await.is_err() {
            driver.fail_all(|| Error::Disconnected("write failed".into()));
            return;
        }
        if driver.is_terminated() {
            return;
        }
    }
}

async fn flush(stream: &mut Stream, driver: &mut Driver) -> std::io::Result<()> {
    let outbound = driver.take_outbound();
    if outbound.is_empty() {
        return Ok(());
    }
    stream.write_all(&outbound).await?;
    stream.flush().await
}

async fn cancel_request(peer: Option<SocketAddr>, key: Option<BackendKey>) -> Result<()> {
    let Some(peer) = peer else {
        return Err(Error::InvalidUsage(
            "cancel requires a TCP peer address".into(),
        ));
    };
    let Some(key) = key else {
        return Err(Error::InvalidUsage(
            "no BackendKeyData received; cancel unavailable".into(),
        ));
    };

    let mut socket = TcpStream::connect(peer).await?;
    let mut frame = Vec::with_capacity(16);
    write_cancel_request(&mut frame, key.pid, key.secret);
    socket.write_all(&frame).await?;
    socket.flush().await?;
    Ok(())
}
