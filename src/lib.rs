//! An asynchronous PostgreSQL client driver.
//!
//! # Design
//!
//! - **Single-owner connection task**: one spawned task owns the socket and
//!   a FIFO queue of in-flight requests. Pipelined commands correlate with
//!   backend replies purely by queue order, as the protocol guarantees.
//! - **Sans-I/O core**: the protocol state machine ([`driver::Driver`])
//!   never touches a socket; it consumes decoded frames and emits wire
//!   bytes, which makes the whole protocol path testable without a server.
//! - **Both query protocols**: simple queries (multi-statement batches) and
//!   the extended Parse/Bind/Describe/Execute/Close/Sync flow, including
//!   row-limited executes with portal suspension.
//! - **Asynchronous events**: notices, LISTEN/NOTIFY notifications and
//!   parameter changes are forwarded to an optional subscriber channel,
//!   bypassing the request queue.
//!
//! # Example
//!
//! ```no_run
//! use relay_postgres::{Config, Connection};
//!
//! #[tokio::main]
//! async fn main() -> relay_postgres::Result<()> {
//!     let config = Config {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         password: Some("secret".into()),
//!         database: Some("mydb".into()),
//!         ..Default::default()
//!     };
//!
//!     let conn = Connection::connect(config).await?;
//!
//!     let result = conn.equery("SELECT $1::int + 1", vec![41.into()]).await?;
//!     println!("rows: {:?}", result.rows);
//!
//!     conn.close();
//!     Ok(())
//! }
//! ```

// private
mod client;
mod config;
mod error;
mod result;
mod statement;
mod stream;

// pub
pub mod driver;
pub mod protocol;
pub mod types;

pub use client::Connection;
pub use config::{Config, SslMode};
pub use error::{Error, Result, ServerError};
pub use result::{AsyncMessage, ExecuteOutcome, QueryResult, Row, StatementResult, StreamEvent};
pub use statement::{Column, Statement};
pub use stream::Stream;
pub use types::Value;
