//! End-to-end tests against a scripted in-memory server.
//!
//! The fake server speaks just enough of the backend protocol to exercise
//! the full client path: handshake, simple and extended queries, the
//! transaction helper and LISTEN/NOTIFY delivery, all over
//! `tokio::io::duplex`.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::mpsc;

use relay_postgres::{AsyncMessage, Config, Connection, Error, Value};

// === wire helpers ===

fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((payload.len() as i32 + 4).to_be_bytes()));
    out.extend_from_slice(payload);
    out
}

fn cstr_payload(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(part.as_bytes());
        out.push(0);
    }
    out
}

fn command_complete(tag: &str) -> Vec<u8> {
    frame(b'C', &cstr_payload(&[tag]))
}

fn error_response(code: &str, message: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"SERROR\0");
    payload.push(b'C');
    payload.extend_from_slice(code.as_bytes());
    payload.push(0);
    payload.push(b'M');
    payload.extend_from_slice(message.as_bytes());
    payload.push(0);
    payload.push(0);
    frame(b'E', &payload)
}

fn row_description_int4(format: u16) -> Vec<u8> {
    let mut payload = 1u16.to_be_bytes().to_vec();
    payload.extend_from_slice(b"?column?\0");
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(&0i16.to_be_bytes());
    payload.extend_from_slice(&23u32.to_be_bytes());
    payload.extend_from_slice(&4i16.to_be_bytes());
    payload.extend_from_slice(&(-1i32).to_be_bytes());
    payload.extend_from_slice(&format.to_be_bytes());
    frame(b'T', &payload)
}

fn data_row(cells: &[&[u8]]) -> Vec<u8> {
    let mut payload = (cells.len() as u16).to_be_bytes().to_vec();
    for cell in cells {
        payload.extend_from_slice(&(cell.len() as i32).to_be_bytes());
        payload.extend_from_slice(cell);
    }
    frame(b'D', &payload)
}

fn notification(pid: u32, channel: &str, body: &str) -> Vec<u8> {
    let mut payload = pid.to_be_bytes().to_vec();
    payload.extend_from_slice(channel.as_bytes());
    payload.push(0);
    payload.extend_from_slice(body.as_bytes());
    payload.push(0);
    frame(b'A', &payload)
}

fn ready(status: u8) -> Vec<u8> {
    frame(b'Z', &[status])
}

fn cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

async fn read_frame(stream: &mut DuplexStream) -> Option<(u8, Vec<u8>)> {
    let tag = stream.read_u8().await.ok()?;
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.ok()?;
    let len = i32::from_be_bytes(len) as usize;
    let mut payload = vec![0u8; len - 4];
    stream.read_exact(&mut payload).await.ok()?;
    Some((tag, payload))
}

// === the scripted server ===

/// Minimal backend: MD5-less trust auth, canned answers for the handful of
/// SQL shapes the tests use, binary int4 maths for the extended flow.
async fn run_server(mut stream: DuplexStream, log: Arc<Mutex<Vec<String>>>) {
    // Startup message: length-only header.
    let mut len = [0u8; 4];
    if stream.read_exact(&mut len).await.is_err() {
        return;
    }
    let mut startup = vec![0u8; i32::from_be_bytes(len) as usize - 4];
    if stream.read_exact(&mut startup).await.is_err() {
        return;
    }

    let mut greeting = frame(b'R', &0i32.to_be_bytes());
    greeting.extend(frame(b'S', &cstr_payload(&["integer_datetimes", "on"])));
    greeting.extend(frame(b'S', &cstr_payload(&["client_encoding", "UTF8"])));
    greeting.extend(frame(b'S', &cstr_payload(&["server_version", "16.3"])));
    let mut key = 7i32.to_be_bytes().to_vec();
    key.extend_from_slice(&42i32.to_be_bytes());
    greeting.extend(frame(b'K', &key));
    greeting.extend(ready(b'I'));
    if stream.write_all(&greeting).await.is_err() {
        return;
    }

    let mut tx_state = b'I';
    let mut parsed_sql = String::new();
    let mut bound: Option<i32> = None;

    while let Some((tag, payload)) = read_frame(&mut stream).await {
        let mut out: Vec<u8> = Vec::new();
        match tag {
            b'Q' => {
                let sql = cstr(&payload);
                log.lock().expect("log lock").push(sql.clone());
                simple_query(&sql, &mut tx_state, &mut out);
            }
            b'P' => {
                // name, then sql
                let rest = &payload[payload.iter().position(|&b| b == 0).expect("nul") + 1..];
                parsed_sql = cstr(rest);
                log.lock().expect("log lock").push(parsed_sql.clone());
                out.extend(frame(b'1', &[]));
            }
            b'D' => {
                // 't' for a statement describe, then row shape
                if payload.first() == Some(&b'S') {
                    let oids: &[u8] = if parsed_sql.contains("$1") {
                        &[0, 1, 0, 0, 0, 23]
                    } else {
                        &[0, 0]
                    };
                    out.extend(frame(b't', oids));
                }
                if parsed_sql.starts_with("SELECT") {
                    out.extend(row_description_int4(0));
                } else {
                    out.extend(frame(b'n', &[]));
                }
            }
            b'B' => {
                bound = bind_param(&payload);
                out.extend(frame(b'2', &[]));
            }
            b'E' => {
                execute(&parsed_sql, bound, &mut out);
            }
            b'C' => {
                out.extend(frame(b'3', &[]));
            }
            b'S' => {
                out.extend(ready(tx_state));
            }
            b'H' => {}
            b'X' => return,
            other => panic!("fake server got unexpected tag '{}'", other as char),
        }
        if !out.is_empty() && stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn simple_query(sql: &str, tx_state: &mut u8, out: &mut Vec<u8>) {
    match sql {
        "BEGIN" => {
            *tx_state = b'T';
            out.extend(command_complete("BEGIN"));
        }
        "COMMIT" => {
            *tx_state = b'I';
            out.extend(command_complete("COMMIT"));
        }
        "ROLLBACK" => {
            *tx_state = b'I';
            out.extend(command_complete("ROLLBACK"));
        }
        "SELECT 1" => {
            out.extend(row_description_int4(0));
            out.extend(data_row(&[b"1"]));
            out.extend(command_complete("SELECT 1"));
        }
        "LISTEN jobs" => {
            out.extend(command_complete("LISTEN"));
        }
        "NOTIFY jobs, 'ping'" => {
            out.extend(command_complete("NOTIFY"));
            out.extend(notification(99, "jobs", "ping"));
        }
        sql if sql.contains("1/0") => {
            if *tx_state == b'T' {
                *tx_state = b'E';
            }
            out.extend(error_response("22012", "division by zero"));
        }
        _ => {
            out.extend(command_complete("SELECT 0"));
        }
    }
    out.extend(ready(*tx_state));
}

fn bind_param(payload: &[u8]) -> Option<i32> {
    // portal, statement, format codes, then the first parameter value
    let mut rest = payload;
    for _ in 0..2 {
        rest = &rest[rest.iter().position(|&b| b == 0)? + 1..];
    }
    let nformats = i16::from_be_bytes([rest[0], rest[1]]) as usize;
    rest = &rest[2 + 2 * nformats..];
    let nparams = i16::from_be_bytes([rest[0], rest[1]]);
    rest = &rest[2..];
    if nparams == 0 {
        return None;
    }
    let len = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
    if len != 4 {
        return None;
    }
    Some(i32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]))
}

fn execute(parsed_sql: &str, bound: Option<i32>, out: &mut Vec<u8>) {
    if parsed_sql.contains("$1::int + 1") {
        let result = bound.expect("bound parameter") + 1;
        out.extend(data_row(&[&result.to_be_bytes()]));
        out.extend(command_complete("SELECT 1"));
    } else if parsed_sql.starts_with("SELECT") {
        out.extend(data_row(&[&1i32.to_be_bytes()]));
        out.extend(command_complete("SELECT 1"));
    } else {
        out.extend(command_complete("SELECT 0"));
    }
}

// === harness ===

async fn connect_pair(config: Config) -> (Connection, Arc<Mutex<Vec<String>>>) {
    let (client_side, server_side) = duplex(64 * 1024);
    let log = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(run_server(server_side, Arc::clone(&log)));
    let conn = Connection::connect_stream(client_side, config)
        .await
        .expect("connect");
    (conn, log)
}

fn test_config() -> Config {
    Config {
        user: "alice".into(),
        database: Some("app".into()),
        ..Default::default()
    }
}

// === tests ===

#[tokio::test]
async fn connect_and_simple_query() {
    let (conn, _log) = connect_pair(test_config()).await;

    let results = conn.squery("SELECT 1").await.expect("squery");
    assert_eq!(results.len(), 1);
    let result = results[0].as_ref().expect("statement ok");
    assert_eq!(result.rows_affected, Some(1));
    assert_eq!(result.columns[0].name, "?column?");
    assert_eq!(result.rows, vec![vec![Value::Int4(1)]]);
}

#[tokio::test]
async fn get_parameter_needs_no_round_trip() {
    let (conn, _log) = connect_pair(test_config()).await;

    let value = conn.get_parameter("client_encoding").await.expect("get");
    assert_eq!(value.as_deref(), Some("UTF8"));
    let missing = conn.get_parameter("work_mem").await.expect("get");
    assert!(missing.is_none());
}

#[tokio::test]
async fn equery_round_trip() {
    let (conn, _log) = connect_pair(test_config()).await;

    let result = conn
        .equery("SELECT $1::int + 1", vec![Value::Int4(41)])
        .await
        .expect("equery");
    assert_eq!(result.rows_affected, Some(1));
    assert_eq!(result.rows, vec![vec![Value::Int4(42)]]);
}

#[tokio::test]
async fn prepared_statement_flow() {
    let (conn, _log) = connect_pair(test_config()).await;

    let statement = conn.parse("s1", "SELECT $1::int + 1", &[]).await.expect("parse");
    assert_eq!(statement.param_types, vec![23]);
    assert_eq!(statement.columns.len(), 1);

    conn.bind(&statement, "c1", vec![Value::Int4(41)])
        .await
        .expect("bind");
    let outcome = conn.execute(&statement, "c1", 0).await.expect("execute");
    match outcome {
        relay_postgres::ExecuteOutcome::Complete(result) => {
            assert_eq!(result.rows, vec![vec![Value::Int4(42)]]);
        }
        other => panic!("expected completion, got {other:?}"),
    }

    conn.close_portal("c1").await.expect("close portal");
    conn.close_statement("s1").await.expect("close statement");
    conn.sync().await.expect("sync");
}

#[tokio::test]
async fn transaction_commits_on_success() {
    let (conn, log) = connect_pair(test_config()).await;

    let value = conn
        .with_transaction(|c| async move {
            let result = c.squery_one("SELECT 1").await?;
            Ok(result.rows[0][0].clone())
        })
        .await
        .expect("transaction");
    assert_eq!(value, Value::Int4(1));

    let statements = log.lock().expect("log lock").clone();
    assert_eq!(statements, vec!["BEGIN", "SELECT 1", "COMMIT"]);
}

#[tokio::test]
async fn transaction_rolls_back_on_failure() {
    let (conn, log) = connect_pair(test_config()).await;

    let result: Result<(), Error> = conn
        .with_transaction(|c| async move {
            c.squery_one("SELECT 1/0").await?;
            Ok(())
        })
        .await;

    match result {
        Err(Error::RolledBack(cause)) => match *cause {
            Error::Server(server) => assert_eq!(server.sqlstate(), "22012"),
            other => panic!("expected server error cause, got {other:?}"),
        },
        other => panic!("expected rollback, got {other:?}"),
    }

    let statements = log.lock().expect("log lock").clone();
    assert_eq!(statements, vec!["BEGIN", "SELECT 1/0", "ROLLBACK"]);

    // The connection stays usable afterwards.
    let results = conn.squery("SELECT 1").await.expect("squery");
    assert!(results[0].is_ok());
}

#[tokio::test]
async fn notifications_reach_the_subscriber() {
    let (async_tx, mut async_rx) = mpsc::unbounded_channel();
    let config = Config {
        subscriber: Some(async_tx),
        ..test_config()
    };
    let (conn, _log) = connect_pair(config).await;

    conn.squery_one("LISTEN jobs").await.expect("listen");
    let result = conn.squery_one("NOTIFY jobs, 'ping'").await.expect("notify");
    assert!(result.rows.is_empty());

    loop {
        match async_rx.recv().await.expect("async message") {
            AsyncMessage::Notification {
                pid,
                channel,
                payload,
            } => {
                assert_eq!(pid, 99);
                assert_eq!(channel, "jobs");
                assert_eq!(payload, "ping");
                break;
            }
            // Startup parameter reports may precede it.
            AsyncMessage::ParameterChanged { .. } => continue,
            other => panic!("unexpected async message {other:?}"),
        }
    }
}

#[tokio::test]
async fn close_is_idempotent() {
    let (conn, _log) = connect_pair(test_config()).await;

    conn.close();
    conn.close();

    let result = conn.squery("SELECT 1").await;
    assert!(matches!(result, Err(Error::Closed)));
}

#[tokio::test]
async fn streaming_simple_query() {
    let (conn, _log) = connect_pair(test_config()).await;

    let mut events = conn.squery_stream("SELECT 1").expect("stream");
    let mut rows = 0;
    loop {
        match events.recv().await.expect("event") {
            relay_postgres::StreamEvent::Row(row) => {
                assert_eq!(row, vec![Value::Int4(1)]);
                rows += 1;
            }
            relay_postgres::StreamEvent::Done => break,
            relay_postgres::StreamEvent::Columns(_)
            | relay_postgres::StreamEvent::Complete { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(rows, 1);
}
