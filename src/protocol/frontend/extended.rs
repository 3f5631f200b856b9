//! Extended query protocol messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

use super::DescribeTarget;

/// Write a Parse message to create a prepared statement.
///
/// - `name`: statement name (empty string for the unnamed statement)
/// - `query`: SQL with $1, $2, ... placeholders
/// - `param_oids`: parameter type OIDs (0 = let the server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &type_oid in param_oids {
        msg.write_i32(type_oid as i32);
    }
    msg.finish();
}

/// Write a Bind message to create a portal from a prepared statement.
///
/// - `portal`: portal name (empty string for the unnamed portal)
/// - `statement`: statement name
/// - `params`: binary-encoded parameter values, `None` for NULL
/// - `result_formats`: per-column result format codes
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &[Option<Vec<u8>>],
    result_formats: &[FormatCode],
) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);

    msg.write_cstr(portal);
    msg.write_cstr(statement);

    // Parameter format codes - all binary (1)
    msg.write_i16(params.len() as i16);
    for _ in params {
        msg.write_i16(FormatCode::Binary as i16);
    }

    // Parameter values, length-prefixed; -1 marks NULL
    msg.write_i16(params.len() as i16);
    for param in params {
        match param {
            Some(bytes) => {
                msg.write_i32(bytes.len() as i32);
                msg.write_bytes(bytes);
            }
            None => msg.write_i32(-1),
        }
    }

    // Result format codes
    msg.write_i16(result_formats.len() as i16);
    for &format in result_formats {
        msg.write_i16(format as i16);
    }

    msg.finish();
}

/// Write an Execute message to run a portal.
///
/// - `portal`: portal name
/// - `max_rows`: maximum number of rows to return (0 = unlimited)
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows as i32);
    msg.finish();
}

/// Write a Describe message for a statement or portal.
pub fn write_describe(buf: &mut Vec<u8>, target: DescribeTarget, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(target.as_byte());
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Close message to release a statement or portal.
pub fn write_close(buf: &mut Vec<u8>, target: DescribeTarget, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
    msg.write_u8(target.as_byte());
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Sync message.
///
/// Ends an extended query group; the server responds with ReadyForQuery and,
/// after an error, resumes processing new commands.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

/// Write a Flush message.
///
/// Forces the server to send all pending responses without waiting for Sync.
pub fn write_flush(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::FLUSH);
    msg.finish();
}
