//! Simple query protocol messages.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message (simple query protocol).
///
/// The SQL string may contain multiple statements separated by semicolons;
/// the server answers each in order and finishes with ReadyForQuery.
pub fn write_query(buf: &mut Vec<u8>, sql: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(sql);
    msg.finish();
}
