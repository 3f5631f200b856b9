//! Extended query protocol backend messages.
//!
//! ParseComplete, BindComplete, CloseComplete, NoData and PortalSuspended
//! carry no payload; the driver dispatches on the tag byte alone.

use zerocopy::byteorder::big_endian::U16 as U16BE;
use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::protocol::codec::read_u32;
use crate::protocol::types::Oid;

/// ParameterDescription message - parameter types of a prepared statement.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    /// Parameter type OIDs
    pub param_oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let Some((head, mut data)) = payload.split_at_checked(2) else {
            return Err(Error::Protocol("ParameterDescription: short header".into()));
        };
        let num_params = U16BE::read_from_bytes(head)
            .map_err(|e| Error::Protocol(format!("ParameterDescription header: {e:?}")))?
            .get() as usize;

        let mut param_oids = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            let (type_oid, rest) = read_u32(data)?;
            param_oids.push(type_oid);
            data = rest;
        }

        Ok(Self { param_oids })
    }
}
