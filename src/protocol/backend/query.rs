//! Query result backend messages.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::read_cstr;
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes after the name).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// One field of a RowDescription.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// Field name
    pub name: String,
    /// Data type OID
    pub type_oid: Oid,
    /// Format code the server will use for this column
    pub format: FormatCode,
}

/// RowDescription message - describes the columns of a result set.
#[derive(Debug)]
pub struct RowDescription {
    /// Field descriptions in column order
    pub fields: Vec<FieldDescription>,
}

impl RowDescription {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let Some((head, mut data)) = payload.split_at_checked(2) else {
            return Err(Error::Protocol("RowDescription: short header".into()));
        };
        let num_fields = U16BE::read_from_bytes(head)
            .map_err(|e| Error::Protocol(format!("RowDescription header: {e:?}")))?
            .get() as usize;

        let mut fields = Vec::with_capacity(num_fields);
        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let Some((tail_bytes, rest)) = rest.split_at_checked(TAIL_SIZE) else {
                return Err(Error::Protocol("RowDescription: short field".into()));
            };
            let tail = FieldDescriptionTail::read_from_bytes(tail_bytes)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;

            fields.push(FieldDescription {
                name: name.to_string(),
                type_oid: tail.type_oid.get(),
                format: FormatCode::from_u16(tail.format.get()),
            });
            data = rest;
        }

        Ok(Self { fields })
    }
}

/// DataRow message - a single row of data.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let Some((head, columns_data)) = payload.split_at_checked(2) else {
            return Err(Error::Protocol("DataRow: short header".into()));
        };
        let num_columns = u16::from_be_bytes([head[0], head[1]]);
        Ok(Self {
            num_columns,
            columns_data,
        })
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Create an iterator over column values.
    ///
    /// Each item is `Option<&[u8]>` where `None` represents NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let len;
        (len, self.remaining) = self.remaining.split_at_checked(4)?;
        let len = i32::from_be_bytes([len[0], len[1], len[2], len[3]]);

        if len == -1 {
            // NULL value
            Some(None)
        } else {
            let value;
            (value, self.remaining) = self.remaining.split_at_checked(len as usize)?;
            Some(Some(value))
        }
    }
}

/// CommandComplete message - successful completion of one statement.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g. "SELECT 5", "INSERT 0 1", "BEGIN")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Row count from the command tag, when the tag carries one.
    ///
    /// Tags are a verb optionally followed by counters; the row count is the
    /// last token ("SELECT 5" → 5, "INSERT 0 1" → 1, "BEGIN" → none).
    pub fn rows_affected(&self) -> Option<u64> {
        self.tag.rsplit(' ').next()?.parse().ok()
    }
}
