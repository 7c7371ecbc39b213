//! Big-endian length-prefixed primitives shared by the request and response codecs.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::QueryError;

/// Checked reader over a byte slice. Every read reports which field ran out of input rather than panicking.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn ensure(&self, field: &'static str, len: usize) -> Result<(), QueryError> {
        if self.buf.remaining() < len {
            return Err(QueryError::Truncated {
                field,
                needed: len - self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, QueryError> {
        self.ensure(field, 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16, QueryError> {
        self.ensure(field, 2)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, QueryError> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self, field: &'static str) -> Result<u64, QueryError> {
        self.ensure(field, 8)?;
        Ok(self.buf.get_u64())
    }

    pub fn fixed<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], QueryError> {
        self.ensure(field, N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn slice(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], QueryError> {
        self.ensure(field, len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// A `u32` length followed by that many bytes.
    pub fn var_bytes(&mut self, field: &'static str) -> Result<&'a [u8], QueryError> {
        let len = self.u32(field)? as usize;
        self.slice(field, len)
    }

    pub fn var_string(&mut self, field: &'static str) -> Result<String, QueryError> {
        let bytes = self.var_bytes(field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| QueryError::InvalidUtf8 { field })
    }

    pub fn finish(self) -> Result<(), QueryError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(QueryError::TrailingBytes(n)),
        }
    }
}

/// Append-only writer. Length checks happen in validation, before anything is written.
#[derive(Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32(v);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64(v);
        self
    }

    pub fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    pub fn var_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.u32(v.len() as u32).raw(v)
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Counts on the wire are single bytes.
pub(crate) fn count_u8(what: &'static str, count: usize) -> Result<u8, QueryError> {
    u8::try_from(count).map_err(|_| QueryError::TooMany {
        what,
        count,
        max: u8::MAX as usize,
    })
}
