//! Wire format.
//!
//! A message carries a length-prefixed payload buffer, a blob count, and a
//! length-prefixed byte window per blob; the opcode and the callable
//! identifier are written last and read first, from the back of the buffer,
//! so a receiver can dispatch without first parsing the payload.

use crate::error::{Result, RpcError};

/// One of the five message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Finish,
    Function,
    MemFn,
    Create,
    Destroy,
}

impl Opcode {
    fn to_byte(self) -> u8 {
        match self {
            Opcode::Finish => 0,
            Opcode::Function => 1,
            Opcode::MemFn => 2,
            Opcode::Create => 3,
            Opcode::Destroy => 4,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Opcode::Finish,
            1 => Opcode::Function,
            2 => Opcode::MemFn,
            3 => Opcode::Create,
            4 => Opcode::Destroy,
            other => {
                return Err(RpcError::UnexpectedOpcode {
                    expected: "0..=4".into(),
                    got: other.to_string(),
                }
                .into())
            }
        })
    }
}

/// Requests are tagged `Consumer`, responses `Producer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Consumer,
    Producer,
}

/// One RPC message: an opcode, a callable identifier (function/method name,
/// empty for `Finish`/`Destroy`), a main payload buffer, and any out-of-band
/// blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: Opcode,
    pub callable: String,
    pub payload: Vec<u8>,
    pub blobs: Vec<Vec<u8>>,
}

impl Message {
    pub fn function(callable: impl Into<String>, payload: Vec<u8>) -> Self {
        Message { opcode: Opcode::Function, callable: callable.into(), payload, blobs: Vec::new() }
    }

    pub fn mem_fn(callable: impl Into<String>, payload: Vec<u8>) -> Self {
        Message { opcode: Opcode::MemFn, callable: callable.into(), payload, blobs: Vec::new() }
    }

    pub fn create(class_id: u8, payload: Vec<u8>) -> Self {
        let mut w = Writer::new();
        w.write_u8(class_id);
        w.write_bytes(&payload);
        Message { opcode: Opcode::Create, callable: String::new(), payload: w.finish(), blobs: Vec::new() }
    }

    pub fn destroy(object_id: u64) -> Self {
        let mut w = Writer::new();
        w.write_u64(object_id);
        Message { opcode: Opcode::Destroy, callable: String::new(), payload: w.finish(), blobs: Vec::new() }
    }

    pub fn finish() -> Self {
        Message { opcode: Opcode::Finish, callable: String::new(), payload: Vec::new(), blobs: Vec::new() }
    }

    pub fn with_blobs(mut self, blobs: Vec<Vec<u8>>) -> Self {
        self.blobs = blobs;
        self
    }

    /// Encode as `[body][callable bytes][callable length: u32][opcode: u8]`,
    /// where `body` is `[payload length-prefixed][blob count][blob
    /// length-prefixed...]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(&self.payload);
        w.write_u64(self.blobs.len() as u64);
        for blob in &self.blobs {
            w.write_bytes(blob);
        }
        let callable = self.callable.as_bytes();
        w.raw(callable);
        w.write_u32(callable.len() as u32);
        w.write_u8(self.opcode.to_byte());
        w.finish()
    }

    /// Decode a buffer produced by [`Message::encode`], reading the footer
    /// (opcode, callable) first and the body second.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(RpcError::Transport("decode: empty buffer".into()).into());
        }
        let opcode = Opcode::from_byte(buf[buf.len() - 1])?;
        if buf.len() < 5 {
            return Err(RpcError::Transport("decode: truncated footer".into()).into());
        }
        let callable_len_at = buf.len() - 5;
        let callable_len = u32::from_le_bytes(buf[callable_len_at..callable_len_at + 4].try_into().unwrap()) as usize;
        if callable_len_at < callable_len {
            return Err(RpcError::Transport("decode: callable length out of range".into()).into());
        }
        let callable_start = callable_len_at - callable_len;
        let callable = String::from_utf8(buf[callable_start..callable_len_at].to_vec())
            .map_err(|e| RpcError::Transport(format!("decode: callable not utf8: {e}")))?;

        let mut r = Reader::new(&buf[..callable_start]);
        let payload = r.read_bytes()?.to_vec();
        let blob_count = r.read_u64()?;
        let mut blobs = Vec::with_capacity(blob_count as usize);
        for _ in 0..blob_count {
            blobs.push(r.read_bytes()?.to_vec());
        }
        Ok(Message { opcode, callable, payload, blobs })
    }
}

/// A small append-only byte writer, the counterpart to [`Reader`].
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write raw bytes with no length prefix (the caller tracks the length
    /// out of band, as the trailing callable field does).
    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u64(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for Writer {
    fn default() -> Self {
        Writer::new()
    }
}

/// A small cursor-based byte reader, the counterpart to [`Writer`].
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| RpcError::Transport("reader: truncated u8".into()))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| RpcError::Transport("reader: truncated u32".into()))?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 8)
            .ok_or_else(|| RpcError::Transport("reader: truncated u64".into()))?;
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Read exactly `n` bytes with no length prefix (the counterpart to
    /// [`Writer::raw`]).
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        let out = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or_else(|| RpcError::Transport("reader: truncated raw span".into()))?;
        self.pos += n;
        Ok(out)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u64()? as usize;
        let out = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or_else(|| RpcError::Transport("reader: truncated bytes".into()))?;
        self.pos += len;
        Ok(out)
    }

    pub fn read_str(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| RpcError::Transport(format!("reader: not utf8: {e}")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_message_roundtrips() {
        let msg = Message::function("get_data", vec![1, 2, 3]).with_blobs(vec![vec![9, 9], vec![7]]);
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn finish_message_has_empty_callable_and_payload() {
        let msg = Message::finish();
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.opcode, Opcode::Finish);
        assert!(decoded.callable.is_empty());
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn create_message_carries_class_id_in_payload() {
        let msg = Message::create(7, vec![0xAB]);
        let decoded = Message::decode(&msg.encode()).unwrap();
        let mut r = Reader::new(&decoded.payload);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_bytes().unwrap(), &[0xAB]);
    }

    #[test]
    fn writer_reader_roundtrip_primitives() {
        let mut w = Writer::new();
        w.write_u32(42);
        w.write_str("hello");
        w.write_u64(9_000_000_000);
        let buf = w.finish();
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 42);
        assert_eq!(r.read_str().unwrap(), "hello");
        assert_eq!(r.read_u64().unwrap(), 9_000_000_000);
    }
}
