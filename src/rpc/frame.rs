//! Length-prefixed JSON framing over a byte stream.

use std::io;

use serde::{Serialize, de::DeserializeOwned};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Result, error::IpcError};

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Reusable buffer for socket I/O: 4-byte little-endian length, then JSON.
pub struct SocketBuffer {
   buf:       SmallVec<[u8; 2048]>,
   max_bytes: usize,
}

impl io::Write for SocketBuffer {
   fn write(&mut self, data: &[u8]) -> io::Result<usize> {
      self.buf.extend_from_slice(data);
      Ok(data.len())
   }

   fn flush(&mut self) -> io::Result<()> {
      Ok(())
   }
}

impl Default for SocketBuffer {
   fn default() -> Self {
      Self::new()
   }
}

impl SocketBuffer {
   pub fn new() -> Self {
      Self::with_limit(DEFAULT_MAX_MESSAGE_BYTES)
   }

   pub fn with_limit(max_bytes: usize) -> Self {
      Self { buf: SmallVec::new(), max_bytes }
   }

   /// Serializes and sends a message with length prefix
   pub async fn send<W, T>(&mut self, writer: &mut W, msg: &T) -> Result<()>
   where
      W: AsyncWrite + Unpin,
      T: Serialize,
   {
      self.buf.clear();
      self.buf.resize(4, 0u8);
      serde_json::to_writer(&mut *self, msg).map_err(IpcError::Serialize)?;
      let payload_len = self.buf.len() - 4;
      if payload_len > self.max_bytes {
         return Err(IpcError::MessageTooLarge(payload_len).into());
      }
      self.buf[..4].copy_from_slice(&(payload_len as u32).to_le_bytes());
      writer.write_all(&self.buf).await.map_err(IpcError::Write)?;
      writer.flush().await.map_err(IpcError::Write)?;
      Ok(())
   }

   /// Receives and deserializes a message with length prefix.
   ///
   /// Returns `None` on a clean end of stream before any length byte.
   pub async fn recv<R, T>(&mut self, reader: &mut R) -> Result<Option<T>>
   where
      R: AsyncRead + Unpin,
      T: DeserializeOwned,
   {
      let mut len_buf = [0u8; 4];
      match reader.read_exact(&mut len_buf).await {
         Ok(_) => {},
         Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
         Err(e) => return Err(IpcError::Read(e).into()),
      }
      let len = u32::from_le_bytes(len_buf) as usize;
      if len > self.max_bytes {
         return Err(IpcError::MessageTooLarge(len).into());
      }

      self.buf.resize(len, 0u8);
      reader
         .read_exact(self.buf.as_mut_slice())
         .await
         .map_err(IpcError::Read)?;
      serde_json::from_slice(&self.buf)
         .map(Some)
         .map_err(|e| IpcError::Deserialize(e).into())
   }
}

#[cfg(test)]
mod tests {
   use serde_json::{Value, json};

   use super::*;
   use crate::error::Error;

   #[tokio::test]
   async fn frames_round_trip_over_duplex() {
      let (mut a, mut b) = tokio::io::duplex(64 * 1024);
      let mut tx = SocketBuffer::new();
      let mut rx = SocketBuffer::new();
      tx.send(&mut a, &json!({"hello": [1, 2, 3]})).await.expect("send");
      drop(a);
      let got: Option<Value> = rx.recv(&mut b).await.expect("recv");
      assert_eq!(got, Some(json!({"hello": [1, 2, 3]})));
      let eof: Option<Value> = rx.recv(&mut b).await.expect("eof");
      assert!(eof.is_none());
   }

   #[tokio::test]
   async fn oversized_frames_are_rejected() {
      let (mut a, mut b) = tokio::io::duplex(64 * 1024);
      let mut tx = SocketBuffer::with_limit(16);
      let err = tx.send(&mut a, &"x".repeat(64)).await.expect_err("too large");
      assert!(matches!(err, Error::Ipc(IpcError::MessageTooLarge(_))));

      let mut big = SocketBuffer::new();
      big.send(&mut a, &"x".repeat(64)).await.expect("send");
      let mut rx = SocketBuffer::with_limit(16);
      let err = rx.recv::<_, Value>(&mut b).await.expect_err("too large");
      assert!(matches!(err, Error::Ipc(IpcError::MessageTooLarge(66))));
   }
}
