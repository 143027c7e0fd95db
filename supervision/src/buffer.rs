//! Append-only capture of the client's combined stdout/stderr.
//!
//! Writers are the pump tasks draining the child's pipes; readers are the
//! attempt poller and the final outcome. All access goes through an
//! `RwLock` so a reader always sees whole appended chunks.

use std::sync::{Arc, RwLock};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

const READ_CHUNK: usize = 4096;

/// Shared handle to one attempt's captured output.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<RwLock<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, bytes: &[u8]) {
        // The buffer is only ever extended, so a poisoned lock still holds
        // consistent bytes.
        let mut buf = self.inner.write().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(bytes);
    }

    /// Lossy UTF-8 copy of everything captured so far.
    pub fn snapshot(&self) -> String {
        let buf = self.inner.read().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `reader` into the buffer until EOF or a read error.
    pub async fn pump<R>(self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => self.append(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "output pump stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_snapshot() {
        let buf = OutputBuffer::new();
        assert!(buf.is_empty());
        buf.append(b"TLS: Initial packet\n");
        buf.append(b"PUSH_REPLY,route 10.8.0.1\n");
        assert_eq!(buf.len(), 46);
        assert!(buf.snapshot().contains("PUSH_REPLY"));
        assert!(buf.snapshot().starts_with("TLS: Initial packet\n"));
    }

    #[test]
    fn clones_share_storage() {
        let buf = OutputBuffer::new();
        let writer = buf.clone();
        writer.append(b"hello");
        assert_eq!(buf.snapshot(), "hello");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let buf = OutputBuffer::new();
        buf.append(&[b'o', b'k', 0xff, b'!']);
        assert_eq!(buf.snapshot(), "ok\u{fffd}!");
    }

    #[tokio::test]
    async fn pump_drains_reader() {
        let buf = OutputBuffer::new();
        let data: &[u8] = b"line one\nline two\n";
        buf.clone().pump(data).await;
        assert_eq!(buf.snapshot(), "line one\nline two\n");
    }
}
