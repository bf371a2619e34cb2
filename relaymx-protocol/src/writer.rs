use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Per-connection outbound byte queue.
///
/// A write that can't be appended and flushed atomically is queued rather
/// than interleaved: the lock is taken once to append `payload`, and the
/// buffer is swapped out for writing so the critical section never spans the
/// actual I/O. If more bytes land in the queue while a drain is in flight
/// (e.g. two backend replies settling concurrently for the same session),
/// the drain loop picks them up before returning, so callers never need to
/// retry a partial write themselves.
#[derive(Default)]
pub struct WriteQueue {
    pending: Mutex<BytesMut>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self { pending: Mutex::new(BytesMut::new()) }
    }

    /// Queue `payload` and drain the backlog (this call's bytes plus
    /// anything left over from a previous caller) through `writer`.
    pub async fn write(&self, writer: &mut (impl AsyncWrite + Unpin), payload: &[u8]) -> Result<()> {
        let mut batch = {
            let mut guard = self.pending.lock();
            guard.extend_from_slice(payload);
            std::mem::take(&mut *guard)
        };

        loop {
            writer.write_all(&batch).await?;
            writer.flush().await?;

            let mut guard = self.pending.lock();
            if guard.is_empty() {
                return Ok(());
            }
            batch = std::mem::take(&mut *guard);
            drop(guard);
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
