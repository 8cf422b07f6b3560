use core::time::Duration;
use futures::SinkExt;
use tokio::{net::TcpStream, sync::Mutex, time::timeout};
use tokio_util::codec::FramedWrite;
use tranche_core::{Error, Frame, FrameCodec};

/// Long-lived, exclusively owned connection to one worker.
///
/// Dispatch and cancel may target the same worker at the same time, so every
/// write takes the per-connection lock first. The deadline passed to
/// [`Connection::send`] covers both the wait for the lock and the write
/// itself.
pub struct Connection {
    index: usize,
    sink: Mutex<FramedWrite<TcpStream, FrameCodec>>,
}

impl Connection {
    pub fn new(index: usize, stream: TcpStream, codec: FrameCodec) -> Self {
        Self {
            index,
            sink: Mutex::new(FramedWrite::new(stream, codec)),
        }
    }

    /// Writes and flushes one frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the frame is not flushed within `deadline`.
    /// - [`Error::Io`] / codec errors if the write itself fails.
    pub async fn send(&self, frame: Frame, deadline: Duration) -> Result<(), Error> {
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(frame).await
        };

        match timeout(deadline, write).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                index: self.index,
                after: deadline,
            }),
        }
    }
}

#[cfg(test)]
impl Connection {
    /// Takes the write lock so tests can stall every sender on this worker.
    pub(crate) async fn hold(
        &self,
    ) -> tokio::sync::MutexGuard<'_, FramedWrite<TcpStream, FrameCodec>> {
        self.sink.lock().await
    }
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
