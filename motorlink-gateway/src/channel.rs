//! Byte-oriented device channels.
//!
//! A channel wraps one point-to-point transport (normally a serial port) to a
//! motor controller. Opcodes go out as single bytes and status codes come
//! back as single bytes.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{SerialPort, SerialStream};
use tracing::debug;

/// Error type for channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to open '{endpoint}': {message}")]
    Open { endpoint: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Channel is closed")]
    Closed,
}

/// A transport that can report how many bytes are waiting to be read.
///
/// `bytes_available` must not block; the poller relies on it to skip idle
/// channels.
pub trait ByteTransport: AsyncRead + AsyncWrite + Unpin + Send {
    fn bytes_available(&self) -> io::Result<u32>;
}

impl ByteTransport for SerialStream {
    fn bytes_available(&self) -> io::Result<u32> {
        SerialPort::bytes_to_read(self).map_err(io::Error::from)
    }
}

/// Serial line settings shared by all motor channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Upper bound for a single read or write on the channel.
    pub timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout: Duration::from_millis(200),
        }
    }
}

/// Open a serial port as a channel transport.
pub fn open_serial(
    endpoint: &str,
    settings: &SerialSettings,
) -> Result<Box<dyn ByteTransport>, ChannelError> {
    let builder = tokio_serial::new(endpoint, settings.baud_rate).timeout(settings.timeout);

    let stream = SerialStream::open(&builder).map_err(|e| ChannelError::Open {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })?;

    Ok(Box::new(stream))
}

/// One opened device channel.
///
/// The transport sits behind an async mutex so the poller's reads and the
/// dispatcher's writes never interleave on the same stream.
pub struct Channel {
    id: String,
    endpoint: String,
    settings: SerialSettings,
    transport: Mutex<Option<Box<dyn ByteTransport>>>,
    open: AtomicBool,
}

impl Channel {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        settings: SerialSettings,
        transport: Box<dyn ByteTransport>,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            settings,
            transport: Mutex::new(Some(transport)),
            open: AtomicBool::new(true),
        }
    }

    /// Stable channel ID ("m1", "m2", ...).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Device path this channel was opened from.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Read one status byte if one is waiting.
    ///
    /// Returns `Ok(None)` without blocking when the device has sent nothing.
    pub async fn poll_byte(&self) -> Result<Option<u8>, ChannelError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ChannelError::Closed)?;

        if transport.bytes_available()? == 0 {
            return Ok(None);
        }

        let mut buf = [0u8; 1];
        tokio::time::timeout(self.settings.timeout, transport.read_exact(&mut buf))
            .await
            .map_err(|_| ChannelError::Timeout(self.settings.timeout))??;

        Ok(Some(buf[0]))
    }

    /// Write a single opcode byte and flush it to the device.
    pub async fn write_byte(&self, byte: u8) -> Result<(), ChannelError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ChannelError::Closed)?;

        tokio::time::timeout(self.settings.timeout, async {
            transport.write_all(&[byte]).await?;
            transport.flush().await
        })
        .await
        .map_err(|_| ChannelError::Timeout(self.settings.timeout))??;

        Ok(())
    }

    /// Release the transport. Calling this more than once is a no-op.
    pub async fn close(&self) {
        let mut guard = self.transport.lock().await;
        if let Some(mut transport) = guard.take() {
            if let Err(e) = transport.shutdown().await {
                debug!(channel = %self.id, error = %e, "Error while closing channel");
            }
            self.open.store(false, Ordering::Release);
            debug!(channel = %self.id, endpoint = %self.endpoint, "Channel closed");
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("settings", &self.settings)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn channel(mock: &MockTransport) -> Channel {
        Channel::new(
            "m1",
            "/dev/ttyUSB0",
            SerialSettings::default(),
            Box::new(mock.clone()),
        )
    }

    #[tokio::test]
    async fn test_poll_idle_channel() {
        let mock = MockTransport::new();
        let channel = channel(&mock);

        assert!(channel.poll_byte().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_reads_one_byte_at_a_time() {
        let mock = MockTransport::new();
        mock.push_incoming(&[0x55, 0xE1]);
        let channel = channel(&mock);

        assert_eq!(channel.poll_byte().await.unwrap(), Some(0x55));
        assert_eq!(channel.poll_byte().await.unwrap(), Some(0xE1));
        assert_eq!(channel.poll_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_byte() {
        let mock = MockTransport::new();
        let channel = channel(&mock);

        channel.write_byte(0xFF).await.unwrap();
        assert_eq!(mock.written(), vec![0xFF]);
    }

    #[tokio::test]
    async fn test_io_failure_surfaces() {
        let mock = MockTransport::new();
        mock.set_failing(true);
        let channel = channel(&mock);

        assert!(matches!(channel.poll_byte().await, Err(ChannelError::Io(_))));
        assert!(matches!(channel.write_byte(0x01).await, Err(ChannelError::Io(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = MockTransport::new();
        let channel = channel(&mock);

        channel.close().await;
        channel.close().await;

        assert!(!channel.is_open());
        assert!(matches!(channel.poll_byte().await, Err(ChannelError::Closed)));
        assert!(matches!(channel.write_byte(0x01).await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let result = open_serial("/nonexistent/ttyUSB9", &SerialSettings::default());
        assert!(matches!(result, Err(ChannelError::Open { .. })));
    }
}
