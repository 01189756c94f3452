//! In-memory device doubles for testing.
//!
//! Provides stand-ins for serial motor channels and the Modbus tilt sensor so
//! the engine can be exercised without hardware.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::channel::ByteTransport;
use crate::sensor::{RegisterTransport, SensorError};

fn mock_failure() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "mock device failure")
}

#[derive(Debug, Default)]
struct SerialState {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    failing: bool,
}

/// Simulated serial link to a motor controller.
///
/// Clones share state, so a test can keep one handle while the registry owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<SerialState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if the device had sent them.
    pub fn push_incoming(&self, bytes: &[u8]) {
        self.state.lock().incoming.extend(bytes);
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Make every subsequent operation fail with an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn pending(&self) -> usize {
        self.state.lock().incoming.len()
    }
}

impl ByteTransport for MockTransport {
    fn bytes_available(&self) -> io::Result<u32> {
        let state = self.state.lock();
        if state.failing {
            return Err(mock_failure());
        }
        Ok(state.incoming.len() as u32)
    }
}

impl AsyncRead for MockTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.state.lock();
        if state.failing {
            return Poll::Ready(Err(mock_failure()));
        }
        while buf.remaining() > 0 {
            match state.incoming.pop_front() {
                Some(byte) => buf.put_slice(&[byte]),
                None => break,
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock();
        if state.failing {
            return Poll::Ready(Err(mock_failure()));
        }
        state.written.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Default)]
struct RegisterState {
    registers: [u16; 3],
    requests: Vec<(u16, u16)>,
    failing: bool,
    truncate: Option<usize>,
    delay: Option<Duration>,
    disconnects: usize,
}

/// Simulated Modbus tilt sensor holding roll/pitch/yaw registers.
#[derive(Debug, Clone, Default)]
pub struct MockRegisters {
    state: Arc<Mutex<RegisterState>>,
}

impl MockRegisters {
    pub fn new(registers: [u16; 3]) -> Self {
        let mock = Self::default();
        mock.set_registers(registers);
        mock
    }

    pub fn set_registers(&self, registers: [u16; 3]) {
        self.state.lock().registers = registers;
    }

    /// Make reads fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Return only the first `len` registers of each response.
    pub fn set_truncate(&self, len: usize) {
        self.state.lock().truncate = Some(len);
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// `(address, count)` of every read request received.
    pub fn requests(&self) -> Vec<(u16, u16)> {
        self.state.lock().requests.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }
}

impl RegisterTransport for MockRegisters {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SensorError> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.requests.push((address, count));
        if state.failing {
            return Err(SensorError::Read(mock_failure().to_string()));
        }

        let start = address as usize;
        let end = (start + count as usize).min(state.registers.len());
        let mut values = state.registers.get(start..end).unwrap_or_default().to_vec();
        if let Some(len) = state.truncate {
            values.truncate(len);
        }
        Ok(values)
    }

    async fn disconnect(&mut self) -> Result<(), SensorError> {
        self.state.lock().disconnects += 1;
        Ok(())
    }
}
