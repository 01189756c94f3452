//! Opcode dispatch to motor channels.
//!
//! A command is one opcode byte sent to a set of channels. Dispatch returns
//! as soon as the bytes are written; any acknowledgment from the device shows
//! up later through the poller and the event log.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::registry::SharedRegistry;

/// Error type for dispatch operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid opcode '{0}': expected a hex byte (00-FF)")]
    InvalidOpcode(String),
    #[error("Unknown channel: {0}")]
    ChannelNotFound(String),
}

/// Parse a hex opcode such as `"FF"`, `"0x1a"` or `"7"`.
pub fn parse_opcode(input: &str) -> Result<u8, DispatchError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DispatchError::InvalidOpcode(input.to_string()));
    }

    u8::from_str_radix(digits, 16).map_err(|_| DispatchError::InvalidOpcode(input.to_string()))
}

/// A target whose write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteFailure {
    pub channel: String,
    pub error: String,
}

/// Result of a dispatched command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub opcode: u8,
    /// Channels the opcode was written to.
    pub written: Vec<String>,
    /// Channels whose write failed.
    pub failed: Vec<WriteFailure>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Routes opcodes to channels in the registry.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    registry: SharedRegistry,
}

impl CommandDispatcher {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Send `opcode_hex` to every channel in `targets`.
    ///
    /// The opcode and every target are resolved before anything is written:
    /// an invalid opcode or an unknown target rejects the whole command and
    /// no channel receives a byte. A write failure on one channel does not
    /// stop the others; it is reported in the returned [`DispatchReport`].
    /// Duplicate targets receive the opcode once.
    pub async fn send<S: AsRef<str>>(
        &self,
        opcode_hex: &str,
        targets: &[S],
    ) -> Result<DispatchReport, DispatchError> {
        let opcode = parse_opcode(opcode_hex)?;
        let channels = self.resolve(targets)?;

        let mut report = DispatchReport {
            opcode,
            ..Default::default()
        };

        for channel in channels {
            match channel.write_byte(opcode).await {
                Ok(()) => {
                    debug!(channel = %channel.id(), opcode = opcode, "Opcode sent");
                    report.written.push(channel.id().to_string());
                }
                Err(e) => {
                    warn!(channel = %channel.id(), opcode = opcode, error = %e, "Opcode write failed");
                    report.failed.push(WriteFailure {
                        channel: channel.id().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    fn resolve<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<Arc<Channel>>, DispatchError> {
        let mut channels: Vec<Arc<Channel>> = Vec::with_capacity(targets.len());

        for target in targets {
            let id = target.as_ref();
            let channel = self
                .registry
                .get(id)
                .ok_or_else(|| DispatchError::ChannelNotFound(id.to_string()))?;

            if !channels.iter().any(|c| c.id() == id) {
                channels.push(channel.clone());
            }
        }

        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ByteTransport, SerialSettings};
    use crate::mock::MockTransport;
    use crate::registry::ChannelRegistry;

    fn dispatcher(mocks: &[MockTransport]) -> CommandDispatcher {
        let endpoints: Vec<String> = (0..mocks.len())
            .map(|i| format!("/dev/ttyUSB{}", i))
            .collect();
        let mut iter = mocks.to_vec().into_iter();
        let registry = ChannelRegistry::open_with(&endpoints, SerialSettings::default(), |_, _| {
            Ok(Box::new(iter.next().unwrap()) as Box<dyn ByteTransport>)
        });
        CommandDispatcher::new(Arc::new(registry))
    }

    #[test]
    fn test_parse_opcode() {
        assert_eq!(parse_opcode("FF"), Ok(0xFF));
        assert_eq!(parse_opcode("ff"), Ok(0xFF));
        assert_eq!(parse_opcode("00"), Ok(0x00));
        assert_eq!(parse_opcode("7"), Ok(0x07));
        assert_eq!(parse_opcode("0x1a"), Ok(0x1A));
        assert_eq!(parse_opcode(" 55 "), Ok(0x55));
    }

    #[test]
    fn test_parse_opcode_rejects() {
        for bad in ["", "0x", "100", "G1", "+F", "-1", "1 2", "FFF"] {
            assert_eq!(
                parse_opcode(bad),
                Err(DispatchError::InvalidOpcode(bad.to_string())),
                "input {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_send_to_single_target() {
        let m1 = MockTransport::new();
        let m2 = MockTransport::new();
        let dispatcher = dispatcher(&[m1.clone(), m2.clone()]);

        let report = dispatcher.send("FF", &["m1"]).await.unwrap();

        assert_eq!(report.opcode, 0xFF);
        assert_eq!(report.written, vec!["m1"]);
        assert!(report.is_complete());
        assert_eq!(m1.written(), vec![0xFF]);
        assert!(m2.written().is_empty());
    }

    #[tokio::test]
    async fn test_send_to_multiple_targets() {
        let m1 = MockTransport::new();
        let m2 = MockTransport::new();
        let m3 = MockTransport::new();
        let dispatcher = dispatcher(&[m1.clone(), m2.clone(), m3.clone()]);

        dispatcher.send("a5", &["m3", "m1", "m3"]).await.unwrap();

        assert_eq!(m1.written(), vec![0xA5]);
        assert!(m2.written().is_empty());
        assert_eq!(m3.written(), vec![0xA5]);
    }

    #[tokio::test]
    async fn test_unknown_target_rejects_whole_command() {
        let m1 = MockTransport::new();
        let m2 = MockTransport::new();
        let dispatcher = dispatcher(&[m1.clone(), m2.clone()]);

        let result = dispatcher.send("FF", &["m1", "m9", "m2"]).await;

        assert_eq!(result, Err(DispatchError::ChannelNotFound("m9".to_string())));
        assert!(m1.written().is_empty());
        assert!(m2.written().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_opcode_writes_nothing() {
        let m1 = MockTransport::new();
        let dispatcher = dispatcher(&[m1.clone()]);

        let result = dispatcher.send("XYZ", &["m1"]).await;

        assert!(matches!(result, Err(DispatchError::InvalidOpcode(_))));
        assert!(m1.written().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_contained() {
        let m1 = MockTransport::new();
        let m2 = MockTransport::new();
        m1.set_failing(true);
        let dispatcher = dispatcher(&[m1.clone(), m2.clone()]);

        let report = dispatcher.send("10", &["m1", "m2"]).await.unwrap();

        assert_eq!(report.written, vec!["m2"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].channel, "m1");
        assert_eq!(m2.written(), vec![0x10]);
    }

    #[tokio::test]
    async fn test_empty_targets() {
        let dispatcher = dispatcher(&[MockTransport::new()]);
        let report = dispatcher.send("01", &[] as &[&str]).await.unwrap();
        assert!(report.written.is_empty());
    }
}
