//! Registry of opened motor channels.

use std::sync::Arc;

use tracing::{info, warn};

use crate::channel::{ByteTransport, Channel, ChannelError, SerialSettings, open_serial};

/// Owns every channel opened at startup.
///
/// The channel set is fixed once the registry is built; lookups need no
/// locking.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Arc<Channel>>,
}

/// Thread-safe reference to a channel registry.
pub type SharedRegistry = Arc<ChannelRegistry>;

/// Build the channel ID for the n-th successfully opened endpoint (1-based).
pub fn channel_id(n: usize) -> String {
    format!("m{}", n)
}

impl ChannelRegistry {
    /// Open serial channels for the given endpoints.
    ///
    /// Endpoints are tried in the order given. A failed open is logged and
    /// skipped; it does not consume an ID.
    pub fn open<S: AsRef<str>>(endpoints: &[S], settings: SerialSettings) -> Self {
        Self::open_with(endpoints, settings, open_serial)
    }

    /// Open channels using a custom transport opener.
    pub fn open_with<S, F>(endpoints: &[S], settings: SerialSettings, mut opener: F) -> Self
    where
        S: AsRef<str>,
        F: FnMut(&str, &SerialSettings) -> Result<Box<dyn ByteTransport>, ChannelError>,
    {
        let mut channels = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let endpoint = endpoint.as_ref();
            match opener(endpoint, &settings) {
                Ok(transport) => {
                    let id = channel_id(channels.len() + 1);
                    info!(
                        channel = %id,
                        endpoint = %endpoint,
                        baud_rate = settings.baud_rate,
                        "Opened channel"
                    );
                    channels.push(Arc::new(Channel::new(id, endpoint, settings, transport)));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Skipping endpoint");
                }
            }
        }

        Self { channels }
    }

    /// Look up a channel by ID.
    pub fn get(&self, id: &str) -> Option<&Arc<Channel>> {
        self.channels.iter().find(|c| c.id() == id)
    }

    /// Channel IDs in assignment order.
    pub fn list_ids(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.id().to_string()).collect()
    }

    /// Iterate channels in assignment order.
    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Close every channel.
    pub async fn close_all(&self) {
        for channel in &self.channels {
            channel.close().await;
        }
    }
}
