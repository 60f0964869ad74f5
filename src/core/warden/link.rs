// src/core/warden/link.rs

//! The async link manager: each instance owns up to two logical links (commands, pub/sub),
//! each independently `Absent`/`Connecting`/`Connected`.

use super::address::Address;
use super::client::WardenClient;
use super::constants::MIN_LINK_RECONNECT_PERIOD;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum Link {
    Absent,
    Connecting,
    Connected {
        client: WardenClient,
        connected_at: Instant,
        last_activity: Instant,
    },
}

impl Default for Link {
    fn default() -> Self {
        Link::Absent
    }
}

impl Link {
    pub fn is_connected(&self) -> bool {
        matches!(self, Link::Connected { .. })
    }

    pub fn client_mut(&mut self) -> Option<&mut WardenClient> {
        match self {
            Link::Connected { client, .. } => Some(client),
            _ => None,
        }
    }

    pub fn touch(&mut self) {
        if let Link::Connected { last_activity, .. } = self {
            *last_activity = Instant::now();
        }
    }

    /// Opens a fresh connection and transitions `Absent -> Connected`, returning the client
    /// for the caller to issue the link's first command (AUTH / SUBSCRIBE).
    pub async fn establish(addr: &Address) -> Result<Link, crate::core::WardenError> {
        let client = WardenClient::connect(addr).await?;
        let now = Instant::now();
        Ok(Link::Connected {
            client,
            connected_at: now,
            last_activity: now,
        })
    }

    /// Drops the link back to `Absent` on any I/O error.
    pub fn drop_to_absent(&mut self) {
        *self = Link::Absent;
    }

    /// Whether this link has been open long enough and idle long enough to be force-cycled.
    pub fn should_cycle(&self, idle_threshold: Duration) -> bool {
        match self {
            Link::Connected {
                connected_at,
                last_activity,
                ..
            } => {
                connected_at.elapsed() > MIN_LINK_RECONNECT_PERIOD
                    && last_activity.elapsed() > idle_threshold
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_link_never_cycles() {
        assert!(!Link::Absent.should_cycle(Duration::from_secs(0)));
    }
}
