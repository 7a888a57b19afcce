//! Subscription and Server Back-off Types
//!
//! A subscription maps a store to an ordered list of mirror servers. Each
//! server carries a consecutive-failure counter and a unix timestamp until
//! which it is skipped. The ban schedule escalates with the failure count
//! and is fixed on the wire: peers rely on the exact delays.

use serde::{Deserialize, Serialize};

use super::node::Bytes32;

/// Ban delays in seconds, indexed by the number of failures already
/// recorded. Counts 0-2 map to five minutes, 3-5 to fifteen, 6-7 to thirty
/// and everything beyond to an hour.
const BAN_SECONDS_BY_FAILURE_COUNT: [u64; 9] = [
    5 * 60,
    5 * 60,
    5 * 60,
    15 * 60,
    15 * 60,
    15 * 60,
    30 * 60,
    30 * 60,
    60 * 60,
];

/// Per-server availability state for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub url: String,
    pub num_consecutive_failures: u64,
    pub ignore_till: u64,
}

impl ServerInfo {
    pub fn new(url: String) -> Self {
        Self {
            url,
            num_consecutive_failures: 0,
            ignore_till: 0,
        }
    }

    /// True when the server may be contacted at `now`.
    pub fn available(&self, now: u64) -> bool {
        self.ignore_till <= now
    }

    /// Record a failed attempt at `now`.
    ///
    /// The counter always increments. The ban window only moves when the
    /// previous one has elapsed; a failure inside an active window leaves
    /// `ignore_till` where it is.
    pub fn after_failure(&self, now: u64) -> Self {
        let index = (self.num_consecutive_failures as usize).min(BAN_SECONDS_BY_FAILURE_COUNT.len() - 1);
        let ignore_till = if now >= self.ignore_till {
            now + BAN_SECONDS_BY_FAILURE_COUNT[index]
        } else {
            self.ignore_till
        };

        Self {
            url: self.url.clone(),
            num_consecutive_failures: self.num_consecutive_failures + 1,
            ignore_till,
        }
    }

    /// Record a successful download, clearing all failure state.
    pub fn after_success(&self) -> Self {
        Self {
            url: self.url.clone(),
            num_consecutive_failures: 0,
            ignore_till: 0,
        }
    }
}

/// Ordered server list for one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub store_id: Bytes32,
    pub servers_info: Vec<ServerInfo>,
}

impl Subscription {
    /// Servers currently allowed by the back-off schedule, in list order.
    pub fn available_servers(&self, now: u64) -> Vec<ServerInfo> {
        self.servers_info
            .iter()
            .filter(|server| server.available(now))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_five_minute_hold() {
        let server = ServerInfo::new("http://mirror.example".to_string());
        let banned = server.after_failure(1_000);

        assert_eq!(banned.num_consecutive_failures, 1);
        assert_eq!(banned.ignore_till, 1_000 + 300);
        assert!(!banned.available(1_000));
        assert!(banned.available(1_300));
    }

    #[test]
    fn test_failure_inside_window_does_not_extend() {
        let server = ServerInfo::new("http://mirror.example".to_string());
        let first = server.after_failure(1_000);
        let second = first.after_failure(1_100);

        assert_eq!(second.num_consecutive_failures, 2);
        assert_eq!(second.ignore_till, first.ignore_till);
    }

    #[test]
    fn test_escalation_schedule() {
        let mut server = ServerInfo::new("http://mirror.example".to_string());
        let mut now = 0;
        let expected = [300, 300, 300, 900, 900, 900, 1800, 1800, 3600, 3600];

        for delay in expected {
            now = server.ignore_till + 10;
            server = server.after_failure(now);
            assert_eq!(server.ignore_till, now + delay);
        }
    }

    #[test]
    fn test_success_resets_state() {
        let server = ServerInfo::new("http://mirror.example".to_string())
            .after_failure(100)
            .after_failure(500)
            .after_success();

        assert_eq!(server.num_consecutive_failures, 0);
        assert_eq!(server.ignore_till, 0);
        assert!(server.available(0));
    }

    #[test]
    fn test_available_servers_ordering() {
        let subscription = Subscription {
            store_id: [1; 32],
            servers_info: vec![
                ServerInfo::new("http://a.example".to_string()).after_failure(1_000),
                ServerInfo::new("http://b.example".to_string()),
            ],
        };

        let available = subscription.available_servers(1_000);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].url, "http://b.example");

        let later = subscription.available_servers(2_000);
        assert_eq!(later.len(), 2);
        assert_eq!(later[0].url, "http://a.example");
    }
}
