// src/core/warden/constants.rs

//! Timing and sizing constants, carried verbatim from the monitor's wire/behavior contract.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 26379;

pub const INFO_PERIOD: Duration = Duration::from_secs(10);
pub const PING_PERIOD: Duration = Duration::from_secs(1);
pub const ASK_PERIOD: Duration = Duration::from_secs(1);
pub const PUBLISH_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_DOWN_AFTER_PERIOD: Duration = Duration::from_secs(30);
pub const TILT_TRIGGER: Duration = Duration::from_secs(2);
pub const TILT_PERIOD: Duration = Duration::from_secs(30 * PING_PERIOD.as_secs());
pub const INFO_VALIDITY_TIME: Duration = Duration::from_secs(5);
pub const ELECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FAILOVER_TIMEOUT: Duration = Duration::from_millis(180_000);
pub const DEFAULT_PARALLEL_SYNCS: usize = 1;
pub const MIN_LINK_RECONNECT_PERIOD: Duration = Duration::from_secs(15);
pub const SLAVE_RECONF_RETRY_PERIOD: Duration = Duration::from_secs(10);

pub const SCRIPT_MAX_QUEUE: usize = 256;
pub const SCRIPT_MAX_RUNNING: usize = 16;
pub const SCRIPT_MAX_RUNTIME: Duration = Duration::from_secs(60);
pub const SCRIPT_MAX_RETRY: u32 = 10;
pub const SCRIPT_RETRY_DELAY: Duration = Duration::from_secs(30);

pub const HELLO_CHANNEL: &str = "__warden__:hello";
