// src/core/warden/state.rs

//! Instance registry: per-primary state, replica/peer sub-registries, and the process-wide
//! global state. One coarse `parking_lot::Mutex` guards each `PrimaryState`; a `DashMap`
//! fans out across primaries so each one can be monitored concurrently.

use super::address::{Address, UNKNOWN_RUN_ID};
use super::config::MonitoredMaster;
use super::link::Link;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress of a replica's reconfiguration onto the newly promoted primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfState {
    None,
    Sent(Instant),
    InProgress,
    Done,
}

/// The seven-state failover progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    None,
    WaitStart,
    SelectSlave,
    SendSlaveofNoOne,
    WaitPromotion,
    ReconfSlaves,
    UpdateConfig,
}

/// Orthogonal instance-level flags, kept small and separate from the tagged-variant state
/// machines.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub disconnected: bool,
    pub sdown: bool,
    pub odown: bool,
    pub script_kill_sent: bool,
}

/// Timers tracked for every monitored instance.
#[derive(Debug, Clone)]
pub struct Timers {
    pub last_valid_pong: Instant,
    pub last_any_pong: Instant,
    pub last_hello_published: Option<Instant>,
    pub last_hello_received: Option<Instant>,
    pub last_down_reply: Option<Instant>,
    pub last_info_refresh: Option<Instant>,
    pub sdown_since: Option<Instant>,
    pub odown_since: Option<Instant>,
    pub role_reported_since: Option<Instant>,
}

impl Timers {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            last_valid_pong: now,
            last_any_pong: now,
            last_hello_published: None,
            last_hello_received: None,
            last_down_reply: None,
            last_info_refresh: None,
            sdown_since: None,
            odown_since: None,
            role_reported_since: None,
        }
    }
}

/// A replica of a monitored primary.
#[derive(Debug)]
pub struct ReplicaState {
    pub addr: Address,
    pub run_id: String,
    pub priority: u32,
    pub replication_offset: u64,
    pub reported_master_addr: Option<Address>,
    pub master_link_status_up: bool,
    pub master_link_down_since: Option<Duration>,
    pub promoted: bool,
    pub reconf: ReconfState,
    pub commands_link: Link,
    pub flags: Flags,
    pub timers: Timers,
}

impl ReplicaState {
    pub fn new(addr: Address) -> Self {
        Self {
            addr,
            run_id: UNKNOWN_RUN_ID.to_string(),
            priority: 100,
            replication_offset: 0,
            reported_master_addr: None,
            master_link_status_up: false,
            master_link_down_since: None,
            promoted: false,
            reconf: ReconfState::None,
            commands_link: Link::Absent,
            flags: Flags::default(),
            timers: Timers::new(),
        }
    }
}

/// A peer monitor watching the same primary, learned via the Hello channel.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub run_id: String,
    pub addr: Address,
    pub can_failover: bool,
    pub current_epoch: u64,
    pub master_down: bool,
    pub leader: Option<String>,
    pub leader_epoch: u64,
    pub last_hello_received: Instant,
    pub last_down_reply: Option<Instant>,
    pub commands_link: Link,
}

impl PeerState {
    pub fn new(run_id: String, addr: Address) -> Self {
        Self {
            run_id,
            addr,
            can_failover: false,
            current_epoch: 0,
            master_down: false,
            leader: None,
            leader_epoch: 0,
            last_hello_received: Instant::now(),
            last_down_reply: None,
            commands_link: Link::Absent,
        }
    }
}

/// All dynamic state for a single monitored primary and its replicas/peers, guarded by the
/// single coarse mutex that `GlobalWardenState::masters` wraps it in.
#[derive(Debug)]
pub struct PrimaryState {
    pub config: MonitoredMaster,
    pub addr: Address,
    pub run_id: String,
    pub replicas: HashMap<Address, ReplicaState>,
    pub peers: HashMap<String, PeerState>,
    pub commands_link: Link,
    pub pubsub_link: Link,
    pub flags: Flags,
    pub timers: Timers,

    pub config_epoch: u64,
    pub failover_epoch: u64,
    pub leader: Option<String>,
    pub leader_epoch: u64,

    pub failover_state: FailoverState,
    pub failover_state_change_time: Instant,
    pub failover_start_time: Instant,
    pub force_failover: bool,
    pub promoted_replica: Option<Address>,
    pub last_failover_end_time: Instant,
}

impl PrimaryState {
    pub fn from_config(config: MonitoredMaster) -> Self {
        let addr = Address::new(config.ip.clone(), config.port);
        let long_ago = Instant::now() - Duration::from_secs(3600 * 24 * 365);
        Self {
            config,
            addr,
            run_id: UNKNOWN_RUN_ID.to_string(),
            replicas: HashMap::new(),
            peers: HashMap::new(),
            commands_link: Link::Absent,
            pubsub_link: Link::Absent,
            flags: Flags::default(),
            timers: Timers::new(),
            config_epoch: 0,
            failover_epoch: 0,
            leader: None,
            leader_epoch: 0,
            failover_state: FailoverState::None,
            failover_state_change_time: long_ago,
            failover_start_time: long_ago,
            force_failover: false,
            promoted_replica: None,
            last_failover_end_time: long_ago,
        }
    }

    /// Inserts a newly observed replica if its address is not already tracked.
    pub fn ensure_replica(&mut self, addr: Address) -> &mut ReplicaState {
        self.replicas
            .entry(addr.clone())
            .or_insert_with(|| ReplicaState::new(addr))
    }

    /// Removes any existing peer sharing `run_id` OR `addr`, then inserts the new one —
    /// covers both a topology change and a peer restarting with a fresh run_id.
    pub fn upsert_peer(&mut self, run_id: String, addr: Address) -> &mut PeerState {
        let stale_key = self.peers.iter().find_map(|(key, peer)| {
            if peer.addr == addr && *key != run_id {
                Some(key.clone())
            } else {
                None
            }
        });
        if let Some(key) = stale_key {
            self.peers.remove(&key);
        }
        self.peers
            .entry(run_id.clone())
            .and_modify(|p| p.addr = addr.clone())
            .or_insert_with(|| PeerState::new(run_id, addr))
    }

    /// Transitions the failover state machine, recording the transition timestamp.
    pub fn set_failover_state(&mut self, new_state: FailoverState) {
        self.failover_state = new_state;
        self.failover_state_change_time = Instant::now();
    }

    /// Resets failover-related fields to their default, e.g. on abort or recovery.
    pub fn reset_failover_state(&mut self) {
        self.set_failover_state(FailoverState::None);
        self.force_failover = false;
        self.promoted_replica = None;
        for replica in self.replicas.values_mut() {
            replica.promoted = false;
            replica.reconf = ReconfState::None;
        }
    }

    /// Resets this primary to a freshly-discovered state while preserving identity, used by
    /// `SENTINEL reset` and by switch-master rebinding: preserves the primary's identity,
    /// drops replicas and (optionally) peers, and clears runtime flags.
    pub fn reset(&mut self, new_addr: Option<Address>, drop_peers: bool) {
        if let Some(addr) = new_addr {
            self.addr = addr;
        }
        self.run_id = UNKNOWN_RUN_ID.to_string();
        self.replicas.clear();
        if drop_peers {
            self.peers.clear();
        }
        self.flags = Flags::default();
        self.reset_failover_state();
    }
}

/// The process-wide, globally shared state.
#[derive(Debug)]
pub struct GlobalWardenState {
    pub my_run_id: String,
    pub my_announce_addr: Address,
    pub masters: DashMap<String, Arc<Mutex<PrimaryState>>>,
    pub current_epoch: Mutex<u64>,
    pub tilt: Mutex<TiltState>,
}

/// TILT-mode bookkeeping.
#[derive(Debug, Clone)]
pub struct TiltState {
    pub active: bool,
    pub started_at: Option<Instant>,
    pub previous_tick: Instant,
}

impl Default for TiltState {
    fn default() -> Self {
        Self {
            active: false,
            started_at: None,
            previous_tick: Instant::now(),
        }
    }
}

impl GlobalWardenState {
    /// Bumps the global epoch if `candidate` is larger, returning whether it changed.
    pub fn maybe_bump_epoch(&self, candidate: u64) -> bool {
        let mut epoch = self.current_epoch.lock();
        if candidate > *epoch {
            *epoch = candidate;
            true
        } else {
            false
        }
    }

    pub fn increment_epoch(&self) -> u64 {
        let mut epoch = self.current_epoch.lock();
        *epoch += 1;
        *epoch
    }

    pub fn current_epoch(&self) -> u64 {
        *self.current_epoch.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> MonitoredMaster {
        MonitoredMaster {
            name: "mymaster".into(),
            ip: "10.0.0.1".into(),
            port: 6379,
            quorum: 2,
            down_after: Duration::from_secs(30),
            failover_timeout: Duration::from_secs(180),
            hello_interval: Duration::from_secs(2),
            can_failover: true,
            parallel_syncs: 1,
            notification_script: None,
            client_reconfig_script: None,
            auth_pass: None,
        }
    }

    #[test]
    fn replica_insertion_is_deduped_by_address() {
        let mut primary = PrimaryState::from_config(sample_config());
        let addr = Address::new("10.0.0.2", 6379);
        primary.ensure_replica(addr.clone()).run_id = "abc".repeat(8) + "abcdabcdabcdabcdabcd";
        let run_id_before = primary.replicas.get(&addr).unwrap().run_id.clone();
        primary.ensure_replica(addr.clone());
        assert_eq!(primary.replicas.get(&addr).unwrap().run_id, run_id_before);
        assert_eq!(primary.replicas.len(), 1);
    }

    #[test]
    fn peer_upsert_dedups_by_run_id_or_address() {
        let mut primary = PrimaryState::from_config(sample_config());
        let addr = Address::new("10.0.0.9", 26379);
        primary.upsert_peer("run-a".into(), addr.clone());
        assert_eq!(primary.peers.len(), 1);
        // Same address, different run_id (a reboot) must replace, not duplicate.
        primary.upsert_peer("run-b".into(), addr.clone());
        assert_eq!(primary.peers.len(), 1);
        assert!(primary.peers.contains_key("run-b"));
        assert!(!primary.peers.contains_key("run-a"));
    }

    #[test]
    fn epoch_never_decreases() {
        let state = GlobalWardenState {
            my_run_id: "x".into(),
            my_announce_addr: Address::new("127.0.0.1", 26379),
            masters: DashMap::new(),
            current_epoch: Mutex::new(5),
            tilt: Mutex::new(TiltState::default()),
        };
        assert!(!state.maybe_bump_epoch(3));
        assert_eq!(state.current_epoch(), 5);
        assert!(state.maybe_bump_epoch(9));
        assert_eq!(state.current_epoch(), 9);
    }
}
