// src/core/warden/probe.rs

//! The probe scheduler: per tick, per instance, gates INFO and PING against their own periods
//! and classifies replies into timer/flag updates. Each command awaits its reply before the
//! next is issued, so at most one command is ever in flight per link.

use super::address::Address;
use super::constants::{INFO_PERIOD, PING_PERIOD};
use super::link::Link;
use super::state::{FailoverState, Flags, PrimaryState, ReplicaState, Timers};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Whether a PING reply refreshes the "valid" freshness timer, the "any reply" timer, or
/// signals a busy instance.
pub enum PingOutcome {
    Valid,
    AnyReply,
    Busy,
    Failed,
}

pub fn classify_ping_reply(reply: &str) -> PingOutcome {
    match reply {
        "PONG" | "LOADING" | "MASTERDOWN" => PingOutcome::Valid,
        "BUSY" => PingOutcome::Busy,
        _ => PingOutcome::AnyReply,
    }
}

pub fn apply_ping_outcome(timers: &mut Timers, flags: &mut Flags, outcome: PingOutcome) {
    timers.last_any_pong = Instant::now();
    match outcome {
        PingOutcome::Valid => timers.last_valid_pong = Instant::now(),
        PingOutcome::Busy if flags.sdown && !flags.script_kill_sent => {
            flags.script_kill_sent = true;
            debug!("BUSY reply from SDOWN instance, scheduling SCRIPT KILL");
        }
        _ => {}
    }
}

/// Force-cycles links that have been open too long and idle too long.
pub fn cycle_stale_links(
    commands: &mut Link,
    pubsub: Option<&mut Link>,
    commands_idle_threshold: Duration,
    flags: &mut Flags,
) {
    if commands.should_cycle(commands_idle_threshold) {
        debug!("cycling idle commands link");
        commands.drop_to_absent();
        flags.disconnected = true;
    }
    if let Some(pubsub) = pubsub
        && pubsub.should_cycle(3 * super::constants::PUBLISH_PERIOD)
    {
        debug!("cycling idle pubsub link");
        pubsub.drop_to_absent();
        flags.disconnected = true;
    }
}

/// Whether an INFO refresh is due: never refreshed yet, or the normal/accelerated period has
/// elapsed.
pub fn info_due(last_refresh: Option<Instant>, accelerated: bool) -> bool {
    match last_refresh {
        None => true,
        Some(t) => {
            let period = if accelerated {
                Duration::from_secs(1)
            } else {
                INFO_PERIOD
            };
            t.elapsed() >= period
        }
    }
}

pub fn ping_due(last_any_pong: Instant) -> bool {
    last_any_pong.elapsed() >= PING_PERIOD
}

/// Parses `INFO replication` output. Supports both comma-positional and `ip=...,port=...`
/// replica enumeration forms.
#[derive(Debug, Default)]
pub struct ParsedInfo {
    pub run_id: Option<String>,
    pub role_is_replica: bool,
    pub master_host: Option<String>,
    pub master_port: Option<u16>,
    pub master_link_status_up: Option<bool>,
    pub master_link_down_since_seconds: Option<u64>,
    pub replicas: Vec<(SocketAddr, u64)>,
}

pub fn parse_info(info: &str) -> ParsedInfo {
    let mut parsed = ParsedInfo::default();
    for line in info.lines() {
        let line = line.trim();
        if let Some(val) = line.strip_prefix("run_id:") {
            parsed.run_id = Some(val.to_string());
        } else if let Some(val) = line.strip_prefix("master_replid:") {
            parsed.run_id.get_or_insert_with(|| val.to_string());
        } else if let Some(val) = line.strip_prefix("role:") {
            parsed.role_is_replica = val == "slave" || val == "replica";
        } else if let Some(val) = line.strip_prefix("master_host:") {
            parsed.master_host = Some(val.to_string());
        } else if let Some(val) = line.strip_prefix("master_port:") {
            parsed.master_port = val.parse().ok();
        } else if let Some(val) = line.strip_prefix("master_link_status:") {
            parsed.master_link_status_up = Some(val == "up");
        } else if let Some(val) = line.strip_prefix("master_link_down_since_seconds:") {
            parsed.master_link_down_since_seconds = val.parse().ok();
        } else if line.starts_with("slave") && line.contains(':') {
            if let Some((_, val)) = line.split_once(':') {
                if let Some(parsed_replica) = parse_replica_line(val) {
                    parsed.replicas.push(parsed_replica);
                }
            }
        }
    }
    parsed
}

/// Parses one `slaveN:...` line in either `ip,port,state,offset` positional form or the
/// `ip=...,port=...,offset=...` keyed form.
fn parse_replica_line(val: &str) -> Option<(SocketAddr, u64)> {
    if val.contains('=') {
        let fields: std::collections::HashMap<&str, &str> =
            val.split(',').filter_map(|p| p.split_once('=')).collect();
        let ip = fields.get("ip")?;
        let port = fields.get("port")?;
        let offset: u64 = fields.get("offset").and_then(|s| s.parse().ok()).unwrap_or(0);
        format!("{ip}:{port}").parse().ok().map(|a| (a, offset))
    } else {
        let parts: Vec<&str> = val.split(',').collect();
        let ip = parts.first()?;
        let port = parts.get(1)?;
        let offset: u64 = parts.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);
        format!("{ip}:{port}").parse().ok().map(|a| (a, offset))
    }
}

/// Applies a parsed primary INFO reply: updates `run_id` and replica sub-registry membership
/// (insert-only dedup by address; absent addresses are left in place — removal happens
/// through `reset`, not silent INFO-driven eviction).
pub fn apply_primary_info(primary: &mut PrimaryState, parsed: &ParsedInfo) {
    if let Some(run_id) = &parsed.run_id {
        primary.run_id = run_id.clone();
    }
    let mut seen: HashSet<Address> = HashSet::new();
    for (addr, offset) in &parsed.replicas {
        let address = Address::new(addr.ip().to_string(), addr.port());
        seen.insert(address.clone());
        let replica = primary.ensure_replica(address);
        replica.replication_offset = *offset;
    }
    primary.timers.last_info_refresh = Some(Instant::now());
}

/// Applies a parsed replica INFO reply onto its own `ReplicaState`.
pub fn apply_replica_info(replica: &mut ReplicaState, parsed: &ParsedInfo) {
    if let Some(run_id) = &parsed.run_id {
        replica.run_id = run_id.clone();
    }
    if let (Some(host), Some(port)) = (&parsed.master_host, parsed.master_port) {
        replica.reported_master_addr = Some(Address::new(host.clone(), port));
    }
    if let Some(up) = parsed.master_link_status_up {
        replica.master_link_status_up = up;
    }
    replica.master_link_down_since = parsed
        .master_link_down_since_seconds
        .map(Duration::from_secs);
    replica.timers.last_info_refresh = Some(Instant::now());
}

/// Whether INFO polling should run at the accelerated 1s period for a primary: true while
/// it is ODOWN or a failover is in progress.
pub fn accelerated_info_period(primary: &PrimaryState) -> bool {
    primary.flags.odown || primary.failover_state != FailoverState::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_replica_line() {
        let info = "slave0:ip=10.0.0.2,port=6380,state=online,offset=100,lag=0\r\n";
        let parsed = parse_info(info);
        assert_eq!(parsed.replicas.len(), 1);
        assert_eq!(parsed.replicas[0].1, 100);
    }

    #[test]
    fn parses_keyed_replica_line() {
        let info = "slave0:10.0.0.2,6380,online,50\r\n";
        let parsed = parse_info(info);
        assert_eq!(parsed.replicas.len(), 1);
        assert_eq!(parsed.replicas[0].1, 50);
    }

    #[test]
    fn classifies_ping_replies() {
        assert!(matches!(classify_ping_reply("PONG"), PingOutcome::Valid));
        assert!(matches!(classify_ping_reply("LOADING"), PingOutcome::Valid));
        assert!(matches!(classify_ping_reply("BUSY"), PingOutcome::Busy));
        assert!(matches!(classify_ping_reply("ERR huh"), PingOutcome::AnyReply));
    }
}
