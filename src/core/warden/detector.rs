// src/core/warden/detector.rs

//! Subjective/objective down detection and the `is-master-down-by-addr` peer query/response
//! cycle.

use super::address::Address;
use super::constants::{ASK_PERIOD, INFO_VALIDITY_TIME};
use super::epoch::vote;
use super::state::{GlobalWardenState, PrimaryState};
use std::time::Instant;

/// Evaluates subjective down for a primary: elapsed-since-valid-pong over threshold, or the
/// "primary reports itself as replica" rule (role-change grace handled by the probe module;
/// here we just act on `role_reported_since` once it has aged past `down_after + 2*INFO_PERIOD`).
pub fn check_primary_sdown(primary: &mut PrimaryState) -> bool {
    let down_after = primary.config.down_after;
    let by_ping = primary.timers.last_valid_pong.elapsed() > down_after;
    let by_role = primary
        .timers
        .role_reported_since
        .is_some_and(|since| since.elapsed() > down_after + 2 * super::constants::INFO_PERIOD);

    let was_down = primary.flags.sdown;
    let now_down = by_ping || by_role;

    if now_down && !was_down {
        primary.flags.sdown = true;
        primary.timers.sdown_since = Some(Instant::now());
    } else if !now_down && was_down {
        primary.flags.sdown = false;
        primary.flags.odown = false;
        primary.flags.script_kill_sent = false;
        primary.timers.sdown_since = None;
        primary.timers.odown_since = None;
    }
    primary.flags.sdown
}

/// Objective down: starting from a self-vote of 1 when SDOWN, counts peers whose
/// `master_down` flag is fresh within `INFO_VALIDITY_TIME`; sets ODOWN once the count reaches
/// `quorum`.
pub fn check_primary_odown(primary: &mut PrimaryState) -> bool {
    if !primary.flags.sdown {
        return false;
    }
    let mut count = 1usize;
    for peer in primary.peers.values() {
        let fresh = peer
            .last_down_reply
            .is_some_and(|t| t.elapsed() <= INFO_VALIDITY_TIME);
        if peer.master_down && fresh {
            count += 1;
        }
    }
    let was_down = primary.flags.odown;
    let now_down = count >= primary.config.quorum;
    if now_down && !was_down {
        primary.flags.odown = true;
        primary.timers.odown_since = Some(Instant::now());
    } else if !now_down {
        primary.flags.odown = false;
    }
    primary.flags.odown
}

/// Whether it's time to (re-)issue `is-master-down-by-addr` to a given peer.
pub fn should_ask_peer(sdown_or_forced: bool, last_reply: Option<Instant>) -> bool {
    sdown_or_forced && last_reply.is_none_or(|t| t.elapsed() >= ASK_PERIOD)
}

/// The 3-tuple reply to an `is-master-down-by-addr` query.
#[derive(Debug, Clone, PartialEq)]
pub struct DownByAddrReply {
    pub down: bool,
    pub leader_run_id: Option<String>,
    pub leader_epoch: u64,
}

/// Answers a peer's `is-master-down-by-addr` query for the primary found at `addr`. Requires
/// the primary looked up by address to still be a primary and not in TILT.
pub fn answer_peer_query(
    primary: &mut PrimaryState,
    addr: &Address,
    in_tilt: bool,
    global: &GlobalWardenState,
    req_epoch: u64,
    req_run_id: &str,
) -> DownByAddrReply {
    let down = !in_tilt && primary.flags.sdown && primary.addr == *addr;
    let (leader_run_id, leader_epoch) = vote(primary, global, req_epoch, req_run_id);
    DownByAddrReply {
        down,
        leader_run_id,
        leader_epoch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::warden::config::MonitoredMaster;
    use crate::core::warden::state::PeerState;
    use std::time::Duration;

    fn sample_primary(quorum: usize) -> PrimaryState {
        PrimaryState::from_config(MonitoredMaster {
            name: "mymaster".into(),
            ip: "10.0.0.1".into(),
            port: 6379,
            quorum,
            down_after: Duration::from_millis(1),
            failover_timeout: Duration::from_secs(180),
            hello_interval: Duration::from_secs(2),
            can_failover: true,
            parallel_syncs: 1,
            notification_script: None,
            client_reconfig_script: None,
            auth_pass: None,
        })
    }

    #[test]
    fn quorum_one_allows_odown_with_no_peers() {
        let mut primary = sample_primary(1);
        std::thread::sleep(Duration::from_millis(2));
        assert!(check_primary_sdown(&mut primary));
        assert!(check_primary_odown(&mut primary));
    }

    #[test]
    fn odown_requires_fresh_peer_replies() {
        let mut primary = sample_primary(2);
        std::thread::sleep(Duration::from_millis(2));
        assert!(check_primary_sdown(&mut primary));

        let mut peer = PeerState::new("peer-1".into(), Address::new("10.0.0.9", 26379));
        peer.master_down = true;
        peer.last_down_reply = Some(Instant::now() - Duration::from_secs(60));
        primary.peers.insert("peer-1".into(), peer);
        assert!(!check_primary_odown(&mut primary), "stale reply must not count");

        primary.peers.get_mut("peer-1").unwrap().last_down_reply = Some(Instant::now());
        assert!(check_primary_odown(&mut primary));
    }
}
