// src/core/warden/epoch.rs

//! Epoch bookkeeping and the vote routine.

use super::state::{GlobalWardenState, PrimaryState};
use rand::Rng;
use std::time::{Duration, Instant};

/// `vote(primary, global, req_epoch, req_run_id) -> (voted_run_id, voted_epoch)`.
///
/// First adopts `req_epoch` into the shared current epoch if the requester is ahead of it — a
/// vote request at a higher epoch than anyone here has seen is itself evidence the epoch should
/// advance. Then, if the stored `leader_epoch` is behind `req_epoch` and the (possibly
/// just-adopted) current epoch does not exceed it, overwrites the vote and desynchronizes
/// `failover_start_time` by `random(0..2000)` ms.
pub fn vote(
    primary: &mut PrimaryState,
    global: &GlobalWardenState,
    req_epoch: u64,
    req_run_id: &str,
) -> (Option<String>, u64) {
    global.maybe_bump_epoch(req_epoch);
    let current_epoch = global.current_epoch();
    if primary.leader_epoch < req_epoch && current_epoch <= req_epoch {
        primary.leader = Some(req_run_id.to_string());
        primary.leader_epoch = current_epoch;
        let desync_ms: u64 = rand::rng().random_range(0..2000);
        primary.failover_start_time = Instant::now() + Duration::from_millis(desync_ms);
    }
    (primary.leader.clone(), primary.leader_epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::warden::address::Address;
    use crate::core::warden::config::MonitoredMaster;
    use crate::core::warden::state::TiltState;
    use dashmap::DashMap;
    use parking_lot::Mutex;

    fn sample_primary() -> PrimaryState {
        PrimaryState::from_config(MonitoredMaster {
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
        })
    }

    fn sample_global(starting_epoch: u64) -> GlobalWardenState {
        GlobalWardenState {
            my_run_id: "self".into(),
            my_announce_addr: Address::new("127.0.0.1", 26379),
            masters: DashMap::new(),
            current_epoch: Mutex::new(starting_epoch),
            tilt: Mutex::new(TiltState::default()),
        }
    }

    #[test]
    fn vote_only_overwrites_on_strictly_greater_epoch() {
        let mut primary = sample_primary();
        let global = sample_global(5);
        let (leader, epoch) = vote(&mut primary, &global, 5, "candidate-a");
        assert_eq!(leader.as_deref(), Some("candidate-a"));
        assert_eq!(epoch, 5);

        // A request at the same epoch must not overwrite an existing vote.
        let (leader2, _) = vote(&mut primary, &global, 5, "candidate-b");
        assert_eq!(leader2.as_deref(), Some("candidate-a"));
    }

    #[test]
    fn vote_adopts_and_grants_when_requester_is_ahead() {
        let mut primary = sample_primary();
        let global = sample_global(2);
        let (leader, epoch) = vote(&mut primary, &global, 5, "candidate-a");
        assert_eq!(leader.as_deref(), Some("candidate-a"));
        assert_eq!(epoch, 5);
        assert_eq!(global.current_epoch(), 5);
    }

    #[test]
    fn vote_rejects_requester_behind_current_epoch() {
        let mut primary = sample_primary();
        let global = sample_global(5);
        let (leader, _) = vote(&mut primary, &global, 2, "candidate-a");
        assert_eq!(leader, None);
        assert_eq!(global.current_epoch(), 5);
    }
}
