// src/core/warden/election.rs

//! Leader tally for a `(primary, epoch)` pair.

use super::epoch::vote;
use super::state::{GlobalWardenState, PrimaryState};
use std::collections::HashMap;

/// Tallies votes for `epoch` and decides whether `self_run_id` wins.
///
/// 1. Self-votes via the vote routine; counted only if `leader_epoch == epoch` afterward.
/// 2. Each peer whose `leader` is set and whose `leader_epoch == current_epoch` increments
///    that run_id's tally.
/// 3. A run_id wins iff it holds the max count AND that count `>= voters/2 + 1` AND
///    `>= primary.quorum`.
pub fn tally(
    primary: &mut PrimaryState,
    global: &GlobalWardenState,
    epoch: u64,
    self_run_id: &str,
) -> Option<String> {
    let mut tallies: HashMap<String, usize> = HashMap::new();

    let (leader, leader_epoch) = vote(primary, global, epoch, self_run_id);
    if leader_epoch == epoch
        && let Some(candidate) = leader
    {
        *tallies.entry(candidate).or_insert(0) += 1;
    }

    let current_epoch = global.current_epoch();
    let mut voters = 1usize;
    for peer in primary.peers.values() {
        if peer.leader.is_some() && peer.leader_epoch == current_epoch {
            voters += 1;
            *tallies.entry(peer.leader.clone().unwrap()).or_insert(0) += 1;
        }
    }

    let majority = voters / 2 + 1;
    tallies
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .filter(|(_, count)| *count >= majority && *count >= primary.config.quorum)
        .map(|(run_id, _)| run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::warden::address::Address;
    use crate::core::warden::config::MonitoredMaster;
    use crate::core::warden::state::{PeerState, TiltState};
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::time::Duration;

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
    fn wins_with_self_vote_plus_one_peer_and_quorum_met() {
        let mut primary = sample_primary();
        primary.leader = Some("self".into());
        primary.leader_epoch = 5; // pre-existing state gets overwritten by the self-vote below

        let mut peer = PeerState::new("peer-1".into(), Address::new("10.0.0.9", 26379));
        peer.leader = Some("self".into());
        peer.leader_epoch = 7;
        primary.peers.insert("peer-1".into(), peer);

        let global = sample_global(7);
        let winner = tally(&mut primary, &global, 7, "self");
        assert_eq!(winner.as_deref(), Some("self"));
    }

    #[test]
    fn no_winner_below_quorum() {
        let mut primary = sample_primary();
        let global = sample_global(3);
        let winner = tally(&mut primary, &global, 3, "self");
        // One self-vote only; quorum is 2, majority of 1 voter is 1, but quorum fails.
        assert_eq!(winner, None);
    }
}
