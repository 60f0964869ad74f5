// src/core/warden/failover.rs

//! The failover state machine: seven states from election to configuration update.
//! `tick` advances at most one state transition per call, driven once per monitor tick.

use super::address::Address;
use super::client::WardenClient;
use super::election;
use super::state::{FailoverState, GlobalWardenState, PrimaryState, ReconfState};
use crate::core::events::{EventBus, MonitorEvent, Severity, Sign};
use crate::core::warden::constants::{ELECTION_TIMEOUT, SLAVE_RECONF_RETRY_PERIOD};
use crate::core::warden::script::{ScriptExecutor, ScriptJob};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// `start_failover_if_needed`: promotes `NONE -> WAIT_START` once CAN_FAILOVER, ODOWN, not
/// already in progress, and the retry cooldown since the last attempt has elapsed. A forced
/// failover (`SENTINEL failover`) bypasses the ODOWN precondition but not the later
/// self-leadership requirement at WAIT_START.
pub fn start_failover_if_needed(primary: &mut PrimaryState, current_epoch: u64) -> bool {
    if primary.failover_state != FailoverState::None {
        return false;
    }
    if !primary.config.can_failover {
        return false;
    }

    let cooldown_elapsed = primary.last_failover_end_time.elapsed() >= 2 * primary.config.failover_timeout;
    let odown_ready = primary.flags.odown && cooldown_elapsed;

    if !primary.force_failover && !odown_ready {
        return false;
    }
    if primary.force_failover && !cooldown_elapsed {
        return false;
    }

    let new_epoch = current_epoch + 1;
    primary.failover_epoch = new_epoch;
    primary.failover_start_time = Instant::now();
    primary.set_failover_state(FailoverState::WaitStart);
    info!(master = %primary.config.name, epoch = new_epoch, "+try-failover");
    true
}

/// Eligibility filter + ordering for replica selection. Sorts ascending by `(priority,
/// run_id)`, with a null run_id sorting last, and
/// returns the first (lowest-priority-number, lexically-first) candidate.
pub fn select_best_replica(primary: &PrimaryState) -> Option<Address> {
    use super::address::UNKNOWN_RUN_ID;
    use crate::core::warden::constants::INFO_VALIDITY_TIME;

    let sdown_since = primary.timers.sdown_since.unwrap_or_else(Instant::now);
    let max_master_link_down = sdown_since.elapsed() + 10 * primary.config.down_after;

    let mut candidates: Vec<(&Address, &super::state::ReplicaState)> = primary
        .replicas
        .iter()
        .filter(|(_, r)| !r.flags.sdown && !r.flags.odown && !r.flags.disconnected)
        .filter(|(_, r)| r.timers.last_valid_pong.elapsed() <= INFO_VALIDITY_TIME)
        .filter(|(_, r)| {
            r.timers
                .last_info_refresh
                .is_some_and(|t| t.elapsed() <= INFO_VALIDITY_TIME + super::constants::INFO_PERIOD)
        })
        .filter(|(_, r)| r.priority != 0)
        .filter(|(_, r)| r.master_link_down_since.unwrap_or_default() <= max_master_link_down)
        .collect();

    candidates.sort_by(|(_, a), (_, b)| {
        a.priority.cmp(&b.priority).then_with(|| match (
            a.run_id.as_str() == UNKNOWN_RUN_ID,
            b.run_id.as_str() == UNKNOWN_RUN_ID,
        ) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => a.run_id.cmp(&b.run_id),
        })
    });

    candidates.first().map(|(addr, _)| (*addr).clone())
}

fn notify(
    events: &EventBus,
    executor: &ScriptExecutor,
    primary_name: &str,
    sign: Sign,
    event_type: &'static str,
    detail: impl Into<String>,
) {
    events.publish(
        MonitorEvent::new(sign, event_type, Severity::Warning, primary_name, detail),
        executor,
    );
}

/// Aborts the in-progress failover (legal only up to `WAIT_PROMOTION` inclusive), clearing
/// `IN_PROGRESS`/`FORCE_FAILOVER`/`PROMOTED` and emitting a client-reconfig script call with
/// state `abort`.
fn abort(
    primary: &mut PrimaryState,
    events: &EventBus,
    executor: &Arc<ScriptExecutor>,
    reason: &'static str,
) {
    warn!(master = %primary.config.name, reason, "-failover-abort");
    notify(events, executor, &primary.config.name, Sign::Exit, "failover-abort", reason);
    if let Some(script) = primary.config.client_reconfig_script.clone() {
        executor.enqueue(ScriptJob::client_reconfig(
            script.to_string_lossy().to_string(),
            &primary.config.name,
            "master",
            "abort",
            (primary.addr.ip.as_str(), primary.addr.port),
            (primary.addr.ip.as_str(), primary.addr.port),
        ));
    }
    primary.reset_failover_state();
    primary.last_failover_end_time = Instant::now();
}

/// Advances the failover state machine by at most one transition.
pub async fn tick(
    primary_arc: &Arc<Mutex<PrimaryState>>,
    my_run_id: &str,
    global: &GlobalWardenState,
    events: &EventBus,
    executor: &Arc<ScriptExecutor>,
) {
    let state = { primary_arc.lock().failover_state };
    match state {
        FailoverState::None => {}
        FailoverState::WaitStart => tick_wait_start(primary_arc, my_run_id, global, events, executor),
        FailoverState::SelectSlave => tick_select_slave(primary_arc, events, executor),
        FailoverState::SendSlaveofNoOne => tick_send_slaveof_noone(primary_arc, events, executor).await,
        FailoverState::WaitPromotion => tick_wait_promotion(primary_arc, events, executor),
        FailoverState::ReconfSlaves => tick_reconf_slaves(primary_arc, events, executor).await,
        FailoverState::UpdateConfig => tick_update_config(primary_arc, events, executor),
    }
}

fn tick_wait_start(
    primary_arc: &Arc<Mutex<PrimaryState>>,
    my_run_id: &str,
    global: &GlobalWardenState,
    events: &EventBus,
    executor: &Arc<ScriptExecutor>,
) {
    let mut primary = primary_arc.lock();
    let epoch = primary.failover_epoch;
    let winner = election::tally(&mut primary, global, epoch, my_run_id);

    if winner.as_deref() == Some(my_run_id) {
        info!(master = %primary.config.name, "+elected-leader");
        notify(events, executor, &primary.config.name, Sign::Enter, "elected-leader", "");
        primary.set_failover_state(FailoverState::SelectSlave);
        return;
    }

    let timeout = ELECTION_TIMEOUT.min(primary.config.failover_timeout);
    if primary.failover_start_time.elapsed() > timeout && winner.is_none() {
        abort(&mut primary, events, executor, "not-elected");
    }
}

fn tick_select_slave(
    primary_arc: &Arc<Mutex<PrimaryState>>,
    events: &EventBus,
    executor: &Arc<ScriptExecutor>,
) {
    let mut primary = primary_arc.lock();
    match select_best_replica(&primary) {
        Some(addr) => {
            info!(master = %primary.config.name, replica = %addr, "+selected-slave");
            primary.promoted_replica = Some(addr);
            primary.set_failover_state(FailoverState::SendSlaveofNoOne);
        }
        None => abort(&mut primary, events, executor, "no-good-slave"),
    }
}

async fn tick_send_slaveof_noone(
    primary_arc: &Arc<Mutex<PrimaryState>>,
    events: &EventBus,
    executor: &Arc<ScriptExecutor>,
) {
    let (candidate, timed_out) = {
        let primary = primary_arc.lock();
        let timed_out = primary.failover_state_change_time.elapsed() > primary.config.failover_timeout;
        (primary.promoted_replica.clone(), timed_out)
    };
    let Some(candidate) = candidate else { return };

    if timed_out {
        abort(&mut primary_arc.lock(), events, executor, "slaveof-noone-timeout");
        return;
    }

    match WardenClient::connect(&candidate).await {
        Ok(mut client) if client.slaveof(None).await.is_ok() => {
            let mut primary = primary_arc.lock();
            if let Some(replica) = primary.replicas.get_mut(&candidate) {
                replica.promoted = true;
            }
            info!(master = %primary.config.name, %candidate, "SLAVEOF NO ONE accepted");
            primary.set_failover_state(FailoverState::WaitPromotion);
        }
        _ => warn!(%candidate, "promotion candidate unreachable, will retry next tick"),
    }
}

fn tick_wait_promotion(
    primary_arc: &Arc<Mutex<PrimaryState>>,
    events: &EventBus,
    executor: &Arc<ScriptExecutor>,
) {
    let mut primary = primary_arc.lock();
    if primary.failover_state_change_time.elapsed() > primary.config.failover_timeout {
        abort(&mut primary, events, executor, "wait-promotion-timeout");
    }
    // The actual PRIMARY-role observation arrives through probe::apply_replica_info and is
    // handled by the worker loop, which calls `advance_on_promotion_observed` below.
}

/// Called from the probe/worker layer when INFO from the promoted replica shows `role:master`
/// — the awaited promotion.
pub fn advance_on_promotion_observed(primary: &mut PrimaryState) {
    if primary.failover_state != FailoverState::WaitPromotion {
        return;
    }
    primary.config_epoch = primary.failover_epoch;
    primary.set_failover_state(FailoverState::ReconfSlaves);
}

async fn tick_reconf_slaves(
    primary_arc: &Arc<Mutex<PrimaryState>>,
    events: &EventBus,
    executor: &Arc<ScriptExecutor>,
) {
    let (targets, parallel_syncs, new_addr) = {
        let primary = primary_arc.lock();
        let Some(new_addr) = primary.promoted_replica.clone() else {
            return;
        };
        let in_flight = primary
            .replicas
            .values()
            .filter(|r| matches!(r.reconf, ReconfState::Sent(_) | ReconfState::InProgress))
            .count();
        let slots = primary.config.parallel_syncs.saturating_sub(in_flight);
        let targets: Vec<Address> = primary
            .replicas
            .iter()
            .filter(|(addr, r)| {
                **addr != new_addr && matches!(r.reconf, ReconfState::None) && !r.flags.disconnected
            })
            .take(slots)
            .map(|(addr, _)| addr.clone())
            .collect();
        (targets, primary.config.parallel_syncs, new_addr)
    };
    let _ = parallel_syncs;

    for target in targets {
        if let Ok(mut client) = WardenClient::connect(&target).await
            && client.slaveof(Some(&new_addr)).await.is_ok()
        {
            let mut primary = primary_arc.lock();
            if let Some(replica) = primary.replicas.get_mut(&target) {
                replica.reconf = ReconfState::Sent(Instant::now());
            }
            info!(master = %primary.config.name, %target, "+slave-reconf-sent");
            notify(events, executor, &primary.config.name, Sign::Enter, "slave-reconf-sent", target.to_string());
        }
    }

    // Retry laggards stuck in `Sent` past the retry period.
    {
        let mut primary = primary_arc.lock();
        for replica in primary.replicas.values_mut() {
            if let ReconfState::Sent(since) = replica.reconf
                && since.elapsed() > SLAVE_RECONF_RETRY_PERIOD
            {
                replica.reconf = ReconfState::None;
            }
        }
    }

    let (all_done, timed_out) = {
        let primary = primary_arc.lock();
        let all_done = primary
            .replicas
            .iter()
            .all(|(addr, r)| *addr == new_addr || matches!(r.reconf, ReconfState::Done));
        let timed_out = primary.failover_state_change_time.elapsed() > primary.config.failover_timeout;
        (all_done, timed_out)
    };

    if all_done || timed_out {
        let mut primary = primary_arc.lock();
        primary.set_failover_state(FailoverState::UpdateConfig);
    }
}

/// Observes a reconfiguring replica's INFO and advances its `ReconfState`.
pub fn observe_replica_reconf(replica: &mut super::state::ReplicaState, new_master: &Address) {
    match replica.reconf {
        ReconfState::Sent(_) | ReconfState::InProgress => {
            if replica.reported_master_addr.as_ref() == Some(new_master) {
                if replica.master_link_status_up {
                    replica.reconf = ReconfState::Done;
                } else {
                    replica.reconf = ReconfState::InProgress;
                }
            }
        }
        _ => {}
    }
}

fn tick_update_config(
    primary_arc: &Arc<Mutex<PrimaryState>>,
    events: &EventBus,
    executor: &Arc<ScriptExecutor>,
) {
    let mut primary = primary_arc.lock();
    let Some(new_addr) = primary.promoted_replica.clone() else {
        primary.reset_failover_state();
        return;
    };
    let old_addr = primary.addr.clone();

    info!(master = %primary.config.name, old = %old_addr, new = %new_addr, "+switch-master");
    notify(
        events,
        executor,
        &primary.config.name,
        Sign::Enter,
        "switch-master",
        format!("{old_addr} {new_addr}"),
    );

    primary.addr = new_addr.clone();
    primary.replicas.remove(&new_addr);
    primary.ensure_replica(old_addr);
    primary.last_failover_end_time = Instant::now();
    primary.reset_failover_state();

    if let Some(script) = primary.config.client_reconfig_script.clone() {
        executor.enqueue(ScriptJob::client_reconfig(
            script.to_string_lossy().to_string(),
            &primary.config.name,
            "master",
            "end",
            (primary.addr.ip.as_str(), primary.addr.port),
            (new_addr.ip.as_str(), new_addr.port),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::warden::config::MonitoredMaster;
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

    #[test]
    fn priority_zero_replicas_are_never_selected() {
        let mut primary = sample_primary();
        primary.timers.sdown_since = Some(Instant::now());
        let addr = Address::new("10.0.0.2", 6379);
        let replica = primary.ensure_replica(addr.clone());
        replica.priority = 0;
        replica.timers.last_info_refresh = Some(Instant::now());
        assert!(select_best_replica(&primary).is_none());
    }

    #[test]
    fn selects_lowest_priority_then_lexical_run_id() {
        let mut primary = sample_primary();
        primary.timers.sdown_since = Some(Instant::now());
        for (ip, priority, run_id) in [
            ("10.0.0.2", 100, "r1"),
            ("10.0.0.3", 50, "bbb"),
            ("10.0.0.4", 50, "aaa"),
        ] {
            let addr = Address::new(ip, 6379);
            let r = primary.ensure_replica(addr);
            r.priority = priority;
            r.run_id = run_id.to_string();
            r.timers.last_info_refresh = Some(Instant::now());
        }
        let chosen = select_best_replica(&primary).unwrap();
        assert_eq!(chosen, Address::new("10.0.0.4", 6379));
    }

    #[test]
    fn start_failover_requires_odown_and_cooldown() {
        let mut primary = sample_primary();
        assert!(!start_failover_if_needed(&mut primary, 1));
        primary.flags.odown = true;
        assert!(start_failover_if_needed(&mut primary, 1));
        assert_eq!(primary.failover_state, FailoverState::WaitStart);
    }
}
