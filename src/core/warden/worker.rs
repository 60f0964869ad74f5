// src/core/warden/worker.rs

//! Ties every subsystem together into the per-master tick loop, plus the Hello pub/sub loop.

use super::address::Address;
use super::client::WardenClient;
use super::constants::HELLO_CHANNEL;
use super::hello::{self, HelloPayload};
use super::link::Link;
use super::state::{GlobalWardenState, PrimaryState};
use super::{detector, failover, probe, tilt};
use crate::core::events::{EventBus, MonitorEvent, Severity, Sign};
use crate::core::protocol::RespFrame;
use crate::core::warden::script::ScriptExecutor;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, error, info, warn};

/// Drives the tick loop, Hello pub/sub loop, and periodic INFO polling for a single
/// monitored primary.
#[derive(Clone)]
pub struct MasterMonitor {
    master_name: String,
    primary: Arc<Mutex<PrimaryState>>,
    global: Arc<GlobalWardenState>,
    events: Arc<EventBus>,
    executor: Arc<ScriptExecutor>,
}

impl MasterMonitor {
    pub fn new(
        master_name: String,
        primary: Arc<Mutex<PrimaryState>>,
        global: Arc<GlobalWardenState>,
        events: Arc<EventBus>,
        executor: Arc<ScriptExecutor>,
    ) -> Self {
        Self {
            master_name,
            primary,
            global,
            events,
            executor,
        }
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// The main entry point, spawning the tick loop and the Hello pub/sub loop.
    pub async fn run(&self) {
        let hello_interval = self.primary.lock().config.hello_interval;
        info!(master = %self.master_name, "monitor started");

        let mut tasks = tokio::task::JoinSet::new();
        tasks.spawn(self.clone().run_tick_loop());
        tasks.spawn(self.clone().run_pubsub_loop(hello_interval));

        if let Some(res) = tasks.join_next().await {
            error!(master = %self.master_name, ?res, "a monitor sub-task exited unexpectedly");
        }
    }

    /// The ~10 Hz tick: TILT check runs first, then probing/reconnection, detection, election,
    /// and failover progression.
    async fn run_tick_loop(self) {
        let mut ticker = time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            self.reconnect_and_probe().await;

            let in_tilt = tilt::check(&mut self.global.tilt.lock());
            if in_tilt {
                continue;
            }

            self.run_detection_and_election().await;
        }
    }

    async fn reconnect_and_probe(&self) {
        let (addr, auth_pass, down_after) = {
            let primary = self.primary.lock();
            (
                primary.addr.clone(),
                primary.config.auth_pass.clone(),
                primary.config.down_after,
            )
        };

        {
            let mut primary = self.primary.lock();
            probe::cycle_stale_links(
                &mut primary.commands_link,
                Some(&mut primary.pubsub_link),
                down_after / 2,
                &mut primary.flags,
            );
        }

        self.ensure_primary_links(&addr, auth_pass.as_deref()).await;
        self.probe_primary(&addr, down_after).await;

        let replica_addrs: Vec<Address> =
            self.primary.lock().replicas.keys().cloned().collect();
        for addr in replica_addrs {
            {
                let mut primary = self.primary.lock();
                if let Some(replica) = primary.replicas.get_mut(&addr) {
                    probe::cycle_stale_links(&mut replica.commands_link, None, down_after / 2, &mut replica.flags);
                }
            }
            self.probe_replica(&addr).await;
        }
    }

    /// Establishes whichever of the primary's own `commands`/`pubsub` links is `Absent`
    /// while `Disconnected`, clearing the flag once both are up.
    async fn ensure_primary_links(&self, addr: &Address, auth_pass: Option<&str>) {
        let (disconnected, needs_commands, needs_pubsub) = {
            let primary = self.primary.lock();
            (
                primary.flags.disconnected,
                matches!(primary.commands_link, Link::Absent),
                matches!(primary.pubsub_link, Link::Absent),
            )
        };
        if !disconnected {
            return;
        }

        if needs_commands
            && let Ok(mut link) = Link::establish(addr).await
        {
            if let (Some(pass), Some(client)) = (auth_pass, link.client_mut())
                && let Err(e) = client.auth(pass).await
            {
                debug!("AUTH failed on commands link to {addr}: {e}");
            }
            self.primary.lock().commands_link = link;
        }

        if needs_pubsub
            && let Ok(mut link) = Link::establish(addr).await
        {
            if let Some(client) = link.client_mut()
                && let Err(e) = client.subscribe(HELLO_CHANNEL).await
            {
                debug!("failed to subscribe hello channel on {addr}: {e}");
            }
            self.primary.lock().pubsub_link = link;
        }

        let mut primary = self.primary.lock();
        let up = primary.commands_link.is_connected() && primary.pubsub_link.is_connected();
        primary.flags.disconnected = !up;
    }

    async fn probe_primary(&self, addr: &Address, down_after: Duration) {
        let _ = addr;
        let accelerated = probe::accelerated_info_period(&self.primary.lock());
        let (info_due, ping_due) = {
            let primary = self.primary.lock();
            (
                probe::info_due(primary.timers.last_info_refresh, accelerated),
                probe::ping_due(primary.timers.last_any_pong),
            )
        };

        let mut link = std::mem::take(&mut self.primary.lock().commands_link);
        let mut saw_error = false;

        if let Some(client) = link.client_mut() {
            if ping_due {
                match client.ping().await {
                    Ok(reply) => {
                        let mut primary = self.primary.lock();
                        probe::apply_ping_outcome(&mut primary.timers, &mut primary.flags, probe::classify_ping_reply(&reply));
                    }
                    Err(_) => saw_error = true,
                }
            }

            if !saw_error && info_due {
                match client.info_replication().await {
                    Ok(info) => {
                        let parsed = probe::parse_info(&info);
                        let mut primary = self.primary.lock();
                        if parsed.role_is_replica {
                            primary.timers.role_reported_since.get_or_insert_with(Instant::now);
                        } else {
                            primary.timers.role_reported_since = None;
                            probe::apply_primary_info(&mut primary, &parsed);
                        }
                    }
                    Err(_) => saw_error = true,
                }
            }
            link.touch();
        }

        let mut primary = self.primary.lock();
        if saw_error {
            link.drop_to_absent();
            primary.flags.disconnected = true;
        }
        primary.commands_link = link;
        let _ = down_after;
    }

    async fn probe_replica(&self, addr: &Address) {
        let (ping_due, info_due) = {
            let primary = self.primary.lock();
            let accelerated = probe::accelerated_info_period(&primary);
            let Some(replica) = primary.replicas.get(addr) else {
                return;
            };
            (
                probe::ping_due(replica.timers.last_any_pong),
                probe::info_due(replica.timers.last_info_refresh, accelerated),
            )
        };

        let mut link = {
            let mut primary = self.primary.lock();
            match primary.replicas.get_mut(addr) {
                Some(replica) => std::mem::take(&mut replica.commands_link),
                None => return,
            }
        };
        if matches!(link, Link::Absent) {
            match Link::establish(addr).await {
                Ok(established) => link = established,
                Err(_) => {
                    let mut primary = self.primary.lock();
                    if let Some(replica) = primary.replicas.get_mut(addr) {
                        replica.flags.disconnected = true;
                    }
                    return;
                }
            }
        }

        let mut saw_error = false;
        if let Some(client) = link.client_mut() {
            if ping_due {
                match client.ping().await {
                    Ok(reply) => {
                        let mut primary = self.primary.lock();
                        if let Some(replica) = primary.replicas.get_mut(addr) {
                            probe::apply_ping_outcome(&mut replica.timers, &mut replica.flags, probe::classify_ping_reply(&reply));
                        }
                    }
                    Err(_) => saw_error = true,
                }
            }

            if !saw_error && info_due {
                match client.info_replication().await {
                    Ok(info) => {
                        let parsed = probe::parse_info(&info);
                        let new_master_addr = { self.primary.lock().promoted_replica.clone() };

                        let (became_primary, primary_addr) = {
                            let mut primary = self.primary.lock();
                            let primary_addr = primary.addr.clone();
                            if let Some(replica) = primary.replicas.get_mut(addr) {
                                probe::apply_replica_info(replica, &parsed);
                                if let Some(target) = &new_master_addr {
                                    failover::observe_replica_reconf(replica, target);
                                }
                            }
                            (!parsed.role_is_replica, primary_addr)
                        };

                        if became_primary && new_master_addr.as_ref() == Some(addr) {
                            // This is the awaited promotion.
                            failover::advance_on_promotion_observed(&mut self.primary.lock());
                        } else if became_primary {
                            // A replica reports itself primary outside an awaited promotion: force it back.
                            let _ = client.slaveof(Some(&primary_addr)).await;
                            self.notify(Sign::Enter, "convert-to-slave", addr.to_string());
                        }
                    }
                    Err(_) => saw_error = true,
                }
            }
            link.touch();
        }

        let mut primary = self.primary.lock();
        if let Some(replica) = primary.replicas.get_mut(addr) {
            if saw_error {
                link.drop_to_absent();
                replica.flags.disconnected = true;
            }
            replica.commands_link = link;
        }
    }

    /// Publishes a WARNING-level event scoped to this monitor's primary.
    fn notify(&self, sign: Sign, event_type: &'static str, detail: impl Into<String>) {
        self.events.publish(
            MonitorEvent::new(sign, event_type, Severity::Warning, &self.master_name, detail),
            &self.executor,
        );
    }

    async fn run_detection_and_election(&self) {
        let my_run_id = self.global.my_run_id.clone();

        let was_sdown = {
            let mut primary = self.primary.lock();
            let was = primary.flags.sdown;
            detector::check_primary_sdown(&mut primary);
            was
        };
        let now_sdown = self.primary.lock().flags.sdown;
        if !was_sdown && now_sdown {
            self.notify(Sign::Enter, "sdown", "");
        } else if was_sdown && !now_sdown {
            self.notify(Sign::Exit, "sdown", "");
        }

        let was_odown = {
            let mut primary = self.primary.lock();
            let was = primary.flags.odown;
            detector::check_primary_odown(&mut primary);
            was
        };
        let now_odown = self.primary.lock().flags.odown;
        if !was_odown && now_odown {
            self.notify(Sign::Enter, "odown", "");
        } else if was_odown && !now_odown {
            self.notify(Sign::Exit, "odown", "");
        }

        self.ask_peers_if_needed().await;

        let current_epoch = self.global.current_epoch();
        let started = {
            let mut primary = self.primary.lock();
            failover::start_failover_if_needed(&mut primary, current_epoch)
        };
        if started {
            let new_epoch = self.global.increment_epoch();
            self.primary.lock().failover_epoch = new_epoch;
        }

        failover::tick(&self.primary, &my_run_id, &self.global, &self.events, &self.executor).await;
    }

    /// Issues `is-master-down-by-addr` to peers, folding replies into
    /// `master_down`/`leader`/`leader_epoch` on the matching `PeerState`.
    async fn ask_peers_if_needed(&self) {
        let (sdown, peer_addrs): (bool, Vec<(String, Address, Option<Instant>)>) = {
            let primary = self.primary.lock();
            (
                primary.flags.sdown,
                primary
                    .peers
                    .iter()
                    .map(|(id, p)| (id.clone(), p.addr.clone(), p.last_down_reply))
                    .collect(),
            )
        };

        for (run_id, addr, last_reply) in peer_addrs {
            if !detector::should_ask_peer(sdown, last_reply) {
                continue;
            }
            let (target_addr, target_port, current_epoch, my_run_id) = {
                let primary = self.primary.lock();
                (
                    primary.addr.ip.clone(),
                    primary.addr.port,
                    self.global.current_epoch(),
                    self.global.my_run_id.clone(),
                )
            };
            if let Ok(mut client) = WardenClient::connect(&addr).await {
                let frame = RespFrame::Array(vec![
                    RespFrame::BulkString("SENTINEL".into()),
                    RespFrame::BulkString("is-master-down-by-addr".into()),
                    RespFrame::BulkString(target_addr.into_bytes().into()),
                    RespFrame::BulkString(target_port.to_string().into_bytes().into()),
                    RespFrame::BulkString(current_epoch.to_string().into_bytes().into()),
                    RespFrame::BulkString(my_run_id.into_bytes().into()),
                ]);
                if let Ok(RespFrame::Array(parts)) = client.send_and_receive(frame).await
                    && parts.len() == 3
                {
                    let leader_run_id = match &parts[1] {
                        RespFrame::BulkString(b) if b.as_ref() == b"?".as_slice() => None,
                        RespFrame::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
                        _ => None,
                    };
                    let leader_epoch = match &parts[2] {
                        RespFrame::Integer(e) => *e as u64,
                        _ => 0,
                    };

                    let mut primary = self.primary.lock();
                    if let Some(peer) = primary.peers.get_mut(&run_id) {
                        if let RespFrame::Integer(down) = &parts[0] {
                            peer.master_down = *down != 0;
                        }
                        peer.leader = leader_run_id;
                        peer.leader_epoch = leader_epoch;
                        peer.last_down_reply = Some(Instant::now());
                    }
                    drop(primary);
                    self.global.maybe_bump_epoch(leader_epoch);
                }
            }
        }
    }

    async fn run_pubsub_loop(self, hello_interval: Duration) {
        const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
        const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
        let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

        loop {
            let addr = self.primary.lock().addr.clone();
            match self.connect_and_subscribe(&addr).await {
                Ok(client) => {
                    reconnect_delay = INITIAL_RECONNECT_DELAY;
                    if let Err(e) = self.process_pubsub_messages(client, hello_interval).await {
                        warn!(master = %self.master_name, "pub/sub connection lost: {e}");
                    }
                }
                Err(e) => {
                    debug!(master = %self.master_name, "failed to subscribe hello channel: {e}");
                }
            }
            time::sleep(reconnect_delay).await;
            reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }

    async fn connect_and_subscribe(&self, addr: &Address) -> Result<WardenClient, crate::core::WardenError> {
        let mut client = WardenClient::connect(addr).await?;
        client.subscribe(HELLO_CHANNEL).await?;
        Ok(client)
    }

    async fn process_pubsub_messages(
        &self,
        mut client: WardenClient,
        hello_interval: Duration,
    ) -> Result<(), crate::core::WardenError> {
        let mut hello_timer = time::interval(hello_interval);
        loop {
            tokio::select! {
                _ = hello_timer.tick() => {
                    let _ = self.publish_hello(&mut client).await;
                }
                message = client.next_message() => {
                    if let Some((channel, payload)) = message? {
                        if channel == HELLO_CHANNEL {
                            self.handle_hello(&payload);
                        }
                    }
                }
            }
        }
    }

    async fn publish_hello(&self, client: &mut WardenClient) -> Result<(), crate::core::WardenError> {
        let payload = {
            let primary = self.primary.lock();
            HelloPayload {
                addr: self.global.my_announce_addr.clone(),
                run_id: self.global.my_run_id.clone(),
                can_failover: primary.config.can_failover,
                current_epoch: self.global.current_epoch(),
                primary_name: primary.config.name.clone(),
                primary_addr: primary.addr.clone(),
                primary_config_epoch: primary.config_epoch,
            }
        };
        client.publish(HELLO_CHANNEL, &payload.encode()).await
    }

    fn handle_hello(&self, payload: &str) {
        let Ok(decoded) = HelloPayload::decode(payload) else {
            return;
        };
        self.global.maybe_bump_epoch(decoded.current_epoch);

        let mut primary = self.primary.lock();
        match hello::process_hello(&self.global.my_run_id, &mut primary, decoded) {
            hello::HelloEffect::None => {}
            hello::HelloEffect::SwitchMaster { new_addr } => {
                hello::apply_switch_master(&mut primary, new_addr);
            }
        }
    }
}

/// Runs the background script executor tick loop.
pub async fn run_script_executor_loop(executor: Arc<ScriptExecutor>) {
    let mut ticker = time::interval(Duration::from_millis(200));
    loop {
        ticker.tick().await;
        executor.tick().await;
    }
}
