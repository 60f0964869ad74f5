// src/core/warden/mod.rs

//! The monitor subsystem: a high-availability watcher for a primary/replica datastore
//! cluster, gossiping over a Hello channel and coordinating quorum-based failover.
//!
//! Responsible for:
//! - Monitoring the health of primary and replica instances (subjective/objective down).
//! - Coordinating with peer monitors to reach quorum before acting.
//! - Driving an automated failover to promote a replica to primary.
//! - Serving a small admin query surface for clients and peers.

use anyhow::{Context, Result, anyhow};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub mod address;
pub mod admin;
pub mod client;
pub mod config;
pub mod constants;
pub mod detector;
pub mod election;
pub mod epoch;
pub mod failover;
pub mod hello;
pub mod link;
pub mod probe;
pub mod script;
pub mod state;
pub mod tilt;
pub mod worker;

use self::address::{Address, generate_run_id};
use self::config::WardenConfig;
use self::script::ScriptExecutor;
use self::state::{GlobalWardenState, PrimaryState, TiltState};
use self::worker::MasterMonitor;
use crate::core::events::EventBus;

/// The main entry point for running the monitor process.
pub async fn run(config_path: &str) -> Result<()> {
    let config = WardenConfig::from_file(config_path).await?;
    info!(
        "warden starting on {}:{} with {} master(s) to monitor",
        config.host,
        config.port,
        config.masters.len()
    );

    let my_run_id = generate_run_id().context("generating run id")?;
    info!(run_id = %my_run_id, "warden identity");

    let announce_ip = config.announce_ip.clone().unwrap_or_else(|| config.host.clone());
    let announce_port = config.announce_port.unwrap_or(config.port);
    let my_announce_addr = Address::new(announce_ip, announce_port);

    let global = Arc::new(GlobalWardenState {
        my_run_id,
        my_announce_addr,
        masters: DashMap::new(),
        current_epoch: Mutex::new(0),
        tilt: Mutex::new(TiltState::default()),
    });

    // A single notification script is shared across masters that name one; per-master
    // client-reconfig scripts are read directly off each `MonitoredMaster` where enqueued.
    let notification_script = config
        .masters
        .iter()
        .find_map(|m| m.notification_script.as_ref())
        .map(|p| p.to_string_lossy().to_string());
    let events = Arc::new(EventBus::new(notification_script));
    let executor = ScriptExecutor::new();

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for master_config in config.masters {
        let name = master_config.name.clone();
        info!(master = %name, ip = %master_config.ip, port = master_config.port, "monitoring master");

        let primary = Arc::new(Mutex::new(PrimaryState::from_config(master_config)));
        global.masters.insert(name.clone(), primary.clone());

        let monitor = MasterMonitor::new(name, primary, global.clone(), events.clone(), executor.clone());
        let master_name_for_log = monitor.master_name().to_string();
        tasks.spawn(async move {
            monitor.run().await;
            Err(anyhow!("monitor for '{master_name_for_log}' exited unexpectedly"))
        });
    }

    let script_executor = executor.clone();
    tasks.spawn(async move {
        worker::run_script_executor_loop(script_executor).await;
        Err(anyhow!("script executor loop exited unexpectedly"))
    });

    let admin_global = global.clone();
    let admin_executor = executor.clone();
    let admin_host = config.host.clone();
    let admin_port = config.port;
    tasks.spawn(async move { admin::run_listener(&admin_host, admin_port, admin_global, admin_executor).await });

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => warn!("a warden task completed unexpectedly without an error"),
            Ok(Err(e)) => error!("a warden task failed: {e}"),
            Err(e) => error!("a warden task panicked: {e}"),
        }
    }

    Err(anyhow!("all warden tasks have terminated, shutting down"))
}
