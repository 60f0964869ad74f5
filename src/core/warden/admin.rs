// src/core/warden/admin.rs

//! The admin query surface: a RESP2 listener serving `PING` and the `SENTINEL` command
//! family, a thin reflection over `GlobalWardenState`. `is-master-down-by-addr` is carried
//! alongside the user-facing commands because it is the peer-to-peer half of the
//! down-detector query/response cycle and arrives on this same listener.

use super::address::Address;
use super::detector;
use super::script::ScriptExecutor;
use super::state::{FailoverState, GlobalWardenState, PrimaryState};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{info, warn};
use wildmatch::WildMatch;

/// Binds and serves the admin surface until the process exits.
pub async fn run_listener(
    host: &str,
    port: u16,
    global: Arc<GlobalWardenState>,
    executor: Arc<ScriptExecutor>,
) -> Result<()> {
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    info!("admin listener bound on {host}:{port}");

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let global = global.clone();
                let executor = executor.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, global, executor).await {
                        warn!("admin connection from {peer} ended: {e}");
                    }
                });
            }
            Err(e) => warn!("failed to accept admin connection: {e}"),
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    global: Arc<GlobalWardenState>,
    executor: Arc<ScriptExecutor>,
) -> Result<()> {
    let mut framed = Framed::new(socket, RespFrameCodec);
    while let Some(result) = framed.next().await {
        let frame = result?;
        let response = match frame {
            RespFrame::Array(args) => dispatch(&args, &global, &executor),
            _ => RespFrame::Error("ERR invalid command format".into()),
        };
        framed.send(response).await?;
    }
    Ok(())
}

fn arg_str(args: &[RespFrame], i: usize) -> Option<String> {
    match args.get(i) {
        Some(RespFrame::BulkString(b)) => Some(String::from_utf8_lossy(b).to_string()),
        _ => None,
    }
}

fn dispatch(args: &[RespFrame], global: &Arc<GlobalWardenState>, executor: &Arc<ScriptExecutor>) -> RespFrame {
    let Some(cmd) = arg_str(args, 0) else {
        return RespFrame::Error("ERR invalid command format".into());
    };

    if cmd.eq_ignore_ascii_case("ping") {
        return RespFrame::SimpleString("PONG".into());
    }
    if !cmd.eq_ignore_ascii_case("sentinel") {
        return RespFrame::Error(format!("ERR unknown command '{cmd}'"));
    }

    let Some(subcmd) = arg_str(args, 1) else {
        return RespFrame::Error("ERR wrong number of arguments for 'sentinel' command".into());
    };

    match subcmd.to_ascii_lowercase().as_str() {
        "masters" => cmd_masters(global),
        "slaves" => with_name_arg(args, |name| cmd_slaves(global, name)),
        "sentinels" => with_name_arg(args, |name| cmd_sentinels(global, name)),
        "get-master-addr-by-name" => with_name_arg(args, |name| cmd_get_master_addr(global, name)),
        "reset" => with_name_arg(args, |pattern| cmd_reset(global, pattern)),
        "failover" => with_name_arg(args, |name| cmd_failover(global, name)),
        "pending-scripts" => RespFrame::Integer(executor.pending_count() as i64),
        "is-master-down-by-addr" => cmd_is_master_down_by_addr(args, global),
        other => RespFrame::Error(format!("ERR unknown sentinel subcommand '{other}'")),
    }
}

fn with_name_arg(args: &[RespFrame], f: impl FnOnce(&str) -> RespFrame) -> RespFrame {
    match arg_str(args, 2) {
        Some(name) => f(&name),
        None => RespFrame::Error("ERR wrong number of arguments".into()),
    }
}

fn bulk(s: impl Into<Vec<u8>>) -> RespFrame {
    RespFrame::BulkString(s.into().into())
}

fn kv_array(pairs: &[(&str, String)]) -> RespFrame {
    let mut out = Vec::with_capacity(pairs.len() * 2);
    for (k, v) in pairs {
        out.push(bulk(*k));
        out.push(bulk(v.clone()));
    }
    RespFrame::Array(out)
}

fn instance_flags(kind: &str, sdown: bool, odown: bool, failover_in_progress: bool) -> String {
    let mut flags = vec![kind];
    if sdown {
        flags.push("s_down");
    }
    if odown {
        flags.push("o_down");
    }
    if failover_in_progress {
        flags.push("failover_in_progress");
    }
    flags.join(",")
}

fn master_entry(name: &str, primary: &PrimaryState) -> RespFrame {
    kv_array(&[
        ("name", name.to_string()),
        ("ip", primary.addr.ip.clone()),
        ("port", primary.addr.port.to_string()),
        ("run_id", primary.run_id.clone()),
        (
            "flags",
            instance_flags("master", primary.flags.sdown, primary.flags.odown, primary.failover_state != FailoverState::None),
        ),
        ("num-slaves", primary.replicas.len().to_string()),
        ("num-other-sentinels", primary.peers.len().to_string()),
        ("quorum", primary.config.quorum.to_string()),
        ("config-epoch", primary.config_epoch.to_string()),
    ])
}

fn cmd_masters(global: &Arc<GlobalWardenState>) -> RespFrame {
    let entries: Vec<RespFrame> = global
        .masters
        .iter()
        .map(|e| master_entry(e.key(), &e.value().lock()))
        .collect();
    RespFrame::Array(entries)
}

fn cmd_slaves(global: &Arc<GlobalWardenState>, name: &str) -> RespFrame {
    let Some(entry) = global.masters.get(name) else {
        return RespFrame::Error("ERR No such master with that name".into());
    };
    let primary = entry.value().lock();
    let entries: Vec<RespFrame> = primary
        .replicas
        .values()
        .map(|r| {
            kv_array(&[
                ("ip", r.addr.ip.clone()),
                ("port", r.addr.port.to_string()),
                ("run_id", r.run_id.clone()),
                ("flags", instance_flags("slave", r.flags.sdown, r.flags.odown, false)),
                (
                    "master-link-status",
                    if r.master_link_status_up { "ok".to_string() } else { "err".to_string() },
                ),
                ("slave-priority", r.priority.to_string()),
                ("slave-repl-offset", r.replication_offset.to_string()),
            ])
        })
        .collect();
    RespFrame::Array(entries)
}

fn cmd_sentinels(global: &Arc<GlobalWardenState>, name: &str) -> RespFrame {
    let Some(entry) = global.masters.get(name) else {
        return RespFrame::Error("ERR No such master with that name".into());
    };
    let primary = entry.value().lock();
    let entries: Vec<RespFrame> = primary
        .peers
        .values()
        .map(|p| {
            kv_array(&[
                ("name", p.run_id.clone()),
                ("ip", p.addr.ip.clone()),
                ("port", p.addr.port.to_string()),
                ("runid", p.run_id.clone()),
                ("can-failover", if p.can_failover { "1".to_string() } else { "0".to_string() }),
            ])
        })
        .collect();
    RespFrame::Array(entries)
}

fn cmd_get_master_addr(global: &Arc<GlobalWardenState>, name: &str) -> RespFrame {
    match global.masters.get(name) {
        Some(entry) => {
            let primary = entry.value().lock();
            RespFrame::Array(vec![bulk(primary.addr.ip.clone()), bulk(primary.addr.port.to_string())])
        }
        None => RespFrame::NullArray,
    }
}

/// Resets every primary whose name matches `pattern`, returning the count reset.
fn cmd_reset(global: &Arc<GlobalWardenState>, pattern: &str) -> RespFrame {
    let matcher = WildMatch::new(pattern);
    let mut count = 0i64;
    for entry in global.masters.iter() {
        if matcher.matches(entry.key()) {
            entry.value().lock().reset(None, true);
            count += 1;
        }
    }
    RespFrame::Integer(count)
}

fn cmd_failover(global: &Arc<GlobalWardenState>, name: &str) -> RespFrame {
    match global.masters.get(name) {
        Some(entry) => {
            let mut primary = entry.value().lock();
            if primary.failover_state != FailoverState::None {
                RespFrame::Error("ERR failover already in progress".into())
            } else {
                primary.force_failover = true;
                RespFrame::SimpleString("OK".into())
            }
        }
        None => RespFrame::Error("ERR No such master with that name".into()),
    }
}

/// Answers a peer's `is-master-down-by-addr <ip> <port> <epoch> <run_id>` query by finding
/// the primary whose address matches and delegating to `detector::answer_peer_query`.
fn cmd_is_master_down_by_addr(args: &[RespFrame], global: &Arc<GlobalWardenState>) -> RespFrame {
    let (Some(ip), Some(port_s), Some(epoch_s), Some(run_id)) =
        (arg_str(args, 2), arg_str(args, 3), arg_str(args, 4), arg_str(args, 5))
    else {
        return RespFrame::Error("ERR wrong number of arguments for 'sentinel is-master-down-by-addr'".into());
    };
    let (Ok(port), Ok(req_epoch)) = (port_s.parse::<u16>(), epoch_s.parse::<u64>()) else {
        return RespFrame::Error("ERR invalid port or epoch".into());
    };

    let addr = Address::new(ip, port);
    let in_tilt = global.tilt.lock().active;

    for entry in global.masters.iter() {
        let mut primary = entry.value().lock();
        if primary.addr == addr {
            let reply = detector::answer_peer_query(&mut primary, &addr, in_tilt, global, req_epoch, &run_id);
            return RespFrame::Array(vec![
                RespFrame::Integer(i64::from(reply.down)),
                bulk(reply.leader_run_id.unwrap_or_else(|| "?".to_string())),
                RespFrame::Integer(reply.leader_epoch as i64),
            ]);
        }
    }
    RespFrame::Array(vec![RespFrame::Integer(0), bulk("?"), RespFrame::Integer(0)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::warden::config::MonitoredMaster;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn sample_global() -> Arc<GlobalWardenState> {
        let config = MonitoredMaster {
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
        };
        let masters = DashMap::new();
        masters.insert("mymaster".to_string(), Arc::new(Mutex::new(PrimaryState::from_config(config))));
        Arc::new(GlobalWardenState {
            my_run_id: "a".repeat(40),
            my_announce_addr: Address::new("127.0.0.1", 26379),
            masters,
            current_epoch: Mutex::new(0),
            tilt: Mutex::new(Default::default()),
        })
    }

    #[test]
    fn get_master_addr_returns_null_array_for_unknown_master() {
        let global = sample_global();
        assert_eq!(cmd_get_master_addr(&global, "unknown"), RespFrame::NullArray);
    }

    #[test]
    fn get_master_addr_resolves_known_master() {
        let global = sample_global();
        let reply = cmd_get_master_addr(&global, "mymaster");
        assert_eq!(reply, RespFrame::Array(vec![bulk("10.0.0.1"), bulk("6379")]));
    }

    #[test]
    fn reset_matches_glob_pattern_and_counts() {
        let global = sample_global();
        assert_eq!(cmd_reset(&global, "my*"), RespFrame::Integer(1));
        assert_eq!(cmd_reset(&global, "other*"), RespFrame::Integer(0));
    }

    #[test]
    fn failover_rejects_when_already_in_progress() {
        let global = sample_global();
        global.masters.get("mymaster").unwrap().value().lock().failover_state = FailoverState::WaitStart;
        assert!(matches!(cmd_failover(&global, "mymaster"), RespFrame::Error(_)));
    }
}
