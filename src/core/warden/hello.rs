// src/core/warden/hello.rs

//! The Hello channel: self-advertisement and peer discovery over the well-known pub/sub
//! channel. Wire format is the literal comma-separated 9-tuple, not a JSON envelope.

use super::address::Address;
use super::state::PrimaryState;
use crate::core::WardenError;

/// One decoded Hello advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloPayload {
    pub addr: Address,
    pub run_id: String,
    pub can_failover: bool,
    pub current_epoch: u64,
    pub primary_name: String,
    pub primary_addr: Address,
    pub primary_config_epoch: u64,
}

impl HelloPayload {
    /// `ip,port,run_id,can_failover(0/1),current_epoch,primary_name,primary_ip,primary_port,primary_config_epoch`
    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.addr.ip,
            self.addr.port,
            self.run_id,
            if self.can_failover { 1 } else { 0 },
            self.current_epoch,
            self.primary_name,
            self.primary_addr.ip,
            self.primary_addr.port,
            self.primary_config_epoch,
        )
    }

    pub fn decode(line: &str) -> Result<Self, WardenError> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 9 {
            return Err(WardenError::SyntaxError);
        }
        let port: u16 = fields[1].parse().map_err(|_| WardenError::SyntaxError)?;
        let can_failover = fields[3] == "1";
        let current_epoch: u64 = fields[4].parse().map_err(|_| WardenError::SyntaxError)?;
        let primary_port: u16 = fields[7].parse().map_err(|_| WardenError::SyntaxError)?;
        let primary_config_epoch: u64 = fields[8].parse().map_err(|_| WardenError::SyntaxError)?;
        Ok(Self {
            addr: Address::new(fields[0], port),
            run_id: fields[2].to_string(),
            can_failover,
            current_epoch,
            primary_name: fields[5].to_string(),
            primary_addr: Address::new(fields[6], primary_port),
            primary_config_epoch,
        })
    }
}

/// The outcome of processing one received Hello, for the caller to act on (emit events,
/// rebind the primary).
pub enum HelloEffect {
    /// Nothing of note beyond bookkeeping updates.
    None,
    /// A `switch-master` was detected: rebind the primary to the advertised address.
    SwitchMaster { new_addr: Address },
}

/// Processes one Hello advertisement against `primary`'s state, filtering out self-origin
/// messages by run_id. Returns the effect the caller must apply.
///
/// The switch-master gate is kept exactly as written: `port != advertised_port || our_addr ==
/// advertised_addr`. The second half reads like an inversion of "address differs" — kept as-is
/// absent a live trace proving it should be corrected; see DESIGN.md.
pub fn process_hello(
    my_run_id: &str,
    primary: &mut PrimaryState,
    hello: HelloPayload,
) -> HelloEffect {
    if hello.run_id == my_run_id {
        return HelloEffect::None;
    }
    if hello.primary_name != primary.config.name {
        return HelloEffect::None;
    }

    let peer = primary.upsert_peer(hello.run_id.clone(), hello.addr.clone());
    peer.can_failover = hello.can_failover;
    peer.current_epoch = hello.current_epoch;
    peer.last_hello_received = std::time::Instant::now();

    let mut effect = HelloEffect::None;

    if hello.primary_config_epoch > primary.config_epoch {
        let switch_master_condition =
            primary.addr.port != hello.primary_addr.port || primary.addr == hello.primary_addr;
        if switch_master_condition {
            effect = HelloEffect::SwitchMaster {
                new_addr: hello.primary_addr.clone(),
            };
        }
        primary.config_epoch = hello.primary_config_epoch;
    }

    effect
}

/// Applies a detected switch-master: resets the primary record and rebinds it to the
/// advertised address, folding the former primary in as a fresh replica record.
pub fn apply_switch_master(primary: &mut PrimaryState, new_addr: Address) {
    let old_addr = primary.addr.clone();
    primary.reset(Some(new_addr), false);
    if old_addr != primary.addr {
        primary.ensure_replica(old_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HelloPayload {
        HelloPayload {
            addr: Address::new("10.0.0.5", 26379),
            run_id: "a".repeat(40),
            can_failover: true,
            current_epoch: 3,
            primary_name: "mymaster".into(),
            primary_addr: Address::new("10.0.0.1", 6379),
            primary_config_epoch: 4,
        }
    }

    #[test]
    fn round_trips_csv_encoding() {
        let hello = sample();
        let encoded = hello.encode();
        let decoded = HelloPayload::decode(&encoded).unwrap();
        assert_eq!(hello, decoded);
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(HelloPayload::decode("not,enough,fields").is_err());
    }
}
