// src/core/warden/tilt.rs

//! TILT supervisor: detects clock jumps/long stalls and quiesces the acting half of the
//! monitor while probing continues.

use super::constants::{TILT_PERIOD, TILT_TRIGGER};
use super::state::TiltState;
use std::time::Instant;
use tracing::warn;

/// Runs first in every tick. Returns whether TILT is (still) active after this check.
pub fn check(tilt: &mut TiltState) -> bool {
    let now = Instant::now();
    let delta = now.saturating_duration_since(tilt.previous_tick);
    let jumped_backwards = now < tilt.previous_tick;
    tilt.previous_tick = now;

    if !tilt.active && (jumped_backwards || delta > TILT_TRIGGER) {
        tilt.active = true;
        tilt.started_at = Some(now);
        warn!("+tilt");
        return true;
    }

    if tilt.active {
        let elapsed = tilt.started_at.map(|s| s.elapsed()).unwrap_or_default();
        if elapsed >= TILT_PERIOD {
            tilt.active = false;
            tilt.started_at = None;
            warn!("-tilt");
            return false;
        }
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn large_forward_jump_triggers_tilt() {
        let mut tilt = TiltState {
            active: false,
            started_at: None,
            previous_tick: Instant::now() - Duration::from_secs(5),
        };
        assert!(check(&mut tilt));
        assert!(tilt.active);
    }

    #[test]
    fn tilt_clears_after_period_elapses() {
        let mut tilt = TiltState {
            active: true,
            started_at: Some(Instant::now() - TILT_PERIOD - Duration::from_secs(1)),
            previous_tick: Instant::now(),
        };
        assert!(!check(&mut tilt));
        assert!(!tilt.active);
    }

    #[test]
    fn normal_tick_delta_does_not_trigger() {
        let mut tilt = TiltState {
            active: false,
            started_at: None,
            previous_tick: Instant::now() - Duration::from_millis(100),
        };
        assert!(!check(&mut tilt));
    }
}
