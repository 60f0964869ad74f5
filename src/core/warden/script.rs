// src/core/warden/script.rs

//! The script executor: a bounded FIFO queue of subprocess jobs with retry backoff and a
//! runtime cap, built on `tokio::process::Command`.

use super::constants::{SCRIPT_MAX_QUEUE, SCRIPT_MAX_RETRY, SCRIPT_MAX_RUNNING, SCRIPT_MAX_RUNTIME, SCRIPT_RETRY_DELAY};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum ScriptKind {
    /// argv = `[path, event_type, message]`, fired on WARNING-level events.
    Notification,
    /// argv = `[path, primary_name, role, state, from_ip, from_port, to_ip, to_port]`.
    ClientReconfig,
}

#[derive(Debug, Clone)]
pub struct ScriptJob {
    pub kind: ScriptKind,
    pub argv: Vec<String>,
    pub retry_num: u32,
    pub start_time: Instant,
}

impl ScriptJob {
    pub fn notification(path: String, event_type: &str, message: String) -> Self {
        Self {
            kind: ScriptKind::Notification,
            argv: vec![path, event_type.to_string(), message],
            retry_num: 0,
            start_time: Instant::now(),
        }
    }

    pub fn client_reconfig(
        path: String,
        primary_name: &str,
        role: &str,
        state: &str,
        from: (&str, u16),
        to: (&str, u16),
    ) -> Self {
        Self {
            kind: ScriptKind::ClientReconfig,
            argv: vec![
                path,
                primary_name.to_string(),
                role.to_string(),
                state.to_string(),
                from.0.to_string(),
                from.1.to_string(),
                to.0.to_string(),
                to.1.to_string(),
            ],
            retry_num: 0,
            start_time: Instant::now(),
        }
    }

    fn path(&self) -> &str {
        &self.argv[0]
    }
}

struct RunningJob {
    job: ScriptJob,
    child: Child,
    started: Instant,
}

/// `delay(n) = RETRY_DELAY * 2^(n-1)`.
fn retry_delay(retry_num: u32) -> Duration {
    let mut delay = SCRIPT_RETRY_DELAY;
    for _ in 1..retry_num.max(1) {
        delay *= 2;
    }
    delay
}

/// The FIFO script queue plus in-flight job tracking, shared via `Arc` with the tick loop
/// that owns it.
pub struct ScriptExecutor {
    queue: Mutex<VecDeque<ScriptJob>>,
    running: Mutex<Vec<RunningJob>>,
}

impl ScriptExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            running: Mutex::new(Vec::new()),
        })
    }

    /// Pushes a job to the tail; evicts the oldest non-running (i.e. still-queued) job if the
    /// queue would exceed `MAX_QUEUE`.
    pub fn enqueue(&self, job: ScriptJob) {
        let mut queue = self.queue.lock();
        if queue.len() >= SCRIPT_MAX_QUEUE {
            queue.pop_front();
        }
        queue.push_back(job);
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Launches ready jobs while `running < MAX_RUNNING`, reaps terminated children, and
    /// SIGKILLs anything over `MAX_RUNTIME`. Intended to run once per tick.
    pub async fn tick(self: &Arc<Self>) {
        self.reap_terminated().await;
        self.kill_timed_out();
        self.launch_ready().await;
    }

    async fn launch_ready(self: &Arc<Self>) {
        loop {
            let slots_free = SCRIPT_MAX_RUNNING.saturating_sub(self.running.lock().len());
            if slots_free == 0 {
                break;
            }
            let job = {
                let mut queue = self.queue.lock();
                let ready_index = queue
                    .iter()
                    .position(|j| Instant::now() >= j.start_time);
                ready_index.and_then(|i| queue.remove(i))
            };
            let Some(job) = job else { break };

            match Command::new(job.path()).args(&job.argv[1..]).spawn() {
                Ok(child) => {
                    debug!(argv = ?job.argv, "script-child");
                    self.running.lock().push(RunningJob {
                        job,
                        child,
                        started: Instant::now(),
                    });
                }
                Err(e) => {
                    warn!("failed to spawn script {}: {e}", job.path());
                }
            }
        }
    }

    async fn reap_terminated(self: &Arc<Self>) {
        let mut still_running = Vec::new();
        let in_flight = std::mem::take(&mut *self.running.lock());
        for mut entry in in_flight {
            match entry.child.try_wait() {
                Ok(Some(status)) => {
                    if status.success() {
                        debug!(argv = ?entry.job.argv, "script job succeeded");
                    } else if status.code() == Some(1) || status.code().is_none() {
                        self.reschedule_or_drop(entry.job);
                    } else {
                        warn!(argv = ?entry.job.argv, code = ?status.code(), "script-error");
                    }
                }
                Ok(None) => still_running.push(entry),
                Err(e) => warn!("error polling script child: {e}"),
            }
        }
        *self.running.lock() = still_running;
    }

    fn reschedule_or_drop(&self, mut job: ScriptJob) {
        job.retry_num += 1;
        if job.retry_num > SCRIPT_MAX_RETRY {
            warn!(argv = ?job.argv, "script dropped after exhausting retries");
            return;
        }
        job.start_time = Instant::now() + retry_delay(job.retry_num);
        self.queue.lock().push_back(job);
    }

    fn kill_timed_out(&self) {
        let mut running = self.running.lock();
        for entry in running.iter_mut() {
            if entry.started.elapsed() > SCRIPT_MAX_RUNTIME {
                warn!(argv = ?entry.job.argv, "script-timeout, sending SIGKILL");
                let _ = entry.child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_each_attempt() {
        assert_eq!(retry_delay(1), SCRIPT_RETRY_DELAY);
        assert_eq!(retry_delay(2), SCRIPT_RETRY_DELAY * 2);
        assert_eq!(retry_delay(3), SCRIPT_RETRY_DELAY * 4);
    }

    #[test]
    fn enqueue_evicts_oldest_when_queue_is_full() {
        let executor = ScriptExecutor::new();
        for i in 0..SCRIPT_MAX_QUEUE {
            executor.enqueue(ScriptJob::notification(
                "/bin/true".into(),
                "sdown",
                format!("job-{i}"),
            ));
        }
        assert_eq!(executor.pending_count(), SCRIPT_MAX_QUEUE);
        executor.enqueue(ScriptJob::notification(
            "/bin/true".into(),
            "sdown",
            "job-overflow".into(),
        ));
        assert_eq!(executor.pending_count(), SCRIPT_MAX_QUEUE);
    }
}
