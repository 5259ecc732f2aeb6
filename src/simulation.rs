//! Message stream simulation.
//!
//! Drives a limiter with messages from a rotating set of users, sleeping a
//! random interval after each message and pausing between rounds. Every
//! outcome is logged and collected into a [`SimulationReport`].

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::ratelimit::SlidingWindowLimiter;

/// Outcome of one simulated message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageOutcome {
    /// Sequence number, starting at 1 and continuing across rounds
    pub message_id: u64,
    /// User the message was sent as
    pub user: String,
    /// Whether the limiter admitted the message
    pub admitted: bool,
    /// Wait reported by the limiter on rejection, zero otherwise
    pub wait: Duration,
}

/// Collected outcomes of a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    /// Every message in send order
    pub outcomes: Vec<MessageOutcome>,
}

impl SimulationReport {
    /// Number of admitted messages.
    pub fn admitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.admitted).count()
    }

    /// Number of rejected messages.
    pub fn rejected(&self) -> usize {
        self.outcomes.len() - self.admitted()
    }
}

/// Sends simulated messages through a limiter.
pub struct Simulation {
    limiter: Arc<SlidingWindowLimiter>,
    config: SimulationConfig,
}

impl Simulation {
    /// Create a simulation over `limiter`.
    pub fn new(limiter: Arc<SlidingWindowLimiter>, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { limiter, config })
    }

    /// Run every round and return the collected outcomes.
    pub async fn run(&self) -> SimulationReport {
        let mut report = SimulationReport::default();
        let mut message_id = 0;

        for round in 1..=self.config.rounds {
            if round > 1 {
                let pause = Duration::from_secs_f64(self.config.pause_between_rounds_secs);
                info!(pause = ?pause, "Waiting before next round");
                tokio::time::sleep(pause).await;
            }

            info!(
                round = round,
                messages = self.config.messages_per_round,
                "Starting message round"
            );

            for _ in 0..self.config.messages_per_round {
                message_id += 1;
                let outcome = self.send(message_id);
                report.outcomes.push(outcome);

                tokio::time::sleep(self.jitter()).await;
            }
        }

        info!(
            admitted = report.admitted(),
            rejected = report.rejected(),
            active_keys = self.limiter.active_keys(),
            "Simulation finished"
        );
        report
    }

    /// Send one message as the user it maps to.
    fn send(&self, message_id: u64) -> MessageOutcome {
        let user = (message_id % self.config.users + 1).to_string();
        let admission = self.limiter.acquire(user.as_str());
        let wait = admission.retry_after();

        if admission.is_admitted() {
            info!(message_id = message_id, user = %user, "Message accepted");
        } else {
            info!(
                message_id = message_id,
                user = %user,
                wait_secs = wait.as_secs_f64(),
                "Message rejected"
            );
        }

        MessageOutcome {
            message_id,
            user,
            admitted: admission.is_admitted(),
            wait,
        }
    }

    /// Random delay within the configured jitter bounds.
    fn jitter(&self) -> Duration {
        let (min, max) = (self.config.min_jitter_secs, self.config.max_jitter_secs);
        let secs = if min < max {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        };
        debug!(secs = secs, "Sleeping before next message");
        Duration::from_secs_f64(secs)
    }
}
