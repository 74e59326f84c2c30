use tokio::net::TcpStream;
use tokio::time::{Duration, Instant, timeout_at};
use tracing::debug;

use super::{HandshakeContext, Protocol};
use crate::config::Timings;
use crate::util::abort_connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Succeeded {
        socket_latency: Duration,
        handshake_latency: Option<Duration>,
        detail: Option<String>,
    },
    Failed {
        reason: String,
    },
}

/// One probing cycle. The first terminal outcome sticks.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub seq: u64,
    pub started_at: Instant,
    connected_at: Option<Instant>,
    finished_at: Option<Instant>,
    outcome: Outcome,
}

impl Attempt {
    pub fn new(seq: u64) -> Self {
        Self::starting_at(seq, Instant::now())
    }

    pub fn starting_at(seq: u64, started_at: Instant) -> Self {
        Self {
            seq,
            started_at,
            connected_at: None,
            finished_at: None,
            outcome: Outcome::Pending,
        }
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome != Outcome::Pending
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded { .. })
    }

    pub fn mark_connected(&mut self, at: Instant) {
        if self.connected_at.is_none() && !self.is_terminal() {
            self.connected_at = Some(at);
        }
    }

    /// Records success. `handshake_done` is the instant the handshake
    /// completed, if there was one. Returns false when the attempt had
    /// already terminated or never connected.
    pub fn succeed(&mut self, handshake_done: Option<Instant>, detail: Option<String>) -> bool {
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let socket_latency = connected_at.saturating_duration_since(self.started_at);
        let handshake_latency = handshake_done.map(|done| done.saturating_duration_since(connected_at));
        self.finish(Outcome::Succeeded {
            socket_latency,
            handshake_latency,
            detail,
        })
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        self.finish(Outcome::Failed {
            reason: reason.into(),
        })
    }

    fn finish(&mut self, outcome: Outcome) -> bool {
        if self.is_terminal() {
            debug!(seq = self.seq, ?outcome, "ignoring late completion");
            return false;
        }
        self.outcome = outcome;
        self.finished_at = Some(Instant::now());
        true
    }

    /// Time from start to termination (or to now while pending).
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started_at)
    }

    pub fn report_line(&self, target: &str, port: u16, protocol: Protocol) -> String {
        match &self.outcome {
            Outcome::Succeeded {
                socket_latency,
                handshake_latency,
                detail,
            } => {
                let mut line = format!(
                    "[{}] Connected to {}:{} in {:.2}ms with {} protocol.",
                    self.seq,
                    target,
                    port,
                    as_ms(*socket_latency),
                    protocol.name()
                );
                if let Some(hs) = handshake_latency {
                    line.push_str(&format!(" (handshake: {:.2}ms)", as_ms(*hs)));
                }
                if let Some(detail) = detail {
                    line.push_str(" - ");
                    line.push_str(detail);
                }
                line
            }
            Outcome::Failed { reason } => format!(
                "[{}] Error connecting to {}:{} after {:.2}ms: {}",
                self.seq,
                target,
                port,
                as_ms(self.elapsed()),
                reason
            ),
            Outcome::Pending => format!("[{}] {}:{} still pending", self.seq, target, port),
        }
    }
}

pub fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub fn timed_out_reason(timings: &Timings) -> String {
    format!("timed out after {}ms", timings.attempt_timeout.as_millis())
}

/// Connects, runs the protocol handshake, and classifies the result. The
/// whole exchange shares one deadline measured from the attempt start.
pub async fn run_attempt(
    seq: u64,
    target: &str,
    port: u16,
    protocol: Protocol,
    timings: Timings,
) -> Attempt {
    let mut attempt = Attempt::new(seq);
    let deadline = attempt.started_at + timings.attempt_timeout;

    let mut stream = match timeout_at(deadline, TcpStream::connect((target, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            attempt.fail(e.to_string());
            return attempt;
        }
        Err(_) => {
            attempt.fail(timed_out_reason(&timings));
            return attempt;
        }
    };
    let connected_at = Instant::now();
    attempt.mark_connected(connected_at);
    debug!(seq, target, port, "connected");

    if !protocol.has_handshake() {
        attempt.succeed(None, None);
        return attempt;
    }

    let ctx = HandshakeContext {
        target,
        port,
        connected_at,
        deadline,
        timings,
    };
    let result = timeout_at(deadline, protocol.handshake(&mut stream, &ctx)).await;
    match result {
        Ok(Ok(reply)) => {
            attempt.succeed(Some(reply.completed_at), reply.detail);
        }
        Ok(Err(e)) => {
            debug!(seq, error = ?e, "handshake failed");
            attempt.fail(e.to_string());
            abort_connection(stream);
        }
        Err(_) => {
            attempt.fail(timed_out_reason(&timings));
            abort_connection(stream);
        }
    }
    attempt
}
