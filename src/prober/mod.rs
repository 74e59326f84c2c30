use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::config::Timings;
use crate::stats::Statistics;
use crate::varint::VarIntError;

pub mod attempt;
mod debounce;
pub mod fivem;
pub mod http;
pub mod mc_legacy;
pub mod mc_modern;
pub mod ssh;

pub use attempt::{Attempt, Outcome};

/// Protocol emulations the prober can run after the TCP connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Basic,
    FiveM,
    McLegacy,
    McModern,
    Ssh,
    Http,
}

/// Static metadata shown to the operator for a protocol.
#[derive(Debug, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Error)]
#[error("Unknown protocol: \"{}\"\nAvailable protocols:\n{}", .input, Protocol::listing())]
pub struct UnknownProtocol {
    pub input: String,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Basic,
        Protocol::FiveM,
        Protocol::McLegacy,
        Protocol::McModern,
        Protocol::Ssh,
        Protocol::Http,
    ];

    pub fn descriptor(self) -> &'static ProtocolDescriptor {
        match self {
            Protocol::Basic => &ProtocolDescriptor {
                name: "basic",
                description: "Basic TCP connection",
            },
            Protocol::FiveM => &ProtocolDescriptor {
                name: "FiveM",
                description: "FiveM handshake & info",
            },
            Protocol::McLegacy => &ProtocolDescriptor {
                name: "MCv1",
                description: "MC legacy ping (0xFE)",
            },
            Protocol::McModern => &ProtocolDescriptor {
                name: "MCv2",
                description: "MC handshake & status",
            },
            Protocol::Ssh => &ProtocolDescriptor {
                name: "SSH",
                description: "SSH banner read",
            },
            Protocol::Http => &ProtocolDescriptor {
                name: "HTTP",
                description: "HTTP minimal GET request",
            },
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Case-insensitive lookup; no input selects `Basic`.
    pub fn lookup(input: Option<&str>) -> Result<Protocol, UnknownProtocol> {
        let Some(input) = input else {
            return Ok(Protocol::Basic);
        };
        Protocol::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(input))
            .ok_or_else(|| UnknownProtocol {
                input: input.to_string(),
            })
    }

    /// One `- name : description` line per protocol.
    pub fn listing() -> String {
        Protocol::ALL
            .iter()
            .map(|p| format!("- {} : {}", p.name(), p.descriptor().description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Basic treats the established connection itself as the answer.
    pub fn has_handshake(self) -> bool {
        self != Protocol::Basic
    }

    pub async fn handshake<S>(
        self,
        stream: &mut S,
        ctx: &HandshakeContext<'_>,
    ) -> Result<HandshakeReply, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(protocol = self.name(), "starting handshake");
        match self {
            Protocol::Basic => Ok(HandshakeReply::now(None)),
            Protocol::FiveM => fivem::handshake(stream, ctx).await,
            Protocol::McLegacy => mc_legacy::handshake(stream, ctx).await,
            Protocol::McModern => mc_modern::handshake(stream, ctx).await,
            Protocol::Ssh => ssh::handshake(stream, ctx).await,
            Protocol::Http => http::handshake(stream, ctx).await,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a handshake knows about the connection it runs on.
#[derive(Debug, Clone)]
pub struct HandshakeContext<'a> {
    pub target: &'a str,
    pub port: u16,
    pub connected_at: Instant,
    /// Absolute end of the enclosing attempt.
    pub deadline: Instant,
    pub timings: Timings,
}

impl HandshakeContext<'_> {
    /// Non-resettable deadline for the first response byte. `None` when it
    /// would not fire before the attempt deadline, which then governs.
    pub fn first_byte_deadline(&self) -> Option<Instant> {
        let deadline = self.connected_at + self.timings.handshake_timeout;
        (deadline < self.deadline).then_some(deadline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    /// When the completion signal was observed.
    pub completed_at: Instant,
    /// Short operator-facing summary of what the peer answered.
    pub detail: Option<String>,
}

impl HandshakeReply {
    pub fn now(detail: Option<String>) -> Self {
        Self {
            completed_at: Instant::now(),
            detail,
        }
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no response within {}ms", .0.as_millis())]
    NoResponse(Duration),
    #[error("connection closed by peer before any response")]
    ClosedEarly,
    #[error("connection closed by peer before the banner was complete")]
    Incomplete,
    #[error("banner exceeded {0} bytes without a line ending")]
    Oversized(usize),
    #[error(transparent)]
    VarInt(#[from] VarIntError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runs attempts for one target and folds them into the run's statistics.
pub struct Prober {
    target: String,
    port: u16,
    protocol: Protocol,
    timings: Timings,
    stats: Statistics,
    next_seq: u64,
}

impl Prober {
    pub fn new(target: impl Into<String>, port: u16, protocol: Protocol, timings: Timings) -> Self {
        Self {
            target: target.into(),
            port,
            protocol,
            timings,
            stats: Statistics::default(),
            next_seq: 1,
        }
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// One full cycle: run the attempt, record it, print its line.
    pub async fn probe_once(&mut self) -> Attempt {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.begin_attempt();

        let attempt =
            attempt::run_attempt(seq, &self.target, self.port, self.protocol, self.timings).await;

        self.stats.record(&attempt);
        crate::metrics::observe_attempt(&self.target, self.protocol.name(), &attempt);
        println!("{}", attempt.report_line(&self.target, self.port, self.protocol));
        attempt
    }
}
