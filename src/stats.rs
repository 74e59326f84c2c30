use std::fmt;
use std::time::Duration;

use crate::prober::attempt::as_ms;
use crate::prober::{Attempt, Outcome, Protocol};

/// Running totals over every attempt of a run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Statistics {
    total: u64,
    successful: u64,
    failed: u64,
    socket_latency_sum: Duration,
    handshake_latency_sum: Duration,
    min_socket_latency: Option<Duration>,
    max_socket_latency: Option<Duration>,
}

impl Statistics {
    /// Counts a dispatched attempt; its outcome is folded in by `record`.
    pub fn begin_attempt(&mut self) {
        self.total += 1;
    }

    pub fn record(&mut self, attempt: &Attempt) {
        match attempt.outcome() {
            Outcome::Succeeded {
                socket_latency,
                handshake_latency,
                ..
            } => {
                self.successful += 1;
                self.socket_latency_sum += *socket_latency;
                if let Some(hs) = handshake_latency {
                    self.handshake_latency_sum += *hs;
                }
                self.min_socket_latency = Some(
                    self.min_socket_latency
                        .map_or(*socket_latency, |min| min.min(*socket_latency)),
                );
                self.max_socket_latency = Some(
                    self.max_socket_latency
                        .map_or(*socket_latency, |max| max.max(*socket_latency)),
                );
            }
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Pending => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn successful(&self) -> u64 {
        self.successful
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn min_socket_latency(&self) -> Option<Duration> {
        self.min_socket_latency
    }

    pub fn max_socket_latency(&self) -> Option<Duration> {
        self.max_socket_latency
    }

    /// Percentage of attempts that succeeded; `None` before the first attempt.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.successful as f64 / self.total as f64 * 100.0)
    }

    pub fn success_rate_text(&self) -> String {
        self.success_rate()
            .map_or_else(|| "n/a".to_string(), |rate| format!("{:.2}%", rate))
    }

    pub fn avg_socket_latency(&self) -> Option<Duration> {
        self.average(self.socket_latency_sum)
    }

    pub fn avg_handshake_latency(&self) -> Option<Duration> {
        self.average(self.handshake_latency_sum)
    }

    fn average(&self, sum: Duration) -> Option<Duration> {
        u32::try_from(self.successful)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| sum / n)
    }

    pub fn summary<'a>(&'a self, target: &'a str, port: u16, protocol: Protocol) -> Summary<'a> {
        Summary {
            stats: self,
            target,
            port,
            protocol,
        }
    }
}

/// Display adapter for the end-of-run report.
pub struct Summary<'a> {
    stats: &'a Statistics,
    target: &'a str,
    port: u16,
    protocol: Protocol,
}

fn ms_or_na(d: Option<Duration>) -> String {
    d.map_or_else(|| "n/a".to_string(), |d| format!("{:.2}ms", as_ms(d)))
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats;
        writeln!(
            f,
            "--- {}:{} tcping statistics ({}) ---",
            self.target, self.port, self.protocol
        )?;
        writeln!(
            f,
            "{} attempts, {} successful, {} failed ({} success)",
            s.total,
            s.successful,
            s.failed,
            s.success_rate_text()
        )?;
        write!(
            f,
            "socket latency: avg {}, min {}, max {}",
            ms_or_na(s.avg_socket_latency()),
            ms_or_na(s.min_socket_latency()),
            ms_or_na(s.max_socket_latency())
        )?;
        if self.protocol.has_handshake() {
            write!(f, "\nhandshake latency: avg {}", ms_or_na(s.avg_handshake_latency()))?;
        }
        Ok(())
    }
}
