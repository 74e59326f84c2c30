use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;

use crate::prober::Prober;

/// Paces attempts strictly one after another: the delay starts when an
/// attempt terminates, so slow attempts lower the overall rate.
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Runs until the surrounding future is dropped.
    pub async fn run(&self, prober: &mut Prober) -> Result<()> {
        loop {
            self.tick(prober).await;
        }
    }

    async fn tick(&self, prober: &mut Prober) {
        let attempt = prober.probe_once().await;
        tracing::trace!(
            seq = attempt.seq,
            success = attempt.is_success(),
            "attempt finished, sleeping {:?}",
            self.interval
        );
        sleep(self.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timings;
    use crate::prober::Protocol;
    use tokio::net::TcpListener;
    use tokio::time::{Instant, timeout};

    #[tokio::test]
    async fn attempts_are_serial_and_spaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let timings = Timings {
            interval: Duration::from_millis(100),
            ..Timings::default()
        };
        let mut prober = Prober::new("127.0.0.1", port, Protocol::Basic, timings);
        let scheduler = Scheduler::new(timings.interval);

        let started = Instant::now();
        let _ = timeout(Duration::from_millis(350), scheduler.run(&mut prober)).await;

        // Attempts start at ~0, ~100, ~200 and ~300ms.
        let stats = prober.statistics();
        assert!(stats.total() >= 2 && stats.total() <= 4, "total = {}", stats.total());
        assert!(stats.successful() + stats.failed() <= stats.total());
        assert!(started.elapsed() >= Duration::from_millis(350));
    }
}
