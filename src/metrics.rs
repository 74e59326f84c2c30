use anyhow::Result;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use warp::Filter;

use crate::prober::attempt::as_ms;
use crate::prober::{Attempt, Outcome};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static SOCKET_LATENCY: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new(
        "tcping_socket_latency_milliseconds",
        "Connect latency of the last successful attempt in milliseconds",
    );
    let gauge = GaugeVec::new(opts, &["target", "protocol"]).expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("socket latency gauge registered once");
    gauge
});

static HANDSHAKE_LATENCY: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new(
        "tcping_handshake_latency_milliseconds",
        "Handshake latency of the last successful attempt in milliseconds",
    );
    let gauge = GaugeVec::new(opts, &["target", "protocol"]).expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("handshake latency gauge registered once");
    gauge
});

static ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("tcping_attempts_total", "Total number of probe attempts by outcome");
    let ctr = IntCounterVec::new(opts, &["target", "protocol", "outcome"]).expect("valid counter definition");
    REGISTRY
        .register(Box::new(ctr.clone()))
        .expect("attempt counter registered once");
    ctr
});

// Only present when latency history is enabled.
static LATENCY_HIST: OnceCell<HistogramVec> = OnceCell::new();

pub fn initialize_metrics(enable_latency_history: bool) -> Result<()> {
    Lazy::force(&SOCKET_LATENCY);
    Lazy::force(&HANDSHAKE_LATENCY);
    Lazy::force(&ATTEMPTS);

    if enable_latency_history && LATENCY_HIST.get().is_none() {
        let hist = HistogramVec::new(
            HistogramOpts::new("tcping_socket_latency_ms_history", "Connect latency in milliseconds")
                .buckets(vec![
                    0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
                ]),
            &["target", "protocol"],
        )?;
        REGISTRY.register(Box::new(hist.clone()))?;
        let _ = LATENCY_HIST.set(hist);
    }
    Ok(())
}

pub async fn serve_metrics(addr: SocketAddr) {
    let metrics_route = warp::path!("metrics").map(move || {
        let encoder = TextEncoder::new();
        let mf = REGISTRY.gather();
        let mut buf = Vec::new();
        let status = match encoder.encode(&mf, &mut buf) {
            Ok(()) => warp::http::StatusCode::OK,
            Err(e) => {
                tracing::error!("encoding metrics failed: {:?}", e);
                buf.clear();
                warp::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        warp::reply::with_status(
            warp::reply::with_header(buf, "Content-Type", encoder.format_type().to_string()),
            status,
        )
    });

    tracing::info!("serving metrics on http://{}/metrics", addr);
    warp::serve(metrics_route).run(addr).await;
}

pub fn observe_attempt(target: &str, protocol: &str, attempt: &Attempt) {
    match attempt.outcome() {
        Outcome::Succeeded {
            socket_latency,
            handshake_latency,
            ..
        } => {
            let socket_ms = as_ms(*socket_latency);
            SOCKET_LATENCY.with_label_values(&[target, protocol]).set(socket_ms);
            if let Some(hs) = handshake_latency {
                HANDSHAKE_LATENCY
                    .with_label_values(&[target, protocol])
                    .set(as_ms(*hs));
            }
            if let Some(hist) = LATENCY_HIST.get() {
                hist.with_label_values(&[target, protocol]).observe(socket_ms);
            }
            ATTEMPTS.with_label_values(&[target, protocol, "success"]).inc();
        }
        Outcome::Failed { .. } => {
            ATTEMPTS.with_label_values(&[target, protocol, "failure"]).inc();
        }
        Outcome::Pending => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, Instant};

    #[test]
    fn counts_outcomes_per_target() {
        initialize_metrics(true).unwrap();

        let start = Instant::now();
        let mut ok = Attempt::starting_at(1, start);
        ok.mark_connected(start + Duration::from_millis(4));
        ok.succeed(None, None);
        let mut bad = Attempt::new(2);
        bad.fail("refused");

        observe_attempt("metrics-test", "basic", &ok);
        observe_attempt("metrics-test", "basic", &bad);
        observe_attempt("metrics-test", "basic", &bad);

        let failures = ATTEMPTS.with_label_values(&["metrics-test", "basic", "failure"]).get();
        let successes = ATTEMPTS.with_label_values(&["metrics-test", "basic", "success"]).get();
        assert_eq!((successes, failures), (1, 2));
        let last = SOCKET_LATENCY.with_label_values(&["metrics-test", "basic"]).get();
        assert!((last - 4.0).abs() < 1e-9);

        let mut text = Vec::new();
        TextEncoder::new().encode(&REGISTRY.gather(), &mut text).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("tcping_attempts_total"));
        assert!(text.contains("tcping_socket_latency_ms_history_bucket"));
    }
}
