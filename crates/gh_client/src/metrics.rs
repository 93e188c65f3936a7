use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gh_client_requests_total",
        "GitHub requests by endpoint, kind, and status class",
        &["endpoint", "kind", "status"]
    )
    .expect("requests total")
});

pub static RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gh_client_retries_total",
        "Retries by endpoint and reason",
        &["endpoint", "reason"]
    )
    .expect("retries")
});

pub static RATE_LIMITED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gh_client_rate_limited_total",
        "Responses rejected by GitHub rate limiting",
        &["endpoint"]
    )
    .expect("rate limited")
});

pub static LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gh_client_latency_seconds",
        "Request latency per endpoint",
        &["endpoint"]
    )
    .expect("latency")
});
