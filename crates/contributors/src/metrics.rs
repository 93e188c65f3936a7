use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

pub static RUNS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "contributors_runs_total",
        "Total number of contributor backfill runs attempted"
    )
    .expect("contributors runs total")
});

pub static LAST_RUN_TIMESTAMP: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "contributors_last_run_timestamp_seconds",
        "Unix timestamp when the backfill run last started"
    )
    .expect("contributors last run timestamp")
});

pub static ACTIVE_DOCS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "contributors_active_docs",
        "Number of docs currently being aggregated"
    )
    .expect("contributors active docs gauge")
});

pub static DOCS_PROCESSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "contributors_docs_processed_total",
        "Docs processed by the backfill grouped by outcome",
        &["outcome"]
    )
    .expect("contributors docs processed")
});

pub static COMMITS_SKIPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "contributors_commits_skipped_total",
        "Commits ignored because they are not linked to a GitHub account"
    )
    .expect("contributors commits skipped")
});

pub static RUN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "contributors_run_duration_seconds",
        "Duration of backfill runs in seconds",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    )
    .expect("contributors run duration histogram")
});

pub static DOC_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "contributors_doc_duration_seconds",
        "Duration spent aggregating one doc grouped by outcome",
        &["outcome"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("contributors doc duration histogram")
});

pub struct ActiveDocGuard;

impl Default for ActiveDocGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveDocGuard {
    pub fn new() -> Self {
        ACTIVE_DOCS.inc();
        Self
    }
}

impl Drop for ActiveDocGuard {
    fn drop(&mut self) {
        ACTIVE_DOCS.dec();
    }
}
