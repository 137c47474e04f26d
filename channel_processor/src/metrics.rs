use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

pub const OBSERVATIONS_PROCESSED: &str = "gateway_observations_processed_total";
pub const OBSERVATION_DURATION_MS: &str = "gateway_observation_duration_ms";

/// Registers metric descriptions with the installed recorder. Call once
/// after the recorder is installed.
pub fn describe() {
    describe_counter!(
        OBSERVATIONS_PROCESSED,
        "Total number of gateway frequency observations processed"
    );
    describe_histogram!(
        OBSERVATION_DURATION_MS,
        Unit::Milliseconds,
        "How long the resolve/resolve/record sequence of one observation took"
    );
}

pub fn record_observation_processed() {
    counter!(OBSERVATIONS_PROCESSED).increment(1);
}

pub fn record_observation_duration(elapsed: Duration) {
    histogram!(OBSERVATION_DURATION_MS).record(elapsed.as_secs_f64() * 1000.0);
}
