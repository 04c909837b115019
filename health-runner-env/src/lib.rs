//! Small free functions reading individual, well-known environment
//! variables. Nothing here interprets or validates values beyond basic
//! parsing; that is `health-runner-config`'s job. Kept separate so the
//! rest of the workspace never reaches for `std::env` directly.

use std::env;

#[must_use]
pub fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

#[must_use]
pub fn var_bool(key: &str) -> bool {
    var(key).is_some_and(|value| value.eq_ignore_ascii_case("true") || value == "1")
}

#[must_use]
pub fn var_u64(key: &str) -> Option<u64> {
    var(key).and_then(|value| value.parse::<u64>().ok())
}

#[must_use]
pub fn var_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    var(key).and_then(|value| value.parse::<T>().ok())
}

/// In slow CI environments the poll cadence and deadlines are doubled, the
/// same knob the teacher framework exposes for its own timeouts.
#[must_use]
pub fn slow_test_env() -> bool {
    var_bool("SLOW_TEST_ENV")
}
