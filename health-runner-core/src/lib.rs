//! Topology model, pair planner, performance runner, verdict resolver,
//! results model, and the capability traits the k8s adapter and driver
//! binary build on.

pub mod job;
pub mod labels;
pub mod performance;
pub mod planner;
pub mod resolver;
pub mod results;
pub mod topology;
pub mod traits;
pub mod verdict;

use std::{ops::Mul as _, sync::LazyLock, time::Duration};

static SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(health_runner_env::slow_test_env);

/// Doubles a timeout in slow test environments (CI runners, emulated
/// clusters) so deadline-bounded tests don't flake under load.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *SLOW_TEST_ENV { d.mul(2) } else { d }
}
