/*! Integration tests for Keywarden.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - detection: Tests for the incident detection engine and baselines
 * - orchestrator: Tests for the emergency response state machine
 * - protocol: Tests for the cross-device commit-reveal rotation protocol
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("keywarden=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod detection;
mod helpers;
mod protocol;
