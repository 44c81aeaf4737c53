//! Shared transports and poll settings for behavioural tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared helpers under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/harness.rs"]
//! mod harness;
//! ```

use std::time::Duration;

use cinder_functional::lifecycle::PollPolicy;
use cinder_functional::test_support::{FakeCinder, FakeCinderCli, fake_credentials};
use cinder_functional::transport::{ApiTransport, CliTransport};

/// Short deadline and pause so fakes settle quickly.
pub const FAST_POLICY: PollPolicy =
    PollPolicy::new(Duration::from_millis(250), Duration::from_millis(1));

/// Client-driven transport over the shared fake service.
pub fn cli_transport(service: &FakeCinder) -> CliTransport<FakeCinderCli> {
    CliTransport::new(
        FakeCinderCli::new(service.clone()),
        "cinder",
        &fake_credentials(),
    )
    .expect("fake credentials are complete")
}

/// API-driven transport over the shared fake service.
pub fn api_transport(service: &FakeCinder) -> ApiTransport<FakeCinder> {
    ApiTransport::new(service.clone())
}
