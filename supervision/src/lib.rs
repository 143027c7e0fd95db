//! OpenVPN reachability probe core.
//!
//! This library runs one bounded connection attempt against a profile and
//! turns what the client printed into a failure category:
//! - [`ConnectionAttempt`]: spawn the client, watch its output for a success
//!   marker under a deadline, shut it down, return a [`RawAttempt`]
//! - [`ShutdownSequencer`]: interrupt, terminate, kill, with grace windows
//! - [`classifier`]: pick the relevant log lines and name the failure
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use supervision::{AttemptOutcome, ConnectionAttempt, EndpointConfig, OpenVpnLauncher};
//!
//! let attempt = ConnectionAttempt::new(OpenVpnLauncher::default());
//! let config = EndpointConfig::from_path("./ovpn/office.ovpn");
//! let raw = attempt.try_connect(&config, Duration::from_secs(90)).await;
//! let outcome = AttemptOutcome::from_attempt(raw, 10);
//! ```

pub mod attempt;
pub mod buffer;
pub mod classifier;
pub mod error;
pub mod outcome;
pub mod process;
pub mod shutdown;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use attempt::{has_success_marker, ConnectionAttempt, POLL_INTERVAL, SUCCESS_MARKERS};
pub use buffer::OutputBuffer;
pub use classifier::{classify_error, extract_relevant};
pub use error::{ProbeError, ProbeResult};
pub use outcome::{AttemptOutcome, EndpointConfig, RawAttempt};
pub use process::{ClientExit, ClientLauncher, ClientProcess, OpenVpnLauncher, SignalLevel};
pub use shutdown::{ShutdownOutcome, ShutdownSequencer};
