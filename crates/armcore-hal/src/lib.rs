//! `armcore-hal` – Hardware Abstraction Layer.
//!
//! # Modules
//!
//! - [`adapter`] – [`HardwareAdapter`][adapter::HardwareAdapter], the
//!   capability set every physical arm driver implements, and
//!   [`DetectionSource`][adapter::DetectionSource] for vision collaborators.
//! - [`retry`] – [`poll_status`][retry::poll_status]: bounded, backed-off
//!   retries for status queries only.  Motion commands are never retried.
//! - [`sim`] – [`SimArm`][sim::SimArm] and
//!   [`SimMarkerCamera`][sim::SimMarkerCamera], drop-in simulation drivers
//!   with failure injection for tests and dry runs.

pub mod adapter;
pub mod retry;
pub mod sim;

pub use adapter::{DetectionSource, HardwareAdapter};
pub use retry::{RetryPolicy, poll_status};
pub use sim::{SimArm, SimArmConfig, SimMarkerCamera};
