//! Errors raised while describing the root bridges.

use thiserror::Error;

use crate::platform::ControllerKind;

/// Failure reported by the hardware bring-up of a single controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum HostInitError {
	#[error("link did not come up")]
	LinkDown,
	#[error("timed out waiting for the controller")]
	Timeout,
	#[error("{0}")]
	Other(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
	#[error("failed to initialize PCIe {kind}")]
	HardwareInit {
		kind: ControllerKind,
		#[source]
		source: HostInitError,
	},
	#[error("PCIe {first} and {second} share segment {segment}")]
	DuplicateSegment {
		segment: u32,
		first: ControllerKind,
		second: ControllerKind,
	},
	#[error("invalid {0}")]
	InvalidWindow(&'static str),
	#[error("PCIe {kind} configured with {lanes} lanes")]
	InvalidLaneCount { kind: ControllerKind, lanes: u32 },
}
