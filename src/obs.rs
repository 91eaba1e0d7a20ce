//! Observability helpers for broker flows.
//!
//! Every refresh, ticket, traversal, and callback flow runs inside a `tracing` span named
//! `tpp_broker.flow` carrying the `flow` kind and `stage` (call site) fields.
//!
//! # Feature Flags
//!
//! - Enable `metrics` to increment the `tpp_broker_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Access token or app access token refresh.
	Refresh,
	/// JS-API ticket refresh.
	Ticket,
	/// Multi-page traversal.
	Traversal,
	/// Inbound callback verification.
	Callback,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Refresh => "refresh",
			FlowKind::Ticket => "ticket",
			FlowKind::Traversal => "traversal",
			FlowKind::Callback => "callback",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a broker helper.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records the outcome of `result` for `kind` and hands it back unchanged.
pub fn observe<T, E>(kind: FlowKind, result: Result<T, E>) -> Result<T, E> {
	record_flow_outcome(
		kind,
		if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure },
	);

	result
}
