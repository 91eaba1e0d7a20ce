// crates.io
use tracing::{Instrument, Span, field, instrument::Instrumented, span::EnteredSpan};
// self
use crate::{_prelude::*, obs::FlowKind};

/// Future wrapped in a flow span.
pub type InstrumentedFlow<F> = Instrumented<F>;

/// `tpp_broker.flow` span for one refresh, traversal, or callback.
///
/// The `tenant` field starts empty and is filled by [`FlowSpan::with_tenant`]; it only ever
/// holds the non-secret tenant label, never a cache key.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	span: Span,
}
impl FlowSpan {
	/// Opens a span tagged with `kind` and the calling `stage`.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		let span = tracing::info_span!(
			"tpp_broker.flow",
			flow = kind.as_str(),
			stage,
			tenant = field::Empty
		);

		Self { span }
	}

	/// Records the tenant the flow runs for.
	pub fn with_tenant(self, tenant: Option<&str>) -> Self {
		if let Some(tenant) = tenant {
			self.span.record("tenant", tenant);
		}

		self
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> FlowSpanGuard {
		FlowSpanGuard { _guard: self.span.entered() }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}

/// Guard returned by [`FlowSpan::entered`].
pub struct FlowSpanGuard {
	_guard: EnteredSpan,
}
impl Debug for FlowSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("FlowSpanGuard(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::{FlowKind, FlowSpan};

	#[test]
	fn callback_guards_print_opaquely() {
		let guard = FlowSpan::new(FlowKind::Callback, "callback_guards_print_opaquely")
			.with_tenant(Some("wxcorp"))
			.entered();

		assert_eq!(format!("{guard:?}"), "FlowSpanGuard(..)");
	}

	#[tokio::test]
	async fn refresh_spans_pass_the_output_through() {
		let span = FlowSpan::new(FlowKind::Refresh, "refresh_spans_pass_the_output_through")
			.with_tenant(None);
		let token = span.instrument(async { "TOKEN" }).await;

		assert_eq!(token, "TOKEN");
	}
}
