// crates.io
use tracing::{Instrument, Span, instrument::Instrumented};
// self
use crate::{_prelude::*, obs::Component};

/// A span builder used around upstream calls.
#[derive(Clone, Debug)]
pub struct CallSpan {
	span: Span,
}
impl CallSpan {
	/// Creates a new span tagged with the provided component and operation.
	pub fn new(component: Component, operation: &str) -> Self {
		let span =
			tracing::info_span!("homer_gateway.call", component = component.as_str(), operation);

		Self { span }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}
