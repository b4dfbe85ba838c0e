//! LLM provider contract, the deterministic mock backend, and the observed wrapper that adds
//! retries, metrics, and call logging.

pub mod mock;
pub mod observed;

pub use mock::MockProvider;
pub use observed::ObservedProvider;

// self
use crate::{_prelude::*, connector::Document, resilience::UpstreamError};

/// Future returned by every [`LlmProvider`] operation.
pub type ProviderFuture<'a> =
	Pin<Box<dyn Future<Output = Result<String, UpstreamError>> + 'a + Send>>;

/// Summarization input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SummarizeRequest {
	/// Documents to summarize, in order.
	pub documents: Vec<Document>,
	/// Requested summary style (`brief`, `detailed`, ...).
	pub style: String,
	/// Extra caller instructions; empty when absent.
	pub instructions: String,
}

/// Rewrite input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewriteRequest {
	/// Text to rewrite.
	pub text: String,
	/// Rewrite mode (`formal`, `concise`, ...).
	pub mode: String,
	/// Extra caller instructions; empty when absent.
	pub instructions: String,
}

/// Hosted model that can summarize and rewrite text.
///
/// Implementations perform a single attempt per call; [`ObservedProvider`] owns retries.
pub trait LlmProvider
where
	Self: Send + Sync,
{
	/// Stable provider name used in metrics and logs.
	fn name(&self) -> &str;

	/// Summarizes the provided documents.
	fn summarize<'a>(&'a self, request: &'a SummarizeRequest) -> ProviderFuture<'a>;

	/// Rewrites the provided text.
	fn rewrite<'a>(&'a self, request: &'a RewriteRequest) -> ProviderFuture<'a>;
}
