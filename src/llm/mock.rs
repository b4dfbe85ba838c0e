//! Offline [`LlmProvider`] returning deterministic echo-style output.

// self
use crate::{
	_prelude::*,
	llm::{LlmProvider, ProviderFuture, RewriteRequest, SummarizeRequest},
};

/// Offline provider producing deterministic, echo-style output.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockProvider;
impl LlmProvider for MockProvider {
	fn name(&self) -> &str {
		"mock"
	}

	fn summarize<'a>(&'a self, request: &'a SummarizeRequest) -> ProviderFuture<'a> {
		let body = request
			.documents
			.iter()
			.map(|doc| doc.content.trim())
			.collect::<Vec<_>>()
			.join(" ");
		let body = match body.trim() {
			"" => "No document content provided.",
			body => body,
		};
		let output = format!(
			"[mock summary:{}] {body}{}",
			request.style,
			instructions_suffix(&request.instructions)
		);

		Box::pin(async move { Ok(output) })
	}

	fn rewrite<'a>(&'a self, request: &'a RewriteRequest) -> ProviderFuture<'a> {
		let text = match request.text.trim() {
			"" => "No text provided.",
			text => text,
		};
		let output = format!(
			"[mock rewrite:{}] {text}{}",
			request.mode,
			instructions_suffix(&request.instructions)
		);

		Box::pin(async move { Ok(output) })
	}
}

fn instructions_suffix(instructions: &str) -> String {
	if instructions.is_empty() { String::new() } else { format!(" (instructions: {instructions})") }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::connector::Document;

	fn document(content: &str) -> Document {
		Document { id: "doc".into(), title: "Doc".into(), content: content.into() }
	}

	#[tokio::test]
	async fn summary_joins_trimmed_documents() {
		let request = SummarizeRequest {
			documents: vec![document("  First. "), document("Second.\n")],
			style: "brief".into(),
			instructions: String::new(),
		};
		let output = MockProvider.summarize(&request).await.expect("Mock never fails.");

		assert_eq!(output, "[mock summary:brief] First. Second.");
	}

	#[tokio::test]
	async fn summary_without_content_uses_placeholder() {
		let request = SummarizeRequest {
			documents: vec![document("   ")],
			style: "detailed".into(),
			instructions: "use bullets".into(),
		};
		let output = MockProvider.summarize(&request).await.expect("Mock never fails.");

		assert_eq!(
			output,
			"[mock summary:detailed] No document content provided. (instructions: use bullets)"
		);
	}

	#[tokio::test]
	async fn rewrite_echoes_mode_and_text() {
		let request = RewriteRequest {
			text: "  hello there ".into(),
			mode: "formal".into(),
			instructions: String::new(),
		};

		assert_eq!(
			MockProvider.rewrite(&request).await.expect("Mock never fails."),
			"[mock rewrite:formal] hello there"
		);

		let empty = RewriteRequest { text: " ".into(), mode: "concise".into(), ..request };

		assert_eq!(
			MockProvider.rewrite(&empty).await.expect("Mock never fails."),
			"[mock rewrite:concise] No text provided."
		);
	}
}
