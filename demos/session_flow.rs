//! Walks one OAuth session end to end against a local mock token endpoint: start the
//! authorization, redeem the callback, import a document through the rate-limited connector
//! gateway using the session's token, summarize it with the mock provider, and print the
//! Prometheus exposition.

// std
use std::{collections::HashMap, sync::Arc};
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use homer_gateway::{
	config::GatewayConfig,
	connector::{
		ConnectorError, ConnectorFuture, ConnectorGateway, Document, DocumentConnector,
		ExportRequest, ImportRequest,
	},
	flows::{CallbackParams, CredentialResolver, OAuthFlowManager},
	http::ReqwestHttpClient,
	llm::{SummarizeRequest, mock::MockProvider, observed::ObservedProvider},
	obs::MetricsRegistry,
	reqwest::Client,
	resilience::{CallContext, RateLimiter, RetryPolicy},
	store::{MemoryStore, StateStore, TokenStore},
};

/// Serves a canned document once a credential resolves for the request.
struct DemoConnector {
	credentials: CredentialResolver,
}
impl DocumentConnector for DemoConnector {
	fn name(&self) -> &str {
		"demo"
	}

	fn import_document<'a>(&'a self, request: &'a ImportRequest) -> ConnectorFuture<'a, Document> {
		Box::pin(async move {
			let session_key = request.session_key.as_ref().map(|key| key.as_str());
			let source = self
				.credentials
				.token_source(session_key)
				.await
				.map_err(|_| ConnectorError::Unauthorized)?;
			let token = source.token().await.map_err(|_| ConnectorError::Unauthorized)?;

			Ok(Document {
				id: request.document_id.clone(),
				title: "Quarterly notes".into(),
				content: format!("Fetched with a {} credential.", token.token_type),
			})
		})
	}

	fn export_content<'a>(&'a self, _: &'a ExportRequest) -> ConnectorFuture<'a, ()> {
		Box::pin(async { Err(ConnectorError::NotImplemented) })
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(
				r#"{"access_token":"demo-access","refresh_token":"demo-refresh","expires_in":3600}"#,
			);
		})
		.await;
	let env = HashMap::from([
		("GOOGLE_OAUTH_CLIENT_ID", "demo-client".to_owned()),
		("GOOGLE_OAUTH_CLIENT_SECRET", "demo-secret".to_owned()),
		("GOOGLE_OAUTH_REDIRECT_URL", "http://localhost:8080/callback".to_owned()),
		("GOOGLE_OAUTH_AUTH_URL", server.url("/auth")),
		("GOOGLE_OAUTH_TOKEN_URL", server.url("/token")),
		("CONNECTOR_RATE_LIMIT_PER_MINUTE", "2".to_owned()),
	]);
	let config = GatewayConfig::from_lookup(|name| env.get(name).cloned())?;
	let store = Arc::new(MemoryStore::default());
	let states: Arc<dyn StateStore> = store.clone();
	let tokens: Arc<dyn TokenStore> = store;
	// The mock token endpoint serves a self-signed certificate.
	let http_client = ReqwestHttpClient::with_client(
		Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	);
	let manager = Arc::new(
		OAuthFlowManager::from_config(&config, states, tokens)?.with_http_client(http_client),
	);
	let start = manager.start_auth().await?;

	println!("Redirect the user to {}.", start.authorization_url);

	let state = start
		.authorization_url
		.query_pairs()
		.find(|(key, _)| key == "state")
		.map(|(_, value)| value.into_owned())
		.unwrap_or_default();
	let callback = manager
		.handle_callback(CallbackParams {
			state: Some(state),
			code: Some("demo-code".into()),
			..Default::default()
		})
		.await?;

	token_mock.assert_async().await;

	println!("Session {} is connected.", callback.session_key);

	let metrics = Arc::new(MetricsRegistry::new());
	let retry = RetryPolicy::from_settings(&config.retry);
	let connector = DemoConnector {
		credentials: CredentialResolver::new(
			Some(manager.clone()),
			config.static_access_token.clone(),
		),
	};
	let gateway = ConnectorGateway::new(
		Arc::new(connector),
		Arc::new(RateLimiter::per_minute(config.connector_rate_limit_per_minute)),
		metrics.clone(),
	)
	.with_retry_policy(retry);
	let provider =
		ObservedProvider::new(Arc::new(MockProvider), metrics.clone()).with_retry_policy(retry);
	let ctx = CallContext::new();
	let document = gateway
		.import_document(
			&ctx,
			ImportRequest::new("doc-1").with_session_key(callback.session_key.clone()),
		)
		.await?;
	let summary = provider
		.summarize(
			&ctx,
			&SummarizeRequest {
				documents: vec![document],
				style: "brief".into(),
				..Default::default()
			},
		)
		.await?;

	println!("{summary}");

	for document_id in ["doc-2", "doc-3"] {
		if let Err(err) = gateway.import_document(&ctx, ImportRequest::new(document_id)).await {
			println!("Import of {document_id} rejected: {} ({}).", err.code(), err.http_status());
		}
	}

	print!("{}", metrics.render());

	Ok(())
}
