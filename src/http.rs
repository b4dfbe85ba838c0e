//! Transport primitives for token endpoint calls.
//!
//! [`ReqwestHttpClient`] hands out short-lived [`InstrumentedHandle`]s that implement the
//! `oauth2` crate's [`AsyncHttpClient`]. Each handle records the HTTP status and any
//! `Retry-After` hint into a [`ResponseMetadataSlot`] so error mapping can report what the
//! token endpoint actually answered.

// std
use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::{
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::ConfigError};

/// Metadata captured from the most recent token endpoint response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code, if a response arrived.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot shared between a transport handle and the error mapper.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Thin wrapper around [`ReqwestClient`] used for every token endpoint call.
///
/// Token endpoints answer directly, so clients built through [`ReqwestHttpClient::new`] never
/// follow redirects. The per-request timeout bounds how long a code exchange or refresh can
/// hold a caller.
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Builds a client with redirects disabled and the given request timeout.
	pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
		let timeout = timeout.try_into().map_err(ConfigError::http_client_build)?;
		let client = ReqwestClient::builder().redirect(Policy::none()).timeout(timeout).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a handle that records response metadata into `slot`.
	pub fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle(Arc::new(InstrumentedHttpClient { client: self.0.clone(), slot }))
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// [`AsyncHttpClient`] handle returned by [`ReqwestHttpClient::instrumented`].
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = parse_retry_after(&headers, OffsetDateTime::now_utc());

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut mapped = HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*mapped.status_mut() = status;
			*mapped.headers_mut() = headers;

			Ok(mapped)
		})
	}
}

fn parse_retry_after(headers: &HeaderMap, now: OffsetDateTime) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(secs.into()));
	}

	let delta = OffsetDateTime::parse(raw, &Rfc2822).ok()? - now;

	delta.is_positive().then_some(delta)
}
