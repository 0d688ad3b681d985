pub mod registry;
pub mod search;
pub mod time_serde;

mod error;

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use serde_json::Value;

pub use error::{Error, Result, SourceFailure, SourceFailureKind};
pub use registry::{SourceRegistry, resolve_endpoint};
use scout_config::Config;
use scout_providers::{
	semantic::{self, SemanticHit, SemanticQuery},
	subgraph::{CollectionQuery, SchemaSnapshot, SubgraphClient, TextSearchQuery},
};
pub use search::{
	AgentSummary, Endpoint, EndpointKind, FeedbackFilters, MetadataFilter, SearchFilters,
	SearchMeta, SearchOptions, SearchRequest, SearchResponse, SemanticFailurePolicy, SemanticMeta,
	SourceTiming,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type ProviderResult<T> = scout_providers::Result<T>;

/// One chain's agent index, spoken to in GraphQL terms.
pub trait AgentSource
where
	Self: Send + Sync,
{
	fn introspect(&self) -> BoxFuture<'_, ProviderResult<SchemaSnapshot>>;

	fn query_collection<'a>(
		&'a self,
		query: &'a CollectionQuery,
	) -> BoxFuture<'a, ProviderResult<Vec<Value>>>;

	fn search_text<'a>(
		&'a self,
		query: &'a TextSearchQuery,
	) -> BoxFuture<'a, ProviderResult<Vec<String>>>;
}

/// Builds the long-lived [`AgentSource`] for a chain once its endpoint is known.
pub trait SourceConnector
where
	Self: Send + Sync,
{
	fn connect(
		&self,
		cfg: &scout_config::Sources,
		chain_id: u64,
		endpoint: &str,
	) -> ProviderResult<Arc<dyn AgentSource>>;
}

pub trait SemanticProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a scout_config::Semantic,
		query: &'a SemanticQuery,
		timeout: Duration,
	) -> BoxFuture<'a, ProviderResult<Vec<SemanticHit>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub semantic: Arc<dyn SemanticProvider>,
	pub sources: Arc<dyn SourceConnector>,
}
impl Providers {
	pub fn new(semantic: Arc<dyn SemanticProvider>, sources: Arc<dyn SourceConnector>) -> Self {
		Self { semantic, sources }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { semantic: provider.clone(), sources: provider }
	}
}

pub struct ScoutService {
	pub cfg: Config,
	pub providers: Providers,
	registry: SourceRegistry,
}
impl ScoutService {
	pub fn new(cfg: Config) -> Self {
		Self::with_providers(cfg, Providers::default())
	}

	pub fn with_providers(cfg: Config, providers: Providers) -> Self {
		Self { cfg, providers, registry: SourceRegistry::default() }
	}
}

struct DefaultProviders;

struct SubgraphSource(SubgraphClient);

impl SemanticProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a scout_config::Semantic,
		query: &'a SemanticQuery,
		timeout: Duration,
	) -> BoxFuture<'a, ProviderResult<Vec<SemanticHit>>> {
		Box::pin(semantic::search(cfg, query, timeout))
	}
}

impl SourceConnector for DefaultProviders {
	fn connect(
		&self,
		cfg: &scout_config::Sources,
		_chain_id: u64,
		endpoint: &str,
	) -> ProviderResult<Arc<dyn AgentSource>> {
		// A key embedded in the gateway path is not repeated as a bearer token.
		let bearer = cfg.api_key.as_deref().filter(|_| !cfg.gateway_url.contains("{api_key}"));
		let headers = scout_providers::auth_headers(bearer, &cfg.default_headers)?;
		let client =
			SubgraphClient::new(endpoint, Duration::from_millis(cfg.timeout_ms), headers)?;

		Ok(Arc::new(SubgraphSource(client)))
	}
}

impl AgentSource for SubgraphSource {
	fn introspect(&self) -> BoxFuture<'_, ProviderResult<SchemaSnapshot>> {
		Box::pin(self.0.introspect())
	}

	fn query_collection<'a>(
		&'a self,
		query: &'a CollectionQuery,
	) -> BoxFuture<'a, ProviderResult<Vec<Value>>> {
		Box::pin(self.0.query_collection(query))
	}

	fn search_text<'a>(
		&'a self,
		query: &'a TextSearchQuery,
	) -> BoxFuture<'a, ProviderResult<Vec<String>>> {
		Box::pin(self.0.search_text(query))
	}
}
