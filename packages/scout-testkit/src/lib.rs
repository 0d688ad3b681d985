mod error;
mod fixture;
mod memory;
mod schema;

pub use error::{Error, Result};
pub use fixture::{AgentFixture, FeedbackFixture};
pub use memory::{Fault, LoggedQuery, MemorySubgraph, MemorySubgraphBuilder, matches};
pub use schema::{EntityShape, SchemaProfile};

use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		Arc, Mutex,
		atomic::{AtomicU32, Ordering},
	},
	time::Duration,
};

use scout_config::{Config, Retry, Search, Semantic, Service, Sources};
use scout_providers::semantic::{SemanticHit, SemanticQuery};
use scout_service::{
	AgentSource, BoxFuture, ProviderResult, Providers, ScoutService, SemanticProvider,
	SourceConnector,
};
use serde_json::Map;

pub const MEMORY_ENDPOINT_PREFIX: &str = "http://memory.invalid/";

/// Configuration pointing every chain at the in-memory endpoint prefix, with short timeouts
/// and millisecond backoff.
pub fn config(chains: &[u64]) -> Result<Config> {
	let default_chain_id = chains.first().copied().ok_or_else(|| {
		Error::Message("At least one chain is required.".to_string())
	})?;
	let cfg = Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		sources: Sources {
			default_chain_id,
			gateway_url: "https://gateway.invalid/api/{api_key}/subgraphs/id/{subgraph_id}"
				.to_string(),
			api_key: None,
			env_prefix: "SCOUT_TESTKIT_UNUSED_".to_string(),
			timeout_ms: 500,
			default_headers: Map::new(),
			overrides: chains
				.iter()
				.map(|chain_id| (chain_id.to_string(), format!("{MEMORY_ENDPOINT_PREFIX}{chain_id}")))
				.collect::<BTreeMap<_, _>>(),
		},
		semantic: Semantic {
			enabled: true,
			api_base: "http://semantic.invalid".to_string(),
			path: "/api/v1/search".to_string(),
			timeout_ms: 500,
			min_score: 0.5,
			limit: 5_000,
			default_headers: Map::new(),
		},
		search: Search {
			default_page_size: 20,
			max_page_size: 200,
			deadline_ms: 5_000,
			batch_multiplier: 2,
			max_refill_rounds: 4,
			max_batch_size: 1_000,
			max_local_records: 10_000,
			feedback_batch_size: 200,
			fail_fast: false,
			semantic_failure: "fail".to_string(),
		},
		retry: Retry { max_retries: 2, backoff_ms: 1, max_backoff_ms: 5 },
	};

	scout_config::validate(&cfg)?;

	Ok(cfg)
}

/// Hands out registered [`MemorySubgraph`]s by chain id.
#[derive(Default)]
pub struct MemoryConnector {
	subgraphs: HashMap<u64, Arc<MemorySubgraph>>,
}
impl MemoryConnector {
	pub fn new(subgraphs: impl IntoIterator<Item = Arc<MemorySubgraph>>) -> Self {
		Self {
			subgraphs: subgraphs.into_iter().map(|subgraph| (subgraph.chain_id(), subgraph)).collect(),
		}
	}
}

impl SourceConnector for MemoryConnector {
	fn connect(
		&self,
		_: &Sources,
		chain_id: u64,
		endpoint: &str,
	) -> ProviderResult<Arc<dyn AgentSource>> {
		if !endpoint.starts_with(MEMORY_ENDPOINT_PREFIX) {
			return Err(scout_providers::Error::InvalidConfig {
				message: format!("Endpoint {endpoint} is not an in-memory subgraph."),
			});
		}

		let Some(subgraph) = self.subgraphs.get(&chain_id) else {
			return Err(scout_providers::Error::Transport {
				message: format!("No in-memory subgraph serves chain {chain_id}."),
			});
		};
		let source: Arc<dyn AgentSource> = subgraph.clone();

		Ok(source)
	}
}

/// Semantic service answering from a fixed hit list.
pub struct StubSemantic {
	hits: Vec<SemanticHit>,
	failing: bool,
	delay: Option<Duration>,
	calls: AtomicU32,
	last_query: Mutex<Option<SemanticQuery>>,
}
impl StubSemantic {
	pub fn new(hits: Vec<SemanticHit>) -> Self {
		Self { hits, failing: false, delay: None, calls: AtomicU32::new(0), last_query: Mutex::new(None) }
	}

	pub fn failing() -> Self {
		Self { failing: true, ..Self::new(Vec::new()) }
	}

	pub fn slow(delay: Duration) -> Self {
		Self { delay: Some(delay), ..Self::new(Vec::new()) }
	}

	pub fn hit(agent_id: &str, score: f64) -> SemanticHit {
		let chain_id = agent_id.split(':').next().and_then(|raw| raw.parse().ok()).unwrap_or_default();

		SemanticHit { chain_id, agent_id: agent_id.to_string(), score }
	}

	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::Relaxed)
	}

	pub fn last_query(&self) -> Option<SemanticQuery> {
		self.last_query.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}

impl SemanticProvider for StubSemantic {
	fn search<'a>(
		&'a self,
		_: &'a Semantic,
		query: &'a SemanticQuery,
		_: Duration,
	) -> BoxFuture<'a, ProviderResult<Vec<SemanticHit>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::Relaxed);
			*self.last_query.lock().unwrap_or_else(|err| err.into_inner()) = Some(query.clone());

			if let Some(delay) = self.delay {
				tokio::time::sleep(delay).await;
			}
			if self.failing {
				return Err(scout_providers::Error::Status {
					status: 503,
					message: "Semantic stub is down.".to_string(),
				});
			}

			let min_score = query.min_score.unwrap_or(0.0);
			let limit = query.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);

			Ok(self.hits.iter().filter(|hit| hit.score >= min_score).take(limit).cloned().collect())
		})
	}
}

/// A service wired to in-memory subgraphs and a stub semantic service.
pub fn service(
	cfg: Config,
	subgraphs: impl IntoIterator<Item = Arc<MemorySubgraph>>,
	semantic: Arc<StubSemantic>,
) -> ScoutService {
	let providers = Providers::new(semantic, Arc::new(MemoryConnector::new(subgraphs)));

	ScoutService::with_providers(cfg, providers)
}
