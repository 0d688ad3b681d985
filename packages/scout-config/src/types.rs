use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub sources: Sources,
	pub semantic: Semantic,
	pub search: Search,
	pub retry: Retry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sources {
	/// Chain the deployment treats as "its own"; searched next to mainnet when no chains are
	/// given.
	pub default_chain_id: u64,
	/// Template for built-in subgraph endpoints. `{subgraph_id}` is required, `{api_key}` is
	/// optional.
	pub gateway_url: String,
	#[serde(default)]
	pub api_key: Option<String>,
	#[serde(default = "default_env_prefix")]
	pub env_prefix: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
	/// Explicit endpoints keyed by chain id. These win over built-in defaults and the
	/// environment.
	#[serde(default)]
	pub overrides: BTreeMap<String, String>,
}
impl Sources {
	pub fn override_for(&self, chain_id: u64) -> Option<&str> {
		self.overrides.iter().find_map(|(key, url)| {
			(key.trim().parse::<u64>().ok() == Some(chain_id)).then_some(url.as_str())
		})
	}

	pub fn override_chain_ids(&self) -> Vec<u64> {
		let mut ids: Vec<u64> =
			self.overrides.keys().filter_map(|key| key.trim().parse().ok()).collect();

		ids.sort_unstable();
		ids.dedup();

		ids
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Semantic {
	pub enabled: bool,
	pub api_base: String,
	pub path: String,
	pub timeout_ms: u64,
	pub min_score: f64,
	pub limit: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Search {
	pub default_page_size: u32,
	pub max_page_size: u32,
	pub deadline_ms: u64,
	pub batch_multiplier: u32,
	pub max_refill_rounds: u32,
	pub max_batch_size: u32,
	pub max_local_records: u32,
	pub feedback_batch_size: u32,
	#[serde(default)]
	pub fail_fast: bool,
	#[serde(default = "default_semantic_failure")]
	pub semantic_failure: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retry {
	pub max_retries: u32,
	pub backoff_ms: u64,
	pub max_backoff_ms: u64,
}

fn default_env_prefix() -> String {
	"SCOUT_SUBGRAPH_URL_".to_string()
}

fn default_semantic_failure() -> String {
	"fail".to_string()
}
