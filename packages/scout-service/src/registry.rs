use std::{
	collections::HashMap,
	env,
	future::Future,
	sync::{Arc, Mutex},
};

use scout_config::Sources;
use scout_providers::subgraph::SchemaSnapshot;
use tokio::sync::OnceCell;

use crate::{
	AgentSource, SourceConnector, SourceFailure, SourceFailureKind,
	search::capabilities::SourceCapabilities,
};

/// Subgraph deployments known without configuration, rendered through `sources.gateway_url`.
pub const BUILTIN_SUBGRAPHS: &[(u64, &str)] =
	&[(11_155_111, "6wQRC7geo9XYAhckfmfo8kbMRLeWU8KQd3XsJqFKmZLT")];

/// Endpoint for a chain: explicit override, then built-in deployment, then
/// `<env_prefix><chain_id>` from the environment.
pub fn resolve_endpoint(cfg: &Sources, chain_id: u64) -> Option<String> {
	if let Some(url) = cfg.override_for(chain_id) {
		return Some(url.to_string());
	}
	if let Some(url) = builtin_endpoint(cfg, chain_id) {
		return Some(url);
	}

	env::var(format!("{}{chain_id}", cfg.env_prefix))
		.ok()
		.map(|raw| raw.trim().to_string())
		.filter(|raw| !raw.is_empty())
}

/// Chains with an endpoint that can be listed up front, ascending.
pub fn available_chains(cfg: &Sources) -> Vec<u64> {
	let mut ids = cfg.override_chain_ids();

	ids.extend(
		BUILTIN_SUBGRAPHS
			.iter()
			.filter(|(chain_id, _)| builtin_endpoint(cfg, *chain_id).is_some())
			.map(|(chain_id, _)| *chain_id),
	);
	ids.sort_unstable();
	ids.dedup();

	ids
}

fn builtin_endpoint(cfg: &Sources, chain_id: u64) -> Option<String> {
	let (_, subgraph_id) = BUILTIN_SUBGRAPHS.iter().find(|(id, _)| *id == chain_id)?;
	let url = cfg.gateway_url.replace("{subgraph_id}", subgraph_id);

	if url.contains("{api_key}") {
		let api_key = cfg.api_key.as_deref()?;

		return Some(url.replace("{api_key}", api_key));
	}

	Some(url)
}

/// Per-chain sources owned by one service instance.
///
/// Entries are created once per chain and live for the process; the schema probe behind
/// [`SourceEntry::capabilities`] runs at most once at a time per chain and is kept after its
/// first success.
#[derive(Default)]
pub struct SourceRegistry {
	entries: Mutex<HashMap<u64, Arc<SourceEntry>>>,
}
impl SourceRegistry {
	pub(crate) fn entry(
		&self,
		cfg: &Sources,
		connector: &dyn SourceConnector,
		chain_id: u64,
	) -> Result<Arc<SourceEntry>, SourceFailure> {
		let mut entries = self.lock();

		if let Some(entry) = entries.get(&chain_id) {
			return Ok(entry.clone());
		}

		let Some(endpoint) = resolve_endpoint(cfg, chain_id) else {
			return Err(SourceFailure {
				chain_id,
				kind: SourceFailureKind::Unresolved,
				message: format!("No subgraph endpoint is configured for chain {chain_id}."),
				attempts: 0,
			});
		};
		let source = connector
			.connect(cfg, chain_id, &endpoint)
			.map_err(|err| SourceFailure::from_provider(chain_id, &err, 0))?;
		let entry = Arc::new(SourceEntry {
			chain_id,
			endpoint,
			source,
			capabilities: OnceCell::new(),
		});

		tracing::debug!(chain_id, endpoint = %entry.endpoint, "Registered subgraph source.");

		entries.insert(chain_id, entry.clone());

		Ok(entry)
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<SourceEntry>>> {
		self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

pub(crate) struct SourceEntry {
	pub(crate) chain_id: u64,
	pub(crate) endpoint: String,
	pub(crate) source: Arc<dyn AgentSource>,
	capabilities: OnceCell<Arc<SourceCapabilities>>,
}
impl SourceEntry {
	/// Probes the schema on first use. Concurrent callers share one probe; a failed probe is
	/// not cached.
	pub(crate) async fn capabilities<F, Fut>(
		&self,
		probe: F,
	) -> Result<Arc<SourceCapabilities>, SourceFailure>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<SchemaSnapshot, SourceFailure>>,
	{
		let chain_id = self.chain_id;

		self.capabilities
			.get_or_try_init(|| async move {
				let snapshot = probe().await?;
				let capabilities = SourceCapabilities::probe(&snapshot)
					.map_err(|message| SourceFailure::schema(chain_id, message))?;

				tracing::info!(
					chain_id,
					agents = %capabilities.agents.collection,
					"Resolved subgraph capabilities."
				);

				Ok(Arc::new(capabilities))
			})
			.await
			.cloned()
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use serde_json::Map;

	use super::*;

	fn sources(api_key: Option<&str>) -> Sources {
		Sources {
			default_chain_id: 11_155_111,
			gateway_url: "https://gateway.example/api/{api_key}/subgraphs/id/{subgraph_id}"
				.to_string(),
			api_key: api_key.map(str::to_string),
			env_prefix: "SCOUT_TEST_REGISTRY_URL_".to_string(),
			timeout_ms: 1_000,
			default_headers: Map::new(),
			overrides: BTreeMap::from([(
				"84532".to_string(),
				"https://example.invalid/base-sepolia".to_string(),
			)]),
		}
	}

	#[test]
	fn overrides_win_over_builtins() {
		let cfg = sources(Some("k"));

		assert_eq!(
			resolve_endpoint(&cfg, 84_532).as_deref(),
			Some("https://example.invalid/base-sepolia")
		);
		assert_eq!(
			resolve_endpoint(&cfg, 11_155_111).as_deref(),
			Some(
				"https://gateway.example/api/k/subgraphs/id/6wQRC7geo9XYAhckfmfo8kbMRLeWU8KQd3XsJqFKmZLT"
			)
		);
	}

	#[test]
	fn builtins_needing_a_key_are_skipped_without_one() {
		let cfg = sources(None);

		assert_eq!(resolve_endpoint(&cfg, 11_155_111), None);
		assert_eq!(available_chains(&cfg), vec![84_532]);
		assert_eq!(available_chains(&sources(Some("k"))), vec![84_532, 11_155_111]);
	}
}
