pub(crate) mod assemble;
pub(crate) mod capabilities;
pub(crate) mod cursor;
pub(crate) mod executor;
pub(crate) mod feedback;
pub(crate) mod filter;
pub(crate) mod merge;
pub(crate) mod semantic;

use std::{
	collections::BTreeMap,
	str::FromStr,
	sync::Arc,
	time::{Duration, Instant},
};

use scout_domain::{AgentId, ChainSelection, Decimal, SortDirection, SortKey, resolve_chains};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub use assemble::{AgentSummary, Endpoint, EndpointKind};
use crate::{Error, Result, ScoutService, SourceFailure, registry};
use cursor::Fragment;
use executor::{ExecutionPlan, SourceJob};

/// Structural, reputation and free-text constraints. Every field is optional; an absent field
/// does not constrain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchFilters {
	pub chains: ChainSelection,
	pub agent_ids: Vec<AgentId>,
	pub owners: Vec<String>,
	/// Matches agents listing any of these operators.
	pub operators: Vec<String>,
	pub wallet: Option<String>,
	pub name: Option<String>,
	pub description: Option<String>,
	pub has_mcp: Option<bool>,
	pub has_a2a: Option<bool>,
	pub has_web: Option<bool>,
	pub has_ens: Option<bool>,
	pub has_did: Option<bool>,
	pub mcp_endpoint_contains: Option<String>,
	pub a2a_endpoint_contains: Option<String>,
	pub active: Option<bool>,
	pub x402_support: Option<bool>,
	#[serde(with = "crate::time_serde::option")]
	pub created_after: Option<OffsetDateTime>,
	#[serde(with = "crate::time_serde::option")]
	pub created_before: Option<OffsetDateTime>,
	#[serde(with = "crate::time_serde::option")]
	pub updated_after: Option<OffsetDateTime>,
	#[serde(with = "crate::time_serde::option")]
	pub updated_before: Option<OffsetDateTime>,
	pub mcp_tools: Vec<String>,
	pub mcp_prompts: Vec<String>,
	pub mcp_resources: Vec<String>,
	pub a2a_skills: Vec<String>,
	pub oasf_skills: Vec<String>,
	pub oasf_domains: Vec<String>,
	pub supported_trusts: Vec<String>,
	pub has_oasf: Option<bool>,
	pub metadata: Vec<MetadataFilter>,
	/// Matched through the subgraph's full-text index.
	pub full_text: Option<String>,
	/// Free-text query for the semantic ranking service.
	pub keyword: Option<String>,
	pub feedback: FeedbackFilters,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataFilter {
	pub key: String,
	#[serde(default)]
	pub value: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedbackFilters {
	pub has_feedback: Option<bool>,
	pub min_average: Option<Decimal>,
	pub max_average: Option<Decimal>,
	/// Client addresses; an agent matches with feedback from any of them.
	pub reviewers: Vec<String>,
	/// An agent matches with feedback carrying any of these tags.
	pub tags: Vec<String>,
	pub include_revoked: bool,
}
impl FeedbackFilters {
	pub(crate) fn needs_entries(&self) -> bool {
		!self.reviewers.is_empty() || !self.tags.is_empty()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticFailurePolicy {
	Fail,
	Degrade,
}

impl FromStr for SemanticFailurePolicy {
	type Err = String;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw.trim() {
			"fail" => Ok(Self::Fail),
			"degrade" => Ok(Self::Degrade),
			other => Err(format!("Unknown semantic failure policy '{other}'.")),
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchOptions {
	pub sort: Option<SortKey>,
	pub direction: Option<SortDirection>,
	pub page_size: Option<u32>,
	pub cursor: Option<String>,
	pub deadline_ms: Option<u64>,
	pub semantic_min_score: Option<f64>,
	pub semantic_limit: Option<u32>,
	pub semantic_failure: Option<SemanticFailurePolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchRequest {
	pub filters: SearchFilters,
	pub options: SearchOptions,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
	pub search_id: Uuid,
	pub items: Vec<AgentSummary>,
	pub next_cursor: Option<String>,
	pub meta: SearchMeta,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchMeta {
	pub sort: SortKey,
	pub direction: SortDirection,
	pub chains_queried: Vec<u64>,
	pub chains_succeeded: Vec<u64>,
	pub chains_failed: Vec<SourceFailure>,
	pub semantic: SemanticMeta,
	/// Known only when every source matched its whole result set locally.
	pub total_matched: Option<u64>,
	pub timings: Vec<SourceTiming>,
	pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticMeta {
	pub applied: bool,
	pub degraded: bool,
	pub candidate_count: Option<usize>,
	pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTiming {
	pub chain_id: u64,
	pub elapsed_ms: u64,
	pub attempts: u32,
}

impl ScoutService {
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		let search_id = Uuid::new_v4();
		let started = Instant::now();
		let SearchRequest { filters, options } = req;
		let filters = filter::normalize(filters)?;
		let page_size = self.page_size(&options)?;
		let deadline = started
			+ Duration::from_millis(options.deadline_ms.unwrap_or(self.cfg.search.deadline_ms));
		let policy = match options.semantic_failure {
			Some(policy) => policy,
			None => self
				.cfg
				.search
				.semantic_failure
				.parse()
				.map_err(|message| Error::Config { message })?,
		};
		let (requested_sort, direction) = resolve_sort(&filters, &options)?;
		let chains = resolve_chains(
			&filters.chains,
			self.cfg.sources.default_chain_id,
			&registry::available_chains(&self.cfg.sources),
		);

		if chains.is_empty() {
			return Err(Error::InvalidRequest { message: "No chains to search.".to_string() });
		}

		let semantic = semantic::prefilter(
			&self.cfg.semantic,
			self.providers.semantic.as_ref(),
			filters.keyword.as_deref(),
			&options,
			policy,
			deadline,
			search_id,
		)
		.await?;
		let (sort, direction) = if requested_sort == SortKey::SemanticScore && !semantic.applied {
			(SortKey::UpdatedAt, SortDirection::Desc)
		} else {
			(requested_sort, direction)
		};
		let fingerprint = filter::fingerprint(&filters, sort, direction, &chains, &semantic);
		let fragments = match options.cursor.as_deref() {
			Some(raw) => cursor::decode(raw, &fingerprint, &chains)?,
			None => chains.iter().map(|chain_id| (*chain_id, Fragment::Start)).collect(),
		};
		let scopes = filter::chain_scopes(&filters, &chains, semantic.scores.as_ref());
		let plan = Arc::new(ExecutionPlan {
			search_id,
			filters,
			sort,
			direction,
			page_size,
			scores: semantic.scores.clone(),
			search: self.cfg.search.clone(),
			retry: self.cfg.retry.clone(),
			source_timeout: Duration::from_millis(self.cfg.sources.timeout_ms),
			deadline,
		});
		let mut jobs = Vec::new();
		let mut skipped = Vec::new();

		for chain_id in &chains {
			let fragment = fragments.get(chain_id).cloned().unwrap_or(Fragment::Start);
			let scope = scopes.get(chain_id).cloned().flatten();

			if matches!(fragment, Fragment::Done) || scope.as_ref().is_some_and(|ids| ids.is_empty())
			{
				skipped.push(*chain_id);

				continue;
			}

			jobs.push(SourceJob { chain_id: *chain_id, fragment, scope });
		}

		let outcomes = executor::run(
			&plan,
			&self.registry,
			&self.cfg.sources,
			self.providers.sources.as_ref(),
			jobs,
		)
		.await?;
		let chains_queried: Vec<u64> = outcomes.keys().copied().collect();
		let mut chains_succeeded = Vec::new();
		let mut chains_failed = Vec::new();
		let mut timings = Vec::new();
		let mut buffers = Vec::new();
		let mut totals = Some(0_u64);
		let mut next_fragments: BTreeMap<u64, Fragment> =
			skipped.iter().map(|chain_id| (*chain_id, Fragment::Done)).collect();

		for (chain_id, outcome) in outcomes {
			timings.push(SourceTiming {
				chain_id,
				elapsed_ms: outcome.elapsed_ms,
				attempts: outcome.attempts,
			});

			match outcome.result {
				Ok(buffer) => {
					chains_succeeded.push(chain_id);

					totals = totals.zip(buffer.total).map(|(sum, total)| sum + total);

					buffers.push(buffer);
				},
				Err(failure) => {
					tracing::warn!(
						%search_id,
						chain_id,
						kind = failure.kind.as_str(),
						attempts = failure.attempts,
						error = %failure.message,
						"Source failed; continuing without it."
					);

					totals = None;

					next_fragments.insert(chain_id, outcome.fragment);
					chains_failed.push(failure);
				},
			}
		}

		if !chains_queried.is_empty() && chains_succeeded.is_empty() {
			return Err(Error::AllSourcesFailed { failures: chains_failed });
		}

		let merged = merge::merge(buffers, page_size as usize, direction);

		next_fragments.extend(merged.fragments);

		let next_cursor = if next_fragments.values().all(|fragment| matches!(fragment, Fragment::Done))
		{
			None
		} else {
			Some(cursor::encode(&fingerprint, next_fragments)?)
		};
		let items: Vec<AgentSummary> = merged.items.into_iter().map(assemble::assemble).collect();
		let elapsed_ms = started.elapsed().as_millis() as u64;

		tracing::info!(
			%search_id,
			sort = sort.as_str(),
			direction = direction.as_str(),
			items = items.len(),
			chains_failed = chains_failed.len(),
			has_next = next_cursor.is_some(),
			elapsed_ms,
			"Search completed."
		);

		Ok(SearchResponse {
			search_id,
			items,
			next_cursor,
			meta: SearchMeta {
				sort,
				direction,
				chains_queried,
				chains_succeeded,
				chains_failed,
				semantic: semantic.meta(),
				total_matched: if options.cursor.is_none() { totals } else { None },
				timings,
				elapsed_ms,
			},
		})
	}

	fn page_size(&self, options: &SearchOptions) -> Result<u32> {
		let page_size = options.page_size.unwrap_or(self.cfg.search.default_page_size);

		if page_size == 0 || page_size > self.cfg.search.max_page_size {
			return Err(Error::InvalidRequest {
				message: format!(
					"page_size must be between 1 and {}.",
					self.cfg.search.max_page_size
				),
			});
		}

		Ok(page_size)
	}
}

/// Semantic score when a keyword is given, update time otherwise; descending by default.
fn resolve_sort(
	filters: &SearchFilters,
	options: &SearchOptions,
) -> Result<(SortKey, SortDirection)> {
	let sort = match (options.sort, filters.keyword.is_some()) {
		(Some(SortKey::SemanticScore), false) => {
			return Err(Error::UnsupportedFilterCombination {
				message: "Sorting by semantic_score requires a keyword.".to_string(),
			});
		},
		(Some(sort), _) => sort,
		(None, true) => SortKey::SemanticScore,
		(None, false) => SortKey::UpdatedAt,
	};

	Ok((sort, options.direction.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_sort_follows_keyword() {
		let mut filters = SearchFilters::default();
		let options = SearchOptions::default();

		assert_eq!(
			resolve_sort(&filters, &options).expect("Sort resolves."),
			(SortKey::UpdatedAt, SortDirection::Desc)
		);

		filters.keyword = Some("oracle".to_string());

		assert_eq!(
			resolve_sort(&filters, &options).expect("Sort resolves."),
			(SortKey::SemanticScore, SortDirection::Desc)
		);
	}

	#[test]
	fn semantic_sort_without_keyword_is_rejected() {
		let options = SearchOptions { sort: Some(SortKey::SemanticScore), ..Default::default() };

		assert!(matches!(
			resolve_sort(&SearchFilters::default(), &options),
			Err(Error::UnsupportedFilterCombination { .. })
		));
	}

	#[test]
	fn request_json_uses_snake_case_and_aliases() {
		let raw = serde_json::json!({
			"filters": {
				"chains": "all",
				"agent_ids": ["11155111:4"],
				"has_mcp": true,
				"created_after": 1_700_000_000,
				"feedback": { "min_average": "4.5" }
			},
			"options": { "sort": "createdAt", "direction": "asc", "page_size": 4 }
		});
		let req: SearchRequest = serde_json::from_value(raw).expect("Request parses.");

		assert_eq!(req.filters.chains, ChainSelection::All);
		assert_eq!(req.filters.agent_ids[0].chain_id(), 11_155_111);
		assert_eq!(
			req.filters.created_after.map(OffsetDateTime::unix_timestamp),
			Some(1_700_000_000)
		);
		assert_eq!(req.options.sort, Some(SortKey::CreatedAt));
		assert!(
			serde_json::from_value::<SearchRequest>(serde_json::json!({ "filters": { "nope": 1 } }))
				.is_err()
		);
	}
}
