use std::{
	collections::HashMap,
	sync::Arc,
	time::{Duration, Instant},
};

use scout_providers::semantic::SemanticQuery;
use uuid::Uuid;

use crate::{
	Error, Result, SemanticProvider,
	search::{SearchOptions, SemanticFailurePolicy, SemanticMeta},
};

/// What the semantic stage contributed to one search.
#[derive(Clone, Debug, Default)]
pub(crate) struct SemanticOutcome {
	pub(crate) applied: bool,
	pub(crate) degraded: bool,
	pub(crate) message: Option<String>,
	/// Candidate entity id to score. `None` when the stage did not narrow the search.
	pub(crate) scores: Option<Arc<HashMap<String, f64>>>,
	pub(crate) min_score: f64,
	pub(crate) limit: u32,
}
impl SemanticOutcome {
	pub(crate) fn meta(&self) -> SemanticMeta {
		SemanticMeta {
			applied: self.applied,
			degraded: self.degraded,
			candidate_count: self.scores.as_ref().map(|scores| scores.len()),
			message: self.message.clone(),
		}
	}
}

/// Runs the semantic stage before fan-out. Failures either abort the search or degrade it to a
/// structural search, depending on `policy`.
pub(crate) async fn prefilter(
	cfg: &scout_config::Semantic,
	provider: &dyn SemanticProvider,
	keyword: Option<&str>,
	options: &SearchOptions,
	policy: SemanticFailurePolicy,
	deadline: Instant,
	search_id: Uuid,
) -> Result<SemanticOutcome> {
	let min_score = options.semantic_min_score.unwrap_or(cfg.min_score);
	let limit = options.semantic_limit.unwrap_or(cfg.limit);
	let mut outcome = SemanticOutcome { min_score, limit, ..Default::default() };
	let Some(keyword) = keyword else {
		return Ok(outcome);
	};

	if !(0.0..=1.0).contains(&min_score) || limit == 0 {
		return Err(Error::InvalidRequest {
			message: "semantic_min_score must be within 0.0..=1.0 and semantic_limit positive."
				.to_string(),
		});
	}

	let failure = if !cfg.enabled {
		"Semantic search is disabled.".to_string()
	} else {
		let timeout = Duration::from_millis(cfg.timeout_ms)
			.min(deadline.saturating_duration_since(Instant::now()));
		let query = SemanticQuery {
			query: keyword.to_string(),
			min_score: Some(min_score),
			limit: Some(limit),
		};

		match tokio::time::timeout(timeout, provider.search(cfg, &query, timeout)).await {
			Ok(Ok(hits)) => {
				let mut scores = HashMap::with_capacity(hits.len());

				for hit in hits {
					scores.entry(hit.agent_id).or_insert(hit.score);
				}

				tracing::info!(%search_id, candidates = scores.len(), "Semantic prefilter applied.");

				outcome.applied = true;
				outcome.scores = Some(Arc::new(scores));

				return Ok(outcome);
			},
			Ok(Err(err)) => err.to_string(),
			Err(_) => format!("Semantic search timed out after {} ms.", timeout.as_millis()),
		}
	};

	match policy {
		SemanticFailurePolicy::Fail => Err(Error::SemanticServiceUnavailable { message: failure }),
		SemanticFailurePolicy::Degrade => {
			tracing::warn!(
				%search_id,
				error = %failure,
				"Semantic prefilter unavailable; continuing with structural search."
			);

			outcome.degraded = true;
			outcome.message = Some(failure);

			Ok(outcome)
		},
	}
}
