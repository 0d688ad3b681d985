use std::collections::{HashMap, HashSet};

use scout_domain::{Decimal, SortKey, SortValue};
use scout_providers::subgraph::{CollectionQuery, SelectionField};
use serde_json::{Map, Value};

use crate::{
	Error, Result, SourceFailure,
	search::{
		FeedbackFilters,
		capabilities::{EntityCapability, SourceCapabilities},
		executor::SourceRun,
		filter::graph_int,
	},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CountSource {
	Agent,
	Stats,
	/// Counted from non-revoked feedback entries.
	Entries,
	Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AverageSource {
	Agent,
	Stats,
	Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EntryMatch {
	pub(crate) reviewers: Vec<String>,
	pub(crate) tags: Vec<String>,
	pub(crate) include_revoked: bool,
}
impl EntryMatch {
	fn matches(&self, entry: &Value) -> bool {
		if !self.include_revoked && is_revoked(entry) {
			return false;
		}

		let reviewer_ok = self.reviewers.is_empty()
			|| entry.get("clientAddress").and_then(Value::as_str).is_some_and(|client| {
				self.reviewers.iter().any(|reviewer| reviewer.eq_ignore_ascii_case(client))
			});
		let tag_ok = self.tags.is_empty()
			|| ["tag1", "tag2"].iter().any(|key| {
				entry
					.get(key)
					.and_then(Value::as_str)
					.is_some_and(|tag| self.tags.iter().any(|wanted| wanted == tag))
			});

		reviewer_ok && tag_ok
	}
}

/// How one source answers the reputation side of a search.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FeedbackPlan {
	pub(crate) count: CountSource,
	pub(crate) average: AverageSource,
	/// Existence left to check locally after pushdown.
	pub(crate) has_feedback: Option<bool>,
	/// Average range left to check locally after pushdown.
	pub(crate) min_average: Option<Decimal>,
	pub(crate) max_average: Option<Decimal>,
	pub(crate) entries: Option<EntryMatch>,
	pub(crate) count_from_entries: bool,
}
impl FeedbackPlan {
	fn needs_stats(&self) -> bool {
		self.count == CountSource::Stats || self.average == AverageSource::Stats
	}

	fn needs_entries(&self) -> bool {
		self.entries.is_some() || self.count_from_entries
	}
}

/// One fetched agent with its reputation aggregates joined in.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct JoinedRecord {
	pub(crate) chain_id: u64,
	pub(crate) id: String,
	pub(crate) raw: Value,
	pub(crate) feedback_count: Option<u64>,
	pub(crate) average_value: Option<Decimal>,
	pub(crate) semantic_score: Option<f64>,
	pub(crate) sort_value: SortValue,
}
impl JoinedRecord {
	pub(crate) fn new(chain_id: u64, raw: Value) -> Option<Self> {
		let id = raw.get("id").and_then(Value::as_str)?.to_string();
		let feedback_count = graph_int(raw.get("totalFeedback")).and_then(|count| u64::try_from(count).ok());
		let average_value = raw.get("averageFeedbackValue").and_then(parse_decimal);

		Some(Self {
			chain_id,
			id,
			raw,
			feedback_count,
			average_value,
			semantic_score: None,
			sort_value: SortValue::Missing,
		})
	}

	pub(crate) fn sort_value_for(&self, sort: SortKey) -> SortValue {
		let integer = |value: Option<u64>| value.map(SortValue::Integer).unwrap_or(SortValue::Missing);

		match sort {
			SortKey::FeedbackCount => integer(self.feedback_count),
			SortKey::AverageValue =>
				self.average_value.clone().map(SortValue::Decimal).unwrap_or(SortValue::Missing),
			SortKey::SemanticScore =>
				self.semantic_score.map(SortValue::Score).unwrap_or(SortValue::Missing),
			SortKey::UpdatedAt | SortKey::CreatedAt | SortKey::LastActivity => integer(
				sort.agent_field()
					.and_then(|field| graph_int(self.raw.get(field)))
					.and_then(|value| u64::try_from(value).ok()),
			),
		}
	}
}

/// Decides per source where counts and averages come from, and pushes existence and range
/// filters down when the agent filter accepts them.
pub(crate) fn plan(
	chain_id: u64,
	filters: &FeedbackFilters,
	sort: SortKey,
	caps: &SourceCapabilities,
	filter: &mut Map<String, Value>,
) -> Result<FeedbackPlan> {
	let stats_has = |field: &str| {
		caps.stats.as_ref().is_some_and(|stats| stats.has(field) && stats.accepts("id_in"))
	};
	let entries_available = feedback_entries(caps).is_some();
	let count = if caps.agents.has("totalFeedback") {
		CountSource::Agent
	} else if stats_has("totalFeedback") {
		CountSource::Stats
	} else if entries_available {
		CountSource::Entries
	} else {
		CountSource::Unavailable
	};
	let average = if caps.agents.has("averageFeedbackValue") {
		AverageSource::Agent
	} else if stats_has("averageFeedbackValue") {
		AverageSource::Stats
	} else {
		AverageSource::Unavailable
	};
	let has_feedback = match filters.has_feedback {
		Some(true) if caps.agents.accepts("totalFeedback_gt") => {
			filter.insert("totalFeedback_gt".to_string(), Value::String("0".to_string()));

			None
		},
		Some(false) if caps.agents.accepts("totalFeedback") => {
			filter.insert("totalFeedback".to_string(), Value::String("0".to_string()));

			None
		},
		Some(_) if count == CountSource::Unavailable =>
			return Err(unsupported(chain_id, "feedback existence has no count source")),
		other => other,
	};
	let (min_average, max_average) = range_plan(chain_id, filters, average, caps, filter)?;
	let entries = if filters.needs_entries() {
		if !entries_available {
			return Err(unsupported(chain_id, "reviewer and tag filters need feedback entries"));
		}

		Some(EntryMatch {
			reviewers: filters.reviewers.clone(),
			tags: filters.tags.clone(),
			include_revoked: filters.include_revoked,
		})
	} else {
		None
	};

	match sort {
		SortKey::FeedbackCount if count == CountSource::Unavailable =>
			return Err(unsupported(chain_id, "feedback count is not available for sorting")),
		SortKey::AverageValue if average == AverageSource::Unavailable =>
			return Err(unsupported(chain_id, "average feedback value is not available for sorting")),
		_ => {},
	}

	let count_from_entries = count == CountSource::Entries
		&& (has_feedback.is_some() || sort == SortKey::FeedbackCount);

	Ok(FeedbackPlan { count, average, has_feedback, min_average, max_average, entries, count_from_entries })
}

fn range_plan(
	chain_id: u64,
	filters: &FeedbackFilters,
	average: AverageSource,
	caps: &SourceCapabilities,
	filter: &mut Map<String, Value>,
) -> Result<(Option<Decimal>, Option<Decimal>)> {
	if filters.min_average.is_none() && filters.max_average.is_none() {
		return Ok((None, None));
	}

	let pushable = filters.min_average.is_none()
		|| caps.agents.accepts("averageFeedbackValue_gte");
	let pushable = pushable
		&& (filters.max_average.is_none() || caps.agents.accepts("averageFeedbackValue_lte"));

	if pushable {
		if let Some(min) = &filters.min_average {
			filter.insert("averageFeedbackValue_gte".to_string(), Value::String(min.to_string()));
		}
		if let Some(max) = &filters.max_average {
			filter.insert("averageFeedbackValue_lte".to_string(), Value::String(max.to_string()));
		}

		return Ok((None, None));
	}
	if average == AverageSource::Unavailable {
		return Err(unsupported(chain_id, "average feedback value cannot be filtered"));
	}

	Ok((filters.min_average.clone(), filters.max_average.clone()))
}

/// Fills in aggregates the agent rows lack and drops agents failing local reputation checks.
/// Order is preserved.
pub(crate) async fn join(
	run: &SourceRun,
	caps: &SourceCapabilities,
	plan: &FeedbackPlan,
	mut records: Vec<JoinedRecord>,
	batch_size: u32,
	page_limit: u32,
) -> Result<Vec<JoinedRecord>, SourceFailure> {
	if records.is_empty() {
		return Ok(records);
	}

	let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();

	if plan.needs_stats()
		&& let Some(stats) = &caps.stats
	{
		let aggregates = fetch_stats(run, stats, &ids, batch_size).await?;

		for record in &mut records {
			let (count, average) = aggregates.get(&record.id).cloned().unwrap_or((Some(0), None));

			if plan.count == CountSource::Stats {
				record.feedback_count = count;
			}
			if plan.average == AverageSource::Stats {
				record.average_value = average;
			}
		}
	}

	let mut matched: Option<HashSet<String>> = None;

	if plan.needs_entries()
		&& let Some(feedback) = feedback_entries(caps)
	{
		let include_revoked = plan.entries.as_ref().is_some_and(|entries| entries.include_revoked);
		let entries =
			fetch_entries(run, feedback, &ids, include_revoked, batch_size, page_limit).await?;

		if plan.count_from_entries {
			for record in &mut records {
				let count = entries
					.get(&record.id)
					.map(|list| list.iter().filter(|entry| !is_revoked(entry)).count())
					.unwrap_or(0);

				record.feedback_count = Some(count as u64);
			}
		}
		if let Some(entry_match) = &plan.entries {
			matched = Some(
				entries
					.iter()
					.filter(|(_, list)| list.iter().any(|entry| entry_match.matches(entry)))
					.map(|(id, _)| id.clone())
					.collect(),
			);
		}
	}

	records.retain(|record| {
		if let Some(matched) = &matched
			&& !matched.contains(&record.id)
		{
			return false;
		}
		if let Some(expected) = plan.has_feedback
			&& (record.feedback_count.unwrap_or(0) > 0) != expected
		{
			return false;
		}
		if plan.min_average.is_some() || plan.max_average.is_some() {
			let Some(average) = &record.average_value else {
				return false;
			};

			if plan.min_average.as_ref().is_some_and(|min| average < min)
				|| plan.max_average.as_ref().is_some_and(|max| average > max)
			{
				return false;
			}
		}

		true
	});

	Ok(records)
}

async fn fetch_stats(
	run: &SourceRun,
	stats: &EntityCapability,
	ids: &[String],
	batch_size: u32,
) -> Result<HashMap<String, (Option<u64>, Option<Decimal>)>, SourceFailure> {
	let selection: Vec<SelectionField> = ["id", "totalFeedback", "averageFeedbackValue"]
		.iter()
		.filter(|field| stats.has(field))
		.map(|field| SelectionField::scalar(*field))
		.collect();
	let mut out = HashMap::with_capacity(ids.len());

	for chunk in ids.chunks(batch_size.max(1) as usize) {
		let mut filter = Map::new();

		filter.insert("id_in".to_string(), chunk.iter().cloned().map(Value::String).collect());

		let query = CollectionQuery {
			collection: stats.collection.clone(),
			filter,
			order_by: None,
			order_direction: None,
			first: chunk.len() as u32,
			skip: 0,
			selection: selection.clone(),
		};

		for row in run.query(&query).await? {
			let Some(id) = row.get("id").and_then(Value::as_str) else {
				continue;
			};
			let count = graph_int(row.get("totalFeedback")).and_then(|count| u64::try_from(count).ok());
			let average = row.get("averageFeedbackValue").and_then(parse_decimal);

			out.insert(id.to_string(), (count, average));
		}
	}

	Ok(out)
}

/// Feedback entries grouped by agent id.
async fn fetch_entries(
	run: &SourceRun,
	feedback: &EntityCapability,
	ids: &[String],
	include_revoked: bool,
	batch_size: u32,
	page_limit: u32,
) -> Result<HashMap<String, Vec<Value>>, SourceFailure> {
	let mut selection: Vec<SelectionField> = ["id", "clientAddress", "tag1", "tag2", "isRevoked", "value"]
		.iter()
		.filter(|field| feedback.has(field))
		.map(|field| SelectionField::scalar(*field))
		.collect();

	selection.push(SelectionField::nested("agent", vec![SelectionField::scalar("id")]));

	let page_limit = page_limit.max(1);
	let mut out: HashMap<String, Vec<Value>> = HashMap::new();

	for chunk in ids.chunks(batch_size.max(1) as usize) {
		let mut skip = 0;

		loop {
			let mut filter = Map::new();

			filter.insert("agent_in".to_string(), chunk.iter().cloned().map(Value::String).collect());

			if !include_revoked && feedback.accepts("isRevoked") {
				filter.insert("isRevoked".to_string(), Value::Bool(false));
			}

			let query = CollectionQuery {
				collection: feedback.collection.clone(),
				filter,
				order_by: Some("id".to_string()),
				order_direction: None,
				first: page_limit,
				skip,
				selection: selection.clone(),
			};
			let rows = run.query(&query).await?;
			let fetched = rows.len() as u32;

			for row in rows {
				let agent_id = match row.get("agent") {
					Some(Value::Object(agent)) => agent.get("id").and_then(Value::as_str),
					Some(Value::String(agent)) => Some(agent.as_str()),
					_ => None,
				};

				if let Some(agent_id) = agent_id.map(str::to_string) {
					out.entry(agent_id).or_default().push(row);
				}
			}

			if fetched < page_limit {
				break;
			}

			skip += fetched;
		}
	}

	Ok(out)
}

fn feedback_entries(caps: &SourceCapabilities) -> Option<&EntityCapability> {
	caps.feedback.as_ref().filter(|feedback| feedback.has("agent") && feedback.accepts("agent_in"))
}

fn is_revoked(entry: &Value) -> bool {
	entry.get("isRevoked").and_then(Value::as_bool).unwrap_or(false)
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
	match value {
		Value::String(raw) => raw.parse().ok(),
		Value::Number(raw) => raw.to_string().parse().ok(),
		_ => None,
	}
}

fn unsupported(chain_id: u64, what: &str) -> Error {
	Error::UnsupportedFilterCombination { message: format!("Chain {chain_id}: {what}.") }
}
