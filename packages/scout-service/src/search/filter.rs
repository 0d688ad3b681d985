use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	sync::Arc,
};

use scout_domain::{SortDirection, SortKey};
use scout_providers::subgraph::{SelectionField, TextSearchQuery};
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{
	Error, Result,
	search::{
		FeedbackFilters, MetadataFilter, SearchFilters,
		capabilities::SourceCapabilities,
		feedback::{self, FeedbackPlan},
		semantic::SemanticOutcome,
	},
};

const FINGERPRINT_VERSION: u8 = 1;

pub(crate) const AGENT_FIELDS: &[&str] = &[
	"id",
	"chainId",
	"agentId",
	"owner",
	"operators",
	"agentWallet",
	"createdAt",
	"updatedAt",
	"lastActivity",
	"totalFeedback",
	"averageFeedbackValue",
];
pub(crate) const REGISTRATION_FIELDS: &[&str] = &[
	"name",
	"description",
	"image",
	"active",
	"x402Support",
	"mcpEndpoint",
	"mcpVersion",
	"a2aEndpoint",
	"a2aVersion",
	"webEndpoint",
	"ens",
	"did",
	"mcpTools",
	"mcpPrompts",
	"mcpResources",
	"a2aSkills",
	"oasfSkills",
	"oasfDomains",
	"supportedTrusts",
	"hasOASF",
];

/// Where a post-filtered value lives on a fetched agent record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Field {
	Agent(&'static str),
	Registration(&'static str),
}
impl Field {
	pub(crate) fn get(self, record: &Value) -> Option<&Value> {
		match self {
			Self::Agent(name) => lookup(record, &[name]),
			Self::Registration(name) => lookup(record, &["registrationFile", name]),
		}
	}
}

/// A predicate checked against a fetched agent record when the source cannot push it down.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PostFilter {
	/// Scalar equals any of the values, case-insensitively.
	AnyOf { field: Field, values: Vec<String> },
	/// Array holds any of the values, case-insensitively.
	AnyElement { field: Field, values: Vec<String> },
	ContainsNoCase { field: Field, needle: String },
	Present { field: Field, expected: bool },
	Flag { field: Field, expected: bool },
	AtLeast { field: Field, min: i64 },
	AtMost { field: Field, max: i64 },
	/// Array holds every value.
	ContainsAll { field: Field, values: Vec<String> },
	/// `oasfSkills ∪ oasfDomains` is non-empty.
	HasOasf(bool),
	Metadata(Vec<MetadataFilter>),
}
impl PostFilter {
	pub(crate) fn matches(&self, record: &Value) -> bool {
		match self {
			Self::AnyOf { field, values } => field
				.get(record)
				.and_then(Value::as_str)
				.is_some_and(|raw| values.iter().any(|value| value.eq_ignore_ascii_case(raw))),
			Self::AnyElement { field, values } => string_items(field.get(record))
				.iter()
				.any(|item| values.iter().any(|value| value.eq_ignore_ascii_case(item))),
			Self::ContainsNoCase { field, needle } => field
				.get(record)
				.and_then(Value::as_str)
				.is_some_and(|raw| raw.to_lowercase().contains(needle.as_str())),
			Self::Present { field, expected } => is_present(field.get(record)) == *expected,
			Self::Flag { field, expected } =>
				field.get(record).and_then(Value::as_bool) == Some(*expected),
			Self::AtLeast { field, min } =>
				graph_int(field.get(record)).is_some_and(|value| value >= *min),
			Self::AtMost { field, max } =>
				graph_int(field.get(record)).is_some_and(|value| value <= *max),
			Self::ContainsAll { field, values } => {
				let items = string_items(field.get(record));

				values.iter().all(|value| items.contains(&value.as_str()))
			},
			Self::HasOasf(expected) => {
				let skills = string_items(Field::Registration("oasfSkills").get(record));
				let domains = string_items(Field::Registration("oasfDomains").get(record));

				(!skills.is_empty() || !domains.is_empty()) == *expected
			},
			Self::Metadata(constraints) => {
				let entries = match lookup(record, &["metadata"]) {
					Some(Value::Array(entries)) => entries.as_slice(),
					_ => &[],
				};

				constraints.iter().all(|constraint| {
					entries.iter().any(|entry| {
						entry.get("key").and_then(Value::as_str) == Some(constraint.key.as_str())
							&& constraint.value.as_deref().is_none_or(|expected| {
								entry.get("value").and_then(Value::as_str) == Some(expected)
							})
					})
				})
			},
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Strategy {
	/// Ordered and resumed by the backend on this agent field.
	Keyset { field: &'static str },
	/// Every match is fetched, then ordered and resumed here.
	Local,
}

/// Everything needed to query one source for one search.
#[derive(Clone, Debug)]
pub(crate) struct SourcePlan {
	pub(crate) collection: String,
	pub(crate) filter: Map<String, Value>,
	pub(crate) post: Vec<PostFilter>,
	pub(crate) selection: Vec<SelectionField>,
	pub(crate) text_search: Option<TextSearchQuery>,
	pub(crate) feedback: FeedbackPlan,
	pub(crate) strategy: Strategy,
	ids: Option<BTreeSet<String>>,
	id_pushdown: bool,
}
impl SourcePlan {
	pub(crate) fn restrict_ids(&mut self, ids: BTreeSet<String>) {
		self.ids = Some(match self.ids.take() {
			Some(existing) => existing.intersection(&ids).cloned().collect(),
			None => ids,
		});
	}

	/// True when an id restriction leaves nothing to fetch.
	pub(crate) fn is_empty(&self) -> bool {
		self.ids.as_ref().is_some_and(BTreeSet::is_empty)
	}

	/// Pushdown predicate with the id restriction folded in.
	pub(crate) fn base_filter(&self) -> Map<String, Value> {
		let mut filter = self.filter.clone();

		if self.id_pushdown
			&& let Some(ids) = &self.ids
		{
			filter.insert("id_in".to_string(), ids.iter().cloned().map(Value::String).collect());
		}

		filter
	}

	pub(crate) fn accepts(&self, record: &Value) -> bool {
		if !self.id_pushdown
			&& let Some(ids) = &self.ids
		{
			let Some(id) = record.get("id").and_then(Value::as_str) else {
				return false;
			};

			if !ids.contains(id) {
				return false;
			}
		}

		self.post.iter().all(|filter| filter.matches(record))
	}
}

/// Trims and lower-cases what the backends store lower-cased, drops blanks, and rejects
/// contradictory constraints.
pub(crate) fn normalize(mut filters: SearchFilters) -> Result<SearchFilters> {
	filters.owners = clean_list(filters.owners, true);
	filters.operators = clean_list(filters.operators, true);
	filters.wallet = clean_text(filters.wallet).map(|raw| raw.to_lowercase());
	filters.name = clean_text(filters.name);
	filters.description = clean_text(filters.description);
	filters.mcp_endpoint_contains = clean_text(filters.mcp_endpoint_contains);
	filters.a2a_endpoint_contains = clean_text(filters.a2a_endpoint_contains);
	filters.full_text = clean_text(filters.full_text);
	filters.keyword = clean_text(filters.keyword);

	for list in [
		&mut filters.mcp_tools,
		&mut filters.mcp_prompts,
		&mut filters.mcp_resources,
		&mut filters.a2a_skills,
		&mut filters.oasf_skills,
		&mut filters.oasf_domains,
		&mut filters.supported_trusts,
	] {
		*list = clean_list(std::mem::take(list), false);
	}

	let mut seen = BTreeSet::new();

	filters.agent_ids.retain(|id| seen.insert(id.to_string()));

	for constraint in &mut filters.metadata {
		constraint.key = constraint.key.trim().to_string();

		if constraint.key.is_empty() {
			return Err(Error::InvalidRequest {
				message: "metadata filters need a non-empty key.".to_string(),
			});
		}
	}

	normalize_feedback(&mut filters.feedback)?;

	for (after, before, name) in [
		(filters.created_after, filters.created_before, "created"),
		(filters.updated_after, filters.updated_before, "updated"),
	] {
		if let (Some(after), Some(before)) = (after, before)
			&& after > before
		{
			return Err(Error::InvalidRequest {
				message: format!("{name}_after must not be later than {name}_before."),
			});
		}
	}

	Ok(filters)
}

fn normalize_feedback(feedback: &mut FeedbackFilters) -> Result<()> {
	feedback.reviewers = clean_list(std::mem::take(&mut feedback.reviewers), true);
	feedback.tags = clean_list(std::mem::take(&mut feedback.tags), false);

	if let (Some(min), Some(max)) = (&feedback.min_average, &feedback.max_average)
		&& min > max
	{
		return Err(Error::InvalidRequest {
			message: "feedback.min_average must not exceed feedback.max_average.".to_string(),
		});
	}

	Ok(())
}

/// Maps filters onto one source's schema: pushdown where the source accepts the filter key,
/// local post-filtering where it can only select the field, and an error otherwise.
pub(crate) fn compile(
	chain_id: u64,
	filters: &SearchFilters,
	sort: SortKey,
	caps: &SourceCapabilities,
	max_text_results: u32,
) -> Result<SourcePlan> {
	let mut compiler = Compiler {
		chain_id,
		caps,
		filter: Map::new(),
		registration: Map::new(),
		post: Vec::new(),
	};

	compiler.addresses(filters)?;
	compiler.registration_filters(filters)?;
	compiler.time_ranges(filters)?;
	compiler.capability_arrays(filters)?;
	compiler.has_oasf(filters.has_oasf)?;
	compiler.metadata(&filters.metadata)?;

	let feedback = feedback::plan(chain_id, &filters.feedback, sort, caps, &mut compiler.filter)?;
	let text_search = match &filters.full_text {
		Some(text) => {
			let Some(field) = &caps.text_search else {
				return Err(unsupported(chain_id, "full-text search has no index on this source"));
			};

			Some(TextSearchQuery { field: field.clone(), text: text.clone(), first: max_text_results })
		},
		None => None,
	};
	let strategy = strategy_for(chain_id, sort, caps)?;
	let Compiler { mut filter, registration, post, .. } = compiler;

	if !registration.is_empty() {
		filter.insert("registrationFile_".to_string(), Value::Object(registration));
	}

	let mut plan = SourcePlan {
		collection: caps.agents.collection.clone(),
		filter,
		post,
		selection: selection_for(caps),
		text_search,
		feedback,
		strategy,
		ids: None,
		id_pushdown: caps.agents.accepts("id_in"),
	};

	if !filters.agent_ids.is_empty() {
		plan.restrict_ids(
			filters
				.agent_ids
				.iter()
				.filter(|id| id.chain_id() == chain_id)
				.map(|id| id.as_entity_id())
				.collect(),
		);
	}

	Ok(plan)
}

fn strategy_for(chain_id: u64, sort: SortKey, caps: &SourceCapabilities) -> Result<Strategy> {
	match sort {
		SortKey::UpdatedAt | SortKey::CreatedAt | SortKey::LastActivity | SortKey::FeedbackCount => {
			let Some(field) = sort.agent_field() else {
				return Ok(Strategy::Local);
			};

			if caps.supports_keyset(field) {
				return Ok(Strategy::Keyset { field });
			}
			if sort != SortKey::FeedbackCount && !caps.agents.has(field) {
				return Err(unsupported(chain_id, &format!("agents cannot be sorted by {field}")));
			}

			Ok(Strategy::Local)
		},
		SortKey::AverageValue | SortKey::SemanticScore => Ok(Strategy::Local),
	}
}

fn selection_for(caps: &SourceCapabilities) -> Vec<SelectionField> {
	let mut selection: Vec<SelectionField> = AGENT_FIELDS
		.iter()
		.filter(|field| caps.agents.has(field))
		.map(|field| SelectionField::scalar(*field))
		.collect();

	if caps.agents.has("metadata") {
		selection.push(SelectionField::nested(
			"metadata",
			vec![SelectionField::scalar("key"), SelectionField::scalar("value")],
		));
	}

	if let Some(registration) = &caps.registration {
		let fields: Vec<SelectionField> = REGISTRATION_FIELDS
			.iter()
			.filter(|field| registration.has(field))
			.map(|field| SelectionField::scalar(*field))
			.collect();

		if !fields.is_empty() {
			selection.push(SelectionField::nested("registrationFile", fields));
		}
	}

	selection
}

struct Compiler<'a> {
	chain_id: u64,
	caps: &'a SourceCapabilities,
	filter: Map<String, Value>,
	registration: Map<String, Value>,
	post: Vec<PostFilter>,
}
impl Compiler<'_> {
	fn agent(&mut self, key: &str, value: Value, field: &str, post: PostFilter) -> Result<()> {
		if self.caps.agents.accepts(key) {
			self.filter.insert(key.to_string(), value);

			return Ok(());
		}

		self.agent_local(field, post)
	}

	fn agent_local(&mut self, field: &str, post: PostFilter) -> Result<()> {
		if !self.caps.agents.has(field) {
			return Err(unsupported(self.chain_id, &format!("agents cannot filter on {field}")));
		}

		self.post.push(post);

		Ok(())
	}

	fn registration(&mut self, key: &str, value: Value, field: &str, post: PostFilter) -> Result<()> {
		if self.caps.registration_accepts(key) {
			self.registration.insert(key.to_string(), value);

			return Ok(());
		}
		if !self.caps.registration_has(field) {
			return Err(unsupported(
				self.chain_id,
				&format!("registration files cannot filter on {field}"),
			));
		}

		self.post.push(post);

		Ok(())
	}

	fn addresses(&mut self, filters: &SearchFilters) -> Result<()> {
		if !filters.owners.is_empty() {
			self.agent(
				"owner_in",
				strings(&filters.owners),
				"owner",
				PostFilter::AnyOf { field: Field::Agent("owner"), values: filters.owners.clone() },
			)?;
		}

		match filters.operators.as_slice() {
			[] => {},
			[single] => self.agent(
				"operators_contains",
				Value::Array(vec![Value::String(single.clone())]),
				"operators",
				PostFilter::AnyElement {
					field: Field::Agent("operators"),
					values: vec![single.clone()],
				},
			)?,
			many => self.agent_local(
				"operators",
				PostFilter::AnyElement { field: Field::Agent("operators"), values: many.to_vec() },
			)?,
		}

		if let Some(wallet) = &filters.wallet {
			self.agent(
				"agentWallet",
				Value::String(wallet.clone()),
				"agentWallet",
				PostFilter::AnyOf { field: Field::Agent("agentWallet"), values: vec![wallet.clone()] },
			)?;
		}

		Ok(())
	}

	fn registration_filters(&mut self, filters: &SearchFilters) -> Result<()> {
		for (needle, field) in [
			(&filters.name, "name"),
			(&filters.description, "description"),
			(&filters.mcp_endpoint_contains, "mcpEndpoint"),
			(&filters.a2a_endpoint_contains, "a2aEndpoint"),
		] {
			if let Some(needle) = needle {
				self.registration(
					&format!("{field}_contains_nocase"),
					Value::String(needle.clone()),
					field,
					PostFilter::ContainsNoCase {
						field: Field::Registration(field),
						needle: needle.to_lowercase(),
					},
				)?;
			}
		}

		for (expected, field) in [
			(filters.has_mcp, "mcpEndpoint"),
			(filters.has_a2a, "a2aEndpoint"),
			(filters.has_web, "webEndpoint"),
			(filters.has_ens, "ens"),
			(filters.has_did, "did"),
		] {
			if let Some(expected) = expected {
				let key = if expected { format!("{field}_not") } else { field.to_string() };

				self.registration(&key, Value::Null, field, PostFilter::Present {
					field: Field::Registration(field),
					expected,
				})?;
			}
		}

		for (expected, field) in [(filters.active, "active"), (filters.x402_support, "x402Support")] {
			if let Some(expected) = expected {
				self.registration(field, Value::Bool(expected), field, PostFilter::Flag {
					field: Field::Registration(field),
					expected,
				})?;
			}
		}

		Ok(())
	}

	fn time_ranges(&mut self, filters: &SearchFilters) -> Result<()> {
		for (bound, field, lower) in [
			(filters.created_after, "createdAt", true),
			(filters.created_before, "createdAt", false),
			(filters.updated_after, "updatedAt", true),
			(filters.updated_before, "updatedAt", false),
		] {
			let Some(bound) = bound.map(OffsetDateTime::unix_timestamp) else {
				continue;
			};
			let (key, post) = if lower {
				(format!("{field}_gte"), PostFilter::AtLeast { field: Field::Agent(field), min: bound })
			} else {
				(format!("{field}_lte"), PostFilter::AtMost { field: Field::Agent(field), max: bound })
			};

			self.agent(&key, Value::String(bound.to_string()), field, post)?;
		}

		Ok(())
	}

	fn capability_arrays(&mut self, filters: &SearchFilters) -> Result<()> {
		for (values, field) in [
			(&filters.mcp_tools, "mcpTools"),
			(&filters.mcp_prompts, "mcpPrompts"),
			(&filters.mcp_resources, "mcpResources"),
			(&filters.a2a_skills, "a2aSkills"),
			(&filters.oasf_skills, "oasfSkills"),
			(&filters.oasf_domains, "oasfDomains"),
			(&filters.supported_trusts, "supportedTrusts"),
		] {
			if values.is_empty() {
				continue;
			}

			self.registration(
				&format!("{field}_contains"),
				strings(values),
				field,
				PostFilter::ContainsAll { field: Field::Registration(field), values: values.clone() },
			)?;
		}

		Ok(())
	}

	/// Native `hasOASF` when the source has it; otherwise a skills-array approximation that is
	/// always re-checked locally against skills and domains.
	fn has_oasf(&mut self, expected: Option<bool>) -> Result<()> {
		let Some(expected) = expected else {
			return Ok(());
		};

		if self.caps.registration_accepts("hasOASF") {
			self.registration.insert("hasOASF".to_string(), Value::Bool(expected));

			return Ok(());
		}
		if !self.caps.registration_has("oasfSkills") {
			return Err(unsupported(self.chain_id, "hasOASF needs oasfSkills on registration files"));
		}

		let approximation = if expected { "oasfSkills_not" } else { "oasfSkills" };

		if self.caps.registration_accepts(approximation) {
			self.registration.insert(approximation.to_string(), Value::Array(Vec::new()));
		}

		self.post.push(PostFilter::HasOasf(expected));

		Ok(())
	}

	/// The first constraint is pushed down when possible; all of them are checked locally.
	fn metadata(&mut self, constraints: &[MetadataFilter]) -> Result<()> {
		let Some(first) = constraints.first() else {
			return Ok(());
		};

		if !self.caps.agents.has("metadata") {
			return Err(unsupported(self.chain_id, "agents expose no metadata"));
		}
		if self.caps.agents.accepts("metadata_") {
			let mut nested = Map::new();

			nested.insert("key".to_string(), Value::String(first.key.clone()));

			if let Some(value) = &first.value {
				nested.insert("value".to_string(), Value::String(value.clone()));
			}

			self.filter.insert("metadata_".to_string(), Value::Object(nested));
		}

		self.post.push(PostFilter::Metadata(constraints.to_vec()));

		Ok(())
	}
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
	version: u8,
	filters: &'a SearchFilters,
	sort: SortKey,
	direction: SortDirection,
	chains: &'a [u64],
	semantic_applied: bool,
	semantic_degraded: bool,
	semantic_min_score: f64,
	semantic_limit: u32,
}

/// Stable hash of everything that shapes the result order. Page size is left out so callers
/// may change it between pages.
pub(crate) fn fingerprint(
	filters: &SearchFilters,
	sort: SortKey,
	direction: SortDirection,
	chains: &[u64],
	semantic: &SemanticOutcome,
) -> String {
	let input = FingerprintInput {
		version: FINGERPRINT_VERSION,
		filters,
		sort,
		direction,
		chains,
		semantic_applied: semantic.applied,
		semantic_degraded: semantic.degraded,
		semantic_min_score: semantic.min_score,
		semantic_limit: semantic.limit,
	};
	// Struct and map keys serialize in a fixed order, so equal inputs hash equally.
	let bytes = serde_json::to_vec(&input).unwrap_or_default();

	blake3::hash(&bytes).to_hex().to_string()
}

/// Per-chain id restrictions from explicit agent ids and semantic candidates. `None` means
/// unrestricted; an empty set means the chain has nothing to return.
pub(crate) fn chain_scopes(
	filters: &SearchFilters,
	chains: &[u64],
	scores: Option<&Arc<HashMap<String, f64>>>,
) -> BTreeMap<u64, Option<BTreeSet<String>>> {
	chains
		.iter()
		.map(|chain_id| {
			let explicit = (!filters.agent_ids.is_empty()).then(|| {
				filters
					.agent_ids
					.iter()
					.filter(|id| id.chain_id() == *chain_id)
					.map(|id| id.as_entity_id())
					.collect::<BTreeSet<_>>()
			});
			let semantic = scores.map(|scores| {
				let prefix = format!("{chain_id}:");

				scores.keys().filter(|id| id.starts_with(&prefix)).cloned().collect::<BTreeSet<_>>()
			});
			let scope = match (explicit, semantic) {
				(Some(explicit), Some(semantic)) =>
					Some(explicit.intersection(&semantic).cloned().collect()),
				(explicit, semantic) => explicit.or(semantic),
			};

			(*chain_id, scope)
		})
		.collect()
}

fn unsupported(chain_id: u64, what: &str) -> Error {
	Error::UnsupportedFilterCombination { message: format!("Chain {chain_id}: {what}.") }
}

fn clean_text(raw: Option<String>) -> Option<String> {
	raw.map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty())
}

fn clean_list(raw: Vec<String>, lowercase: bool) -> Vec<String> {
	let mut out: Vec<String> = Vec::with_capacity(raw.len());

	for item in raw {
		let item = item.trim();
		let item = if lowercase { item.to_lowercase() } else { item.to_string() };

		if !item.is_empty() && !out.contains(&item) {
			out.push(item);
		}
	}

	out
}

fn strings(values: &[String]) -> Value {
	Value::Array(values.iter().cloned().map(Value::String).collect())
}

pub(crate) fn lookup<'a>(record: &'a Value, path: &[&str]) -> Option<&'a Value> {
	let mut current = record;

	for segment in path {
		current = current.get(segment)?;
	}

	(!current.is_null()).then_some(current)
}

fn is_present(value: Option<&Value>) -> bool {
	match value {
		Some(Value::String(raw)) => !raw.trim().is_empty(),
		Some(Value::Null) | None => false,
		Some(_) => true,
	}
}

fn string_items(value: Option<&Value>) -> Vec<&str> {
	match value {
		Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
		_ => Vec::new(),
	}
}

/// Subgraph `BigInt`s arrive as strings.
pub(crate) fn graph_int(value: Option<&Value>) -> Option<i64> {
	match value? {
		Value::String(raw) => raw.trim().parse().ok(),
		Value::Number(raw) => raw.as_i64(),
		_ => None,
	}
}
