use std::collections::{BTreeMap, BTreeSet};

use scout_providers::subgraph::SchemaSnapshot;

/// One entity type as a schema exposes it.
#[derive(Clone, Debug)]
pub struct EntityShape {
	/// Root query field; empty for types only reachable through another entity.
	pub collection: String,
	pub type_name: String,
	pub fields: BTreeSet<String>,
	pub filter: BTreeSet<String>,
}
impl EntityShape {
	fn new(collection: &str, type_name: &str, fields: &[&str], filter: Vec<String>) -> Self {
		Self {
			collection: collection.to_string(),
			type_name: type_name.to_string(),
			fields: fields.iter().map(|field| field.to_string()).collect(),
			filter: filter.into_iter().collect(),
		}
	}
}

/// The schema a [`crate::MemorySubgraph`] answers with.
#[derive(Clone, Debug)]
pub struct SchemaProfile {
	pub agents: EntityShape,
	pub registration: EntityShape,
	pub stats: Option<EntityShape>,
	pub feedback: EntityShape,
	pub text_search: Option<String>,
}
impl SchemaProfile {
	/// Deployment with aggregates on the agent, native `hasOASF` and a full-text index.
	pub fn current() -> Self {
		Self {
			agents: EntityShape::new("agents", "Agent", AGENT_FIELDS, agent_filter(true)),
			registration: EntityShape::new(
				"",
				"AgentRegistrationFile",
				REGISTRATION_FIELDS,
				registration_filter(true),
			),
			stats: Some(EntityShape::new(
				"agentStats",
				"AgentStats",
				&["id", "totalFeedback", "averageFeedbackValue"],
				owned(&["id", "id_in"]),
			)),
			feedback: EntityShape::new("feedbacks", "Feedback", FEEDBACK_FIELDS, owned(FEEDBACK_FILTER)),
			text_search: Some("agentSearch".to_string()),
		}
	}

	/// Older deployment: aliased collections, aggregates only in a stats collection, no
	/// `hasOASF`, no case-insensitive name filter and no full-text index.
	pub fn legacy() -> Self {
		let agent_fields: Vec<&str> = AGENT_FIELDS
			.iter()
			.copied()
			.filter(|field| !matches!(*field, "totalFeedback" | "averageFeedbackValue"))
			.collect();
		let registration_fields: Vec<&str> =
			REGISTRATION_FIELDS.iter().copied().filter(|field| *field != "hasOASF").collect();

		Self {
			agents: EntityShape::new("agentEntities", "AgentEntity", &agent_fields, agent_filter(false)),
			registration: EntityShape::new(
				"",
				"RegistrationFile",
				&registration_fields,
				registration_filter(false),
			),
			stats: Some(EntityShape::new(
				"agentStatistics",
				"AgentStatistic",
				&["id", "totalFeedback", "averageFeedbackValue"],
				owned(&["id", "id_in"]),
			)),
			feedback: EntityShape::new(
				"feedbackEntries",
				"FeedbackEntry",
				FEEDBACK_FIELDS,
				owned(FEEDBACK_FILTER),
			),
			text_search: None,
		}
	}

	pub fn has_agent_aggregates(&self) -> bool {
		self.agents.fields.contains("totalFeedback")
	}

	pub fn has_native_oasf(&self) -> bool {
		self.registration.fields.contains("hasOASF")
	}

	pub(crate) fn shape(&self, collection: &str) -> Option<&EntityShape> {
		[Some(&self.agents), self.stats.as_ref(), Some(&self.feedback)]
			.into_iter()
			.flatten()
			.find(|shape| shape.collection == collection)
	}

	pub fn snapshot(&self) -> SchemaSnapshot {
		let mut query_fields = BTreeSet::new();
		let mut types = BTreeMap::new();

		for shape in [Some(&self.agents), Some(&self.registration), self.stats.as_ref(), Some(&self.feedback)]
			.into_iter()
			.flatten()
		{
			if !shape.collection.is_empty() {
				query_fields.insert(shape.collection.clone());
			}

			types.insert(shape.type_name.clone(), shape.fields.clone());
			types.insert(format!("{}_filter", shape.type_name), shape.filter.clone());
		}

		if let Some(text_search) = &self.text_search {
			query_fields.insert(text_search.clone());
		}

		SchemaSnapshot { query_fields, types }
	}
}

const AGENT_FIELDS: &[&str] = &[
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
	"metadata",
	"registrationFile",
];
const REGISTRATION_FIELDS: &[&str] = &[
	"id",
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
const FEEDBACK_FIELDS: &[&str] =
	&["id", "agent", "clientAddress", "value", "tag1", "tag2", "isRevoked"];
const FEEDBACK_FILTER: &[&str] = &["id", "id_gt", "agent", "agent_in", "isRevoked", "clientAddress_in"];

fn agent_filter(aggregates: bool) -> Vec<String> {
	let mut keys = owned(&[
		"id",
		"id_gt",
		"id_in",
		"owner_in",
		"operators_contains",
		"agentWallet",
		"metadata_",
		"registrationFile_",
	]);

	for field in ["createdAt", "updatedAt", "lastActivity"] {
		keys.extend(range_keys(field));
	}

	if aggregates {
		keys.extend(range_keys("totalFeedback"));
		keys.extend(owned(&["averageFeedbackValue_gte", "averageFeedbackValue_lte"]));
	}

	keys
}

fn range_keys(field: &str) -> Vec<String> {
	["", "_gt", "_gte", "_lt", "_lte"].iter().map(|suffix| format!("{field}{suffix}")).collect()
}

fn registration_filter(current: bool) -> Vec<String> {
	let mut keys = owned(&[
		"description_contains_nocase",
		"mcpEndpoint_contains_nocase",
		"a2aEndpoint_contains_nocase",
		"active",
		"x402Support",
		"mcpTools_contains",
		"mcpPrompts_contains",
		"mcpResources_contains",
		"a2aSkills_contains",
		"oasfSkills",
		"oasfSkills_not",
		"oasfSkills_contains",
		"oasfDomains_contains",
		"supportedTrusts_contains",
	]);

	for field in ["mcpEndpoint", "a2aEndpoint", "webEndpoint", "ens", "did"] {
		keys.push(field.to_string());
		keys.push(format!("{field}_not"));
	}

	if current {
		keys.extend(owned(&["name_contains_nocase", "hasOASF"]));
	}

	keys
}

fn owned(keys: &[&str]) -> Vec<String> {
	keys.iter().map(|key| key.to_string()).collect()
}
