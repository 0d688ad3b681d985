use std::collections::BTreeMap;

use scout_domain::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
	search::{feedback::JoinedRecord, filter::lookup},
	time_serde,
};

/// One agent as returned to callers, independent of the subgraph schema it came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
	/// Entity id, `{chain_id}:{token_id}`.
	pub id: String,
	pub chain_id: u64,
	pub token_id: String,
	pub name: Option<String>,
	pub description: Option<String>,
	pub image: Option<String>,
	pub owner: Option<String>,
	pub operators: Vec<String>,
	pub wallet: Option<String>,
	pub active: Option<bool>,
	pub x402_support: Option<bool>,
	pub endpoints: Vec<Endpoint>,
	pub mcp_tools: Vec<String>,
	pub mcp_prompts: Vec<String>,
	pub mcp_resources: Vec<String>,
	pub a2a_skills: Vec<String>,
	pub oasf_skills: Vec<String>,
	pub oasf_domains: Vec<String>,
	pub supported_trusts: Vec<String>,
	pub metadata: BTreeMap<String, String>,
	#[serde(default, with = "crate::time_serde::option")]
	pub created_at: Option<OffsetDateTime>,
	#[serde(default, with = "crate::time_serde::option")]
	pub updated_at: Option<OffsetDateTime>,
	#[serde(default, with = "crate::time_serde::option")]
	pub last_activity: Option<OffsetDateTime>,
	pub feedback_count: Option<u64>,
	pub average_value: Option<Decimal>,
	pub semantic_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
	pub kind: EndpointKind,
	pub value: String,
	pub version: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
	Mcp,
	A2a,
	Web,
	Ens,
	Did,
}

const ENDPOINT_FIELDS: &[(EndpointKind, &str, Option<&str>)] = &[
	(EndpointKind::Mcp, "mcpEndpoint", Some("mcpVersion")),
	(EndpointKind::A2a, "a2aEndpoint", Some("a2aVersion")),
	(EndpointKind::Web, "webEndpoint", None),
	(EndpointKind::Ens, "ens", None),
	(EndpointKind::Did, "did", None),
];

pub(crate) fn assemble(record: JoinedRecord) -> AgentSummary {
	let raw = &record.raw;
	let registration = |field: &str| lookup(raw, &["registrationFile", field]);
	let text = |value: Option<&Value>| {
		value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
	};
	let list = |field: &str| strings(registration(field));
	let timestamp = |field: &str| lookup(raw, &[field]).and_then(time_serde::from_graph_seconds);
	let token_id = match record.id.split_once(':') {
		Some((_, token)) => token.to_string(),
		None => text(lookup(raw, &["agentId"])).unwrap_or_else(|| record.id.clone()),
	};
	let endpoints = ENDPOINT_FIELDS
		.iter()
		.filter_map(|&(kind, field, version)| {
			let value = text(registration(field))?;

			Some(Endpoint {
				kind,
				value,
				version: version.and_then(|version| text(registration(version))),
			})
		})
		.collect();
	let metadata = match lookup(raw, &["metadata"]) {
		Some(Value::Array(entries)) => entries
			.iter()
			.filter_map(|entry| {
				let key = entry.get("key").and_then(Value::as_str)?;
				let value = entry.get("value").and_then(Value::as_str).unwrap_or_default();

				Some((key.to_string(), value.to_string()))
			})
			.collect(),
		_ => BTreeMap::new(),
	};

	AgentSummary {
		id: record.id.clone(),
		chain_id: record.chain_id,
		token_id,
		name: text(registration("name")),
		description: text(registration("description")),
		image: text(registration("image")),
		owner: text(lookup(raw, &["owner"])),
		operators: strings(lookup(raw, &["operators"])),
		wallet: text(lookup(raw, &["agentWallet"])),
		active: registration("active").and_then(Value::as_bool),
		x402_support: registration("x402Support").and_then(Value::as_bool),
		endpoints,
		mcp_tools: list("mcpTools"),
		mcp_prompts: list("mcpPrompts"),
		mcp_resources: list("mcpResources"),
		a2a_skills: list("a2aSkills"),
		oasf_skills: list("oasfSkills"),
		oasf_domains: list("oasfDomains"),
		supported_trusts: list("supportedTrusts"),
		metadata,
		created_at: timestamp("createdAt"),
		updated_at: timestamp("updatedAt"),
		last_activity: timestamp("lastActivity"),
		feedback_count: record.feedback_count,
		average_value: record.average_value.clone(),
		semantic_score: record.semantic_score,
	}
}

fn strings(value: Option<&Value>) -> Vec<String> {
	match value {
		Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
		_ => Vec::new(),
	}
}
