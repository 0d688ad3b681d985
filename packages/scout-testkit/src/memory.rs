use std::{
	cmp::Ordering,
	collections::BTreeMap,
	sync::{
		Mutex,
		atomic::{AtomicU32, Ordering as AtomicOrdering},
	},
	time::Duration,
};

use scout_domain::{Decimal, SortDirection};
use scout_providers::subgraph::{CollectionQuery, SchemaSnapshot, SelectionField, TextSearchQuery};
use scout_service::{AgentSource, BoxFuture, ProviderResult};
use serde_json::{Map, Value, json};

use crate::{
	Error, Result,
	fixture::{self, AgentFixture, FeedbackFixture},
	schema::SchemaProfile,
};

/// A failure a [`MemorySubgraph`] injects before answering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
	/// The next `n` requests fail with HTTP 503.
	Transient(u32),
	/// Every request hangs past any reasonable timeout.
	Hang,
	/// Every request fails with a GraphQL error.
	Malformed,
}

/// A collection query as the subgraph received it.
#[derive(Clone, Debug, PartialEq)]
pub struct LoggedQuery {
	pub collection: String,
	pub filter: Map<String, Value>,
	pub order_by: Option<String>,
	pub first: u32,
	pub skip: u32,
}

/// An in-memory subgraph deployment speaking the collection-query dialect of
/// [`AgentSource`].
pub struct MemorySubgraph {
	chain_id: u64,
	profile: SchemaProfile,
	collections: BTreeMap<String, Vec<Value>>,
	tie_skew: bool,
	fault: Mutex<Option<Fault>>,
	requests: AtomicU32,
	introspections: AtomicU32,
	log: Mutex<Vec<LoggedQuery>>,
}
impl MemorySubgraph {
	pub fn builder(chain_id: u64, profile: SchemaProfile) -> MemorySubgraphBuilder {
		MemorySubgraphBuilder {
			chain_id,
			profile,
			agents: Vec::new(),
			feedback: Vec::new(),
			tie_skew: false,
			fault: None,
		}
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	pub fn profile(&self) -> &SchemaProfile {
		&self.profile
	}

	pub fn set_fault(&self, fault: Option<Fault>) {
		*self.fault.lock().unwrap_or_else(|err| err.into_inner()) = fault;
	}

	/// Requests received, including failed ones.
	pub fn requests(&self) -> u32 {
		self.requests.load(AtomicOrdering::Relaxed)
	}

	/// Schema introspections received, including failed ones.
	pub fn introspections(&self) -> u32 {
		self.introspections.load(AtomicOrdering::Relaxed)
	}

	pub fn queries(&self) -> Vec<LoggedQuery> {
		self.log.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	async fn inject(&self) -> ProviderResult<()> {
		self.requests.fetch_add(1, AtomicOrdering::Relaxed);

		let fault = {
			let mut fault = self.fault.lock().unwrap_or_else(|err| err.into_inner());
			let current = *fault;

			if let Some(Fault::Transient(remaining)) = current {
				*fault = remaining.checked_sub(1).filter(|left| *left > 0).map(Fault::Transient);
			}

			current
		};

		match fault {
			None | Some(Fault::Transient(0)) => Ok(()),
			Some(Fault::Transient(_)) => Err(scout_providers::Error::Status {
				status: 503,
				message: "Injected unavailability.".to_string(),
			}),
			Some(Fault::Hang) => {
				tokio::time::sleep(Duration::from_secs(3_600)).await;

				Ok(())
			},
			Some(Fault::Malformed) => Err(scout_providers::Error::GraphQl {
				message: "Injected malformed query.".to_string(),
			}),
		}
	}

	fn run(&self, query: &CollectionQuery) -> ProviderResult<Vec<Value>> {
		self.log.lock().unwrap_or_else(|err| err.into_inner()).push(LoggedQuery {
			collection: query.collection.clone(),
			filter: query.filter.clone(),
			order_by: query.order_by.clone(),
			first: query.first,
			skip: query.skip,
		});

		let Some(shape) = self.profile.shape(&query.collection) else {
			return Err(graphql(format!("Type `Query` has no field `{}`.", query.collection)));
		};

		self.check_filter(&shape.type_name, &shape.filter, &query.filter)?;

		for field in &query.selection {
			if !shape.fields.contains(field.name()) {
				return Err(graphql(format!(
					"Type `{}` has no field `{}`.",
					shape.type_name,
					field.name()
				)));
			}
		}

		let rows = self.collections.get(&query.collection).map(Vec::as_slice).unwrap_or_default();
		let mut matched: Vec<&Value> = rows.iter().filter(|row| matches(row, &query.filter)).collect();
		let direction = query.order_direction.unwrap_or(SortDirection::Asc);
		let order_by = query.order_by.as_deref().unwrap_or("id");

		matched.sort_by(|a, b| {
			let primary = compare(a.get(order_by), b.get(order_by)).unwrap_or(Ordering::Equal);
			let primary = match direction {
				SortDirection::Asc => primary,
				SortDirection::Desc => primary.reverse(),
			};
			let tie = compare(a.get("id"), b.get("id")).unwrap_or(Ordering::Equal);

			primary.then(if self.tie_skew { tie.reverse() } else { tie })
		});

		Ok(matched
			.into_iter()
			.skip(query.skip as usize)
			.take(query.first as usize)
			.map(|row| project(row, &query.selection))
			.collect())
	}

	fn check_filter(
		&self,
		type_name: &str,
		accepted: &std::collections::BTreeSet<String>,
		filter: &Map<String, Value>,
	) -> ProviderResult<()> {
		for (key, value) in filter {
			if !accepted.contains(key) {
				return Err(graphql(format!("`{type_name}_filter` has no field `{key}`.")));
			}
			if key == "registrationFile_"
				&& let Value::Object(nested) = value
			{
				let registration = &self.profile.registration;

				self.check_filter(&registration.type_name, &registration.filter, nested)?;
			}
		}

		Ok(())
	}

	fn text_search(&self, query: &TextSearchQuery) -> ProviderResult<Vec<String>> {
		if self.profile.text_search.as_deref() != Some(query.field.as_str()) {
			return Err(graphql(format!("Type `Query` has no field `{}`.", query.field)));
		}

		let needle = query.text.to_lowercase();
		let agents = self.collections.get(&self.profile.agents.collection).map(Vec::as_slice).unwrap_or_default();

		Ok(agents
			.iter()
			.filter(|agent| {
				["name", "description"].iter().any(|field| {
					agent
						.get("registrationFile")
						.and_then(|registration| registration.get(field))
						.and_then(Value::as_str)
						.is_some_and(|text| text.to_lowercase().contains(&needle))
				})
			})
			.filter_map(|agent| agent.get("id").and_then(Value::as_str).map(str::to_string))
			.take(query.first as usize)
			.collect())
	}
}

impl AgentSource for MemorySubgraph {
	fn introspect(&self) -> BoxFuture<'_, ProviderResult<SchemaSnapshot>> {
		Box::pin(async move {
			self.introspections.fetch_add(1, AtomicOrdering::Relaxed);
			self.inject().await?;

			Ok(self.profile.snapshot())
		})
	}

	fn query_collection<'a>(
		&'a self,
		query: &'a CollectionQuery,
	) -> BoxFuture<'a, ProviderResult<Vec<Value>>> {
		Box::pin(async move {
			self.inject().await?;
			self.run(query)
		})
	}

	fn search_text<'a>(
		&'a self,
		query: &'a TextSearchQuery,
	) -> BoxFuture<'a, ProviderResult<Vec<String>>> {
		Box::pin(async move {
			self.inject().await?;
			self.text_search(query)
		})
	}
}

pub struct MemorySubgraphBuilder {
	chain_id: u64,
	profile: SchemaProfile,
	agents: Vec<AgentFixture>,
	feedback: Vec<FeedbackFixture>,
	tie_skew: bool,
	fault: Option<Fault>,
}
impl MemorySubgraphBuilder {
	pub fn agent(mut self, agent: AgentFixture) -> Self {
		self.agents.push(agent);

		self
	}

	pub fn agents(mut self, agents: impl IntoIterator<Item = AgentFixture>) -> Self {
		self.agents.extend(agents);

		self
	}

	pub fn feedback(mut self, entry: FeedbackFixture) -> Self {
		self.feedback.push(entry);

		self
	}

	/// Returns rows with equal sort values in descending id order.
	pub fn tie_skew(mut self) -> Self {
		self.tie_skew = true;

		self
	}

	pub fn fault(mut self, fault: Fault) -> Self {
		self.fault = Some(fault);

		self
	}

	pub fn build(self) -> Result<MemorySubgraph> {
		let profile = self.profile;
		let mut collections = BTreeMap::new();
		let mut agents = Vec::with_capacity(self.agents.len());
		let mut stats = Vec::new();

		for agent in &self.agents {
			if agent.chain_id != self.chain_id {
				return Err(Error::Message(format!(
					"Agent {} does not belong to chain {}.",
					agent.id(),
					self.chain_id
				)));
			}

			let id = agent.id();
			let (count, average) = fixture::aggregates(&id, &self.feedback);
			let mut row = json!({
				"id": id,
				"chainId": agent.chain_id.to_string(),
				"agentId": agent.token_id.to_string(),
				"owner": agent.owner,
				"operators": agent.operators,
				"agentWallet": agent.wallet,
				"createdAt": agent.created_at.to_string(),
				"updatedAt": agent.updated_at.to_string(),
				"lastActivity": agent.last_activity.to_string(),
				"metadata": agent
					.metadata
					.iter()
					.map(|(key, value)| json!({ "key": key, "value": value }))
					.collect::<Vec<_>>(),
				"registrationFile": agent.registration_row(profile.has_native_oasf()),
			});

			if profile.has_agent_aggregates()
				&& let Value::Object(fields) = &mut row
			{
				fields.insert("totalFeedback".to_string(), json!(count.to_string()));
				fields.insert("averageFeedbackValue".to_string(), json!(average));
			}
			if self.feedback.iter().any(|entry| entry.agent_id == id) {
				stats.push(json!({
					"id": id,
					"totalFeedback": count.to_string(),
					"averageFeedbackValue": average,
				}));
			}

			agents.push(row);
		}

		let feedback = self
			.feedback
			.iter()
			.enumerate()
			.map(|(index, entry)| {
				json!({
					"id": format!("{}#{index:04}", entry.agent_id),
					"agent": { "id": entry.agent_id },
					"clientAddress": entry.client,
					"value": entry.value.to_string(),
					"tag1": entry.tag1,
					"tag2": entry.tag2,
					"isRevoked": entry.revoked,
				})
			})
			.collect();

		collections.insert(profile.agents.collection.clone(), agents);
		collections.insert(profile.feedback.collection.clone(), feedback);

		if let Some(stats_shape) = &profile.stats {
			collections.insert(stats_shape.collection.clone(), stats);
		}

		Ok(MemorySubgraph {
			chain_id: self.chain_id,
			profile,
			collections,
			tie_skew: self.tie_skew,
			fault: Mutex::new(self.fault),
			requests: AtomicU32::new(0),
			introspections: AtomicU32::new(0),
			log: Mutex::new(Vec::new()),
		})
	}
}

/// Evaluates a subgraph `where` object against one row.
pub fn matches(row: &Value, filter: &Map<String, Value>) -> bool {
	filter.iter().all(|(key, expected)| matches_key(row, key, expected))
}

const OPERATORS: &[&str] = &[
	"_not_contains",
	"_contains_nocase",
	"_contains",
	"_not_in",
	"_not",
	"_gte",
	"_lte",
	"_gt",
	"_lt",
	"_in",
];

fn matches_key(row: &Value, key: &str, expected: &Value) -> bool {
	match (key, expected) {
		("and", Value::Array(items)) =>
			return items.iter().all(|item| item.as_object().is_some_and(|nested| matches(row, nested))),
		("or", Value::Array(items)) =>
			return items.iter().any(|item| item.as_object().is_some_and(|nested| matches(row, nested))),
		_ => {},
	}

	if let Some(field) = key.strip_suffix('_') {
		let Value::Object(nested) = expected else {
			return false;
		};

		return match row.get(field) {
			Some(Value::Array(items)) => items.iter().any(|item| matches(item, nested)),
			Some(item @ Value::Object(_)) => matches(item, nested),
			_ => false,
		};
	}

	let (field, operator) = OPERATORS
		.iter()
		.find_map(|operator| key.strip_suffix(operator).map(|field| (field, *operator)))
		.unwrap_or((key, ""));
	let actual = row.get(field).unwrap_or(&Value::Null);

	match operator {
		"" => equals(actual, expected),
		"_not" => !equals(actual, expected),
		"_gt" => compare(Some(actual), Some(expected)) == Some(Ordering::Greater),
		"_gte" => compare(Some(actual), Some(expected)).is_some_and(Ordering::is_ge),
		"_lt" => compare(Some(actual), Some(expected)) == Some(Ordering::Less),
		"_lte" => compare(Some(actual), Some(expected)).is_some_and(Ordering::is_le),
		"_in" => expected.as_array().is_some_and(|items| items.iter().any(|item| equals(actual, item))),
		"_not_in" =>
			expected.as_array().is_some_and(|items| !items.iter().any(|item| equals(actual, item))),
		"_contains" => contains(actual, expected),
		"_not_contains" => !contains(actual, expected),
		"_contains_nocase" => match (actual, expected) {
			(Value::String(actual), Value::String(needle)) =>
				actual.to_lowercase().contains(&needle.to_lowercase()),
			_ => false,
		},
		_ => false,
	}
}

fn equals(actual: &Value, expected: &Value) -> bool {
	match (actual, expected) {
		(Value::Object(relation), Value::String(id)) =>
			relation.get("id").and_then(Value::as_str) == Some(id.as_str()),
		(Value::Array(actual), Value::Array(expected)) =>
			actual.len() == expected.len() && actual.iter().zip(expected).all(|(a, b)| equals(a, b)),
		_ => match (number(actual), number(expected)) {
			(Some(a), Some(b)) => a == b,
			_ => actual == expected,
		},
	}
}

fn contains(actual: &Value, expected: &Value) -> bool {
	match (actual, expected) {
		(Value::Array(items), Value::Array(wanted)) =>
			wanted.iter().all(|value| items.iter().any(|item| equals(item, value))),
		(Value::String(actual), Value::String(needle)) => actual.contains(needle.as_str()),
		_ => false,
	}
}

/// Numbers when both sides are numeric, strings otherwise. Nulls sort first.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
	let a = a.filter(|value| !value.is_null());
	let b = b.filter(|value| !value.is_null());

	match (a, b) {
		(None, None) => Some(Ordering::Equal),
		(None, Some(_)) => Some(Ordering::Less),
		(Some(_), None) => Some(Ordering::Greater),
		(Some(a), Some(b)) => match (number(a), number(b)) {
			(Some(a), Some(b)) => Some(a.cmp(&b)),
			_ => match (a.as_str(), b.as_str()) {
				(Some(a), Some(b)) => Some(a.cmp(b)),
				_ => None,
			},
		},
	}
}

fn number(value: &Value) -> Option<Decimal> {
	match value {
		Value::String(raw) => raw.parse().ok(),
		Value::Number(raw) => raw.to_string().parse().ok(),
		_ => None,
	}
}

fn project(row: &Value, selection: &[SelectionField]) -> Value {
	let mut out = Map::new();

	for field in selection {
		let value = row.get(field.name()).cloned().unwrap_or(Value::Null);
		let value = match (field, value) {
			(SelectionField::Nested { fields, .. }, Value::Array(items)) =>
				Value::Array(items.iter().map(|item| project(item, fields)).collect()),
			(SelectionField::Nested { fields, .. }, item @ Value::Object(_)) => project(&item, fields),
			(_, value) => value,
		};

		out.insert(field.name().to_string(), value);
	}

	Value::Object(out)
}

fn graphql(message: String) -> scout_providers::Error {
	scout_providers::Error::GraphQl { message }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn where_clause_operators() {
		let row = json!({
			"id": "1:5",
			"createdAt": "120",
			"operators": ["0xa", "0xb"],
			"agent": { "id": "1:2" },
			"registrationFile": { "name": "Price Oracle", "oasfSkills": [] },
			"metadata": [{ "key": "region", "value": "eu" }]
		});
		let filter = |value: Value| value.as_object().cloned().unwrap_or_default();

		assert!(matches(&row, &filter(json!({ "createdAt_gt": "99", "createdAt_lte": "120" }))));
		assert!(!matches(&row, &filter(json!({ "createdAt_lt": "120" }))));
		assert!(matches(&row, &filter(json!({ "operators_contains": ["0xb"] }))));
		assert!(matches(&row, &filter(json!({ "agent_in": ["1:2", "1:3"] }))));
		assert!(matches(&row, &filter(json!({ "id_gt": "1:4" }))));
		assert!(matches(
			&row,
			&filter(json!({ "registrationFile_": { "name_contains_nocase": "oracle", "oasfSkills": [] } }))
		));
		assert!(!matches(&row, &filter(json!({ "registrationFile_": { "oasfSkills_not": [] } }))));
		assert!(matches(&row, &filter(json!({ "metadata_": { "key": "region" } }))));
	}
}
