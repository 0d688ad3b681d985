use std::{
	collections::{BTreeMap, BTreeSet},
	fmt::Write as _,
	time::Duration,
};

use reqwest::{Client, header::HeaderMap};
use scout_domain::SortDirection;
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const INTROSPECTION_QUERY: &str = "query { __schema { queryType { fields { name } } types { name fields { name } inputFields { name } } } }";

/// Names a subgraph deployment exposes: root query fields and the members of every type.
///
/// Object types contribute `fields`, input types (`Agent_filter`, ...) contribute
/// `inputFields`; both land in the same member set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
	pub query_fields: BTreeSet<String>,
	pub types: BTreeMap<String, BTreeSet<String>>,
}
impl SchemaSnapshot {
	pub fn has_query_field(&self, name: &str) -> bool {
		self.query_fields.contains(name)
	}

	pub fn has_type(&self, name: &str) -> bool {
		self.types.contains_key(name)
	}

	pub fn type_has_field(&self, type_name: &str, field: &str) -> bool {
		self.types.get(type_name).is_some_and(|fields| fields.contains(field))
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectionField {
	Scalar(String),
	Nested { name: String, fields: Vec<SelectionField> },
}
impl SelectionField {
	pub fn scalar(name: impl Into<String>) -> Self {
		Self::Scalar(name.into())
	}

	pub fn nested(name: impl Into<String>, fields: Vec<SelectionField>) -> Self {
		Self::Nested { name: name.into(), fields }
	}

	pub fn name(&self) -> &str {
		match self {
			Self::Scalar(name) | Self::Nested { name, .. } => name,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollectionQuery {
	pub collection: String,
	pub filter: Map<String, Value>,
	pub order_by: Option<String>,
	pub order_direction: Option<SortDirection>,
	pub first: u32,
	pub skip: u32,
	pub selection: Vec<SelectionField>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSearchQuery {
	pub field: String,
	pub text: String,
	pub first: u32,
}

pub struct SubgraphClient {
	client: Client,
	endpoint: String,
}
impl SubgraphClient {
	pub fn new(endpoint: impl Into<String>, timeout: Duration, headers: HeaderMap) -> Result<Self> {
		let client = Client::builder().timeout(timeout).default_headers(headers).build()?;

		Ok(Self { client, endpoint: endpoint.into() })
	}

	pub async fn introspect(&self) -> Result<SchemaSnapshot> {
		let data = self.post(INTROSPECTION_QUERY).await?;

		parse_introspection(&data)
	}

	pub async fn query_collection(&self, query: &CollectionQuery) -> Result<Vec<Value>> {
		let data = self.post(&render_collection_query(query)).await?;

		extract_data_field(data, &query.collection)
	}

	/// Entity ids matching a full-text search.
	pub async fn search_text(&self, query: &TextSearchQuery) -> Result<Vec<String>> {
		let data = self.post(&render_text_search_query(query)).await?;
		let rows = extract_data_field(data, &query.field)?;

		Ok(rows
			.iter()
			.filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
			.collect())
	}

	/// Posts a GraphQL document and returns its `data` object.
	pub async fn post(&self, query: &str) -> Result<Value> {
		let body = serde_json::json!({ "query": query });
		let res = self.client.post(&self.endpoint).json(&body).send().await?;
		let json: Value = res.error_for_status()?.json().await?;

		unwrap_graphql_response(json)
	}
}

pub fn render_collection_query(query: &CollectionQuery) -> String {
	let mut args = vec![format!("first: {}", query.first)];

	if query.skip > 0 {
		args.push(format!("skip: {}", query.skip));
	}
	if !query.filter.is_empty() {
		args.push(format!("where: {}", render_input_value(&Value::Object(query.filter.clone()))));
	}
	if let Some(order_by) = &query.order_by {
		args.push(format!("orderBy: {order_by}"));
	}
	if let Some(direction) = query.order_direction {
		args.push(format!("orderDirection: {}", direction.as_str()));
	}

	format!(
		"query {{ {}({}) {{ {} }} }}",
		query.collection,
		args.join(", "),
		render_selection(&query.selection)
	)
}

pub fn render_text_search_query(query: &TextSearchQuery) -> String {
	format!(
		"query {{ {}(text: {}, first: {}) {{ id }} }}",
		query.field,
		Value::String(query.text.clone()),
		query.first
	)
}

/// Renders JSON as a GraphQL input literal: object keys stay bare, everything else keeps its
/// JSON spelling.
pub fn render_input_value(value: &Value) -> String {
	match value {
		Value::Object(map) => {
			let mut out = String::from("{");

			for (idx, (key, value)) in map.iter().enumerate() {
				if idx > 0 {
					out.push_str(", ");
				}

				let _ = write!(out, "{key}: {}", render_input_value(value));
			}

			out.push('}');

			out
		},
		Value::Array(items) => {
			let rendered: Vec<String> = items.iter().map(render_input_value).collect();

			format!("[{}]", rendered.join(", "))
		},
		other => other.to_string(),
	}
}

pub fn render_selection(fields: &[SelectionField]) -> String {
	fields
		.iter()
		.map(|field| match field {
			SelectionField::Scalar(name) => name.clone(),
			SelectionField::Nested { name, fields } =>
				format!("{name} {{ {} }}", render_selection(fields)),
		})
		.collect::<Vec<_>>()
		.join(" ")
}

pub fn parse_introspection(data: &Value) -> Result<SchemaSnapshot> {
	let schema = data.get("__schema").ok_or_else(|| Error::InvalidResponse {
		message: "Introspection response is missing __schema.".to_string(),
	})?;
	let mut snapshot = SchemaSnapshot::default();

	for field in list_at(schema.pointer("/queryType/fields")) {
		if let Some(name) = field.get("name").and_then(Value::as_str) {
			snapshot.query_fields.insert(name.to_string());
		}
	}

	for ty in list_at(schema.get("types")) {
		let Some(type_name) = ty.get("name").and_then(Value::as_str) else {
			continue;
		};
		let members = snapshot.types.entry(type_name.to_string()).or_default();

		for member in list_at(ty.get("fields")).iter().chain(list_at(ty.get("inputFields")).iter())
		{
			if let Some(name) = member.get("name").and_then(Value::as_str) {
				members.insert(name.to_string());
			}
		}
	}

	if snapshot.query_fields.is_empty() {
		return Err(Error::InvalidResponse {
			message: "Introspection response lists no query fields.".to_string(),
		});
	}

	Ok(snapshot)
}

/// Splits a GraphQL response into its `data` object, turning reported errors into
/// [`Error::GraphQl`].
pub fn unwrap_graphql_response(json: Value) -> Result<Value> {
	let Value::Object(mut body) = json else {
		return Err(Error::InvalidResponse {
			message: "GraphQL response must be a JSON object.".to_string(),
		});
	};

	if let Some(Value::Array(errors)) = body.get("errors")
		&& !errors.is_empty()
	{
		let messages: Vec<&str> = errors
			.iter()
			.map(|err| err.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
			.collect();

		return Err(Error::GraphQl { message: messages.join("; ") });
	}

	match body.remove("data") {
		Some(data @ Value::Object(_)) => Ok(data),
		_ => Err(Error::InvalidResponse {
			message: "GraphQL response is missing data.".to_string(),
		}),
	}
}

/// Pulls a list-valued root field out of a `data` object. A `null` field reads as empty.
pub fn extract_data_field(data: Value, field: &str) -> Result<Vec<Value>> {
	let Value::Object(mut data) = data else {
		return Err(Error::InvalidResponse {
			message: "GraphQL data must be a JSON object.".to_string(),
		});
	};

	match data.remove(field) {
		Some(Value::Array(rows)) => Ok(rows),
		Some(Value::Null) => Ok(Vec::new()),
		Some(_) => Err(Error::InvalidResponse {
			message: format!("GraphQL field '{field}' is not a list."),
		}),
		None => Err(Error::InvalidResponse {
			message: format!("GraphQL response is missing field '{field}'."),
		}),
	}
}

fn list_at(value: Option<&Value>) -> Vec<Value> {
	match value {
		Some(Value::Array(items)) => items.clone(),
		_ => Vec::new(),
	}
}
