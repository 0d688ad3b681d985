use std::{collections::HashSet, time::Duration};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

pub const DEFAULT_MIN_SCORE: f64 = 0.5;
pub const DEFAULT_LIMIT: u32 = 5_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticHit {
	pub chain_id: u64,
	/// `"<chain_id>:<token_id>"`.
	pub agent_id: String,
	pub score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SemanticQuery {
	pub query: String,
	pub min_score: Option<f64>,
	pub limit: Option<u32>,
}

pub async fn search(
	cfg: &scout_config::Semantic,
	request: &SemanticQuery,
	timeout: Duration,
) -> Result<Vec<SemanticHit>> {
	let Some(body) = build_request_body(request) else {
		return Ok(Vec::new());
	};
	let client = Client::builder().timeout(timeout).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let res = client
		.post(url)
		.headers(crate::auth_headers(None, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	Ok(parse_search_response(json, request.limit.unwrap_or(DEFAULT_LIMIT) as usize))
}

/// `None` for blank queries, which never reach the service.
pub fn build_request_body(request: &SemanticQuery) -> Option<Value> {
	let query = request.query.trim();

	if query.is_empty() {
		return None;
	}

	Some(serde_json::json!({
		"query": query,
		"minScore": request.min_score.unwrap_or(DEFAULT_MIN_SCORE),
		"limit": request.limit.unwrap_or(DEFAULT_LIMIT),
	}))
}

/// Accepts `{"results": [...]}` or a bare array and skips entries it cannot use.
pub fn parse_search_response(json: Value, limit: usize) -> Vec<SemanticHit> {
	let results = match json {
		Value::Array(items) => items,
		Value::Object(mut map) => match map.remove("results") {
			Some(Value::Array(items)) => items,
			_ => return Vec::new(),
		},
		_ => return Vec::new(),
	};
	let mut seen = HashSet::new();
	let mut hits = Vec::with_capacity(results.len().min(limit));

	for item in results {
		if hits.len() >= limit {
			break;
		}

		let Some(hit) = parse_hit(&item) else {
			continue;
		};

		if seen.insert(hit.agent_id.clone()) {
			hits.push(hit);
		}
	}

	hits
}

fn parse_hit(item: &Value) -> Option<SemanticHit> {
	let obj = item.as_object()?;
	let chain_id = coerce_u64(obj.get("chainId")?)?;
	let agent_id = match obj.get("agentId")? {
		Value::String(raw) => raw.trim().to_string(),
		Value::Number(raw) => raw.to_string(),
		_ => return None,
	};
	let score = coerce_f64(obj.get("score")?)?;

	if !agent_id.contains(':') || !score.is_finite() {
		return None;
	}

	Some(SemanticHit { chain_id, agent_id, score })
}

fn coerce_u64(value: &Value) -> Option<u64> {
	match value {
		Value::Number(raw) => raw.as_u64(),
		Value::String(raw) => raw.trim().parse().ok(),
		_ => None,
	}
}

fn coerce_f64(value: &Value) -> Option<f64> {
	match value {
		Value::Number(raw) => raw.as_f64(),
		Value::String(raw) => raw.trim().parse().ok(),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn query(raw: &str) -> SemanticQuery {
		SemanticQuery { query: raw.to_string(), min_score: None, limit: None }
	}

	#[test]
	fn request_body_uses_limit_and_defaults() {
		let body = build_request_body(&query("  hello ")).expect("Body for non-blank query.");

		assert_eq!(body["query"], "hello");
		assert_eq!(body["minScore"], 0.5);
		assert_eq!(body["limit"], 5_000);
		assert!(body.get("topK").is_none());

		let custom = SemanticQuery { query: "hello".into(), min_score: Some(0.7), limit: Some(123) };
		let body = build_request_body(&custom).expect("Body for non-blank query.");

		assert_eq!(body["minScore"], 0.7);
		assert_eq!(body["limit"], 123);
	}

	#[test]
	fn blank_query_builds_no_request() {
		assert!(build_request_body(&query("   ")).is_none());
	}

	#[test]
	fn parses_results_and_skips_unusable_items() {
		let json = serde_json::json!([
			{ "chainId": "11155111", "agentId": "11155111:46", "score": 0.9 },
			"bad",
			null,
			{ "chainId": 1, "agentId": "1:1", "score": "0.1" },
			{ "chainId": 1, "agentId": "missing_colon", "score": 0.2 },
			{ "chainId": "x", "agentId": "1:2", "score": 0.2 },
			{ "chainId": 1, "agentId": "1:1", "score": 0.05 }
		]);
		let hits = parse_search_response(json, 100);
		let ids: Vec<_> = hits.iter().map(|hit| hit.agent_id.as_str()).collect();

		assert_eq!(ids, vec!["11155111:46", "1:1"]);
		assert_eq!(hits[1].score, 0.1);
	}

	#[test]
	fn parses_wrapped_results_and_truncates() {
		let json = serde_json::json!({
			"results": [
				{ "chainId": 1, "agentId": "1:1", "score": 0.9 },
				{ "chainId": 1, "agentId": "1:2", "score": 0.8 },
				{ "chainId": 1, "agentId": "1:3", "score": 0.7 }
			]
		});

		assert_eq!(parse_search_response(json, 2).len(), 2);
		assert!(parse_search_response(serde_json::json!({ "data": [] }), 2).is_empty());
	}
}
