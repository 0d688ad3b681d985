use std::sync::Arc;

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::Value;
use tower::util::ServiceExt;

use scout_api::{routes, state::AppState};
use scout_testkit::{AgentFixture, Fault, MemorySubgraph, SchemaProfile, StubSemantic};

const CHAIN: u64 = 11_155_111;

fn app(fault: Option<Fault>) -> Router {
	let mut builder = MemorySubgraph::builder(CHAIN, SchemaProfile::current())
		.agents((1..=3).map(|token| AgentFixture::new(CHAIN, token).name("Oracle")));

	if let Some(fault) = fault {
		builder = builder.fault(fault);
	}

	let subgraph = Arc::new(builder.build().expect("Failed to build subgraph fixture."));
	let cfg = scout_testkit::config(&[CHAIN]).expect("Failed to build test config.");
	let service = scout_testkit::service(cfg, vec![subgraph], Arc::new(StubSemantic::failing()));

	routes::router(AppState::with_service(service))
}

async fn post_search(app: Router, payload: String) -> (StatusCode, Value) {
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/v1/agents/search")
				.header("content-type", "application/json")
				.body(Body::from(payload))
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call search.");
	let status = response.status();
	let body = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let json = serde_json::from_slice(&body).expect("Failed to parse response.");

	(status, json)
}

#[tokio::test]
async fn health_ok() {
	let response = app(None)
		.oneshot(Request::builder().uri("/health").body(Body::empty()).expect("Failed to build request."))
		.await
		.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn search_returns_a_page_and_a_cursor() {
	let payload = serde_json::json!({
		"filters": { "chains": [CHAIN], "name": "oracle" },
		"options": { "sort": "createdAt", "direction": "asc", "page_size": 2 }
	});
	let (status, json) = post_search(app(None), payload.to_string()).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(json["items"][0]["id"], "11155111:1");
	assert_eq!(json["items"][1]["id"], "11155111:2");
	assert!(json["next_cursor"].is_string());
	assert_eq!(json["meta"]["chains_succeeded"][0], CHAIN);
}

#[tokio::test]
async fn malformed_body_is_an_invalid_request() {
	let (status, json) = post_search(app(None), r#"{ "filters": { "nope": 1 } }"#.to_string()).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(json["error_code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn garbage_cursor_is_rejected() {
	let payload = serde_json::json!({
		"filters": { "chains": [CHAIN] },
		"options": { "cursor": "not-a-cursor" }
	});
	let (status, json) = post_search(app(None), payload.to_string()).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(json["error_code"], "INVALID_CURSOR");
}

#[tokio::test]
async fn semantic_outage_maps_to_service_unavailable() {
	let payload = serde_json::json!({ "filters": { "chains": [CHAIN], "keyword": "oracle" } });
	let (status, json) = post_search(app(None), payload.to_string()).await;

	assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
	assert_eq!(json["error_code"], "SEMANTIC_SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn failed_sources_map_to_bad_gateway() {
	let payload = serde_json::json!({ "filters": { "chains": [CHAIN] } });
	let (status, json) = post_search(app(Some(Fault::Malformed)), payload.to_string()).await;

	assert_eq!(status, StatusCode::BAD_GATEWAY);
	assert_eq!(json["error_code"], "ALL_SOURCES_FAILED");
	assert_eq!(json["failures"][0]["chain_id"], CHAIN);
	assert_eq!(json["failures"][0]["kind"], "schema");
}
