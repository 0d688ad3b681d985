use std::{
	future::IntoFuture,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use axum::{
	Json, Router,
	extract::State,
	http::{HeaderMap, StatusCode},
	response::IntoResponse,
	routing,
};
use reqwest::header::AUTHORIZATION;
use scout_providers::{
	Error,
	semantic::{self, SemanticQuery},
	subgraph::{CollectionQuery, SelectionField, SubgraphClient, TextSearchQuery},
};
use serde_json::{Map, Value};
use tokio::{
	net::TcpListener,
	sync::{oneshot, oneshot::Sender},
};

async fn start_server(app: Router) -> (String, Sender<()>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind stub server.");
	let addr = listener.local_addr().expect("Failed to read stub server address.");
	let (tx, rx) = oneshot::channel();
	let server = axum::serve(listener, app).with_graceful_shutdown(async move {
		let _ = rx.await;
	});

	tokio::spawn(async move {
		let _ = server.into_future().await;
	});

	(format!("http://{addr}"), tx)
}

fn semantic_config(api_base: &str) -> scout_config::Semantic {
	scout_config::Semantic {
		enabled: true,
		api_base: api_base.to_string(),
		path: "/api/v1/search".to_string(),
		timeout_ms: 1_000,
		min_score: 0.5,
		limit: 5_000,
		default_headers: Map::new(),
	}
}

fn query(raw: &str) -> SemanticQuery {
	SemanticQuery { query: raw.to_string(), min_score: Some(0.5), limit: Some(10) }
}

#[test]
fn builds_bearer_auth_header() {
	let headers =
		scout_providers::auth_headers(Some("secret"), &Map::new()).expect("Failed to build headers.");
	let value = headers.get(AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
	assert!(
		scout_providers::auth_headers(Some("  "), &Map::new())
			.expect("Failed to build headers.")
			.get(AUTHORIZATION)
			.is_none()
	);
}

#[tokio::test]
async fn semantic_search_posts_body_and_parses_hits() {
	async fn handler(Json(payload): Json<Value>) -> impl IntoResponse {
		assert_eq!(payload["query"], "weather bot");
		assert_eq!(payload["limit"], 10);
		assert!(payload.get("topK").is_none());

		Json(serde_json::json!({
			"results": [
				{ "chainId": 11155111, "agentId": "11155111:7", "score": 0.92 },
				{ "chainId": "1", "agentId": "1:3", "score": "0.61" }
			]
		}))
	}

	let (api_base, shutdown) =
		start_server(Router::new().route("/api/v1/search", routing::post(handler))).await;
	let hits = semantic::search(
		&semantic_config(&api_base),
		&query("weather bot"),
		Duration::from_secs(2),
	)
	.await
	.expect("Semantic search should succeed.");

	assert_eq!(hits.len(), 2);
	assert_eq!(hits[0].agent_id, "11155111:7");
	assert_eq!(hits[1].chain_id, 1);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn semantic_server_errors_are_transient() {
	let calls = Arc::new(AtomicUsize::new(0));

	async fn handler(State(calls): State<Arc<AtomicUsize>>) -> impl IntoResponse {
		calls.fetch_add(1, Ordering::SeqCst);

		StatusCode::SERVICE_UNAVAILABLE
	}

	let app = Router::new().route("/api/v1/search", routing::post(handler)).with_state(calls.clone());
	let (api_base, shutdown) = start_server(app).await;
	let err = semantic::search(&semantic_config(&api_base), &query("x"), Duration::from_secs(2))
		.await
		.expect_err("503 should fail.");

	assert!(matches!(err, Error::Status { status: 503, .. }), "{err:?}");
	assert!(err.is_transient());
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	// Blank queries never reach the server.
	let hits = semantic::search(&semantic_config(&api_base), &query("  "), Duration::from_secs(2))
		.await
		.expect("Blank query should succeed.");

	assert!(hits.is_empty());
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn slow_semantic_service_times_out() {
	async fn handler() -> impl IntoResponse {
		tokio::time::sleep(Duration::from_millis(500)).await;

		Json(serde_json::json!([]))
	}

	let (api_base, shutdown) =
		start_server(Router::new().route("/api/v1/search", routing::post(handler))).await;
	let err = semantic::search(&semantic_config(&api_base), &query("x"), Duration::from_millis(50))
		.await
		.expect_err("Slow service should time out.");

	assert!(err.is_timeout(), "{err:?}");
	assert!(err.is_transient());

	let _ = shutdown.send(());
}

#[tokio::test]
async fn subgraph_client_queries_collections_with_headers() {
	async fn handler(headers: HeaderMap, Json(payload): Json<Value>) -> impl IntoResponse {
		let query = payload["query"].as_str().unwrap_or_default().to_string();

		assert_eq!(headers.get("authorization").and_then(|value| value.to_str().ok()), Some("Bearer k"));

		if query.contains("agentSearch") {
			return Json(serde_json::json!({ "data": { "agentSearch": [{ "id": "1:9" }] } }));
		}

		assert!(query.starts_with("query { agents(first: 2"), "{query}");

		Json(serde_json::json!({
			"data": { "agents": [{ "id": "1:1" }, { "id": "1:2" }] }
		}))
	}

	let (endpoint, shutdown) = start_server(Router::new().route("/", routing::post(handler))).await;
	let headers =
		scout_providers::auth_headers(Some("k"), &Map::new()).expect("Failed to build headers.");
	let client = SubgraphClient::new(format!("{endpoint}/"), Duration::from_secs(2), headers)
		.expect("Failed to build subgraph client.");
	let rows = client
		.query_collection(&CollectionQuery {
			collection: "agents".to_string(),
			filter: Map::new(),
			order_by: Some("id".to_string()),
			order_direction: None,
			first: 2,
			skip: 0,
			selection: vec![SelectionField::scalar("id")],
		})
		.await
		.expect("Collection query should succeed.");

	assert_eq!(rows.len(), 2);

	let ids = client
		.search_text(&TextSearchQuery {
			field: "agentSearch".to_string(),
			text: "oracle".to_string(),
			first: 100,
		})
		.await
		.expect("Text search should succeed.");

	assert_eq!(ids, vec!["1:9".to_string()]);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn subgraph_graphql_errors_are_not_transient() {
	async fn handler() -> impl IntoResponse {
		Json(serde_json::json!({
			"errors": [{ "message": "Type `Agent_filter` has no field `hasOASF`" }]
		}))
	}

	let (endpoint, shutdown) = start_server(Router::new().route("/", routing::post(handler))).await;
	let client =
		SubgraphClient::new(format!("{endpoint}/"), Duration::from_secs(2), Default::default())
			.expect("Failed to build subgraph client.");
	let err = client.introspect().await.expect_err("GraphQL errors should fail.");

	assert!(matches!(err, Error::GraphQl { .. }), "{err:?}");
	assert!(!err.is_transient());

	let _ = shutdown.send(());
}
