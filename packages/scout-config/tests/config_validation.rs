use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use scout_config::{Config, Error};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let table = root
		.as_table_mut()
		.expect("Template config must be a table.")
		.get_mut(section)
		.and_then(Value::as_table_mut)
		.unwrap_or_else(|| panic!("Template config must include [{section}]."));

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("scout_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> scout_config::Result<Config> {
	let path = write_temp_config(payload);
	let result = scout_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse test config.")
}

#[test]
fn sample_config_loads_and_normalizes() {
	let cfg = load_payload(SAMPLE_CONFIG_TEMPLATE_TOML.to_string())
		.expect("Sample config must load.");

	assert_eq!(cfg.sources.api_key, None);
	assert_eq!(cfg.sources.env_prefix, "SCOUT_SUBGRAPH_URL_");
	assert_eq!(cfg.semantic.api_base, "https://semantic-search.ag0.xyz");
	assert_eq!(
		cfg.sources.override_for(84_532),
		Some("https://subgraphs.example.test/base-sepolia")
	);
	assert_eq!(cfg.sources.override_chain_ids(), vec![84_532]);
	assert_eq!(cfg.search.semantic_failure, "fail");
}

#[test]
fn missing_file_reports_read_error() {
	let path = env::temp_dir().join("scout_config_test_missing_file.toml");
	let err = scout_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }), "Unexpected error: {err:?}");
}

#[test]
fn malformed_toml_reports_parse_error() {
	let err = load_payload("[service\nhttp_bind = 1".to_string()).expect_err("Expected parse error.");

	assert!(matches!(err, Error::ParseConfig { .. }), "Unexpected error: {err:?}");
}

#[test]
fn semantic_failure_mode_must_be_known() {
	let payload = sample_toml_with("search", "semantic_failure", Value::String("ignore".into()));
	let err = load_payload(payload).expect_err("Expected semantic_failure validation error.");

	assert!(
		err.to_string().contains("search.semantic_failure must be one of fail or degrade."),
		"Unexpected error: {err}"
	);
}

#[test]
fn override_keys_must_be_chain_ids() {
	let mut cfg = base_config();

	cfg.sources.overrides.insert("base".to_string(), "https://example.test/graph".to_string());

	let err = scout_config::validate(&cfg).expect_err("Expected override key error.");

	assert!(
		err.to_string().contains("sources.overrides key 'base' must be a numeric chain id."),
		"Unexpected error: {err}"
	);
}

#[test]
fn override_urls_must_be_http() {
	let mut cfg = base_config();

	cfg.sources.overrides.insert("1".to_string(), "ftp://example.test/graph".to_string());

	let err = scout_config::validate(&cfg).expect_err("Expected override URL error.");

	assert!(err.to_string().contains("sources.overrides.1 must be an http(s) URL."));
}

#[test]
fn gateway_template_requires_subgraph_placeholder() {
	let payload = sample_toml_with(
		"sources",
		"gateway_url",
		Value::String("https://gateway.thegraph.com/api/subgraphs".into()),
	);
	let err = load_payload(payload).expect_err("Expected gateway_url validation error.");

	assert!(err.to_string().contains("{subgraph_id}"), "Unexpected error: {err}");
}

#[test]
fn page_sizes_must_nest_within_batch_size() {
	let mut cfg = base_config();

	cfg.search.default_page_size = 300;

	let err = scout_config::validate(&cfg).expect_err("Expected page size validation error.");

	assert!(err.to_string().contains("search.default_page_size must not exceed"));

	cfg.search.default_page_size = 20;
	cfg.search.max_page_size = 2_000;

	let err = scout_config::validate(&cfg).expect_err("Expected max page size validation error.");

	assert!(
		err.to_string().contains("search.max_page_size must not exceed search.max_batch_size."),
		"Unexpected error: {err}"
	);
}

#[test]
fn semantic_min_score_must_be_a_probability() {
	let mut cfg = base_config();

	cfg.semantic.min_score = 1.5;

	assert!(scout_config::validate(&cfg).is_err());

	cfg.semantic.min_score = f64::NAN;

	let err = scout_config::validate(&cfg).expect_err("Expected NaN validation error.");

	assert!(err.to_string().contains("semantic.min_score must be a finite number."));
}

#[test]
fn disabled_semantic_allows_blank_api_base() {
	let mut cfg = base_config();

	cfg.semantic.enabled = false;
	cfg.semantic.api_base = String::new();

	assert!(scout_config::validate(&cfg).is_ok());
}

#[test]
fn retry_backoff_is_bounded() {
	let mut cfg = base_config();

	cfg.retry.backoff_ms = 5_000;

	let err = scout_config::validate(&cfg).expect_err("Expected backoff validation error.");

	assert!(err.to_string().contains("retry.backoff_ms must not exceed retry.max_backoff_ms."));
}
