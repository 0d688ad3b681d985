mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Retry, Search, Semantic, Service, Sources};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.sources.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "sources.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if !cfg.sources.gateway_url.contains("{subgraph_id}") {
		return Err(Error::Validation {
			message: "sources.gateway_url must contain the {subgraph_id} placeholder.".to_string(),
		});
	}

	for (key, url) in &cfg.sources.overrides {
		if key.trim().parse::<u64>().is_err() {
			return Err(Error::Validation {
				message: format!("sources.overrides key '{key}' must be a numeric chain id."),
			});
		}
		if !is_http_url(url) {
			return Err(Error::Validation {
				message: format!("sources.overrides.{key} must be an http(s) URL."),
			});
		}
	}

	if cfg.semantic.enabled && cfg.semantic.api_base.trim().is_empty() {
		return Err(Error::Validation {
			message: "semantic.api_base must be non-empty when semantic search is enabled."
				.to_string(),
		});
	}
	if !cfg.semantic.min_score.is_finite() {
		return Err(Error::Validation {
			message: "semantic.min_score must be a finite number.".to_string(),
		});
	}
	if !(0.0..=1.0).contains(&cfg.semantic.min_score) {
		return Err(Error::Validation {
			message: "semantic.min_score must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.semantic.limit == 0 {
		return Err(Error::Validation {
			message: "semantic.limit must be greater than zero.".to_string(),
		});
	}
	if cfg.semantic.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "semantic.timeout_ms must be greater than zero.".to_string(),
		});
	}

	let search = &cfg.search;

	if search.default_page_size == 0 {
		return Err(Error::Validation {
			message: "search.default_page_size must be greater than zero.".to_string(),
		});
	}
	if search.default_page_size > search.max_page_size {
		return Err(Error::Validation {
			message: "search.default_page_size must not exceed search.max_page_size.".to_string(),
		});
	}
	if !(1..=1_000).contains(&search.max_batch_size) {
		return Err(Error::Validation {
			message: "search.max_batch_size must be in the range 1-1000.".to_string(),
		});
	}
	if search.max_page_size > search.max_batch_size {
		return Err(Error::Validation {
			message: "search.max_page_size must not exceed search.max_batch_size.".to_string(),
		});
	}
	if search.batch_multiplier == 0 {
		return Err(Error::Validation {
			message: "search.batch_multiplier must be at least one.".to_string(),
		});
	}
	if search.max_local_records < search.max_batch_size {
		return Err(Error::Validation {
			message: "search.max_local_records must be at least search.max_batch_size."
				.to_string(),
		});
	}
	if search.feedback_batch_size == 0 {
		return Err(Error::Validation {
			message: "search.feedback_batch_size must be greater than zero.".to_string(),
		});
	}
	if search.deadline_ms == 0 {
		return Err(Error::Validation {
			message: "search.deadline_ms must be greater than zero.".to_string(),
		});
	}
	if !matches!(search.semantic_failure.as_str(), "fail" | "degrade") {
		return Err(Error::Validation {
			message: "search.semantic_failure must be one of fail or degrade.".to_string(),
		});
	}
	if cfg.retry.max_retries > 10 {
		return Err(Error::Validation {
			message: "retry.max_retries must be 10 or less.".to_string(),
		});
	}
	if cfg.retry.backoff_ms > cfg.retry.max_backoff_ms {
		return Err(Error::Validation {
			message: "retry.backoff_ms must not exceed retry.max_backoff_ms.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.sources.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
		cfg.sources.api_key = None;
	}

	cfg.sources.env_prefix = cfg.sources.env_prefix.trim().to_ascii_uppercase();
	cfg.semantic.api_base = cfg.semantic.api_base.trim().trim_end_matches('/').to_string();

	for url in cfg.sources.overrides.values_mut() {
		*url = url.trim().trim_end_matches('/').to_string();
	}
}

fn is_http_url(raw: &str) -> bool {
	let trimmed = raw.trim();

	["http://", "https://"]
		.iter()
		.any(|scheme| trimmed.strip_prefix(scheme).map(|rest| !rest.is_empty()).unwrap_or(false))
}
