use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Unsupported filter combination: {message}")]
	UnsupportedFilterCombination { message: String },
	#[error("Semantic service unavailable: {message}")]
	SemanticServiceUnavailable { message: String },
	#[error("Cursor was produced by a different filter or sort configuration.")]
	CursorMismatch,
	#[error("Invalid cursor: {message}")]
	InvalidCursor { message: String },
	#[error("All {} sources failed.", failures.len())]
	AllSourcesFailed { failures: Vec<SourceFailure> },
	#[error("Source failed: {failure}")]
	Source { failure: SourceFailure },
	#[error("Configuration error: {message}")]
	Config { message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailureKind {
	Timeout,
	Transport,
	Schema,
	/// No endpoint could be resolved for the chain.
	Unresolved,
}
impl SourceFailureKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Timeout => "timeout",
			Self::Transport => "transport",
			Self::Schema => "schema",
			Self::Unresolved => "unresolved",
		}
	}
}

/// Why one chain dropped out of a search. Recorded in the response, never raised on its own
/// unless fail-fast is on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
	pub chain_id: u64,
	pub kind: SourceFailureKind,
	pub message: String,
	pub attempts: u32,
}
impl SourceFailure {
	pub(crate) fn from_provider(chain_id: u64, err: &scout_providers::Error, attempts: u32) -> Self {
		let kind = match err {
			scout_providers::Error::Timeout { .. } => SourceFailureKind::Timeout,
			scout_providers::Error::Transport { .. } | scout_providers::Error::Status { .. } =>
				SourceFailureKind::Transport,
			scout_providers::Error::InvalidResponse { .. }
			| scout_providers::Error::GraphQl { .. }
			| scout_providers::Error::InvalidConfig { .. } => SourceFailureKind::Schema,
		};

		Self { chain_id, kind, message: err.to_string(), attempts }
	}

	pub(crate) fn schema(chain_id: u64, message: impl Into<String>) -> Self {
		Self { chain_id, kind: SourceFailureKind::Schema, message: message.into(), attempts: 0 }
	}
}

impl Display for SourceFailure {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"chain {} {} after {} attempt(s): {}",
			self.chain_id,
			self.kind.as_str(),
			self.attempts,
			self.message
		)
	}
}
