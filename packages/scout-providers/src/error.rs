pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Request timed out: {message}")]
	Timeout { message: String },
	#[error("Transport error: {message}")]
	Transport { message: String },
	#[error("Unexpected HTTP status {status}: {message}")]
	Status { status: u16, message: String },
	#[error("Invalid response: {message}")]
	InvalidResponse { message: String },
	#[error("GraphQL error: {message}")]
	GraphQl { message: String },
	#[error("{message}")]
	InvalidConfig { message: String },
}
impl Error {
	/// Failures worth retrying: the request may succeed unchanged on another attempt.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Timeout { .. } | Self::Transport { .. } => true,
			Self::Status { status, .. } => *status == 429 || *status >= 500,
			Self::InvalidResponse { .. } | Self::GraphQl { .. } | Self::InvalidConfig { .. } =>
				false,
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}

impl From<reqwest::Error> for Error {
	fn from(err: reqwest::Error) -> Self {
		let message = err.to_string();

		if err.is_timeout() {
			return Self::Timeout { message };
		}
		if let Some(status) = err.status() {
			return Self::Status { status: status.as_u16(), message };
		}
		if err.is_decode() {
			return Self::InvalidResponse { message };
		}
		if err.is_builder() {
			return Self::InvalidConfig { message };
		}

		Self::Transport { message }
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::InvalidResponse { message: err.to_string() }
	}
}

impl From<reqwest::header::InvalidHeaderName> for Error {
	fn from(err: reqwest::header::InvalidHeaderName) -> Self {
		Self::InvalidConfig { message: err.to_string() }
	}
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
	fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
		Self::InvalidConfig { message: err.to_string() }
	}
}
