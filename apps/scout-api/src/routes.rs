use axum::{
	Json, Router,
	extract::{State, rejection::JsonRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use scout_service::{Error as ServiceError, SearchRequest, SearchResponse, SourceFailure};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/agents/search", post(search))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn search(
	State(state): State<AppState>,
	payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
	let Json(payload) = payload.map_err(|rejection| {
		json_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", rejection.body_text())
	})?;
	let response = state.service.search(payload).await?;
	Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	failures: Option<Vec<SourceFailure>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	failures: Option<Vec<SourceFailure>>,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), failures: None }
	}

	fn with_failures(mut self, failures: Vec<SourceFailure>) -> Self {
		self.failures = Some(failures);

		self
	}
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError::new(status, code, message)
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let message = err.to_string();

		match err {
			ServiceError::InvalidRequest { .. } =>
				json_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message),
			ServiceError::UnsupportedFilterCombination { .. } =>
				json_error(StatusCode::BAD_REQUEST, "UNSUPPORTED_FILTER_COMBINATION", message),
			ServiceError::InvalidCursor { .. } =>
				json_error(StatusCode::BAD_REQUEST, "INVALID_CURSOR", message),
			ServiceError::CursorMismatch =>
				json_error(StatusCode::BAD_REQUEST, "CURSOR_MISMATCH", message),
			ServiceError::SemanticServiceUnavailable { .. } =>
				json_error(StatusCode::SERVICE_UNAVAILABLE, "SEMANTIC_SERVICE_UNAVAILABLE", message),
			ServiceError::AllSourcesFailed { failures } =>
				json_error(StatusCode::BAD_GATEWAY, "ALL_SOURCES_FAILED", message)
					.with_failures(failures),
			ServiceError::Source { failure } =>
				json_error(StatusCode::BAD_GATEWAY, "SOURCE_FAILED", message)
					.with_failures(vec![failure]),
			ServiceError::Config { .. } => {
				tracing::error!(error = %message, "Search failed on a configuration error.");

				json_error(StatusCode::INTERNAL_SERVER_ERROR, "CONFIG", message)
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, failures: self.failures };
		(self.status, Json(body)).into_response()
	}
}
