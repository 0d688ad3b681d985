use std::sync::Arc;

use scout_service::ScoutService;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<ScoutService>,
}
impl AppState {
	pub fn new(config: scout_config::Config) -> Self {
		Self::with_service(ScoutService::new(config))
	}

	pub fn with_service(service: ScoutService) -> Self {
		Self { service: Arc::new(service) }
	}
}
