// Application state for HTTP handlers
use crate::application::dashboard_service::DashboardHandle;
use crate::domain::location::Location;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dashboard: DashboardHandle,
    pub grid: Arc<[Location]>,
    pub login_url: String,
}
