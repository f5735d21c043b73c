// Application layer - Session state, playback and the source seam
pub mod dashboard_service;
pub mod playback;
pub mod status_machine;
pub mod telemetry_source;
