// HTTP telemetry source - reqwest client for the crowd backend
use crate::application::telemetry_source::{FetchError, TelemetrySource};
use crate::domain::batch::{ClientId, LocationId, TimeSeriesBatch};
use crate::domain::location::Location;
use crate::domain::range::HistoryRange;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const LOCATIONS: &str = "/locations";
const HISTORY: &str = "/history";
const LIVE: &str = "/live";
const PREDICTION: &str = "/prediction";

/// Grid endpoint answers with either a bare feature list or a collection.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GridResponse {
    Features(Vec<GridFeature>),
    Collection { features: Vec<GridFeature> },
}

#[derive(Debug, Deserialize)]
struct GridFeature {
    properties: GridProperties,
    #[serde(default)]
    geometry: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GridProperties {
    id: LocationId,
    #[serde(default)]
    unusable_area: f64,
}

impl From<GridFeature> for Location {
    fn from(feature: GridFeature) -> Self {
        Location {
            id: feature.properties.id,
            unusable_area: feature.properties.unusable_area,
            geometry: feature.geometry,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTelemetrySource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    prediction_poll_interval: Duration,
    prediction_max_attempts: u32,
}

impl HttpTelemetrySource {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            prediction_poll_interval: Duration::from_millis(1000),
            prediction_max_attempts: 30,
        }
    }

    pub fn with_prediction_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.prediction_poll_interval = interval;
        self.prediction_max_attempts = max_attempts.max(1);
        self
    }

    fn history_url(&self, range: &HistoryRange) -> String {
        let start = HistoryRange::format_instant(&range.start);
        let end = HistoryRange::format_instant(&range.end);
        let every = range.every.to_string();
        let mut url = format!(
            "{}{}?start={}&end={}&every={}",
            self.base_url,
            HISTORY,
            urlencoding::encode(&start),
            urlencoding::encode(&end),
            urlencoding::encode(&every)
        );

        if !range.locations.is_empty() {
            let ids: Vec<&str> = range.locations.iter().map(LocationId::as_str).collect();
            url.push_str("&locations=");
            url.push_str(&urlencoding::encode(&ids.join(",")));
        }
        url
    }

    fn session_url(&self, endpoint: &str, client_id: Option<&ClientId>) -> String {
        match client_id {
            Some(id) => format!(
                "{}{}?client_id={}",
                self.base_url,
                endpoint,
                urlencoding::encode(id.as_str())
            ),
            None => format!("{}{}", self.base_url, endpoint),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, url: &str) -> Result<T, FetchError> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let response = request.send().await.map_err(|source| FetchError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized {
                endpoint: endpoint.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|source| FetchError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn get_batch(&self, endpoint: &str, url: &str) -> Result<TimeSeriesBatch, FetchError> {
        let batch: TimeSeriesBatch = self.get_json(endpoint, url).await?;
        batch.validate().map_err(|source| FetchError::Malformed {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(batch)
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn fetch_locations(&self) -> Result<Vec<Location>, FetchError> {
        let url = format!("{}{}", self.base_url, LOCATIONS);
        let features = match self.get_json::<GridResponse>(LOCATIONS, &url).await? {
            GridResponse::Features(features) | GridResponse::Collection { features } => features,
        };
        tracing::debug!(count = features.len(), "grid loaded");
        Ok(features.into_iter().map(Location::from).collect())
    }

    async fn fetch_history(&self, range: &HistoryRange) -> Result<TimeSeriesBatch, FetchError> {
        let url = self.history_url(range);
        tracing::debug!(%url, "fetching history");
        self.get_batch(HISTORY, &url).await
    }

    async fn fetch_live(&self, client_id: Option<&ClientId>) -> Result<TimeSeriesBatch, FetchError> {
        let url = self.session_url(LIVE, client_id);
        self.get_batch(LIVE, &url).await
    }

    async fn fetch_prediction(&self) -> Result<TimeSeriesBatch, FetchError> {
        // The backend first hands out a client id, then answers empty until a
        // prediction newer than the client's last one is ready.
        let mut client_id: Option<ClientId> = None;

        for attempt in 1..=self.prediction_max_attempts {
            let url = self.session_url(PREDICTION, client_id.as_ref());
            let batch = self.get_batch(PREDICTION, &url).await?;

            if client_id.is_none() {
                client_id = batch.client_id.clone();
                if let Some(id) = &client_id {
                    tracing::debug!(attempt, client_id = id.as_str(), "prediction session opened");
                }
            }
            if client_id.is_some() && !batch.is_empty() {
                return Ok(batch);
            }
            if attempt < self.prediction_max_attempts {
                tokio::time::sleep(self.prediction_poll_interval).await;
            }
        }

        tracing::warn!(attempts = self.prediction_max_attempts, "prediction not ready");
        Err(FetchError::PredictionUnavailable {
            attempts: self.prediction_max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::range::Interval;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn live(headers: HeaderMap, Query(args): Query<HashMap<String, String>>) -> impl IntoResponse {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Token secret") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match args.get("client_id") {
            None => Json(json!({
                "timestamps": ["2022-08-01T00:00:00Z", "2022-08-01T00:01:00Z"],
                "values": {"C1": {"1": [1, 2]}},
                "client_id": "c-1"
            }))
            .into_response(),
            Some(_) => Json(json!({})).into_response(),
        }
    }

    async fn prediction(
        State(calls): State<Arc<AtomicUsize>>,
        Query(args): Query<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        match (call, args.get("client_id")) {
            (0, _) => Json(json!({})),
            (_, None) => Json(json!({"client_id": "p-1"})),
            (n, Some(_)) if n < 3 => Json(json!({})),
            (_, Some(_)) => Json(json!({
                "timestamps": ["2022-08-01T02:00:00Z"],
                "values": {"C1": {"1": [[1, 2, 3, 4, 5]]}}
            })),
        }
    }

    async fn backend() -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/locations",
                get(|| async {
                    Json(json!([
                        {"type": "Feature", "properties": {"id": 2, "unusable_area": 100.5}, "geometry": null},
                        {"type": "Feature", "properties": {"id": 1}, "geometry": {"type": "Polygon", "coordinates": []}}
                    ]))
                }),
            )
            .route(
                "/history",
                get(|| async {
                    Json(json!({
                        "timestamps": ["2022-08-01T01:00:00Z", "2022-08-01T01:00:00Z"],
                        "values": {}
                    }))
                }),
            )
            .route("/live", get(live))
            .route("/prediction", get(prediction))
            .with_state(calls.clone());
        (serve(router).await, calls)
    }

    #[tokio::test]
    async fn test_live_session_handshake() {
        let (url, _) = backend().await;
        let source = HttpTelemetrySource::new(url, Some("secret".into()));

        let first = source.fetch_live(None).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.client_id, Some(ClientId::new("c-1")));

        let next = source.fetch_live(first.client_id.as_ref()).await.unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (url, _) = backend().await;
        let source = HttpTelemetrySource::new(url, None);
        let err = source.fetch_live(None).await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_malformed_history_is_rejected() {
        let (url, _) = backend().await;
        let source = HttpTelemetrySource::new(url, None);
        let range = HistoryRange::new(
            Utc.with_ymd_and_hms(2022, 8, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 8, 2, 0, 0, 0).unwrap(),
            Interval::default(),
        );
        let err = source.fetch_history(&range).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_prediction_waits_for_data() {
        let (url, calls) = backend().await;
        let source =
            HttpTelemetrySource::new(url, None).with_prediction_polling(Duration::from_millis(1), 10);

        let batch = source.fetch_prediction().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_prediction_gives_up() {
        let (url, _) = backend().await;
        let source =
            HttpTelemetrySource::new(url, None).with_prediction_polling(Duration::from_millis(1), 2);
        let err = source.fetch_prediction().await.unwrap_err();
        assert!(matches!(err, FetchError::PredictionUnavailable { attempts: 2 }));
    }

    #[tokio::test]
    async fn test_locations_from_features() {
        let (url, _) = backend().await;
        let source = HttpTelemetrySource::new(url, None);
        let grid = source.fetch_locations().await.unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid[0].id.as_str(), "2");
        assert_eq!(grid[0].unusable_area, 100.5);
        assert_eq!(grid[1].unusable_area, 0.0);
    }

    #[test]
    fn test_history_url_encodes_query() {
        let source = HttpTelemetrySource::new("http://backend/".into(), None);
        let mut range = HistoryRange::new(
            Utc.with_ymd_and_hms(2022, 8, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 8, 2, 0, 0, 0).unwrap(),
            "30m".parse().unwrap(),
        );
        range.locations = vec![LocationId::new("3"), LocationId::new("7")];

        assert_eq!(
            source.history_url(&range),
            "http://backend/history?start=2022-08-01T00%3A00%3A00Z&end=2022-08-02T00%3A00%3A00Z&every=30m&locations=3%2C7"
        );
    }
}
