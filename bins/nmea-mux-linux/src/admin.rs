//! Admin HTTP API.
//!
//! | Method | Path | Action |
//! |---|---|---|
//! | GET | `/cache` | Cache snapshot |
//! | DELETE | `/cache` | Reset cache and computers |
//! | GET | `/channels`, `/forwarders`, `/computers` | Status of each component |
//! | DELETE | `/channels`, `/forwarders`, `/computers` | Remove the component whose descriptor is the JSON body |
//! | GET | `/stats` | Dispatch counters |

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use nmea_mux::{Multiplexer, MuxError};
use serde_json::{json, Value};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub mux: Multiplexer,
    pub started: DateTime<Utc>,
}

impl AppState {
    pub fn new(mux: Multiplexer) -> Self {
        Self {
            mux,
            started: Utc::now(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/cache", get(get_cache).delete(reset_cache))
        .route("/channels", get(get_channels).delete(remove_channel))
        .route("/forwarders", get(get_forwarders).delete(remove_forwarder))
        .route("/computers", get(get_computers).delete(remove_computer))
        .route("/stats", get(get_stats))
        .with_state(state)
}

fn removal_status(result: Result<(), MuxError>) -> StatusCode {
    match result {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(MuxError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Err(e) => {
            tracing::error!("Removal failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn get_cache(State(state): State<AppState>) -> Json<Value> {
    Json(state.mux.cache_snapshot())
}

async fn reset_cache(State(state): State<AppState>) -> StatusCode {
    info!("Cache reset requested");
    state.mux.reset_cache();
    StatusCode::NO_CONTENT
}

async fn get_channels(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.mux.sources_status())
}

async fn remove_channel(State(state): State<AppState>, Json(descriptor): Json<Value>) -> StatusCode {
    removal_status(state.mux.remove_source(&descriptor))
}

async fn get_forwarders(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.mux.sinks_status())
}

async fn remove_forwarder(
    State(state): State<AppState>,
    Json(descriptor): Json<Value>,
) -> StatusCode {
    removal_status(state.mux.remove_sink(&descriptor))
}

async fn get_computers(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.mux.computers_status())
}

async fn remove_computer(
    State(state): State<AppState>,
    Json(descriptor): Json<Value>,
) -> StatusCode {
    removal_status(state.mux.remove_computer(&descriptor))
}

async fn get_stats(State(state): State<AppState>) -> Json<Value> {
    let uptime = (Utc::now() - state.started).num_seconds();
    Json(json!({
        "started": state.started.to_rfc3339_opts(SecondsFormat::Secs, true),
        "uptimeSeconds": uptime,
        "dispatch": state.mux.statistics(),
    }))
}
