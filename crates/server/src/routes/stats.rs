use axum::{extract::State, Json};
use huddle_api::StatsResponse;

use crate::AppState;

/// GET /api/stats: sizes of the in-memory maps.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.relay.stats(),
        state.started_at.elapsed().as_secs(),
    ))
}
