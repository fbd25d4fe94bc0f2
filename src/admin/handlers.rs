use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::admission::AdmissionStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
}

pub async fn get_status() -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
    })
}

/// Pool occupancy and cumulative admission outcomes.
pub async fn get_admission(State(state): State<AdminState>) -> Json<AdmissionStats> {
    Json(state.controller.stats())
}
