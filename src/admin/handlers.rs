use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::{AdminState, RoleView};
use crate::control_plane::DataPlaneRecord;
use crate::data_plane::AgentState;

#[derive(Debug, Serialize)]
pub struct ClusteringStatus {
    pub role: &'static str,
    pub version: String,
    /// Live data plane sessions (control plane only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<AgentState>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<ClusteringStatus> {
    let mut status = ClusteringStatus {
        role: state.role.as_str(),
        version: state.version.clone(),
        sessions: None,
        node_id: None,
        agent_state: None,
    };

    match &state.view {
        RoleView::ControlPlane { registry, .. } => status.sessions = Some(registry.len()),
        RoleView::DataPlane { node_id, state } => {
            status.node_id = Some(node_id.clone());
            status.agent_state = Some(*state.borrow());
        }
    }

    Json(status)
}

/// Known data planes, most recently seen first. Empty on a data plane.
pub async fn get_data_planes(State(state): State<AdminState>) -> Json<Vec<DataPlaneRecord>> {
    match &state.view {
        RoleView::ControlPlane { records, .. } => Json(records.list()),
        RoleView::DataPlane { .. } => Json(Vec::new()),
    }
}
