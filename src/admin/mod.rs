//! Read-only clustering admin API.
//!
//! # Endpoints
//! - `GET /clustering/status`: role, version, live sessions or agent state
//! - `GET /clustering/data-planes`: data plane records known to this control plane
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tower_http::trace::TraceLayer;

use crate::config::{AdminConfig, Role};
use crate::control_plane::{DataPlaneStore, SessionRegistry};
use crate::data_plane::AgentState;
use crate::net::tls::load_tls_config;

use self::auth::admin_auth_middleware;
use self::handlers::{get_data_planes, get_status};

/// What the admin handlers can see.
#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub role: Role,
    pub version: String,
    pub view: RoleView,
}

/// Role-specific runtime handles.
#[derive(Clone)]
pub enum RoleView {
    ControlPlane {
        registry: SessionRegistry,
        records: DataPlaneStore,
    },
    DataPlane {
        node_id: String,
        state: watch::Receiver<AgentState>,
    },
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/clustering/status", get(get_status))
        .route("/clustering/data-planes", get(get_data_planes))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown, over TLS when configured.
pub async fn serve_admin(
    config: &AdminConfig,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let app = setup_admin_router(state);

    match &config.tls {
        Some(tls) => {
            let addr: SocketAddr = config
                .bind_address
                .parse()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;

            let handle = axum_server::Handle::new();
            let stopper = handle.clone();
            tokio::spawn(async move {
                let _ = shutdown.recv().await;
                stopper.graceful_shutdown(Some(Duration::from_secs(5)));
            });

            tracing::info!(address = %addr, "Admin API listening (TLS)");
            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = TcpListener::bind(&config.bind_address).await?;
            tracing::info!(address = %listener.local_addr()?, "Admin API listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.recv().await;
                })
                .await?;
        }
    }

    tracing::info!("Admin API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::net::connection::ConnectionId;
    use crate::protocol::{ConfigHash, SyncStatus};

    async fn spawn_admin(state: AdminState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, setup_admin_router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn control_plane_state(registry: SessionRegistry, records: DataPlaneStore) -> AdminState {
        AdminState {
            api_key: Arc::from("secret"),
            role: Role::ControlPlane,
            version: "2.8.0".to_string(),
            view: RoleView::ControlPlane { registry, records },
        }
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let base = spawn_admin(control_plane_state(
            SessionRegistry::new(),
            DataPlaneStore::new(Duration::from_secs(60)),
        ))
        .await;
        let client = reqwest::Client::new();

        let res = client.get(format!("{}/clustering/status", base)).send().await.unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);

        let res = client
            .get(format!("{}/clustering/status", base))
            .bearer_auth("wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn control_plane_reports_sessions_and_records() {
        let registry = SessionRegistry::new();
        let records = DataPlaneStore::new(Duration::from_secs(60));
        let _session = registry.register(ConnectionId::new());
        records.upsert("dp-1", "edge-1", "10.0.0.1", Some("2.8.0"), ConfigHash::empty(), SyncStatus::Normal);

        let base = spawn_admin(control_plane_state(registry, records)).await;
        let client = reqwest::Client::new();

        let status: serde_json::Value = client
            .get(format!("{}/clustering/status", base))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["role"], "control_plane");
        assert_eq!(status["sessions"], 1);

        let planes: serde_json::Value = client
            .get(format!("{}/clustering/data-planes", base))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(planes[0]["id"], "dp-1");
        assert_eq!(planes[0]["sync_status"], "normal");
        assert_eq!(planes[0]["config_hash"], crate::protocol::EMPTY_CONFIG_HASH);
    }

    #[tokio::test]
    async fn data_plane_reports_agent_state() {
        let (_tx, rx) = watch::channel(AgentState::Syncing);
        let base = spawn_admin(AdminState {
            api_key: Arc::from("secret"),
            role: Role::DataPlane,
            version: "2.8.0".to_string(),
            view: RoleView::DataPlane {
                node_id: "dp-7".to_string(),
                state: rx,
            },
        })
        .await;

        let status: serde_json::Value = reqwest::Client::new()
            .get(format!("{}/clustering/status", base))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["role"], "data_plane");
        assert_eq!(status["agent_state"], "syncing");
        assert_eq!(status["node_id"], "dp-7");
        assert!(status.get("sessions").is_none());
    }
}
