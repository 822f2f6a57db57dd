//! Shared application state handed to every axum handler.

use crate::manager::TunnelManager;
use axum::Router;
use std::sync::Arc;

/// `manager` is `None` in standalone mode (no `CLUSTER_SECRET` configured,
/// or `DEPLOYMENT_MODE != master`) — see §7, §8 "mode: standalone".
#[derive(Clone)]
pub struct AppState {
    pub manager: Option<Arc<TunnelManager>>,
    pub local_app: Router,
}
