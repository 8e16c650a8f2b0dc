use std::sync::Arc;

pub mod availability;
pub mod booking;
pub mod config;
pub mod handlers;
pub mod messaging;
pub mod middleware;
pub mod models;
pub mod postgres;
pub mod realtime;
pub mod repository;
pub mod reviews;
pub mod routes;
pub mod settlement;

use crate::config::AppConfig;
use crate::realtime::RealtimeEmitter;
use crate::repository::MarketplaceStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MarketplaceStore>,
    pub emitter: Arc<dyn RealtimeEmitter>,
    pub config: AppConfig,
}
