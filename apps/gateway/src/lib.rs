pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod permissions;
pub mod routes;

use std::sync::Arc;

use auth::tokens::TokenValidator;
use config::Config;
use db::Stores;
use gateway::Hub;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub tokens: Arc<dyn TokenValidator>,
    pub config: Arc<Config>,
    pub hub: Arc<Hub>,
}
