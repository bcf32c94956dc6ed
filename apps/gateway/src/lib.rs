pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod push;
pub mod routes;

use std::sync::Arc;

use agora_common::SnowflakeGenerator;
use auth::tokens::{CredentialVerifier, JwtVerifier};
use config::Config;
use db::store::Persistence;
use gateway::calls::CallManager;
use gateway::delivery::MessagePipeline;
use gateway::fanout::Hub;
use gateway::notify::Notifier;
use gateway::streams::StreamManager;
use push::PushDispatcher;

/// Shared application state available to all route handlers and gateway
/// connections.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Persistence>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub hub: Arc<Hub>,
    pub notifier: Notifier,
    pub messages: MessagePipeline,
    pub calls: Arc<CallManager>,
    pub streams: StreamManager,
}

impl AppState {
    /// Wire every gateway component around one hub, verifying credentials
    /// with the configured JWT secret.
    pub fn new(config: Config, store: Arc<dyn Persistence>, push: Arc<dyn PushDispatcher>) -> Self {
        let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret, config.jwt_issuer.as_deref()));
        Self::with_verifier(config, store, push, verifier)
    }

    pub fn with_verifier(
        config: Config,
        store: Arc<dyn Persistence>,
        push: Arc<dyn PushDispatcher>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let hub = Arc::new(Hub::new());
        let snowflake = Arc::new(SnowflakeGenerator::new(config.worker_id));
        let notifier = Notifier::new(hub.clone(), store.clone(), push, snowflake.clone());
        let messages = MessagePipeline::new(hub.clone(), store.clone(), notifier.clone(), snowflake.clone());
        let calls = Arc::new(CallManager::new(
            hub.clone(),
            store.clone(),
            notifier.clone(),
            config.call_retention(),
        ));
        let streams = StreamManager::new(hub.clone(), store.clone(), snowflake.clone());

        Self {
            config: Arc::new(config),
            store,
            verifier,
            snowflake,
            hub,
            notifier,
            messages,
            calls,
            streams,
        }
    }
}
