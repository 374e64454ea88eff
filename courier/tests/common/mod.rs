//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use courier::database::repositories::{
    SqlxMailQueueRepository, SqlxNotificationRepository, SqlxTemplateRepository,
    SqlxUserDirectory,
};
use courier::database::{self, DbPool};
use courier::dispatcher::{Dispatcher, DispatcherConfig};
use courier::gateway::{GatewayConfig, JwtIdentityVerifier, PushGateway};
use courier::mail::MailTransport;
use courier::orchestrator::{NotificationOrchestrator, OrchestratorConfig};
use courier::{Error, Result};

pub const JWT_SECRET: &str = "integration-secret-key-32-chars!";
pub const JWT_ISSUER: &str = "courier-tests";

/// In-memory database with migrations applied.
pub async fn test_pool() -> DbPool {
    let pool = database::init_pool_with_size("sqlite::memory:", 1)
        .await
        .unwrap();
    database::run_migrations(&pool).await.unwrap();
    pool
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Transport that fails as many times as scripted, then succeeds.
#[derive(Default)]
pub struct ScriptedTransport {
    failures: Mutex<VecDeque<String>>,
    always_fail: bool,
    attempts: AtomicUsize,
    sent: Mutex<Vec<SentMail>>,
    delivered: Notify,
}

impl ScriptedTransport {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_times(count: usize) -> Arc<Self> {
        let transport = Self::default();
        transport
            .failures
            .lock()
            .extend((1..=count).map(|n| format!("smtp unavailable ({})", n)));
        Arc::new(transport)
    }

    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            always_fail: true,
            ..Default::default()
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }

    /// Resolves after the next successful send.
    pub async fn wait_for_delivery(&self) {
        self.delivered.notified().await;
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if self.always_fail {
            return Err(Error::transport("connection refused"));
        }
        if let Some(reason) = self.failures.lock().pop_front() {
            return Err(Error::transport(reason));
        }

        self.sent.lock().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        self.delivered.notify_one();
        Ok(format!("delivery-{}", attempt))
    }
}

/// Transport that parks every send until released.
#[derive(Default)]
pub struct GatedTransport {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl MailTransport for GatedTransport {
    async fn send(&self, _to: &str, _subject: &str, _html: &str) -> Result<String> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok("gated".to_string())
    }
}

pub fn dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        // Keep out-of-band cycles from racing the explicit ones in tests.
        urgent_delay_ms: 60_000,
        ..Default::default()
    }
}

pub fn dispatcher(
    pool: &DbPool,
    transport: Arc<dyn MailTransport>,
    config: DispatcherConfig,
) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        Arc::new(SqlxMailQueueRepository::new(pool.clone())),
        Arc::new(SqlxTemplateRepository::new(pool.clone())),
        transport,
        config,
    ))
}

pub fn verifier() -> Arc<JwtIdentityVerifier> {
    Arc::new(JwtIdentityVerifier::new(
        JWT_SECRET,
        Some(JWT_ISSUER.to_string()),
        None,
    ))
}

pub fn token_for(user_id: &str) -> String {
    verifier().generate_token(user_id, None, 600).unwrap()
}

pub fn gateway(config: GatewayConfig) -> Arc<PushGateway> {
    Arc::new(PushGateway::new(verifier(), config))
}

/// Everything wired the way the binary wires it.
pub struct Harness {
    pub pool: DbPool,
    pub transport: Arc<ScriptedTransport>,
    pub dispatcher: Arc<Dispatcher>,
    pub gateway: Arc<PushGateway>,
    pub orchestrator: Arc<NotificationOrchestrator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_gateway_config(GatewayConfig::default()).await
    }

    pub async fn with_gateway_config(config: GatewayConfig) -> Self {
        let pool = test_pool().await;
        let transport = ScriptedTransport::succeeding();
        let dispatcher = dispatcher(&pool, transport.clone(), dispatcher_config());
        let gateway = gateway(config);
        let orchestrator = Arc::new(NotificationOrchestrator::new(
            Arc::new(SqlxNotificationRepository::new(pool.clone())),
            Arc::new(SqlxUserDirectory::new(pool.clone())),
            gateway.clone(),
            dispatcher.clone(),
            OrchestratorConfig::default(),
        ));

        Self {
            pool,
            transport,
            dispatcher,
            gateway,
            orchestrator,
        }
    }
}
