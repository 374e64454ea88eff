use std::sync::Arc;

use anyhow::Context;
use rand::distr::{Alphanumeric, SampleString};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use courier::api::{ApiServer, ApiServerConfig, AppState};
use courier::config::AppConfig;
use courier::database::{self, repositories};
use courier::dispatcher::Dispatcher;
use courier::gateway::{JwtIdentityVerifier, PushGateway};
use courier::logging::init_logging;
use courier::mail::SmtpMailTransport;
use courier::orchestrator::NotificationOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    let (logging_config, _log_guard) =
        init_logging(&config.log_dir).context("Failed to initialize logging")?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let mail_queue = Arc::new(repositories::SqlxMailQueueRepository::new(pool.clone()));
    let templates = Arc::new(repositories::SqlxTemplateRepository::new(pool.clone()));
    let notifications = Arc::new(repositories::SqlxNotificationRepository::new(pool.clone()));
    let directory = Arc::new(repositories::SqlxUserDirectory::new(pool.clone()));

    let transport = Arc::new(SmtpMailTransport::new(&config.smtp)?);
    let dispatcher = Arc::new(Dispatcher::new(
        mail_queue,
        templates,
        transport,
        config.dispatcher.clone(),
    ));
    let dispatcher_task = dispatcher.start();

    let secret = match &config.jwt.secret {
        Some(secret) => secret.clone(),
        None => {
            warn!("JWT_SECRET is not set; push connections and admin requests will be rejected");
            Alphanumeric.sample_string(&mut rand::rng(), 48)
        }
    };
    let verifier = Arc::new(JwtIdentityVerifier::new(
        &secret,
        config.jwt.issuer.clone(),
        config.jwt.audience.clone(),
    ));
    let gateway = Arc::new(PushGateway::new(verifier, config.gateway.clone()));

    let orchestrator = Arc::new(NotificationOrchestrator::new(
        notifications,
        directory,
        gateway.clone(),
        dispatcher.clone(),
        config.orchestrator.clone(),
    ));

    let log_cleanup_token = CancellationToken::new();
    logging_config.start_retention_cleanup(log_cleanup_token.clone());

    let state = AppState::new(dispatcher.clone(), gateway.clone(), orchestrator)
        .with_logging_config(logging_config);
    let server = Arc::new(ApiServer::new(ApiServerConfig::from(&config.api), state));

    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    info!("courier started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    dispatcher.stop();
    gateway.registry().disconnect_all();
    server.shutdown();
    log_cleanup_token.cancel();

    if let Err(e) = dispatcher_task.await {
        warn!("Dispatcher task ended abnormally: {}", e);
    }
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("API server error: {}", e),
        Err(e) => warn!("API server task ended abnormally: {}", e),
    }

    pool.close().await;
    info!("courier stopped");
    Ok(())
}
