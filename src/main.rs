//! Application entry point for aqi-bot.
//!
//! Initializes storage, external clients and services, then runs the
//! notification publisher until Ctrl+C.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use aqi_bot::air_quality::aqicn_provider::AqicnProvider;
use aqi_bot::config::Config;
use aqi_bot::delivery::telegram_channel::TelegramChannel;
use aqi_bot::logging::setup_logging;
use aqi_bot::repository::Repository;
use aqi_bot::repository::table::SubscriptionTable;
use aqi_bot::service::Services;
use aqi_bot::task::notification_publisher::NotificationPublisher;
use aqi_bot::task::notification_publisher::PublisherSettings;
use dotenv::dotenv;
use log::debug;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let init_start = Instant::now();
    let config = load_config().await?;

    let repository = setup_repository(&config, init_start).await?;
    let provider = Arc::new(AqicnProvider::new(
        &config.aqicn_api_url,
        &config.aqicn_api_key,
        config.request_timeout,
    )?);
    let services = setup_services(&config, &repository, provider.clone())?;
    let publisher = setup_publisher(&config, &repository, provider, init_start)?;

    run(init_start).await?;

    publisher.shutdown().await?;
    drop(services);
    repository.close().await;
    info!("aqi-bot stopped.");
    Ok(())
}

async fn load_config() -> Result<Arc<Config>> {
    debug!("Loading configuration...");
    let mut config = Config::new();
    config.load()?;
    let config = Arc::new(config);
    setup_logging(&config)?;
    info!("Starting aqi-bot...");
    Ok(config)
}

async fn setup_repository(config: &Config, init_start: Instant) -> Result<Arc<Repository>> {
    debug!("Setting up Repository...");
    let repository = Arc::new(Repository::new(&config.db_url, &config.db_path).await?);

    info!("Running database migrations...");
    repository.run_migrations().await?;
    info!(
        "Repository setup complete ({:.2}s).",
        init_start.elapsed().as_secs_f64()
    );

    Ok(repository)
}

fn setup_services(
    config: &Config,
    repository: &Repository,
    provider: Arc<AqicnProvider>,
) -> Result<Arc<Services>> {
    debug!("Setting up Services...");
    let store: Arc<SubscriptionTable> = Arc::new(repository.subscriptions.clone());
    Ok(Arc::new(Services::from_config(config, store, provider)?))
}

fn setup_publisher(
    config: &Config,
    repository: &Repository,
    provider: Arc<AqicnProvider>,
    init_start: Instant,
) -> Result<Arc<NotificationPublisher>> {
    debug!("Setting up NotificationPublisher...");

    let store: Arc<SubscriptionTable> = Arc::new(repository.subscriptions.clone());
    let channel = Arc::new(TelegramChannel::new(
        &config.telegram_api_url,
        &config.telegram_token,
        config.request_timeout,
    )?);

    let publisher = NotificationPublisher::new(
        store,
        provider,
        channel,
        PublisherSettings::from_config(config),
    );
    publisher.clone().start()?;

    info!(
        "Publisher setup complete ({:.2}s).",
        init_start.elapsed().as_secs_f64()
    );
    Ok(publisher)
}

async fn run(init_start: Instant) -> Result<()> {
    info!(
        "aqi-bot is up in {:.2}s. Press Ctrl+C to stop.",
        init_start.elapsed().as_secs_f64()
    );

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down.");

    Ok(())
}
