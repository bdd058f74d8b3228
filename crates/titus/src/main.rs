use std::sync::Arc;

use tracing::info;

use titus_core::{
    bot::TitusBot,
    config::Config,
    dedup::UpdateFilter,
    dry_run::DryRunFactory,
    manager::{ManagerConfig, UpdateManager},
    moderation::ModerationPipeline,
    ports::{BotApiFactory, PushConnection},
    welcome::WelcomeHandler,
};
use titus_telegram::TelegramBotFactory;
use titus_titorelli::{LivenessReporter, TitorelliCas, TitorelliModel};
use titus_transmitter::{TransmitterClient, TransmitterConfig};

#[tokio::main]
async fn main() -> Result<(), titus_core::Error> {
    titus_core::logging::init("titus")?;

    let cfg = Config::load()?;

    let manager_cfg = ManagerConfig {
        startup_timeout: cfg.startup_timeout,
        ..ManagerConfig::default()
    };

    let telegram = TelegramBotFactory::new(cfg.bot_token.clone(), manager_cfg.poll_timeout)?;
    let factory: Arc<dyn BotApiFactory> = if cfg.dry_run {
        info!("dry run: messages will not be deleted and users will not be banned");
        Arc::new(DryRunFactory::new(telegram))
    } else {
        Arc::new(telegram)
    };

    let transmitter = match (&cfg.transmitter_origin, cfg.transmitter_enabled) {
        (Some(origin), true) => {
            let client = TransmitterClient::new(TransmitterConfig::new(
                origin.as_str(),
                cfg.client_id.clone(),
                cfg.access_token.clone(),
                cfg.bot_token.clone(),
            ))?;
            client.start();
            Some(client)
        }
        _ => None,
    };
    let connection = transmitter
        .clone()
        .map(|c| Arc::new(c) as Arc<dyn PushConnection>);

    let manager = UpdateManager::new(
        factory,
        connection,
        UpdateFilter::new(cfg.update_retention),
        manager_cfg,
    );
    let moderation = ModerationPipeline::new(
        Arc::new(TitorelliCas::new(&cfg.cas_origin, cfg.access_token.clone())?),
        Arc::new(TitorelliModel::new(&cfg.model_origin, cfg.access_token.clone())?),
    );
    let bot = TitusBot::new(
        manager,
        WelcomeHandler::new(cfg.site_url.clone(), cfg.static_dir.clone()),
        moderation,
    );

    let liveness = LivenessReporter::new(
        &cfg.titorelli_host,
        cfg.client_id.clone(),
        cfg.liveness_interval,
        cfg.liveness_backoff,
    )?;
    liveness.start().await;

    if let Err(e) = bot.start().await {
        liveness.stop().await;
        if let Some(t) = &transmitter {
            t.stop().await;
        }
        return Err(e);
    }

    shutdown_signal().await?;
    info!("shutdown signal received");

    bot.stop().await;
    liveness.stop().await;
    if let Some(t) = &transmitter {
        t.stop().await;
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> titus_core::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> titus_core::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
