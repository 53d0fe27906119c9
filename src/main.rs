use anyhow::{Context, Error};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use audioprompt::storage::ImageStore;
use audioprompt::{server, telemetry, Collaborators, Config, ProcessingService};

fn listen_for_signals(token: CancellationToken) -> Result<(), Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        token.cancel();
    });
    Ok(())
}

async fn run(config: Config, cancel_token: CancellationToken) -> Result<(), Error> {
    let store = ImageStore::new(&config.image_generations_path);
    store
        .prepare()
        .await
        .with_context(|| format!("cannot create {}", config.image_generations_path.display()))?;

    let collaborators = Collaborators::from_config(&config)?;
    let service = ProcessingService::start(&config, collaborators, store)?;

    let served = server::serve(cancel_token.clone(), config.listen_addr, service.handle())
        .instrument(info_span!("server"))
        .await;
    if let Err(err) = &served {
        error!(error = ?err, "Server failed");
    }

    info!("Waiting for workers to finish...");
    service.stop().await?;
    served
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();
    config.validate()?;

    telemetry::init(config.jaeger_endpoint.as_deref())?;

    let token = CancellationToken::new();
    listen_for_signals(token.clone())?;

    let result = run(config, token).await;
    info!("Shutting down.");
    telemetry::shutdown();

    result
}
