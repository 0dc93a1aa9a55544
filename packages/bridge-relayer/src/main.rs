mod api;
mod config;
mod destination;
mod metrics;
mod observer;
mod sources;

use std::sync::Arc;
use std::time::Duration;

use bridge_core::{
    message_channel, resolve_start_block, shutdown, AppRoutes, ChainListener, Dispatcher,
    EventBus, ListenerError, MessageSender, Shutdown, SourceChain,
};
use config::Config;
use destination::EvmDestination;
use eyre::eyre;
use observer::{Observer, SharedStats};
use sources::{EvmSource, SubstrateSource};
use tokio::task::JoinHandle;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Run the async main
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    // Initialize logging
    init_logging();

    tracing::info!("Starting bridge relayer");

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        substrate_rpc = %config.substrate.rpc_url,
        evm_rpc = %config.evm.rpc_url,
        finality_blocks = config.evm.finality_blocks,
        channel_capacity = config.relayer.channel_capacity,
        "Configuration loaded"
    );

    let routes = config.routes()?;
    for (class, app) in routes.iter() {
        tracing::info!(asset_class = %class, app = %app, "Route configured");
    }

    // Setup signal handlers
    let (trigger, mut stop) = shutdown::channel();
    let trigger = Arc::new(trigger);
    let signal_trigger = trigger.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_trigger.trigger();
    });

    // Chain clients
    let substrate = Arc::new(SubstrateSource::new(&config.substrate.rpc_url)?);
    let evm = Arc::new(EvmSource::new(
        &config.evm.rpc_url,
        &routes,
        config.evm.finality_blocks,
    )?);
    let destination = Arc::new(EvmDestination::new(
        &config.evm.rpc_url,
        &config.evm.private_key,
        config.release_timeout(),
    )?);
    tracing::info!(relayer = %destination.address(), "Releases will be sent from this account");

    let retry = config.retry_interval();
    let substrate_start =
        resolve_start_block(&*substrate, config.substrate.start_block, retry, &mut stop).await;
    let evm_start = resolve_start_block(&*evm, config.evm.start_block, retry, &mut stop).await;
    let (Some(substrate_start), Some(evm_start)) = (substrate_start, evm_start) else {
        tracing::info!("Shutdown requested before start");
        return Ok(());
    };

    // Pipeline
    let bus = EventBus::new(config.relayer.event_bus_capacity);
    let (sender, mut receiver) = message_channel(config.relayer.channel_capacity);
    let stats = SharedStats::default();

    let mut dispatcher = Dispatcher::new(routes.clone(), destination, bus.clone());
    let ledgers = dispatcher.ledger_watch();

    let observer = Observer::new(
        bus.subscribe(),
        ledgers.clone(),
        sender.depth_probe(),
        stats.clone(),
    );
    let observer_task = tokio::spawn(observer.run(stop.clone()));

    let api_state = api::AppState { stats, ledgers };
    let api_stop = stop.clone();
    let bind_address = config.api.bind_address.clone();
    let port = config.api.port;
    let api_task = tokio::spawn(async move {
        if let Err(e) = api::start_server(&bind_address, port, api_state, api_stop).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let mut dispatcher_stop = stop.clone();
    let dispatcher_task =
        tokio::spawn(async move { dispatcher.run(&mut receiver, &mut dispatcher_stop).await });

    let listeners = vec![
        spawn_listener(substrate, substrate_start, retry, &routes, &sender, &bus, &stop),
        spawn_listener(evm, evm_start, retry, &routes, &sender, &bus, &stop),
    ];
    // The listeners hold the remaining senders
    drop(sender);

    metrics::set_up(true);
    tracing::info!(substrate_start, evm_start, "Relay pipeline running");

    // Either listener stopping ends the relay
    let (first, _, rest) = futures::future::select_all(listeners).await;
    trigger.trigger();
    let mut failed = listener_failed(first);
    for result in futures::future::join_all(rest).await {
        failed |= listener_failed(result);
    }

    let handled = dispatcher_task.await?;
    let _ = observer_task.await;
    let _ = api_task.await;
    metrics::set_up(false);

    tracing::info!(handled, "Bridge relayer stopped");
    if failed {
        return Err(eyre!("a chain listener stopped with an unrecoverable error"));
    }
    Ok(())
}

fn spawn_listener<S>(
    source: Arc<S>,
    start: u64,
    retry: Duration,
    routes: &AppRoutes,
    sender: &MessageSender,
    bus: &EventBus,
    stop: &Shutdown,
) -> JoinHandle<Result<(), ListenerError>>
where
    S: SourceChain + 'static,
{
    let routes = routes.clone();
    let sender = sender.clone();
    let bus = bus.clone();
    let mut listener = ChainListener::new(source, start, retry, stop.clone());
    tokio::spawn(async move { listener.run(&routes, &sender, &bus).await })
}

fn listener_failed(result: Result<Result<(), ListenerError>, tokio::task::JoinError>) -> bool {
    match result {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Listener failed");
            metrics::record_error("listener", "fatal");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Listener task panicked");
            true
        }
    }
}

/// Initialize tracing/logging with structured output
///
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_relayer=debug,bridge_core=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
