use std::{process, sync::Arc};

use todo_frontend::{
    application::{error::AppError, serve::ImageService},
    cache::{CacheConfig, ImageCache},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        source::HttpImageSource,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let images = build_image_service(&settings)?;

    match command {
        config::Command::Serve(_) => run_serve(settings, images).await,
        config::Command::Status => run_status(&images),
        config::Command::Refresh => run_refresh(&images).await,
    }
}

fn build_image_service(settings: &config::Settings) -> Result<ImageService, AppError> {
    let cache = ImageCache::open(CacheConfig::from(&settings.cache))?;
    let source = HttpImageSource::new(settings.source.url.clone(), settings.source.timeout)?;

    info!(
        target = "todo_frontend::startup",
        cache_dir = %settings.cache.directory.display(),
        ttl_seconds = settings.cache.ttl.as_secs(),
        source = %source.url(),
        "Image service configured"
    );

    Ok(ImageService::new(Arc::new(cache), Arc::new(source)))
}

async fn run_serve(settings: config::Settings, images: ImageService) -> Result<(), AppError> {
    let warmup = images.warmup().await;
    info!(
        target = "todo_frontend::startup",
        warmup = ?warmup,
        "Startup warmup finished"
    );

    let state = HttpState {
        images,
        site: Arc::new(settings.site.clone()),
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "todo_frontend::startup",
        addr = %settings.server.addr,
        namespace = %settings.site.namespace,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
    let mut handle = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut handle => return flatten_server_result(result),
        () = shutdown_signal() => {}
    }

    info!(
        target = "todo_frontend::shutdown",
        grace_seconds = settings.server.graceful_shutdown.as_secs(),
        "Shutdown requested, draining connections"
    );
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut handle).await {
        Ok(result) => flatten_server_result(result),
        Err(_) => {
            warn!(
                target = "todo_frontend::shutdown",
                "Graceful shutdown timed out; aborting open connections"
            );
            handle.abort();
            Ok(())
        }
    }
}

fn flatten_server_result(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(
                target = "todo_frontend::shutdown",
                error = %err,
                "failed to listen for Ctrl-C"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(
                    target = "todo_frontend::shutdown",
                    error = %err,
                    "failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn run_status(images: &ImageService) -> Result<(), AppError> {
    let snapshot = images.cache().snapshot();
    let rendered = serde_json::to_string_pretty(&snapshot)
        .map_err(|err| AppError::unexpected(format!("failed to encode snapshot: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run_refresh(images: &ImageService) -> Result<(), AppError> {
    images.refresh().await?;
    let snapshot = images.cache().snapshot();
    info!(
        target = "todo_frontend::refresh",
        status = snapshot.status.as_str(),
        "Image refreshed"
    );
    Ok(())
}
