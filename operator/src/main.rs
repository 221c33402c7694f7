use clap::Parser;
use controller::{
    Manager, Result,
    config::{LogFormat, Parameters},
};
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Responder, get, middleware,
    web::Data,
};

#[get("/metrics")]
async fn metrics(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(metrics)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> Result<()> {
    let params = Parameters::parse();

    // Setup tracing layers
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| controller::Error::Other(e.to_string()))?;
    let logger = match params.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };
    let collector = Registry::default().with(logger).with(env_filter);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector).map_err(|e| controller::Error::Other(e.to_string()))?;
    tracing::info!("Starting {} {}", common::get_client_name(), env!("CARGO_PKG_VERSION"));

    // Start kubernetes controller
    let (manager, controller) = Manager::new(&params).await?;

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(manager.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&params.bind)?
    .shutdown_timeout(5);

    tokio::select! {
        _ = controller => tracing::warn!("CustomResourceStateMetrics controller exited"),
        _ = server.run() => tracing::info!("actix exited"),
    }
    Ok(())
}
