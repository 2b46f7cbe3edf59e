use actix_web::{middleware, web, App, HttpServer};
use actix_web_prom::PrometheusMetricsBuilder;
use etcd_controller::{errors, init_controller, metrics, views, Config, EtcdEnvironmentConfig};
use kube::client::Client;
use log::{debug, info, warn};
use prometheus::Registry;

#[actix_rt::main]
async fn main() -> Result<(), errors::Error> {
    // Verbosity comes from RUST_LOG
    env_logger::init();

    let env_config: EtcdEnvironmentConfig = envy::from_env::<EtcdEnvironmentConfig>()?;
    debug!("Environment config: {:?}", &env_config);
    let config = Config::from_env_config(env_config)?;
    info!("Starting with config: {:?}", config);

    let bind_address = format!("{}:{}", &config.server_host, config.server_port);

    let client = Client::try_default().await?;
    let controller = init_controller(client.clone(), config.clone());

    let registry = Registry::new();
    metrics::custom_metrics(&registry)
        .map_err(|err| errors::Error::InvalidConfig(format!("Failed to register metrics: {}", err)))?;
    let prometheus = PrometheusMetricsBuilder::new(metrics::METRICS_NAMESPACE)
        .registry(registry)
        .endpoint("/metrics")
        .build()
        .map_err(|err| errors::Error::InvalidConfig(format!("Failed to build metrics middleware: {}", err)))?;

    let app_state = web::Data::new(views::AppState {
        client,
        namespace: config.namespace.clone(),
        default_bucket: config.storage.default_bucket.clone(),
    });

    let run = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(prometheus.clone())
            .wrap(middleware::Logger::default().exclude("/health").exclude("/metrics"))
            .wrap(middleware::Compress::default())
            .service(web::resource("/health").to(views::health))
            .service(web::resource("/clusters").to(views::clusters))
            .service(web::resource("/clusters/{namespace}/{name}/backup").to(views::cluster_backup))
    })
    .bind(&bind_address)
    .map_err(|err| errors::Error::InvalidConfig(format!("Could not bind to '{}': {}", &bind_address, err)))?
    .run();

    tokio::select! {
        _ = controller => warn!("controller drained"),
        _ = run => info!("actix exited"),
    }
    Ok(())
}
