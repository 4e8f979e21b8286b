use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{info, warn};
use std::io;

use momentary::api;
use momentary::app_state::AppState;
use momentary::config::AppConfig;
use momentary::logging::init_logging;
use momentary::service::reclamation_worker::start_reclamation_worker;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = AppConfig::load().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    init_logging(&config.logging);
    info!("Storage mode: {:?}", config.storage.backend);

    let state = AppState::from_config(config.clone()).map_err(io::Error::other)?;

    let _reclamation = if config.reclamation.enabled {
        Some(start_reclamation_worker(state.registry.clone(), &config.reclamation))
    } else {
        warn!("Reclamation worker disabled; expired uploads are only removed on lookup");
        None
    };

    let data = web::Data::new(state);
    let bind = (config.server.host.clone(), config.server.port);
    let server_config = config.server.clone();
    info!("Server is listening on http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .wrap(api::cors(&server_config))
            .wrap(Logger::default())
            .app_data(data.clone())
            .configure(api::configure)
    })
    .workers(config.server.workers.max(1))
    .bind(bind)?
    .run()
    .await
}
