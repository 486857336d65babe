#[macro_use]
extern crate diesel;
use std::{process::ExitCode, time::Duration};

use crate::{
    backend::AppointmentBackend, booking::seed_demo, configuration::Configuration,
    configuration_handler::ConfigurationHandler, database_interface::DatabaseInterface,
    http::create_app, local_appointments::LocalAppointments,
};
use tokio::{net::TcpListener, time::sleep};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod availability;
mod backend;
mod booking;
mod configuration;
mod configuration_handler;
mod database_interface;
mod error;
mod http;
mod local_appointments;
mod schema;
#[cfg(test)]
mod testutils;
mod types;

async fn serve<T: AppointmentBackend>(
    listener: TcpListener,
    backend: T,
    configuration: ConfigurationHandler,
) -> ExitCode {
    if configuration.seed_demo() {
        if let Err(err) = seed_demo(&backend, configuration.default_slot_settings()) {
            warn!(%err, "Failed to seed demo data");
        }
    }
    let app = create_app(backend, configuration);
    match axum::serve(listener, app).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "Server stopped");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("###############");
    println!("# Agende Mais #");
    println!("###############");

    let configuration = ConfigurationHandler::parse_arguments();
    if let Err(err) = configuration.validate() {
        error!(%err, "Invalid slot defaults");
        return ExitCode::FAILURE;
    }

    let address = format!("0.0.0.0:{}", configuration.port());
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %address, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    info!(%address, "Accepting requests");

    if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(?err, "Failed to establish database connection. Retry in 1 sec. Start without a database url to keep appointments in memory.");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        serve(listener, backend, configuration).await
    } else {
        serve(listener, LocalAppointments::default(), configuration).await
    }
}
