// src/main.rs
use actix_web::{middleware, web, App, HttpServer};
use std::process::ExitCode;

use xqueue_grader::api::{configure_routes, AppState};
use xqueue_grader::banner;
use xqueue_grader::config::AppConfig;
use xqueue_grader::service::GradingService;
use xqueue_grader::worker::{self, WORKER_ARG};

#[actix_web::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        log::debug!("No .env file loaded: {}", e);
    }
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if std::env::args().nth(1).as_deref() == Some(WORKER_ARG) {
        return run_worker(config).await;
    }

    banner::print_banner();
    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Server stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// One item in on stdin, one reply line out on stdout.
async fn run_worker(config: AppConfig) -> ExitCode {
    let service = GradingService::from_config(config);
    match worker::serve_stdin(&service).await {
        Ok(line) => {
            println!("{}", line);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Worker failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: AppConfig) -> std::io::Result<()> {
    let bind = config.bind;
    let state = AppState::new(config).map_err(std::io::Error::other)?;

    log::info!("Grader root: {}", state.config.grader_root.display());
    log::info!(
        "Fail-open: {}, worker per item: {}",
        state.config.fail_open,
        state.worker.is_some()
    );
    log::info!("Listening on http://{}", bind);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind)?
    .run()
    .await
}
