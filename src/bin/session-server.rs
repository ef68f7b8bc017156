// src/bin/session-server.rs
use actix_web::{web, App, HttpServer};
use std::path::PathBuf;
use std::process::ExitCode;

use xqueue_grader::errors::{GradeError, Result};
use xqueue_grader::session::{endpoint, SessionContext, SessionSettings, Supervisor};

/// Runs inside the interactive sandbox: serves the session endpoint, drives
/// the student's client through every attempt and prints one reply line.
#[actix_web::main]
async fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let path = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "session.toml".to_string()),
    );

    match run(path).await {
        Ok(line) => {
            println!("{}", line);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Session failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(path: PathBuf) -> Result<String> {
    let mut settings = SessionSettings::load(&path)?;
    // The driver shares this directory and must not read the settings.
    if settings.scrub_config {
        std::fs::remove_file(&path)?;
    }

    let bind = settings.bind_addr().map_err(GradeError::Config)?;
    let ctx = SessionContext::new(&settings);
    let data = web::Data::new(ctx.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(endpoint::configure)
    })
    .workers(1)
    .disable_signals()
    .bind(bind)?;
    let bound = server
        .addrs()
        .first()
        .copied()
        .ok_or_else(|| GradeError::ServiceDefect(format!("nothing bound on {}", bind)))?;
    settings.set_bound(bound);

    let server = server.run();
    let handle = server.handle();
    let server_task = actix_rt::spawn(server);
    log::info!("Session endpoint on {}", settings.session_url());

    let result = Supervisor::new(ctx, settings).run().await;

    handle.stop(false).await;
    if let Err(e) = server_task.await {
        log::warn!("Session endpoint did not shut down cleanly: {}", e);
    }

    let reply = result?;
    Ok(serde_json::to_string(&reply)?)
}
