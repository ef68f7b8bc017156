// src/session/endpoint.rs
use actix_web::{HttpRequest, HttpResponse, web};

use crate::errors::ProtocolError;
use crate::session::state::{CallReply, SessionContext};

/// Every path is a protocol token: `/start` or `/<clue>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/{token:.*}", web::route().to(handle_call));
}

pub async fn handle_call(ctx: web::Data<SessionContext>, req: HttpRequest) -> HttpResponse {
    match ctx.handle_call(req.path()).await {
        Ok(CallReply::Clue(clue)) => HttpResponse::Ok().body(clue.to_string()),
        Ok(CallReply::Accepted) => HttpResponse::Accepted().body("accepted"),
        Err(e @ ProtocolError::Malformed(_)) => {
            log::debug!("Rejected call {}: {}", req.path(), e);
            HttpResponse::BadRequest().body(e.to_string())
        }
        Err(e) => {
            log::debug!("Rejected call {}: {}", req.path(), e);
            HttpResponse::Conflict().body(e.to_string())
        }
    }
}
