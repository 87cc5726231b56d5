//! Control and status API for the display front end.
//!
//! Handlers never touch core state: commands are posted into the primary
//! loop's mailbox and status is read from the presenter's snapshot.

use std::net::SocketAddr;
use std::thread;

use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use kiosk_types::Source;

use crate::orchestrator::{KioskCommand, KioskMessage};
use crate::status::SharedStatus;

pub struct AppState {
    pub mailbox: Sender<KioskMessage>,
    pub status: SharedStatus,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize, Serialize)]
pub struct VolumeBody {
    /// Percent; values above 100 are clamped.
    pub value: u8,
}

fn dispatch(state: &AppState, command: KioskCommand) -> HttpResponse {
    match state.mailbox.send(KioskMessage::Command(command)) {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({ "error": "kiosk loop stopped" })),
    }
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[get("/status")]
pub async fn status(state: web::Data<AppState>) -> impl Responder {
    match state.status.lock() {
        Ok(snapshot) => HttpResponse::Ok().json(&*snapshot),
        Err(_) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": "status unavailable" })),
    }
}

#[post("/source/{name}")]
/// Select (or reselect) a source.
pub async fn select_source(state: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    let source = match name.parse::<Source>() {
        Ok(source) => source,
        Err(e) => return HttpResponse::BadRequest().json(serde_json::json!({ "error": e })),
    };
    tracing::info!(%source, "source request");
    dispatch(&state, KioskCommand::Select(source))
}

#[post("/next")]
pub async fn next(state: web::Data<AppState>) -> impl Responder {
    dispatch(&state, KioskCommand::Next)
}

#[post("/previous")]
pub async fn previous(state: web::Data<AppState>) -> impl Responder {
    dispatch(&state, KioskCommand::Previous)
}

#[post("/toggle")]
/// Toggle play/pause of the disc.
pub async fn toggle(state: web::Data<AppState>) -> impl Responder {
    dispatch(&state, KioskCommand::TogglePlayPause)
}

#[post("/volume")]
pub async fn volume(state: web::Data<AppState>, body: web::Json<VolumeBody>) -> impl Responder {
    dispatch(&state, KioskCommand::SetVolume(body.value.min(100)))
}

/// Run the API on its own thread with a dedicated actix system.
pub fn spawn_http_server(bind: SocketAddr, state: AppState) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let state = web::Data::new(state);
        let result = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(state.clone())
                    .service(health)
                    .service(status)
                    .service(select_source)
                    .service(next)
                    .service(previous)
                    .service(toggle)
                    .service(volume)
            })
            .workers(1)
            .disable_signals()
            .bind(bind)?;
            tracing::info!(bind = %bind, "http api listening");
            server.run().await
        });
        if let Err(e) = result {
            tracing::error!(bind = %bind, error = %e, "http server failed");
        }
    })
}
