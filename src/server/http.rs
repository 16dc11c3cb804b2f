//! actix-web bootstrapping: binds the listener, wires up CORS, and exposes
//! the WebSocket upgrade route alongside the `/health`, `/stats`, `/debug`
//! surfaces declared in [`super`].

use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws;

use crate::config::Settings;
use crate::error::ServerError;
use crate::identity::IdentityVerifier;
use crate::room::RoomRegistry;
use crate::session::actor::Session;

use super::{debug, health, stats, AppState};

async fn socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let session = Session::new(
        state.registry.clone(),
        Arc::clone(&state.identity),
        Arc::clone(&state.settings),
        Arc::clone(&state.connections),
    );
    ws::start(session, &req, stream)
}

fn build_cors(settings: &Settings) -> Cors {
    let origins = settings.cors_origins();
    if origins.iter().any(|origin| origin == "*") {
        return Cors::permissive();
    }
    origins
        .into_iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(&origin))
}

/// Route table shared between the live server and integration tests, so a
/// test can stand up the exact same surface without duplicating it.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(socket))
        .route("/health", web::get().to(health))
        .route("/stats", web::get().to(stats))
        .route("/debug", web::get().to(debug));
}

pub async fn start() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Arc::new(
        Settings::load()
            .map_err(ServerError::from)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?,
    );
    let identity = Arc::new(IdentityVerifier::new(&settings));
    let registry = RoomRegistry::new(Arc::clone(&settings)).start();

    log::info!(
        "ptt-signal-srv starting on port {} (auth mode: {})",
        settings.port,
        identity.mode_label()
    );

    let bind_addr = ("0.0.0.0", settings.port);
    let state = web::Data::new(AppState::new(Arc::clone(&settings), identity, registry));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(build_cors(&state.settings))
            .configure(configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}
