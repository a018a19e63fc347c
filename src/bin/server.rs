//! Thin `actix-web` binary exposing the read API: `/fapi/v1/klines` and
//! `/v1/health`.
//!
//! Grounded on the teacher's `bin/web_server.rs` (`AppState` struct,
//! `web::block` for blocking store calls, `#[get(...)]` route macros, JSON
//! error body shape), with the route set replaced per §6 instead of the
//! teacher's `/api/pairs`/`/api/candles`/realtime surface.

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, web};
use mtf_kline_node::config::Settings;
use mtf_kline_node::lifecycle::AppState;
use mtf_kline_node::timeframe::Timeframe;
use mtf_kline_node::usecase::{GetKlines, GetKlinesParams, HealthSnapshot};
use serde::Deserialize;
use std::sync::Arc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
struct KlinesQuery {
    symbol: String,
    interval: String,
    #[serde(rename = "startTime")]
    start_time: Option<i64>,
    #[serde(rename = "endTime")]
    end_time: Option<i64>,
    limit: Option<i64>,
    #[serde(rename = "includeCurrent")]
    include_current: Option<bool>,
}

#[derive(serde::Serialize)]
struct ApiError {
    error: String,
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiError { error: message.into() })
}

/// `GET /fapi/v1/klines` — byte-compatible with the upstream exchange's
/// endpoint of the same shape.
#[get("/fapi/v1/klines")]
async fn get_klines(state: web::Data<Arc<AppState>>, query: web::Query<KlinesQuery>) -> impl Responder {
    let Some(timeframe) = Timeframe::parse(&query.interval) else {
        return bad_request(format!("invalid interval: {}", query.interval));
    };
    let limit = query.limit.unwrap_or(500);
    if !(1..=1500).contains(&limit) {
        return bad_request("limit must be between 1 and 1500");
    }

    let usecase = GetKlines::new(Arc::clone(&state.store), Arc::clone(&state.cache), state.settings.cache_ttl_sec_klines);
    let params = GetKlinesParams {
        symbol: query.symbol.to_uppercase(),
        timeframe,
        start_ms: query.start_time,
        end_ms: query.end_time,
        limit,
        include_current: query.include_current.unwrap_or(false),
    };

    match usecase.handle(params).await {
        Ok(bytes) => HttpResponse::Ok().content_type("application/json").body(bytes),
        Err(e) => HttpResponse::InternalServerError().json(ApiError { error: e.to_string() }),
    }
}

/// `GET /v1/health`.
#[get("/v1/health")]
async fn health(state: web::Data<Arc<AppState>>) -> impl Responder {
    match HealthSnapshot::handle(Arc::clone(&state.store), VERSION.to_string()).await {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot),
        Err(e) => HttpResponse::InternalServerError().json(ApiError { error: e.to_string() }),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    });
    let bind_addr = "0.0.0.0:8080";
    let state = Arc::new(AppState::build(settings).expect("failed to initialize application state"));

    tracing::info!(bind_addr, "starting klines read API");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(Arc::clone(&state)))
            .service(get_klines)
            .service(health)
    })
    .bind(bind_addr)?
    .run()
    .await
}
