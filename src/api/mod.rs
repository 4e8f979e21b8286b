//! HTTP routes. Handlers only unpack the request and delegate to
//! [`crate::service`].

use actix_cors::Cors;
use actix_web::http::{header, Method};
use actix_web::{get, post, web, Error, HttpRequest, HttpResponse, Responder};
use log::debug;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::service::{download_service, upload_service};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Retention in minutes, free-form
    pub retention: Option<String>,
}

#[get("/")]
pub async fn index() -> impl Responder {
    HttpResponse::Ok().body("Momentary relay is running")
}

#[post("/api/upload/{filename}")]
pub async fn upload(
    path: web::Path<String>,
    query: web::Query<UploadQuery>,
    payload: web::Payload,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let filename = path.into_inner();
    upload_service(filename, query.into_inner().retention, payload, req, app_state).await
}

#[get("/api/download/{code}")]
pub async fn download(path: web::Path<String>, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    download_service(path.into_inner(), app_state).await
}

/// Register every route on an app or scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index).service(upload).service(download);
}

/// CORS policy for the configured browser origins
pub fn cors(config: &ServerConfig) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec![
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::PATCH,
            Method::POST,
            Method::DELETE,
        ])
        .allowed_header(header::CONTENT_TYPE)
        .expose_headers(vec![header::CONTENT_DISPOSITION])
        .max_age(3600);

    for origin in &config.cors_allowed_origins {
        if origin == "*" {
            debug!("CORS: allowing any origin");
            cors = cors.allow_any_origin();
        } else {
            debug!("CORS: allowing origin {}", origin);
            cors = cors.allowed_origin(origin);
        }
    }
    cors
}
