//service/mod.rs
pub mod reclamation_worker;

use actix_web::http::header::{self, ContentDisposition};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use chrono::Utc;
use futures::StreamExt;
use log::{debug, error, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::app_state::AppState;
use crate::error::RelayError;
use crate::registry::code::is_valid_code;
use crate::storage::{sanitize_display_name, RetrievalLocator, StagedBlob};

/// Unique staging file inside `temp_dir`
fn staging_path(temp_dir: &Path) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    temp_dir.join(format!("upload-{}-{}", Utc::now().timestamp_millis(), suffix))
}

async fn discard_staging(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Discarded staging file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove staging file {}: {}", path.display(), e),
    }
}

/// Write the request body to `path`, returning the number of bytes written
async fn stage_payload(path: &Path, payload: &mut web::Payload, limit: u64) -> Result<u64, Error> {
    let mut file = File::create(path).await.map_err(RelayError::Io)?;
    let mut written: u64 = 0;
    while let Some(chunk) = payload.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if written > limit {
            return Err(RelayError::Validation(format!("Upload exceeds {} bytes.", limit)).into());
        }
        file.write_all(&chunk).await.map_err(RelayError::Io)?;
    }
    file.flush().await.map_err(RelayError::Io)?;
    Ok(written)
}

pub async fn upload_service(
    filename: String,
    retention: Option<String>,
    mut payload: web::Payload,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    log_mdc::remove("code");
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(RelayError::Validation("No file name provided.".to_string()).into());
    }

    let staged = staging_path(app_state.staging_dir());
    let limit = app_state.config.server.max_payload_size;
    let size = match stage_payload(&staged, &mut payload, limit).await {
        Ok(size) => size,
        Err(e) => {
            error!("Error staging upload {}: {}", filename, e);
            discard_staging(&staged).await;
            return Err(e);
        }
    };

    if size == 0 {
        warn!("Empty upload for {}", filename);
        discard_staging(&staged).await;
        return Err(RelayError::Validation("No file uploaded.".to_string()).into());
    }
    info!("Received {} bytes for {}", size, filename);

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let blob = StagedBlob::new(staged.clone(), filename).with_content_type(content_type);

    let retention = retention.unwrap_or_default();
    let code = match app_state.registry.create(blob, &retention).await {
        Ok(code) => code,
        Err(e) => {
            error!("Error uploading file {}: {}", filename, e);
            discard_staging(&staged).await;
            return Err(e.into());
        }
    };

    log_mdc::insert("code", &code);
    Ok(HttpResponse::Created().json(serde_json::json!({ "code": code })))
}

pub async fn download_service(code: String, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    if !is_valid_code(&code) {
        debug!("Rejected malformed code {:?}", code);
        return Err(RelayError::Validation("Invalid code.".to_string()).into());
    }
    log_mdc::insert("code", &code);

    let (record, locator) = app_state.registry.retrieve(&code).await?;

    match locator {
        RetrievalLocator::LocalPath(path) => {
            let data = fs::read(&path).await.map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    warn!("Blob {} vanished before it could be served", path.display());
                    RelayError::NotFoundOrExpired
                } else {
                    RelayError::Io(e)
                }
            })?;
            info!("Serving {} ({} bytes)", record.original_name, data.len());
            Ok(HttpResponse::Ok()
                .content_type("application/octet-stream")
                .insert_header(ContentDisposition::attachment(sanitize_display_name(&record.original_name)))
                .body(data))
        }
        RetrievalLocator::SignedUrl(url) => {
            info!("Redirecting download of {} to object store", record.original_name);
            Ok(HttpResponse::Found()
                .insert_header((header::LOCATION, url))
                .finish())
        }
    }
}
