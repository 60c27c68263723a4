use std::io;
use std::path::Path;

use axum::{
    body::Body,
    extract::{Multipart, Request, State, multipart::MultipartRejection},
    http::{Uri, header},
    response::{IntoResponse, Response},
};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::GatewayError;
use crate::form::MultipartForm;
use crate::listing;
use crate::paths::{decode_request_path, resolve_path, upload_file_name, verify_within_root};

/// Raw request paths the delete handler refuses before resolving anything.
const WILDCARD_DELETE_PATHS: [&str; 4] = ["/", "", "*", "/*"];

// ============================================================================
// Health
// ============================================================================

/// GET /readyz - The process is up and accepting connections
pub async fn readyz() -> &'static str {
    "ok"
}

/// GET /livez - The root directory can still be enumerated
pub async fn livez(State(state): State<AppState>) -> Result<&'static str, GatewayError> {
    let readable = async {
        let mut entries = fs::read_dir(&state.root_dir).await?;
        entries.next_entry().await?;
        Ok::<_, io::Error>(())
    };

    readable.await.map_err(|e| {
        error!("Liveness check failed: {}", e);
        GatewayError::RootUnreadable(e)
    })?;

    Ok("ok")
}

// ============================================================================
// Browse / download
// ============================================================================

/// GET /{path} - HTML index for directories, file contents otherwise
///
/// Files go through `ServeFile`, which handles content type, `Range`,
/// conditional requests and `HEAD`.
pub async fn browse(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, GatewayError> {
    let virtual_path = decode_request_path(request.uri().path())?;
    let path = resolve_path(&state.root_dir, &virtual_path)?;
    verify_within_root(&state.root_dir, &path)?;

    let file = fs::File::open(&path).await.map_err(|e| {
        debug!("Cannot open {}: {}", path.display(), e);
        GatewayError::NotFound
    })?;
    let metadata = file.metadata().await.map_err(|e| {
        error!("Error getting file info for {}: {}", path.display(), e);
        GatewayError::Metadata(e)
    })?;
    drop(file);

    if metadata.is_dir() {
        let entries = listing::read_entries(&path).await.map_err(|e| {
            error!("Error reading directory {}: {}", path.display(), e);
            GatewayError::ReadDirFailed(e)
        })?;
        let html = listing::render(&path, &entries);
        return Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response());
    }

    debug!("Serving file: {}", path.display());
    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.map(Body::new))
}

// ============================================================================
// Upload
// ============================================================================

/// POST /{path} - Store every uploaded file under `root/<name>/`
///
/// The URL path is ignored; the target directory comes from the `name` form
/// field. Files are written one at a time and the first failure aborts the
/// request. Files stored before the failure stay on disk.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<&'static str, GatewayError> {
    let multipart = multipart.map_err(|e| {
        warn!("Rejected upload request: {}", e);
        GatewayError::MalformedForm(e.body_text())
    })?;
    let form = MultipartForm::parse(multipart, state.config.max_form_memory).await?;

    let dir_name = form
        .value("name")
        .and_then(|names| names.first())
        .ok_or(GatewayError::MissingDirectoryName)?;
    let dir_path = resolve_path(&state.root_dir, dir_name)?;
    verify_within_root(&state.root_dir, &dir_path)?;
    create_upload_dir(&dir_path).await?;
    info!("Created directory: {}", dir_name);

    for file in form.files() {
        info!(
            "File: {}, Name: {}, Size: {} bytes",
            file.field, file.file_name, file.size
        );

        let src = match file.open().await {
            Ok(src) => src,
            Err(e) => {
                error!("Error opening uploaded file {}: {}", file.file_name, e);
                continue;
            }
        };

        let dest = dir_path.join(upload_file_name(&file.file_name)?);
        debug!("Checking if file already exists: {}", dest.display());
        if fs::metadata(&dest).await.is_ok() {
            warn!("File already exists: {}", dest.display());
            return Err(GatewayError::AlreadyExists(dest));
        }

        persist_upload(src, &dest, file.size).await?;
        info!("File saved: {}", dest.display());
    }

    Ok("Form data received and printed")
}

/// Create the upload directory if it is missing. An existing entry is fine.
async fn create_upload_dir(path: &Path) -> Result<(), GatewayError> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(0o755);

    match builder.create(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            error!("Error creating directory {}: {}", path.display(), e);
            Err(GatewayError::CreateDirFailed(e))
        }
    }
}

/// Copy `src` into a newly created read-only file at `dest`.
///
/// `dest` must not exist; the exclusive create is what settles a race between
/// two uploads of the same name. If the copy fails or writes anything other
/// than `expected` bytes, the partial file is removed.
pub async fn persist_upload<R>(mut src: R, dest: &Path, expected: u64) -> Result<u64, GatewayError>
where
    R: AsyncRead + Unpin,
{
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o444);

    let mut dst = options.open(dest).await.map_err(|e| {
        error!("Error creating destination file {}: {}", dest.display(), e);
        GatewayError::CreateFileFailed(e)
    })?;

    let copied = copy_and_flush(&mut src, &mut dst).await;
    drop(dst);

    match copied {
        Ok(written) if written == expected => Ok(written),
        Ok(written) => {
            error!(
                "Error copying file: written size ({}) does not match expected size ({})",
                written, expected
            );
            discard_partial(dest).await;
            Err(GatewayError::CopyFailed)
        }
        Err(e) => {
            error!("Error copying file to {}: {}", dest.display(), e);
            discard_partial(dest).await;
            Err(GatewayError::CopyFailed)
        }
    }
}

async fn copy_and_flush<R>(src: &mut R, dst: &mut fs::File) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let written = tokio::io::copy(src, dst).await?;
    dst.flush().await?;
    Ok(written)
}

async fn discard_partial(dest: &Path) {
    if let Err(e) = fs::remove_file(dest).await {
        error!("Error removing partial file {}: {}", dest.display(), e);
    }
}

// ============================================================================
// Delete
// ============================================================================

/// DELETE /{path} - Remove a file, or a directory with everything under it
pub async fn delete(State(state): State<AppState>, uri: Uri) -> Result<&'static str, GatewayError> {
    let raw = decode_request_path(uri.path())?;
    if WILDCARD_DELETE_PATHS.contains(&raw.as_str()) {
        warn!("Refusing to delete root or wildcard path: {:?}", raw);
        return Err(GatewayError::WildcardDelete);
    }

    let target = resolve_path(&state.root_dir, &raw)?;
    if target == state.root_dir {
        warn!("Attempted to delete root directory: {:?}", raw);
        return Err(GatewayError::RootDelete);
    }

    // The target itself is not followed: deleting a symlink removes the link.
    if let Some(parent) = target.parent() {
        verify_within_root(&state.root_dir, parent)?;
    }

    let metadata = fs::symlink_metadata(&target).await.map_err(|e| {
        debug!("Delete target {} not found: {}", target.display(), e);
        GatewayError::DeleteTargetNotFound
    })?;

    info!("Deleting: {}", target.display());
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(&target).await
    } else {
        fs::remove_file(&target).await
    };

    removed.map_err(|e| {
        error!("Error deleting {}: {}", target.display(), e);
        GatewayError::DeleteFailed(e)
    })?;

    Ok("Deleted")
}
