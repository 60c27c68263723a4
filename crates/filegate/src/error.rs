use std::io;
use std::path::PathBuf;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors returned by the gateway handlers.
///
/// The `Display` text of each variant is the body sent to the client. Any
/// underlying I/O detail stays server-side and is logged where it occurs.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("File not found")]
    NotFound,

    #[error("Error getting file info")]
    Metadata(#[source] io::Error),

    #[error("Error reading directory")]
    ReadDirFailed(#[source] io::Error),

    #[error("Cannot read directory")]
    RootUnreadable(#[source] io::Error),

    #[error("Path is outside root directory")]
    PathTraversal,

    #[error("Invalid path")]
    InvalidPath,

    #[error("Unable to parse form")]
    MalformedForm(String),

    #[error("Directory name not provided")]
    MissingDirectoryName,

    #[error("Invalid file name")]
    InvalidFileName(String),

    #[error("Unable to create directory")]
    CreateDirFailed(#[source] io::Error),

    #[error("File already exists")]
    AlreadyExists(PathBuf),

    #[error("Unable to create file")]
    CreateFileFailed(#[source] io::Error),

    #[error("Error copying file")]
    CopyFailed,

    #[error("Refusing to delete root or wildcard path")]
    WildcardDelete,

    #[error("Refusing to delete root directory")]
    RootDelete,

    #[error("File or directory not found")]
    DeleteTargetNotFound,

    #[error("Unable to delete")]
    DeleteFailed(#[source] io::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound | GatewayError::DeleteTargetNotFound => StatusCode::NOT_FOUND,
            GatewayError::InvalidPath
            | GatewayError::MalformedForm(_)
            | GatewayError::MissingDirectoryName
            | GatewayError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            GatewayError::PathTraversal
            | GatewayError::WildcardDelete
            | GatewayError::RootDelete => StatusCode::FORBIDDEN,
            GatewayError::AlreadyExists(_) => StatusCode::CONFLICT,
            GatewayError::Metadata(_)
            | GatewayError::ReadDirFailed(_)
            | GatewayError::RootUnreadable(_)
            | GatewayError::CreateDirFailed(_)
            | GatewayError::CreateFileFailed(_)
            | GatewayError::CopyFailed
            | GatewayError::DeleteFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
