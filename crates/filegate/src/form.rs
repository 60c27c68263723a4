//! Whole-form multipart parsing.
//!
//! The upload handler needs the `name` field before it can place any file, and
//! that field may arrive after the file parts. The form is therefore read to the
//! end before anything touches the root directory. File parts stay in memory
//! while the configured budget allows and spill to temporary files after that.

use std::io;
use std::pin::Pin;

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use bytes::{Bytes, BytesMut};
use tempfile::{NamedTempFile, TempPath};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Extra room granted to plain value fields on top of the file budget.
const VALUE_ALLOWANCE: u64 = 10 * 1024 * 1024;

pub type UploadReader = Pin<Box<dyn AsyncRead + Send>>;

enum Payload {
    Memory(Bytes),
    /// Removed from disk when the `TempPath` is dropped
    Spilled(TempPath),
}

/// A file part received in a multipart form.
pub struct UploadedFile {
    pub field: String,
    /// Filename as declared by the client, unmodified
    pub file_name: String,
    /// Number of bytes received for this part
    pub size: u64,
    payload: Payload,
}

impl UploadedFile {
    /// Open the received bytes for reading.
    pub async fn open(&self) -> io::Result<UploadReader> {
        match &self.payload {
            Payload::Memory(bytes) => Ok(Box::pin(io::Cursor::new(bytes.clone()))),
            Payload::Spilled(path) => Ok(Box::pin(File::open(path).await?)),
        }
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.payload, Payload::Spilled(_))
    }
}

/// A fully parsed multipart form. Fields keep the order they first appeared in.
#[derive(Default)]
pub struct MultipartForm {
    values: Vec<(String, Vec<String>)>,
    files: Vec<(String, Vec<UploadedFile>)>,
}

impl MultipartForm {
    /// Read every part of `multipart`.
    ///
    /// Parts without a field name are skipped. Parts without a filename are
    /// plain values.
    pub async fn parse(mut multipart: Multipart, max_memory: u64) -> Result<Self, GatewayError> {
        let mut form = MultipartForm::default();
        let mut file_budget = max_memory;
        let mut value_budget = max_memory.saturating_add(VALUE_ALLOWANCE);

        while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
            let name = match field.name() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };

            match field.file_name().filter(|f| !f.is_empty()).map(str::to_string) {
                None => {
                    let value = read_value(&mut field, &mut value_budget).await?;
                    push_entry(&mut form.values, name, value);
                }
                Some(file_name) => {
                    let (payload, size) = read_file(&mut field, &mut file_budget).await?;
                    debug!("Received file part {} ({}, {} bytes)", name, file_name, size);
                    let file = UploadedFile {
                        field: name.clone(),
                        file_name,
                        size,
                        payload,
                    };
                    push_entry(&mut form.files, name, file);
                }
            }
        }

        Ok(form)
    }

    /// All values submitted under `key`, if the field was present.
    pub fn value(&self, key: &str) -> Option<&[String]> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// File parts in field order, then arrival order within a field.
    pub fn files(&self) -> impl Iterator<Item = &UploadedFile> {
        self.files.iter().flat_map(|(_, files)| files.iter())
    }
}

fn push_entry<T>(entries: &mut Vec<(String, Vec<T>)>, key: String, item: T) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some((_, items)) => items.push(item),
        None => entries.push((key, vec![item])),
    }
}

fn malformed(e: MultipartError) -> GatewayError {
    warn!("Multipart error parsing field: {}", e);
    GatewayError::MalformedForm(e.body_text())
}

fn spill_failed(e: io::Error) -> GatewayError {
    warn!("Failed to spill upload to temporary storage: {}", e);
    GatewayError::MalformedForm(e.to_string())
}

async fn read_value(field: &mut Field<'_>, budget: &mut u64) -> Result<String, GatewayError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        buffer.extend_from_slice(&chunk);
        if buffer.len() as u64 > *budget {
            return Err(GatewayError::MalformedForm(
                "form values too large".to_string(),
            ));
        }
    }
    *budget -= buffer.len() as u64;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn read_file(field: &mut Field<'_>, budget: &mut u64) -> Result<(Payload, u64), GatewayError> {
    let mut buffer = BytesMut::new();
    let mut spill: Option<(File, TempPath)> = None;
    let mut size = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        size = size.saturating_add(chunk.len() as u64);
        match spill.as_mut() {
            Some((file, _)) => file.write_all(&chunk).await.map_err(spill_failed)?,
            None if size > *budget => {
                let (std_file, path) = NamedTempFile::new().map_err(spill_failed)?.into_parts();
                let mut file = File::from_std(std_file);
                file.write_all(&buffer).await.map_err(spill_failed)?;
                file.write_all(&chunk).await.map_err(spill_failed)?;
                buffer = BytesMut::new();
                spill = Some((file, path));
            }
            None => buffer.extend_from_slice(&chunk),
        }
    }

    match spill {
        Some((mut file, path)) => {
            file.flush().await.map_err(spill_failed)?;
            Ok((Payload::Spilled(path), size))
        }
        None => {
            *budget -= size;
            Ok((Payload::Memory(buffer.freeze()), size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use tokio::io::AsyncReadExt;

    const BOUNDARY: &str = "filegate-test-boundary";

    enum Part<'a> {
        Value(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    fn body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut out = Vec::new();
        for part in parts {
            out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Value(name, value) => {
                    out.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                            .as_bytes(),
                    );
                }
                Part::File(name, file_name, data) => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(data);
                    out.extend_from_slice(b"\r\n");
                }
            }
        }
        out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        out
    }

    async fn multipart(raw: Vec<u8>) -> Multipart {
        let request = Request::builder()
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(raw))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    async fn read_all(file: &UploadedFile) -> Vec<u8> {
        let mut reader = file.open().await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_parse_values_and_files_in_order() {
        let raw = body(&[
            Part::File("first", "a.txt", b"alpha"),
            Part::Value("name", "photos"),
            Part::File("second", "b.txt", b"bravo!"),
            Part::File("first", "c.txt", b"charlie"),
        ]);
        let form = MultipartForm::parse(multipart(raw).await, 1024).await.unwrap();

        assert_eq!(form.value("name"), Some(&["photos".to_string()][..]));
        assert_eq!(form.value("missing"), None);

        let names: Vec<_> = form.files().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, ["a.txt", "c.txt", "b.txt"]);

        let sizes: Vec<_> = form.files().map(|f| f.size).collect();
        assert_eq!(sizes, [5, 7, 6]);
    }

    #[tokio::test]
    async fn test_empty_filename_is_a_value() {
        let raw = body(&[Part::File("name", "", b"docs")]);
        let form = MultipartForm::parse(multipart(raw).await, 1024).await.unwrap();

        assert_eq!(form.value("name"), Some(&["docs".to_string()][..]));
        assert_eq!(form.files().count(), 0);
    }

    #[tokio::test]
    async fn test_large_parts_spill_to_disk() {
        let big = vec![7u8; 64];
        let raw = body(&[
            Part::File("f", "small.bin", b"tiny"),
            Part::File("f", "big.bin", &big),
        ]);
        let form = MultipartForm::parse(multipart(raw).await, 16).await.unwrap();
        let files: Vec<_> = form.files().collect();

        assert!(!files[0].is_spilled());
        assert!(files[1].is_spilled());
        assert_eq!(read_all(files[0]).await, b"tiny");
        assert_eq!(read_all(files[1]).await, big);
        assert_eq!(files[1].size, 64);
    }

    #[tokio::test]
    async fn test_memory_budget_is_shared_across_parts() {
        let raw = body(&[
            Part::File("f", "one.bin", &[1u8; 10]),
            Part::File("f", "two.bin", &[2u8; 10]),
        ]);
        let form = MultipartForm::parse(multipart(raw).await, 15).await.unwrap();
        let spilled: Vec<_> = form.files().map(UploadedFile::is_spilled).collect();

        assert_eq!(spilled, [false, true]);
    }

    #[tokio::test]
    async fn test_truncated_body_is_malformed() {
        let mut raw = body(&[Part::File("f", "a.txt", b"data")]);
        raw.truncate(raw.len() - 10);

        let result = MultipartForm::parse(multipart(raw).await, 1024).await;
        assert!(matches!(result, Err(GatewayError::MalformedForm(_))));
    }
}
