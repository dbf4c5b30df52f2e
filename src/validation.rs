use crate::error::UploadCoreError;
use crate::upload_queue::UploadPayload;
use std::path::{Component, Path};

/// Validate the display fields of a payload and its size against `max_size`
pub fn validate_payload(payload: &UploadPayload, max_size: u64) -> Result<(), UploadCoreError> {
    if payload.file_name.trim().is_empty() {
        return Err(UploadCoreError::Validation(
            "File name must not be empty".to_string(),
        ));
    }

    if payload.file_size != payload.content.len() as u64 {
        return Err(UploadCoreError::Validation(format!(
            "Declared size ({} bytes) does not match content ({} bytes): {}",
            payload.file_size,
            payload.content.len(),
            payload.file_name
        )));
    }

    if payload.file_size > max_size {
        return Err(UploadCoreError::Validation(format!(
            "File size ({} bytes) exceeds maximum allowed size ({} bytes): {}",
            payload.file_size, max_size, payload.file_name
        )));
    }

    Ok(())
}

/// Validate file size is within the specified limit
pub fn validate_file_size(path: &Path, max_size: u64) -> Result<u64, UploadCoreError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        UploadCoreError::Validation(format!(
            "Failed to get file metadata for '{}': {}",
            path.display(),
            e
        ))
    })?;

    let size = metadata.len();

    if size > max_size {
        return Err(UploadCoreError::Validation(format!(
            "File size ({} bytes) exceeds maximum allowed size ({} bytes): {}",
            size,
            max_size,
            path.display()
        )));
    }

    Ok(size)
}

/// Read a file from disk into a payload, rejecting '..' paths and oversized files
pub fn load_payload(path: &Path, max_size: u64) -> Result<UploadPayload, UploadCoreError> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(UploadCoreError::Validation(format!(
            "Path contains '..' component: {}",
            path.display()
        )));
    }

    validate_file_size(path, max_size)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            UploadCoreError::Validation(format!("Invalid file name: {}", path.display()))
        })?
        .to_string();

    let content = std::fs::read(path)?;
    let payload = UploadPayload::new(file_name, content);

    Ok(match guess_content_type(path) {
        Some(content_type) => payload.with_content_type(content_type),
        None => payload,
    })
}

fn guess_content_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}
