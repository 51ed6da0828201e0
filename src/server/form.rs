//! Multipart upload parsing.

use super::ApiError;
use axum::body::Bytes;
use axum::extract::Multipart;
use std::collections::HashMap;
use tracing::debug;

/// The uploaded document.
#[derive(Debug)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// A parsed multipart form: at most one `file` part plus text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<Upload>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            debug!("Multipart read failed: {}", e);
            ApiError::bad_request("invalid multipart form")
        })? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::bad_request("invalid multipart form"))?;
                form.file = Some(Upload { file_name, bytes });
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::bad_request("invalid multipart form"))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    /// The uploaded document, or the standard 400.
    pub fn take_file(&mut self) -> Result<Upload, ApiError> {
        match self.file.take() {
            Some(upload) if !upload.bytes.is_empty() => Ok(upload),
            _ => Err(ApiError::bad_request("file is required")),
        }
    }

    /// Trimmed text of `name`; empty when absent.
    pub fn text(&self, name: &str) -> &str {
        self.fields.get(name).map(|s| s.trim()).unwrap_or("")
    }

    /// Raw text of `name` (JSON fields), empty when absent.
    pub fn raw(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    /// Integer value of `name`; `default` when absent or unparsable.
    pub fn int(&self, name: &str, default: i64) -> i64 {
        self.text(name).parse().unwrap_or(default)
    }

    /// Float value of `name`; `default` when absent or unparsable.
    pub fn float(&self, name: &str, default: f64) -> f64 {
        self.text(name).parse().unwrap_or(default)
    }

    #[cfg(test)]
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_fields_fall_back_to_defaults() {
        let form = UploadForm::default()
            .with_field("fontSize", " 14 ")
            .with_field("opacity", "lots");
        assert_eq!(form.int("fontSize", 10), 14);
        assert_eq!(form.int("startAt", 1), 1);
        assert_eq!(form.float("opacity", 0.95), 0.95);
    }

    #[test]
    fn missing_file_is_bad_request() {
        let err = UploadForm::default().take_file().unwrap_err();
        assert_eq!(err.message, "file is required");
    }
}
