//! `multipart/form-data` body encoding.

use crate::endpoint::JsonObject;
use crate::error::RequestError;
use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::Value;

/// A file sent as one part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFile {
    /// Form field name
    pub name: String,
    pub file_name: String,
    /// MIME type, e.g. `image/jpeg`
    pub mime_type: String,
    pub data: Bytes,
}

impl MultipartFile {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// JPEG image part named `photo`, as the upload endpoints expect
    #[must_use]
    pub fn jpeg(key: &str, data: impl Into<Bytes>) -> Self {
        Self::new("photo", format!("{key}.jpg"), mime::IMAGE_JPEG.as_ref(), data)
    }
}

/// Encoded body with its `Content-Type` header value
#[derive(Debug, Clone)]
pub struct MultipartBody {
    pub content_type: String,
    pub body: Bytes,
}

/// Encode parameters as text parts followed by file parts.
///
/// String parameters are sent verbatim; other JSON values use their JSON
/// text. `null` parameters are skipped.
///
/// # Errors
///
/// Returns [`RequestError::Multipart`] when a field or file name contains
/// CR, LF or `"`, or a file's MIME type does not parse.
pub fn encode(parameters: &JsonObject, files: &[MultipartFile]) -> Result<MultipartBody, RequestError> {
    encode_with_boundary(parameters, files, &random_boundary())
}

pub(crate) fn encode_with_boundary(
    parameters: &JsonObject,
    files: &[MultipartFile],
    boundary: &str,
) -> Result<MultipartBody, RequestError> {
    let mut body = BytesMut::new();

    for (name, value) in parameters {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        check_header_safe(name, name)?;
        put_boundary(&mut body, boundary);
        body.put_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
        body.put_slice(text.as_bytes());
        body.put_slice(b"\r\n");
    }

    for file in files {
        check_header_safe(&file.name, &file.name)?;
        check_header_safe(&file.name, &file.file_name)?;
        let mime: mime::Mime = file.mime_type.parse().map_err(|e: mime::FromStrError| {
            RequestError::Multipart {
                field: file.name.clone(),
                reason: format!("invalid MIME type '{}': {e}", file.mime_type),
            }
        })?;
        put_boundary(&mut body, boundary);
        body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {mime}\r\n\r\n",
                file.name, file.file_name
            )
            .as_bytes(),
        );
        body.put_slice(&file.data);
        body.put_slice(b"\r\n");
    }

    body.put_slice(format!("--{boundary}--\r\n").as_bytes());

    Ok(MultipartBody {
        content_type: format!("multipart/form-data; boundary={boundary}"),
        body: body.freeze(),
    })
}

fn put_boundary(body: &mut BytesMut, boundary: &str) {
    body.put_slice(format!("--{boundary}\r\n").as_bytes());
}

fn check_header_safe(field: &str, value: &str) -> Result<(), RequestError> {
    if value.contains(['\r', '\n', '"']) {
        return Err(RequestError::Multipart {
            field: field.to_owned(),
            reason: format!("'{}' contains CR, LF or quote", value.escape_debug()),
        });
    }
    Ok(())
}

fn random_boundary() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("modkit-request-{suffix}")
}
