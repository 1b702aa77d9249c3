//! Query strings, form bodies and cookies.
//!
//! # Data Flow
//! ```text
//! query string ──────────────┐
//! body ─┬─ urlencoded ───────┼─→ fields ─→ merge_params() ─→ legacy params map
//!       └─ multipart ─┬──────┘
//!                     └─ file parts ─→ spool dir ─→ UploadedFile
//! ```
//!
//! All text is strict UTF-8; a value that does not decode fails the request.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use futures_util::stream;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::http::request::UploadedFile;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("{field} is not valid UTF-8 after decoding")]
    Encoding { field: String },

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] multer::Error),

    #[error("could not spool upload: {0}")]
    Spool(#[from] std::io::Error),
}

/// Decoded form content of one request.
#[derive(Debug, Default)]
pub struct FormData {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
}

/// Percent-decode one component, optionally treating `+` as a space.
pub fn decode_component(raw: &str, plus_as_space: bool, field: &str) -> Result<String, FormError> {
    let spaced;
    let input = if plus_as_space && raw.contains('+') {
        spaced = raw.replace('+', " ");
        spaced.as_str()
    } else {
        raw
    };
    percent_decode_str(input)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| FormError::Encoding { field: field.to_string() })
}

/// Parse `a=1&b=2&flag` into ordered pairs.
pub fn parse_query(query: &str) -> Result<Vec<(String, String)>, FormError> {
    let mut pairs = Vec::new();
    for piece in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = piece.split_once('=').unwrap_or((piece, ""));
        let key = decode_component(raw_key, true, "parameter name")?;
        let value = decode_component(raw_value, true, &key)?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Merge query and form pairs, joining repeated keys with `;`.
pub fn merge_params(args: &[(String, String)], form: &[(String, String)]) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = HashMap::new();
    for (key, value) in args.iter().chain(form.iter()) {
        merged
            .entry(key.clone())
            .and_modify(|existing| {
                existing.push(';');
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    merged
}

/// Parse `Cookie` header values into a flat map. Malformed pairs are logged
/// and skipped.
pub fn parse_cookies<'a>(headers: impl IntoIterator<Item = &'a str>) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for header in headers {
        for pair in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => {
                    let value = value.trim().trim_matches('"');
                    cookies.insert(name.trim().to_string(), value.to_string());
                }
                _ => tracing::debug!(pair = %pair, "Ignoring malformed cookie pair"),
            }
        }
    }
    cookies
}

/// Collect form fields and uploads from a request body.
///
/// Bodies that are neither urlencoded nor multipart yield no fields.
pub async fn collect(
    content_type: Option<&str>,
    body: Bytes,
    spool_dir: &Path,
) -> Result<FormData, FormError> {
    let Some(content_type) = content_type else {
        return Ok(FormData::default());
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "application/x-www-form-urlencoded" => {
            let text = std::str::from_utf8(&body)
                .map_err(|_| FormError::Encoding { field: "body".to_string() })?;
            Ok(FormData { fields: parse_query(text.trim_end())?, files: Vec::new() })
        }
        "multipart/form-data" => collect_multipart(content_type, body, spool_dir).await,
        _ => Ok(FormData::default()),
    }
}

async fn collect_multipart(
    content_type: &str,
    body: Bytes,
    spool_dir: &Path,
) -> Result<FormData, FormError> {
    let boundary = multer::parse_boundary(content_type)?;
    let source = stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(source, boundary);
    let mut form = FormData::default();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        let Some(filename) = field.file_name().map(str::to_string) else {
            let bytes = field.bytes().await?;
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|_| FormError::Encoding { field: name.clone() })?;
            form.fields.push((name, text));
            continue;
        };

        if filename.is_empty() {
            // Browsers send an empty file part for untouched file inputs.
            while field.chunk().await?.is_some() {}
            continue;
        }

        let extension = Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let path = spool_dir.join(format!("upload-{}{}", uuid::Uuid::new_v4().simple(), extension));
        let content_type = field.content_type().map(|m| m.to_string());

        let mut file = tokio::fs::File::create(&path).await?;
        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::debug!(field = %name, filename = %filename, size, "Upload spooled");
        form.files.push(UploadedFile { field: name, filename, content_type, path, size });
    }

    Ok(form)
}
