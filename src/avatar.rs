use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use tracing::debug;

use crate::errors::AppError;

const MAX_ICON_BYTES: usize = 1024 * 1024;

/// Encodes raw bytes as a `data:` URL suitable for the agent icon field.
pub fn encode_data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(bytes))
}

/// Turns an uploaded image into a data URL.
///
/// `data` is the file content as base64 (the socket only carries text); the
/// MIME type is guessed from `file_name` and must be an image type.
pub fn icon_from_upload(file_name: &str, data: &str) -> Result<String, AppError> {
    let invalid = |message: String| AppError::InvalidIcon {
        file_name: file_name.to_string(),
        message,
    };

    let mime = mime_guess::from_path(file_name)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .ok_or_else(|| invalid("not an image file".to_string()))?;
    let bytes = BASE64_STANDARD
        .decode(data.trim())
        .map_err(|e| invalid(format!("bad base64 payload: {e}")))?;
    if bytes.is_empty() {
        return Err(invalid("file is empty".to_string()));
    }
    if bytes.len() > MAX_ICON_BYTES {
        return Err(invalid(format!("{} bytes exceeds {MAX_ICON_BYTES}", bytes.len())));
    }

    debug!("Encoded icon {file_name} ({} bytes, {mime})", bytes.len());
    Ok(encode_data_url(&bytes, mime.essence_str()))
}
