//! Decoding of the `data:image/...` URLs the renderer exports.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("not an image data URL")]
    NotDataUrl,
    #[error("unsupported data URL encoding `{0}`")]
    UnsupportedEncoding(String),
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    /// File extension derived from the media subtype (`png`, `jpeg`, `svg`, ...).
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Decode `data:image/<subtype>;base64,<payload>` or `data:image/<subtype>;utf8,<payload>`.
pub fn decode_data_url(data_url: &str) -> Result<DecodedImage, ImageDecodeError> {
    let rest = data_url
        .strip_prefix("data:image/")
        .ok_or(ImageDecodeError::NotDataUrl)?;
    let (subtype, rest) = rest.split_once(';').ok_or(ImageDecodeError::NotDataUrl)?;
    let (encoding, payload) = rest.split_once(',').ok_or(ImageDecodeError::NotDataUrl)?;
    if subtype.is_empty() || payload.is_empty() {
        return Err(ImageDecodeError::NotDataUrl);
    }

    let bytes = match encoding {
        "base64" => {
            let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD.decode(compact)?
        }
        "utf8" => percent_decode_str(payload).collect(),
        other => return Err(ImageDecodeError::UnsupportedEncoding(other.to_string())),
    };

    Ok(DecodedImage {
        extension: extension_for(subtype),
        bytes,
    })
}

fn extension_for(subtype: &str) -> String {
    let base = subtype.split('+').next().unwrap_or(subtype);
    base.to_ascii_lowercase()
}
