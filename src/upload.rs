//! Uploaded product photos: validation by magic bytes and data-URL previews.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;

use crate::error::ReelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl ImageFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
            ImageFormat::Gif => "gif",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProductImage {
    pub filename: String,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl ProductImage {
    pub fn from_bytes(filename: &str, bytes: Vec<u8>, max_bytes: usize) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ReelError::invalid("uploaded image is empty").into());
        }
        if bytes.len() > max_bytes {
            return Err(ReelError::invalid(format!(
                "uploaded image is {} bytes, limit is {}",
                bytes.len(),
                max_bytes
            ))
            .into());
        }

        let format = ImageFormat::sniff(&bytes).ok_or_else(|| {
            ReelError::invalid(format!(
                "{} is not a PNG, JPEG, WEBP or GIF image",
                display_name(filename)
            ))
        })?;

        Ok(ProductImage {
            filename: display_name(filename).to_string(),
            format,
            bytes,
        })
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), STANDARD.encode(&self.bytes))
    }
}

fn display_name(filename: &str) -> &str {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        "upload"
    } else {
        trimmed.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(trimmed)
    }
}
