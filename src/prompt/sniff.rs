//! Content sniffing by magic bytes.

/// MIME type of a blob, judged from its leading bytes.
pub fn detect(data: &[u8]) -> &'static str {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        "image/gif"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        "audio/wav"
    } else if data.len() >= 12 && &data[4..8] == b"ftyp" {
        match &data[8..12] {
            b"heic" | b"heix" | b"mif1" => "image/heic",
            b"M4A " => "audio/mp4",
            b"qt  " => "video/quicktime",
            _ => "video/mp4",
        }
    } else if data.starts_with(b"OggS") {
        if is_ogg_opus(data) {
            "audio/ogg"
        } else {
            "application/ogg"
        }
    } else if data.starts_with(b"ID3")
        || (data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0)
    {
        "audio/mpeg"
    } else if data.starts_with(b"fLaC") {
        "audio/flac"
    } else if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        "video/webm"
    } else if data.starts_with(b"%PDF-") {
        "application/pdf"
    } else if looks_like_text(data) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Ogg container whose first logical stream is Opus.
pub fn is_ogg_opus(data: &[u8]) -> bool {
    // OpusHead sits at offset 28, right after the first page header.
    data.starts_with(b"OggS") && data.len() > 36 && &data[28..36] == b"OpusHead"
}

pub fn is_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// File extension for documents built from sniffed bytes.
pub fn extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "audio/wav" => "wav",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        _ => "bin",
    }
}

fn looks_like_text(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    let sample = &data[..data.len().min(1024)];
    if sample.contains(&0) {
        return false;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        // A multibyte character cut off at the end of the sample is fine.
        Err(error) => error.error_len().is_none() && sample.len() == 1024,
    }
}
