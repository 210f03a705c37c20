//! Magic-byte content sniffing over the first few KiB of a stream. The
//! policy is permissive: media renders in the classifier, text that looks
//! like XML/SVG does too, and anything unrecognized gets the benefit of the
//! doubt. Only positively identified non-media formats are rejected.

/// What to do with a stream given its leading bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniffDecision {
    /// Renderable (or unidentifiable) content; the sniffed type when known.
    Accept(Option<&'static str>),
    /// Positively identified as a non-renderable format.
    Reject(&'static str),
}

pub fn classify(sample: &[u8]) -> SniffDecision {
    match sniff(sample) {
        None => SniffDecision::Accept(None),
        Some(t)
            if t.starts_with("image/")
                || t.starts_with("video/")
                || t.starts_with("audio/")
                || t == "text/xml" =>
        {
            SniffDecision::Accept(Some(t))
        },
        Some(t) => SniffDecision::Reject(t),
    }
}

/// Best-effort content type from magic bytes. `None` means unrecognized.
pub fn sniff(sample: &[u8]) -> Option<&'static str> {
    if sample.len() < 4 {
        return sniff_text(sample);
    }

    match sample {
        [0xFF, 0xD8, 0xFF, ..] => return Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => return Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => return Some("image/gif"),
        [b'B', b'M', ..] => return Some("image/bmp"),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => return Some("image/tiff"),
        [0x1A, 0x45, 0xDF, 0xA3, ..] => return Some("video/webm"),
        [b'I', b'D', b'3', ..] | [0xFF, 0xFB, ..] | [0xFF, 0xF3, ..] | [0xFF, 0xF2, ..] => {
            return Some("audio/mpeg")
        },
        [b'O', b'g', b'g', b'S', ..] => return Some("audio/ogg"),
        [b'f', b'L', b'a', b'C', ..] => return Some("audio/flac"),
        [b'%', b'P', b'D', b'F', ..] => return Some("application/pdf"),
        [b'P', b'K', 0x03, 0x04, ..] => return Some("application/zip"),
        [0x1F, 0x8B, ..] => return Some("application/gzip"),
        [b'7', b'z', 0xBC, 0xAF, ..] => return Some("application/x-7z-compressed"),
        [b'R', b'a', b'r', b'!', ..] => return Some("application/x-rar-compressed"),
        [0x7F, b'E', b'L', b'F', ..] => return Some("application/x-executable"),
        [b'M', b'Z', ..] => return Some("application/x-msdownload"),
        [0x00, b'a', b's', b'm', ..] => return Some("application/wasm"),
        _ => {},
    }

    // RIFF containers share a prefix; the format lives at offset 8.
    if sample.starts_with(b"RIFF") && sample.len() >= 12 {
        return match &sample[8..12] {
            b"WEBP" => Some("image/webp"),
            b"AVI " => Some("video/x-msvideo"),
            b"WAVE" => Some("audio/wav"),
            _ => None,
        };
    }

    // ISO-BMFF: "ftyp" at offset 4, brand at offset 8.
    if sample.len() >= 12 && &sample[4..8] == b"ftyp" {
        return match &sample[8..11] {
            b"qt " | b"M4V" => Some("video/quicktime"),
            _ => Some("video/mp4"),
        };
    }

    sniff_text(sample)
}

/// The XML/SVG special case: markup posted as data renders as an image or
/// document, so it passes moderation intake like media does.
fn sniff_text(sample: &[u8]) -> Option<&'static str> {
    let text = std::str::from_utf8(sample).ok()?;
    let trimmed = text.trim_start();
    if trimmed.starts_with("<svg") {
        return Some("image/svg+xml");
    }
    if trimmed.starts_with("<?xml") {
        // An XML prolog may front an SVG document.
        return if trimmed.contains("<svg") {
            Some("image/svg+xml")
        } else {
            Some("text/xml")
        };
    }
    None
}
