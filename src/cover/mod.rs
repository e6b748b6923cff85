//! Cover art embedded in audio file tags.
//!
//! Uses lofty to read picture data from ID3v2 (MP3), Vorbis comments
//! (FLAC, OGG) and MP4 atoms (M4A). Missing art is not an error.

use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, PictureType};
use lofty::probe::Probe;
use std::path::Path;

use crate::model::CoverImage;

/// Extract the front cover from embedded tags.
///
/// Prefers a front-cover picture from any tag, then falls back to the first
/// picture of the primary tag. Returns `None` if nothing usable is embedded
/// or the file can't be read.
pub fn extract_embedded_cover(path: &Path) -> Option<CoverImage> {
    let tagged_file = Probe::open(path).ok()?.read().ok()?;

    let front = tagged_file
        .tags()
        .iter()
        .flat_map(|tag| tag.pictures())
        .find(|p| p.pic_type() == PictureType::CoverFront);

    let picture = match front {
        Some(picture) => picture,
        None => tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())?
            .pictures()
            .first()?,
    };

    let hint = picture.mime_type().and_then(|m| match m {
        MimeType::Jpeg => Some("image/jpeg"),
        MimeType::Png => Some("image/png"),
        MimeType::Gif => Some("image/gif"),
        MimeType::Bmp => Some("image/bmp"),
        MimeType::Tiff => Some("image/tiff"),
        _ => None,
    });

    Some(CoverImage::new(picture.data().to_vec(), hint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extract_from_nonexistent_file() {
        assert!(extract_embedded_cover(Path::new("nonexistent.mp3")).is_none());
    }

    #[test]
    fn test_extract_from_non_audio_file() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "Not an audio file").expect("Failed to write");

        assert!(extract_embedded_cover(file.path()).is_none());
    }
}
