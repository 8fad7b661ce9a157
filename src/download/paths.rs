use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::crawl::media::{MediaCategory, HLS_MIMETYPE};

/// Build the local download path for a media item:
/// `<directory>/<creator>/<Pictures|Videos|Audio>/<filename>`.
pub fn local_download_path(
    directory: &Path,
    creator: &str,
    category: MediaCategory,
    filename: &str,
) -> PathBuf {
    directory
        .join(clean_filename(creator))
        .join(category.folder())
        .join(clean_filename(filename))
}

/// `<YYYY-MM-DD>_[preview_]id_<media id>.<ext>`
pub fn media_filename(
    created_at: &DateTime<Utc>,
    media_id: &str,
    is_preview: bool,
    extension: &str,
) -> String {
    let date = created_at.format("%Y-%m-%d");
    let preview = if is_preview { "preview_" } else { "" };
    clean_filename(&format!("{date}_{preview}id_{media_id}.{extension}"))
}

/// File extension for a MIME type. Playlists are stored as the `mp4`
/// container their segments are joined into.
pub fn extension_for_mimetype(mimetype: Option<&str>) -> String {
    let Some(mimetype) = mimetype else {
        return "bin".to_string();
    };
    if mimetype == HLS_MIMETYPE {
        return "mp4".to_string();
    }
    let ext = match mimetype {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        other => {
            // Fall back to the subtype, e.g. `image/avif` -> `avif`.
            let sub = other.rsplit('/').next().unwrap_or("");
            let sub = sub.split(['+', ';']).next().unwrap_or("").trim();
            if sub.is_empty() || !sub.chars().all(|c| c.is_ascii_alphanumeric()) {
                "bin"
            } else {
                return sub.to_ascii_lowercase();
            }
        }
    };
    ext.to_string()
}

/// Clean a filename by removing characters that are invalid on common
/// filesystems: `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`.
pub fn clean_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect()
}
