use std::path::Path;

/// Source extensions picked up by discovery (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif"];

/// Returns true if the key names a file with a convertible image extension.
pub fn is_supported_image(key: &str) -> bool {
    if key.ends_with('/') {
        return false;
    }
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Maps a source key to its WebP destination.
///
/// The source prefix is replaced by the destination prefix, the extension by
/// `.webp`, and the rest of the path is kept. Keys outside the source prefix
/// keep their full path under the destination prefix.
pub fn destination_key(source_key: &str, source_prefix: &str, destination_prefix: &str) -> String {
    let relative = source_key
        .strip_prefix(source_prefix)
        .unwrap_or(source_key)
        .trim_start_matches('/');

    let (dir, file) = match relative.rfind('/') {
        Some(idx) => (&relative[..=idx], &relative[idx + 1..]),
        None => ("", relative),
    };
    let stem = match file.rfind('.') {
        Some(idx) if idx > 0 => &file[..idx],
        _ => file,
    };

    let prefix = destination_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{}{}.webp", dir, stem)
    } else {
        format!("{}/{}{}.webp", prefix, dir, stem)
    }
}
