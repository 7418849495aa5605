use std::path::{Path, PathBuf};

use cairn_types::DocumentId;

/// File extension of volume files.
pub const VOLUME_EXTENSION: &str = "cv";

/// Transform a file name `"aabbccdd"` into `"aa/bb/aabbccdd"`.
///
/// Two levels of two-character directories bound the fan-out of any single
/// directory when many volumes exist. Names shorter than four characters are
/// returned unchanged.
pub fn hierarchify(name: &str) -> PathBuf {
    match (name.get(0..2), name.get(2..4)) {
        (Some(a), Some(b)) => [a, b, name].iter().collect(),
        _ => PathBuf::from(name),
    }
}

/// Path of the volume owned by `id` below `dir`.
pub fn volume_path(dir: &Path, id: &DocumentId) -> PathBuf {
    dir.join(hierarchify(&id.to_hex()))
        .with_extension(VOLUME_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchify_splits_first_four_chars() {
        assert_eq!(hierarchify("aabbccdd"), PathBuf::from("aa/bb/aabbccdd"));
    }

    #[test]
    fn short_names_stay_flat() {
        assert_eq!(hierarchify("abc"), PathBuf::from("abc"));
    }

    #[test]
    fn volume_path_layout() {
        let id = DocumentId::from_bytes([0x12; 16]);
        let path = volume_path(Path::new("/data"), &id);
        assert_eq!(
            path,
            PathBuf::from("/data/12/12/12121212121212121212121212121212.cv")
        );
    }
}
