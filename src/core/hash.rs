use sha2::{Digest, Sha256};
use std::path::Path;

/// Length of the hex display id shown to users.
pub const DISPLAY_ID_LEN: usize = 8;

/// Short identifier derived from a file name, used only for human reference
/// in messages. Two files with the same name get the same id regardless of
/// content.
pub fn display_id(file_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_name.as_bytes());
    let result = hasher.finalize();

    let mut id = format!("{:x}", result);
    id.truncate(DISPLAY_ID_LEN);
    id
}

/// Display id of the file name component of `path`.
pub fn display_id_for_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    display_id(&name)
}
