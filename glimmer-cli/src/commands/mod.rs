pub mod build;
pub mod dump;
pub mod get;
pub mod info;
pub mod locate;
pub mod range;

use glimmer_store::{block_offsets_path, SIDECAR_SUFFIX};
use std::path::{Path, PathBuf};

/// Index commands accept either the corpus path or its sidecar directly.
fn resolve_sidecar(path: &Path) -> PathBuf {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) if name.ends_with(SIDECAR_SUFFIX) => path.to_path_buf(),
        _ => block_offsets_path(path),
    }
}
