use super::resolve_sidecar;
use crate::error::{CliError, CliResult};
use glimmer_store::BlockOffsets;
use std::path::Path;

pub fn run(corpus: &Path, block_index: usize) -> CliResult<()> {
    let offsets = BlockOffsets::load(&resolve_sidecar(corpus))?;
    if block_index >= offsets.block_count() {
        return Err(CliError::NotFound(format!(
            "block {block_index} is out of range ({} blocks)",
            offsets.block_count()
        )));
    }
    let (start, end) = offsets.block_bit_range(block_index);
    println!("[{start}, {end})");
    Ok(())
}
