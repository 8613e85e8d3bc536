use super::resolve_sidecar;
use crate::error::{CliError, CliResult};
use glimmer_store::BlockOffsets;
use std::path::Path;

pub fn run(corpus: &Path, doc_id: u64) -> CliResult<()> {
    let offsets = BlockOffsets::load(&resolve_sidecar(corpus))?;
    if offsets.is_empty() || doc_id > offsets.last_doc_id() {
        return Err(CliError::NotFound(format!(
            "doc id {doc_id} is out of range (last doc id {})",
            offsets.last_doc_id()
        )));
    }
    let Some(block_index) = offsets.block_index_for(doc_id) else {
        return Err(CliError::NotFound(format!(
            "doc id {doc_id} precedes the first indexed record ({})",
            offsets.first_doc_id(0)
        )));
    };
    println!("{block_index}");
    Ok(())
}
