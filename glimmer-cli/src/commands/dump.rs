use crate::error::{CliError, CliResult};
use glimmer_store::DocumentStore;
use std::io::{self, Write};
use std::path::Path;

pub fn run(corpus: &Path, block: Option<usize>, doc_id: Option<u64>) -> CliResult<()> {
    let store = DocumentStore::open(corpus)?;
    let block_index = match (block, doc_id) {
        (Some(i), None) => i,
        (None, Some(id)) => {
            if store.offsets().is_empty() || id > store.last_doc_id() {
                return Err(CliError::NotFound(format!(
                    "doc id {id} is out of range (last doc id {})",
                    store.last_doc_id()
                )));
            }
            store.offsets().block_index_for(id).ok_or_else(|| {
                CliError::NotFound(format!("doc id {id} precedes the first indexed record"))
            })?
        }
        // clap's arg group enforces exactly one selector.
        _ => {
            return Err(CliError::Usage(
                "exactly one of --block or --doc-id is required".into(),
            ))
        }
    };
    let Some(bytes) = store.block_bytes(block_index)? else {
        return Err(CliError::NotFound(format!(
            "block {block_index} is out of range ({} blocks)",
            store.block_count()
        )));
    };
    io::stdout().write_all(&bytes)?;
    Ok(())
}
