use crate::error::{CliError, CliResult};
use glimmer_store::DocumentStore;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

pub fn run(corpus: &Path, doc_id: u64) -> CliResult<()> {
    let store = DocumentStore::open(corpus)?;
    match store.document(doc_id)? {
        Some(bytes) => {
            info!(doc_id, len = bytes.len(), "document found");
            let mut out = io::stdout().lock();
            out.write_all(&bytes)?;
            out.write_all(b"\n")?;
            Ok(())
        }
        None => Err(CliError::NotFound(format!("doc id {doc_id} not found"))),
    }
}
