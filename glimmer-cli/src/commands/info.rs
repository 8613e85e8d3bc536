use super::resolve_sidecar;
use crate::error::CliResult;
use glimmer_store::BlockOffsets;
use std::path::Path;

pub fn run(path: &Path) -> CliResult<()> {
    let sidecar = resolve_sidecar(path);
    let offsets = BlockOffsets::load(&sidecar)?;

    println!("index:        {}", sidecar.display());
    println!("corpus size:  {} bytes", offsets.corpus_size_bytes());
    println!("blocks:       {}", offsets.block_count());
    println!("records:      {}", offsets.record_count());
    println!("last doc id:  {}", offsets.last_doc_id());
    println!();
    println!("FirstDoc\tBlockStart");
    for i in 0..offsets.block_count() {
        println!("{}\t{}", offsets.first_doc_id(i), offsets.block_bit_offset(i));
    }
    println!("End\t{}", offsets.end_bit_offset());
    Ok(())
}
