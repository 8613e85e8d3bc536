use crate::error::{CliError, CliResult};
use glimmer_store::{
    block_offsets_path, build_block_offsets, build_block_offsets_from_reader, BlockOffsets,
};
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

pub fn run(corpus: &str, output: Option<&Path>, quiet: bool) -> CliResult<()> {
    let offsets = if corpus == "-" {
        if output.is_none() {
            return Err(CliError::Usage(
                "reading the corpus from stdin requires -o <output>".into(),
            ));
        }
        build_block_offsets_from_reader(io::stdin().lock())?
    } else {
        build_block_offsets(Path::new(corpus))?
    };

    match output {
        Some(out) if out.as_os_str() == "-" => {
            io::stdout().write_all(&offsets.to_bytes())?;
            if !quiet {
                print_summary(&mut io::stderr(), &offsets)?;
            }
        }
        out => {
            let out = match out {
                Some(p) => p.to_path_buf(),
                None => block_offsets_path(Path::new(corpus)),
            };
            offsets.save(&out)?;
            if !quiet {
                println!("Wrote {}", out.display());
                print_summary(&mut io::stdout(), &offsets)?;
            }
        }
    }
    info!(
        blocks = offsets.block_count(),
        records = offsets.record_count(),
        last_doc_id = offsets.last_doc_id(),
        "block offsets index built"
    );
    Ok(())
}

fn print_summary(w: &mut impl Write, offsets: &BlockOffsets) -> io::Result<()> {
    writeln!(w, "  blocks:      {}", offsets.block_count())?;
    writeln!(w, "  records:     {}", offsets.record_count())?;
    writeln!(w, "  last doc id: {}", offsets.last_doc_id())?;
    Ok(())
}
