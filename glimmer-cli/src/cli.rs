use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "glimmer",
    about = "Block-compressed document corpus tools",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output (also respects NO_COLOR env var)
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the block offsets index for a corpus
    Build {
        /// Corpus file, or '-' to read the corpus from stdin
        corpus: String,

        /// Where to write the index (default: <corpus>.blockOffsets;
        /// '-' writes the raw index to stdout)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },

    /// Summarize a block offsets index
    Info {
        /// Corpus file or its .blockOffsets sidecar
        path: PathBuf,
    },

    /// Print the block index a doc id lookup starts from
    Locate {
        /// Corpus file or its .blockOffsets sidecar
        corpus: PathBuf,

        /// Doc id to locate
        doc_id: u64,
    },

    /// Print a block's bit-offset range within the corpus
    Range {
        /// Corpus file or its .blockOffsets sidecar
        corpus: PathBuf,

        /// Block index
        block_index: usize,
    },

    /// Write one block's decompressed bytes to stdout
    #[command(group = ArgGroup::new("selector").required(true).args(["block", "doc_id"]))]
    Dump {
        /// Corpus file
        corpus: PathBuf,

        /// Block index to dump
        #[arg(long)]
        block: Option<usize>,

        /// Dump the block this doc id's lookup enters
        #[arg(long)]
        doc_id: Option<u64>,
    },

    /// Look up a document by doc id and print its record
    Get {
        /// Corpus file
        corpus: PathBuf,

        /// Doc id to fetch
        doc_id: u64,
    },
}
