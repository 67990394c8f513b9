use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::summarize::SummaryMode;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// One-shot catalog search.
    Search(SearchArgs),
    /// Generate a summary for a single book.
    Summarize(SummarizeArgs),
    /// Print the provider's diagnostic model listing.
    Models,
    /// Play a text file through the playback position engine.
    Narrate(NarrateArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP service to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: SocketAddr,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Free-text search query.
    #[arg(long)]
    pub query: String,

    /// Maximum number of results.
    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

#[derive(Debug, Args)]
pub struct SummarizeArgs {
    /// Book identifier (primary-catalog volume id, or an OL… id).
    #[arg(long)]
    pub id: String,

    /// Summary mode.
    #[arg(long, value_enum, default_value = "long")]
    pub mode: SummaryMode,
}

#[derive(Debug, Args)]
pub struct NarrateArgs {
    /// Text file to narrate.
    #[arg(long)]
    pub input: String,

    /// Character offset to start narration from.
    #[arg(long, default_value_t = 0)]
    pub from_offset: usize,
}
