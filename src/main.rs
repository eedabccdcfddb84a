use anyhow::Result;
use clap::{Parser, Subcommand};

use watergraph_builder::commands;

#[derive(Parser, Debug)]
#[command(name = "watergraph_builder", version, about = "Builds a routing graph from water feature geometry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Water graph pipeline and inspection commands
    Graph {
        #[command(flatten)]
        common: commands::graph::CommonOpts,
        #[command(subcommand)]
        sub: commands::graph::GraphCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Graph { common, sub } => commands::graph::cmd_graph(common, sub),
    }
}
