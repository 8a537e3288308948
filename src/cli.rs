use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "metamorphosis", about = "Metamorphosis — AI Optimization Gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway.
    Serve {
        /// Port to bind; falls back to GATEWAY_PORT, then 8000.
        #[arg(long)]
        port: Option<u16>,
    },
}
