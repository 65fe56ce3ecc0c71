//! pktwatch CLI entry point.

use pktwatch::cli::{self, Cli};
use pktwatch::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
