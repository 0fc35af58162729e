//! # dataset-query entry point
//!
//! ```text
//! main()
//!   │
//!   ├─> Parse CLI arguments (clap)
//!   ├─> Initialize logging (files + stderr, stderr only as fallback)
//!   ├─> Create Tokio runtime
//!   └─> Run the subcommand: query | schema | serve
//! ```
//!
//! ```bash
//! dataset-query query "which pizzeria has the most reviews?" --dataset abc123
//! dataset-query --data-dir ./data schema --dataset restaurants
//! dataset-query serve --port 4321
//! ```

#![expect(clippy::print_stdout)] // the CLI prints answers on stdout

mod cli;

use clap::Parser as _;
use dataset_query::logging;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = cli::Cli::parse();

    if logging::init().is_err() {
        logging::init_console()?;
    }

    tokio::runtime::Runtime::new()?.block_on(cli::run(cli))?;
    Ok(())
}
