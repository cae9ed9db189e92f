use anyhow::Result;
use panelgen::{cli, logger, ui};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logger::init() {
        eprintln!("Failed to initialize logging: {e}");
    }

    match cli::main().await {
        Ok(()) => Ok(()),
        Err(e) => {
            ui::print_error(&format!("Error: {e}"));
            std::process::exit(1);
        }
    }
}
