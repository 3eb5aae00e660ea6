// src/main.rs

use backy::{cli, config, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("backy error: {err}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    if !matches!(args.command, cli::Commands::Version { .. }) {
        let logging_section = config::loader::peek_logging(args.config.as_deref());
        logging::init_logging(args.log_level, &logging_section)?;
    }
    run(args).await?;
    Ok(())
}
