use std::io::Read;

use anyhow::{Context, Result};
use clap::Parser;

use llmalfr::cli::CliArgs;
use llmalfr::config::{self, BackendKind};
use llmalfr::{logging, Processor};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(model) = &args.model {
        cfg.model = model.clone();
    }
    if let Some(url) = &args.api_url {
        cfg.remote.base_url = url.clone();
    }
    if let Some(path) = &args.local {
        cfg.model = path.clone();
        cfg.backend = BackendKind::Local;
    }

    logging::init(&cfg.log_level)?;

    let context = match (&args.context, &args.context_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading context from {}", path.display()))?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading context from stdin")?;
            buf
        }
    };

    // call-line options sit above the config file's
    let mut options = cfg.options.clone();
    options.extend(args.option_map());

    let mut processor = Processor::from_config(&cfg).context("building processor")?;
    let output = processor.process(&args.prompt, &context, &options)?;
    println!("{output}");
    Ok(())
}
