// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! procwrap - drive a compiled audio module through the module adapter.

use clap::{Args, Parser, Subcommand};
use procwrap::config::{self, AppConfig, ConfigManager};
use procwrap::host::{spawn_render, Node, NodeError, ProcessorRegistry, RenderPlan, PROCESSOR_NAME};
use procwrap::modules::NativeLoader;
use procwrap::Message;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Host adapter for compiled audio modules")]
struct Cli {
    /// Config file to use instead of the one in the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a module, feed it messages and render its output to a WAV file.
    Render(RenderArgs),
    /// Check a native module library and print its metadata.
    Inspect(InspectArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Args)]
struct RenderArgs {
    /// Load source: a library path or `builtin:<id>`.
    #[arg(long)]
    source: String,
    /// File with one control message per line.
    #[arg(long)]
    messages: Option<PathBuf>,
    /// Number of blocks to render.
    #[arg(long, default_value_t = 375)]
    blocks: usize,
    /// Output WAV path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct InspectArgs {
    /// Path to the module library.
    library: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("procwrap=debug".parse()?))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render(args) => execute_render(&config, args).await,
        Commands::Inspect(args) => execute_inspect(&config, args),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, config::ConfigError> {
    match path {
        Some(path) => config::load_file(path),
        None => ConfigManager::new()?.load_config(),
    }
}

/// Control messages from `path`, one per line. Blank lines are skipped.
fn read_messages(path: &Path) -> Result<Vec<Message>, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let mut messages = Vec::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        messages.push(Message::from_text(line)?);
    }
    Ok(messages)
}

async fn execute_render(
    config: &AppConfig,
    args: RenderArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ProcessorRegistry::with_defaults(config);
    let node = Node::spawn(&registry, PROCESSOR_NAME)?;

    node.post(Message::from_text(&args.source)?)?;
    if let Some(path) = &args.messages {
        let messages = read_messages(path)?;
        info!("Posting {} messages from {:?}", messages.len(), path);
        for message in messages {
            node.post(message)?;
        }
    }

    let ready = node.wait_ready().await;
    if let Err(NodeError::Stopped) = ready {
        // Surface the reason the control task ended.
        node.join().await?;
        return Err(NodeError::Stopped.into());
    }

    let plan = RenderPlan::from_engine(&config.engine, args.blocks);
    let rendered = spawn_render(node.audio(), plan)?.finish().await?;
    if rendered.stopped_early {
        warn!("Module stopped after {} blocks", rendered.blocks);
    }

    node.close()?;
    node.join().await?;

    let spec = hound::WavSpec {
        channels: config.engine.channels,
        sample_rate: config.engine.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&args.out, spec)?;
    for sample in &rendered.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;

    println!(
        "Rendered {} frames ({} blocks) to {}",
        rendered.frames(),
        rendered.blocks,
        args.out.display()
    );
    Ok(())
}

fn execute_inspect(config: &AppConfig, args: InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let loader = NativeLoader::new()
        .with_search_paths(config.loader.search_paths.iter().cloned())
        .with_permission_check(config.loader.check_permissions);
    let info = loader.validate(&args.library)?;

    println!("{}", info.name);
    println!("  id:       {}", info.id);
    println!("  vendor:   {}", info.vendor);
    println!("  version:  {}", info.version);
    println!("  channels: {}", info.output_channels);
    Ok(())
}
