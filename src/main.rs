//! lunar - Lua extension host.
//!
//! Usage:
//!   lunar list                      List discovered plugins
//!   lunar inspect <ID>              Show a plugin's manifest
//!   lunar query <ID> <TEXT>         Run a query against a plugin's handlers
//!   lunar fallbacks <ID> <TEXT>     Ask a plugin for fallback items
//!   lunar packages check|install    Manage the private package tree
//!   lunar --help                    Show help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tracing_subscriber::EnvFilter;

use lunar_core::{Extension, Item, MemorySettings, Query, QueryContext};
use lunar_plugin::{BridgeConfig, LoaderState, PluginLoader, PluginManager};

#[derive(Parser)]
#[command(
    name = "lunar",
    version,
    about = "Host for Lua launcher extensions",
    long_about = "lunar discovers Lua plugins, validates their manifests and \
                  dispatches queries to the extensions they provide."
)]
struct Cli {
    /// Configuration file (defaults to <config dir>/lunar/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Additional plugin directory, searched before the configured ones
    #[arg(short = 'p', long = "plugin-dir", global = true)]
    plugin_dirs: Vec<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List discovered plugins and their state
    List {
        /// Load every enabled plugin before listing
        #[arg(short, long)]
        load: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the manifest of a plugin
    Inspect {
        /// Plugin id, e.g. lua.clock
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a query against the query handlers of a plugin
    Query {
        /// Plugin id
        id: String,

        /// Query text, without trigger
        #[arg(default_value = "")]
        text: String,
    },

    /// Ask the fallback handlers of a plugin for items
    Fallbacks {
        /// Plugin id
        id: String,

        /// Query text
        text: String,
    },

    /// Manage packages in the private package tree
    Packages {
        #[command(subcommand)]
        action: PackagesAction,
    },
}

#[derive(Subcommand)]
enum PackagesAction {
    /// Check whether packages are installed
    Check { names: Vec<String> },

    /// Install packages
    Install { names: Vec<String> },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    let settings = Arc::new(MemorySettings::new());
    let mut manager = PluginManager::initialize(config, settings)
        .await
        .context("Failed to start the plugin runtime")?;

    match cli.command {
        Command::List { load, format } => {
            if load {
                manager.load_all().await;
            }
            run_list(&manager, format)?;
        }
        Command::Inspect { id, format } => {
            run_inspect(find(&manager, &id)?, format)?;
        }
        Command::Query { id, text } => {
            let extensions = load_extensions(&mut manager, &id).await?;
            run_query(&extensions, &text)?;
        }
        Command::Fallbacks { id, text } => {
            let extensions = load_extensions(&mut manager, &id).await?;
            run_fallbacks(&extensions, &text)?;
        }
        Command::Packages { action } => {
            let env = manager.environment();
            match action {
                PackagesAction::Check { names } => {
                    let present = env.check_packages(&names).await?;
                    println!("{}", if present { "installed" } else { "missing" });
                }
                PackagesAction::Install { names } => {
                    env.install_packages(&names).await?;
                    eprintln!("Installed {}", names.join(", "));
                }
            }
        }
    }

    manager.unload_all();
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::load_default()?,
    };

    if !cli.plugin_dirs.is_empty() {
        let mut dirs = cli.plugin_dirs.clone();
        dirs.extend(config.plugin_dirs());
        config.plugin_dirs = dirs;
    }

    Ok(config)
}

fn find<'a>(manager: &'a PluginManager, id: &str) -> Result<&'a PluginLoader> {
    manager
        .get(id)
        .ok_or_else(|| eyre!("No plugin with id '{id}'"))
}

async fn load_extensions(manager: &mut PluginManager, id: &str) -> Result<Vec<Arc<dyn Extension>>> {
    let loader = manager
        .get_mut(id)
        .ok_or_else(|| eyre!("No plugin with id '{id}'"))?;
    let elapsed = loader.load().await?;
    eprintln!("Loaded {id} in {} ms", elapsed.as_millis());
    Ok(loader.instance()?.extensions()?)
}

fn run_list(manager: &PluginManager, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(70));
            println!(" {:<24} {:<10} {:<12} Name", "Id", "Version", "State");
            println!("{}", "─".repeat(70));
            for loader in manager.plugins() {
                let manifest = loader.manifest();
                println!(
                    " {:<24} {:<10} {:<12} {}",
                    manifest.id,
                    manifest.version,
                    state_label(&loader.state()),
                    manifest.name
                );
                match loader.state() {
                    LoaderState::Rejected { reasons } => println!("   {reasons}"),
                    LoaderState::LoadFailed { message } => println!("   {message}"),
                    _ => {}
                }
            }
            println!();
        }
        OutputFormat::Json => {
            let manifests: Vec<_> = manager.plugins().map(PluginLoader::manifest).collect();
            println!("{}", serde_json::to_string_pretty(&manifests)?);
        }
    }
    Ok(())
}

fn run_inspect(loader: &PluginLoader, format: OutputFormat) -> Result<()> {
    let manifest = loader.manifest();
    match format {
        OutputFormat::Text => {
            println!(" Id:           {}", manifest.id);
            println!(" Path:         {}", loader.path().display());
            println!(" Interface:    {}", manifest.iid);
            println!(" Version:      {}", manifest.version);
            println!(" Name:         {}", manifest.name);
            println!(" Description:  {}", manifest.description);
            println!(" License:      {}", manifest.license);
            println!(" Url:          {}", manifest.url);
            println!(" Authors:      {}", manifest.authors.join(", "));
            println!(" Packages:     {}", manifest.lib_dependencies.join(", "));
            println!(" Binaries:     {}", manifest.bin_dependencies.join(", "));
            println!(" Platforms:    {}", manifest.platforms.join(", "));
            println!(" State:        {}", state_label(&loader.state()));
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(manifest)?);
        }
    }
    Ok(())
}

fn run_query(extensions: &[Arc<dyn Extension>], text: &str) -> Result<()> {
    let mut handled = false;
    for extension in extensions {
        let Some(handler) = extension.as_generator_query_handler() else {
            continue;
        };
        handled = true;

        let trigger = handler.default_trigger()?;
        let context: Arc<dyn QueryContext> = Arc::new(Query::new(trigger.clone(), text));
        println!("[{}] {trigger}{text}", extension.id()?);
        for batch in handler.items(context)? {
            for item in batch? {
                print_item(item.as_ref())?;
            }
        }
    }

    if !handled {
        bail!("Plugin provides no query handlers");
    }
    Ok(())
}

fn run_fallbacks(extensions: &[Arc<dyn Extension>], text: &str) -> Result<()> {
    let mut handled = false;
    for extension in extensions {
        let Some(handler) = extension.as_fallback_handler() else {
            continue;
        };
        handled = true;

        println!("[{}]", extension.id()?);
        for item in handler.fallbacks(text)? {
            print_item(item.as_ref())?;
        }
    }

    if !handled {
        bail!("Plugin provides no fallback handlers");
    }
    Ok(())
}

fn print_item(item: &dyn Item) -> Result<()> {
    let subtext = item.subtext()?;
    if subtext.is_empty() {
        println!("  {}", item.text()?);
    } else {
        println!("  {}  ({subtext})", item.text()?);
    }
    for action in item.actions()? {
        println!("    > {}", action.text);
    }
    Ok(())
}

fn state_label(state: &LoaderState) -> &'static str {
    match state {
        LoaderState::Discovered => "discovered",
        LoaderState::Validated => "valid",
        LoaderState::Rejected { .. } => "rejected",
        LoaderState::Loading => "loading",
        LoaderState::Loaded => "loaded",
        LoaderState::LoadFailed { .. } => "failed",
        LoaderState::Unloaded => "unloaded",
    }
}
