//! clan-persist CLI
//!
//! Entry point for the `clan-persist` command-line tool. A JSON document
//! given with `--eval` stands in for the evaluated flake.

use clan_persist::config::{host_config_path, repo_config_path, ConfigError, LogFormat};
use clan_persist::persist::{DigestError, ErrorPayload};
use clan_persist::store::GitCommitHook;
use clan_persist::{
    parse_selector, EffectiveConfig, Flake, FlakeError, InventoryStore, JsonEvaluator,
    JsonFileStore, SelectorError, Settings, StoreError,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "clan-persist")]
#[command(about = "Inspect and edit the clan inventory overlay", version)]
struct Cli {
    /// Host config file (default: ~/.config/clan/persist.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log level; RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print errors as JSON payloads on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FlakeArgs {
    /// JSON document with the evaluated flake outputs
    #[arg(long)]
    eval: PathBuf,

    /// Flake directory holding the overlay
    #[arg(long, default_value = ".")]
    flake: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a selector and print its wire form
    Parse { selector: String },

    /// Read values through the evaluation cache
    Select {
        #[command(flatten)]
        flake: FlakeArgs,

        #[arg(required = true)]
        selectors: Vec<String>,
    },

    /// Print the persistence attributes of every inventory path
    Writeability {
        #[command(flatten)]
        flake: FlakeArgs,
    },

    /// Print the changes an update would make, without writing
    Diff {
        #[command(flatten)]
        flake: FlakeArgs,

        /// JSON file with the desired inventory
        #[arg(long)]
        update: PathBuf,

        /// Merge the update into the current values first
        #[arg(long)]
        merge: bool,
    },

    /// Validate an update and write it to the overlay
    Write {
        #[command(flatten)]
        flake: FlakeArgs,

        /// JSON file with the desired inventory
        #[arg(long)]
        update: PathBuf,

        /// Merge the update into the current values first
        #[arg(long)]
        merge: bool,

        /// Commit message
        #[arg(long, short = 'm')]
        message: String,

        /// Commit the overlay file with git
        #[arg(long)]
        commit: bool,
    },

    /// Remove paths from the overlay
    Delete {
        #[command(flatten)]
        flake: FlakeArgs,

        /// Commit message
        #[arg(long, short = 'm')]
        message: String,

        /// Commit the overlay file with git
        #[arg(long)]
        commit: bool,

        /// Paths to remove, in selector syntax (literal segments only)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Print the effective configuration
    Config {
        /// Flake directory whose repo config is included
        #[arg(long)]
        flake: Option<PathBuf>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Flake(#[from] FlakeError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("{}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("JSON serialization failed: {0}")]
    Output(#[from] serde_json::Error),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    fn to_payload(&self) -> ErrorPayload {
        let code = match self {
            CliError::Store(StoreError::Persist(e)) => return e.to_payload(),
            CliError::Config(_) => "CONFIG_ERROR",
            CliError::Store(_) => "STORE_ERROR",
            CliError::Flake(_) => "EVAL_ERROR",
            CliError::Selector(_) => "SELECTOR_SYNTAX",
            CliError::Read { .. } | CliError::Json { .. } => "INPUT_ERROR",
            CliError::Output(_) | CliError::Digest(_) => "OUTPUT_ERROR",
            CliError::Usage(_) => "USAGE_ERROR",
        };
        ErrorPayload::new(code, self.to_string())
    }
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            if let Ok(text) = serde_json::to_string_pretty(&e.to_payload()) {
                println!("{}", text);
            }
        }
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let flake_dir = match &cli.command {
        Commands::Parse { .. } => None,
        Commands::Config { flake } => flake.clone(),
        Commands::Select { flake, .. }
        | Commands::Writeability { flake }
        | Commands::Diff { flake, .. }
        | Commands::Write { flake, .. }
        | Commands::Delete { flake, .. } => Some(flake.flake.clone()),
    };
    let config = load_config(
        cli.config.as_deref(),
        flake_dir.as_deref(),
        cli.log_level.as_deref(),
    )?;
    let settings = config.settings()?;
    init_logging(&settings);

    match cli.command {
        Commands::Parse { selector } => {
            let selector = parse_selector(&selector)?;
            print_json(&selector.to_wire())
        }
        Commands::Select { flake, selectors } => {
            let mut flake = open_flake(&settings, &flake)?;
            flake.precache(&selectors)?;
            let mut values = Map::new();
            for selector in selectors {
                let value = flake.select(&selector)?;
                values.insert(selector, value);
            }
            print_json(&values)
        }
        Commands::Writeability { flake } => {
            let mut store = open_store(&settings, &flake, false)?;
            print_json(&store.get_writeability()?)
        }
        Commands::Diff {
            flake,
            update,
            merge,
        } => {
            let mut store = open_store(&settings, &flake, false)?;
            let update = load_update(&mut store, &update, merge)?;
            let plan = store.plan(&update)?;
            let digest = plan.digest()?;
            print_json(&serde_json::json!({"digest": digest, "plan": plan}))
        }
        Commands::Write {
            flake,
            update,
            merge,
            message,
            commit,
        } => {
            let mut store = open_store(&settings, &flake, commit)?;
            let update = load_update(&mut store, &update, merge)?;
            let plan = store.write(&update, &message)?;
            if plan.is_empty() {
                println!("No changes");
            } else {
                println!(
                    "Updated {}: {} patch(es), {} delete(s)",
                    store.inventory_file(),
                    plan.patches.len(),
                    plan.deletes.len()
                );
            }
            Ok(())
        }
        Commands::Delete {
            flake,
            message,
            commit,
            paths,
        } => {
            let paths = paths
                .iter()
                .map(|p| {
                    parse_selector(p)?.to_path().ok_or_else(|| {
                        CliError::Usage(format!("'{}' is not a plain attribute path", p))
                    })
                })
                .collect::<Result<Vec<_>, CliError>>()?;
            let mut store = open_store(&settings, &flake, commit)?;
            let removed = store.delete(&paths, &message)?;
            for path in &removed {
                println!("Deleted {}", path);
            }
            if removed.is_empty() {
                println!("No changes");
            }
            Ok(())
        }
        Commands::Config { .. } => {
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn load_config(
    explicit: Option<&Path>,
    flake_dir: Option<&Path>,
    log_level: Option<&str>,
) -> Result<EffectiveConfig, CliError> {
    let host = match explicit {
        Some(path) if !path.exists() => {
            return Err(CliError::Usage(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Some(path) => Some(path.to_path_buf()),
        // Without HOME there is no host config
        None => host_config_path().ok(),
    };
    let repo = flake_dir.map(repo_config_path);
    let overrides = log_level.map(|level| serde_json::json!({"log": {"level": level}}));

    Ok(EffectiveConfig::build(
        host.as_deref(),
        repo.as_deref(),
        overrides,
    )?)
}

fn init_logging(settings: &Settings) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.level));

    match settings.log.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn read_json(path: &Path) -> Result<Value, CliError> {
    let contents = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn open_flake(settings: &Settings, args: &FlakeArgs) -> Result<Flake<JsonEvaluator>, CliError> {
    let document = read_json(&args.eval)?;
    let evaluator = JsonEvaluator::with_store_dir(document, &settings.store_dir);
    let mut flake = Flake::new(args.flake.display().to_string(), evaluator, &settings.store_dir);
    if let Some(dir) = settings.cache_dir()? {
        flake = flake.with_cache_dir(dir);
    }
    flake.refresh()?;
    Ok(flake)
}

fn open_store(
    settings: &Settings,
    args: &FlakeArgs,
    commit: bool,
) -> Result<InventoryStore<JsonEvaluator, JsonFileStore>, CliError> {
    let flake = open_flake(settings, args)?;
    let mut file = JsonFileStore::new(settings.inventory_path(&args.flake));
    if commit {
        file = file.with_commit_hook(GitCommitHook);
    }
    Ok(InventoryStore::new(flake, file).with_settings(settings))
}

fn load_update(
    store: &mut InventoryStore<JsonEvaluator, JsonFileStore>,
    path: &Path,
    merge: bool,
) -> Result<Map<String, Value>, CliError> {
    let Value::Object(update) = read_json(path)? else {
        return Err(CliError::Usage(format!(
            "{} must hold a JSON object",
            path.display()
        )));
    };
    if merge {
        return Ok(store.merged_update(&update)?);
    }
    Ok(update)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
