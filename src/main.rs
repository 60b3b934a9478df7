use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use vendor_registry::{
    composite::{self, CompositeKeyError},
    ledger::{load_state, save_state},
    registry::ConfigError,
    IdentityPolicy, RegistryConfig, RegistryEngine, StorageError, SubRecordKind,
};

//==================== arguments ====================//

#[derive(Parser)]
#[command(
    name = "vendor-registry",
    version,
    about = "Vendor registry over a file-backed ledger (primary records + composite-key index)"
)]
struct Cli {
    /// Ledger state file; created on the first successful write
    #[arg(long, global = true, default_value = "vendor-ledger.json")]
    state: PathBuf,

    /// Registry config (JSON): kind, identity policy, index name
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sub-record variant, overrides the config file
    #[arg(long, global = true)]
    kind: Option<SubRecordKind>,

    /// Generate vendor IDs instead of using the vendor code, with an optional prefix
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "",
        value_name = "PREFIX"
    )]
    generate_ids: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one registry function in a single ledger transaction
    Invoke {
        /// create | appendSubRecord | read | delete | query (legacy names accepted)
        function: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List index entries whose leading components match the given attributes
    Scan { attributes: Vec<String> },
    /// Print the ledger height and state root
    StateRoot,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] StorageError),
    #[error(transparent)]
    Key(#[from] CompositeKeyError),
    #[error("cannot write output: {0}")]
    Output(#[from] io::Error),
}

//==================== setup ====================//

fn setup_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("VENDOR_REGISTRY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            if verbose {
                EnvFilter::new("vendor_registry=debug,info")
            } else {
                EnvFilter::new("info")
            }
        });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<RegistryConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => RegistryConfig::from_json_file(path)?,
        None => RegistryConfig::default(),
    };
    if let Some(kind) = cli.kind {
        config.kind = kind;
    }
    if let Some(prefix) = &cli.generate_ids {
        config.identity = IdentityPolicy::Generated {
            prefix: prefix.clone(),
        };
    }
    debug!(?config, "registry config resolved");
    Ok(config)
}

//==================== commands ====================//

fn invoke_cmd(
    state: &Path,
    config: RegistryConfig,
    function: &str,
    args: &[String],
) -> Result<ExitCode, CliError> {
    let mut ledger = load_state(state)?;
    let height = ledger.height();
    let engine = RegistryEngine::new(config);

    match ledger.transact(|tx| engine.execute(tx, function, args)) {
        Ok(payload) => {
            if ledger.height() != height {
                save_state(state, &ledger)?;
                info!(height = ledger.height(), state = %state.display(), "ledger committed");
            }
            let mut stdout = io::stdout().lock();
            stdout.write_all(&payload)?;
            if !payload.is_empty() {
                stdout.write_all(b"\n")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::from(1))
        }
    }
}

fn scan_cmd(state: &Path, config: &RegistryConfig, attributes: &[String]) -> Result<ExitCode, CliError> {
    let ledger = load_state(state)?;
    let parts: Vec<&str> = attributes.iter().map(String::as_str).collect();
    let hits = ledger.scan_partial_composite_key(&config.index_name, &parts)?;
    let mut stdout = io::stdout().lock();
    for hit in hits {
        let (_, components) = composite::split_key(&hit.key)?;
        writeln!(stdout, "{}", components.join("\t"))?;
    }
    Ok(ExitCode::SUCCESS)
}

fn state_root_cmd(state: &Path) -> Result<ExitCode, CliError> {
    let ledger = load_state(state)?;
    println!("height={} keys={} root={}", ledger.height(), ledger.len(), hex::encode(ledger.state_root()));
    Ok(ExitCode::SUCCESS)
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = load_config(&cli)?;
    match &cli.command {
        Command::Invoke { function, args } => invoke_cmd(&cli.state, config, function, args),
        Command::Scan { attributes } => scan_cmd(&cli.state, &config, attributes),
        Command::StateRoot => state_root_cmd(&cli.state),
    }
}

//==================== main ====================//

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Cli {
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn bare_generate_ids_leaves_subcommand_alone() {
        let cli = parse(&["vendor-registry", "--generate-ids", "invoke", "create", "V1"]);
        assert_eq!(cli.generate_ids.as_deref(), Some(""));
        match cli.command {
            Command::Invoke { function, args } => {
                assert_eq!(function, "create");
                assert_eq!(args, vec!["V1".to_string()]);
            }
            _ => panic!("expected invoke"),
        }
    }

    #[test]
    fn generate_ids_prefix_needs_equals() {
        let cli = parse(&["vendor-registry", "--generate-ids=acc", "state-root"]);
        assert_eq!(cli.generate_ids.as_deref(), Some("acc"));
        assert!(matches!(cli.command, Command::StateRoot));

        let config = load_config(&cli).unwrap();
        assert_eq!(
            config.identity,
            IdentityPolicy::Generated {
                prefix: "acc".into()
            }
        );

        let cli = parse(&["vendor-registry", "state-root"]);
        assert!(cli.generate_ids.is_none());
    }
}
