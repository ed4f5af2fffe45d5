// This file is part of Courier.
//
// Courier is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Courier is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Courier.
// If not, see https://www.gnu.org/licenses/.

use alloy_primitives::Address;
use clap::{Args, Parser, Subcommand};
use courier_pool::ValidatorSettings;
use courier_sim::{PrecheckSettings, SimulationSettings, MIN_CALL_GAS_LIMIT};
use secrecy::SecretString;

mod builder;
mod json;
mod metrics;
mod node;
mod pool;
mod rpc;
mod tracing;

use node::NodeCliArgs;

/// Main entry point for the CLI
///
/// Parses the CLI arguments and runs the appropriate subcommand.
/// Listens for a ctrl-c signal and shuts down all components when received.
pub async fn run() -> anyhow::Result<()> {
    let opt = Cli::parse();
    let _guard = tracing::configure_logging(&opt.logs)?;
    tracing::info!("Parsed CLI options: {:#?}", opt);

    match opt.command {
        Command::Node(args) => {
            let metrics_addr = format!("{}:{}", opt.metrics.host, opt.metrics.port).parse()?;
            metrics::initialize(
                opt.metrics.sample_interval_millis,
                metrics_addr,
                &opt.metrics.tags,
            )?;
            node::run(*args, opt.common).await?
        }
        Command::CreateMnemonic(args) => {
            builder::create_mnemonic(&args.out_file)?;
        }
    }

    tracing::info!("Shutdown, goodbye");
    Ok(())
}

/// CLI commands
#[derive(Debug, Subcommand)]
enum Command {
    /// Bundler command
    ///
    /// Runs the pool, the submission loop and the RPC server in a single process.
    #[command(name = "node")]
    Node(Box<NodeCliArgs>),

    /// Write a new random signer mnemonic to a file
    #[command(name = "create-mnemonic")]
    CreateMnemonic(builder::CreateMnemonicArgs),
}

/// CLI common options
#[derive(Debug, Args)]
#[command(next_help_heading = "Common")]
pub struct CommonArgs {
    /// ETH Node HTTP URL to connect to
    #[arg(
        long = "node_http",
        name = "node_http",
        env = "NODE_HTTP",
        global = true
    )]
    node_http: Option<String>,

    /// Entry point operations are bundled for
    #[arg(
        long = "entry_point",
        name = "entry_point",
        env = "ENTRY_POINT",
        default_value = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789",
        global = true
    )]
    entry_point: Address,

    /// Chain ID, checked against the node at startup
    #[arg(
        long = "chain_id",
        name = "chain_id",
        env = "CHAIN_ID",
        default_value = "1",
        global = true
    )]
    chain_id: u64,

    #[arg(
        long = "max_verification_gas",
        name = "max_verification_gas",
        default_value = "5000000",
        env = "MAX_VERIFICATION_GAS",
        global = true
    )]
    max_verification_gas: u128,

    #[arg(
        long = "min_call_gas_limit",
        name = "min_call_gas_limit",
        env = "MIN_CALL_GAS_LIMIT",
        default_value_t = MIN_CALL_GAS_LIMIT,
        global = true
    )]
    min_call_gas_limit: u128,

    /// Lowest `maxPriorityFeePerGas` accepted into the pool
    #[arg(
        long = "min_priority_fee_per_gas",
        name = "min_priority_fee_per_gas",
        env = "MIN_PRIORITY_FEE_PER_GAS",
        default_value = "0",
        global = true
    )]
    min_priority_fee_per_gas: u128,

    /// Lowest `maxFeePerGas` accepted into the pool
    #[arg(
        long = "min_max_fee_per_gas",
        name = "min_max_fee_per_gas",
        env = "MIN_MAX_FEE_PER_GAS",
        default_value = "0",
        global = true
    )]
    min_max_fee_per_gas: u128,
}

impl CommonArgs {
    fn node_http(&self) -> anyhow::Result<&str> {
        self.node_http
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("node_http is required"))
    }

    fn precheck_settings(&self, max_batch_gas: u128) -> PrecheckSettings {
        PrecheckSettings {
            max_verification_gas: self.max_verification_gas,
            max_total_gas: max_batch_gas,
            min_call_gas_limit: self.min_call_gas_limit,
        }
    }
}

impl From<&CommonArgs> for ValidatorSettings {
    fn from(value: &CommonArgs) -> Self {
        Self {
            min_max_fee_per_gas: value.min_max_fee_per_gas,
            min_priority_fee_per_gas: value.min_priority_fee_per_gas,
        }
    }
}

impl From<&CommonArgs> for SimulationSettings {
    fn from(value: &CommonArgs) -> Self {
        Self {
            max_verification_gas: value.max_verification_gas,
        }
    }
}

/// Converts a &str into a SecretString
pub(crate) fn parse_secret(s: &str) -> Result<SecretString, String> {
    Ok(s.into())
}

/// CLI options for the metrics server
#[derive(Debug, Args)]
#[command(next_help_heading = "Metrics")]
pub struct MetricsArgs {
    /// Port to listen on for metrics requests
    #[arg(
        long = "metrics.port",
        name = "metrics.port",
        env = "METRICS_PORT",
        default_value = "8080",
        global = true
    )]
    port: u16,

    /// Host to listen on for metrics requests
    #[arg(
        long = "metrics.host",
        name = "metrics.host",
        env = "METRICS_HOST",
        default_value = "0.0.0.0",
        global = true
    )]
    host: String,

    /// Tags for metrics
    ///
    /// Format: key1=value1,key2=value2,...
    #[arg(
        long = "metrics.tags",
        name = "metrics.tags",
        env = "METRICS_TAGS",
        default_values_t = Vec::<String>::new(),
        value_delimiter = ',',
        global = true
    )]
    tags: Vec<String>,

    /// Interval between process metric samples
    #[arg(
        long = "metrics.sample_interval_millis",
        name = "metrics.sample_interval_millis",
        env = "METRICS_SAMPLE_INTERVAL_MILLIS",
        default_value = "1000",
        global = true
    )]
    sample_interval_millis: u64,
}

/// CLI options for logging
#[derive(Debug, Args)]
#[command(next_help_heading = "Logging")]
pub struct LogsArgs {
    /// Log file
    ///
    /// If not provided, logs will be written to stdout
    #[arg(
        long = "log.file",
        name = "log.file",
        env = "LOG_FILE",
        default_value = None,
        global = true
    )]
    file: Option<String>,

    /// Log JSON
    ///
    /// If set, logs will be written in JSON format
    #[arg(
        long = "log.json",
        name = "log.json",
        env = "LOG_JSON",
        required = false,
        num_args = 0,
        global = true
    )]
    json: bool,
}

/// CLI options
#[derive(Debug, Parser)]
#[clap(name = "courier", version)]
pub struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    common: CommonArgs,

    #[clap(flatten)]
    metrics: MetricsArgs,

    #[clap(flatten)]
    logs: LogsArgs,
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use courier_rpc::ApiNamespace;
    use courier_types::chain::ENTRY_POINT_V0_6;
    use secrecy::ExposeSecret;

    use super::*;

    // Well known development key
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("courier").chain(args.iter().copied())).unwrap()
    }

    fn node_args(cli: &Cli) -> &NodeCliArgs {
        match &cli.command {
            Command::Node(args) => args,
            Command::CreateMnemonic(_) => panic!("expected the node command"),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["node", "--node_http", "http://localhost:8545"]);
        assert_eq!(cli.common.entry_point, ENTRY_POINT_V0_6);
        assert_eq!(cli.common.node_http().unwrap(), "http://localhost:8545");

        let node = node_args(&cli);
        let pool = node.pool.pool_config(&cli.common);
        assert_eq!(pool.max_ops_per_sender, 4);
        assert_eq!(pool.min_replacement_fee_increase_percentage, 10);
        assert_eq!(node.pool.reputation_params().ban_threshold, 5);
        assert_eq!(node.builder.max_batch_gas, 10_000_000);
        assert_eq!(
            node.builder.min_balance,
            U256::from(100_000_000_000_000_000_u128)
        );
        assert_eq!(
            node.rpc.to_args().unwrap().api_namespaces,
            vec![ApiNamespace::Eth]
        );
    }

    #[test]
    fn test_dotted_flags() {
        let cli = parse(&[
            "node",
            "--pool.max_size",
            "10",
            "--reputation.window_secs",
            "60",
            "--builder.max_ops_per_batch",
            "2",
            "--builder.private_key",
            DEV_KEY,
            "--rpc.api",
            "eth,debug",
            "--min_max_fee_per_gas",
            "7",
            "--log.json",
        ]);
        let node = node_args(&cli);
        assert_eq!(node.pool.max_size, 10);
        assert_eq!(node.pool.reputation_params().window.as_secs(), 60);
        assert_eq!(node.builder.builder_settings(Address::ZERO).max_ops_per_batch, 2);
        assert_eq!(
            node.builder.private_key.as_ref().unwrap().expose_secret(),
            DEV_KEY
        );
        assert_eq!(
            node.rpc.to_args().unwrap().api_namespaces,
            vec![ApiNamespace::Eth, ApiNamespace::Debug]
        );
        assert_eq!(ValidatorSettings::from(&cli.common).min_max_fee_per_gas, 7);
        assert!(cli.logs.json);
    }

    #[test]
    fn test_unknown_namespace_rejected() {
        assert!(Cli::try_parse_from(["courier", "node", "--rpc.api", "admin"]).is_err());
    }

    #[test]
    fn test_signer_sources() {
        let cli = parse(&["node", "--builder.private_key", DEV_KEY]);
        let signer = node_args(&cli).builder.signer().unwrap();
        assert_eq!(
            signer.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        let settings = node_args(&cli)
            .builder
            .submission_settings(signer.address());
        assert_eq!(settings.beneficiary, signer.address());

        let cli = parse(&[
            "node",
            "--builder.mnemonic",
            "test test test test test test test test test test test junk",
        ]);
        assert_eq!(
            node_args(&cli).builder.signer().unwrap().address(),
            signer.address()
        );

        let cli = parse(&["node"]);
        assert!(node_args(&cli).builder.signer().is_err());

        let cli = parse(&[
            "node",
            "--builder.private_key",
            DEV_KEY,
            "--builder.mnemonic_file",
            "/nonexistent",
        ]);
        assert!(node_args(&cli).builder.signer().is_err());
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        let path =
            std::env::temp_dir().join(format!("courier-{}-{name}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_mnemonic_file_signer() {
        let path = temp_path("mnemonic-file");
        std::fs::write(
            &path,
            "  test test test test test test test test test test test junk\n",
        )
        .unwrap();

        let cli = parse(&[
            "node",
            "--builder.mnemonic_file",
            path.to_str().unwrap(),
        ]);
        let signer = node_args(&cli).builder.signer().unwrap();
        assert_eq!(
            signer.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        std::fs::remove_file(&path).unwrap();

        assert!(node_args(&cli).builder.signer().is_err());
    }

    #[test]
    fn test_create_mnemonic() {
        let path = temp_path("create-mnemonic");
        let cli = parse(&["create-mnemonic", "--out_file", path.to_str().unwrap()]);
        let Command::CreateMnemonic(args) = &cli.command else {
            panic!("expected the create-mnemonic command");
        };

        let address = builder::create_mnemonic(&args.out_file).unwrap();
        let phrase = std::fs::read_to_string(&path).unwrap();
        assert_eq!(phrase.split_whitespace().count(), 12);

        let cli = parse(&[
            "node",
            "--builder.mnemonic_file",
            path.to_str().unwrap(),
        ]);
        assert_eq!(node_args(&cli).builder.signer().unwrap().address(), address);

        // an existing file is never overwritten
        assert!(builder::create_mnemonic(&path).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), phrase);
        std::fs::remove_file(&path).unwrap();
    }
}
