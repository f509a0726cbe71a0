// Demo CLI: connect, sign a fixed transaction or a message, disconnect

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::Eip1559TransactionRequest;
use ethers_core::utils::parse_units;
use ledger_connector::connector::default_dmk;
use ledger_connector::{
    connect_ledger_with, to_ledger_account, Account, ConnectorConfig, LedgerConnection,
    LedgerConnectorParameters, SignableMessage, TransportIdentifier,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledger-connector")]
#[command(about = "Sign Ethereum payloads with a Ledger device", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Transport used for discovery (simulator, speculos)
    #[arg(short, long, global = true, default_value = "simulator")]
    transport: TransportIdentifier,

    /// Speculos REST endpoint, overrides LEDGER_SPECULOS_URL
    #[arg(long, global = true)]
    speculos_url: Option<String>,

    /// BIP-32 path of the account
    #[arg(short, long, global = true)]
    derivation_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Dump the device management logs to stderr before exiting
    #[arg(long, global = true)]
    export_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the account address
    Address,

    /// Sign a dummy EIP-1559 transfer of 1 ETH to the account itself
    SignTransaction,

    /// Sign a personal message
    SignMessage {
        /// Message text, signed as UTF-8
        message: String,
    },
}

fn dummy_transaction(connection: &LedgerConnection) -> anyhow::Result<TypedTransaction> {
    let value = parse_units("1", "ether")?;
    let priority_fee = parse_units("1.5", "gwei")?;
    let max_fee = parse_units("30", "gwei")?;

    Ok(Eip1559TransactionRequest::new()
        .to(connection.address)
        .value(value)
        .max_priority_fee_per_gas(priority_fee)
        .max_fee_per_gas(max_fee)
        .gas(21_000u64)
        .nonce(0u64)
        .chain_id(1u64)
        .into())
}

fn print_result(json: bool, key: &str, value: &str, connection: &LedgerConnection) {
    if json {
        let mut output = serde_json::Map::new();
        output.insert("address".to_string(), connection.checksum_address().into());
        output.insert(
            "derivationPath".to_string(),
            connection.derivation_path.clone().into(),
        );
        output.insert(key.to_string(), value.into());
        println!("{}", serde_json::Value::Object(output));
    } else {
        println!("{}: {}", key, value);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ConnectorConfig::from_env().context("invalid environment configuration")?;
    if let Some(url) = cli.speculos_url {
        config.speculos_url = url;
        config.validate()?;
    }

    let params = LedgerConnectorParameters {
        derivation_path: cli.derivation_path,
        ..LedgerConnectorParameters::new(cli.transport)
    };

    let (dmk, exporter) = default_dmk(&config)?;
    let connection = connect_ledger_with(Arc::new(dmk), &params, &config)
        .await
        .with_context(|| format!("failed to connect over {}", cli.transport))?;
    let account = to_ledger_account(&connection);

    let result = match cli.command {
        Commands::Address => Ok(("address", connection.checksum_address())),
        Commands::SignTransaction => {
            let tx = dummy_transaction(&connection)?;
            account
                .sign_transaction(&tx)
                .await
                .map(|signed| ("signedTransaction", signed))
        }
        Commands::SignMessage { message } => account
            .sign_message(SignableMessage::Text(message))
            .await
            .map(|signature| ("signature", signature)),
    };

    match &result {
        Ok((key, value)) => print_result(cli.json, key, value, &connection),
        Err(e) => tracing::error!(error = %e, "device action failed"),
    }

    connection.disconnect().await?;

    if cli.export_logs {
        for line in exporter.export_logs() {
            eprintln!("{}", line);
        }
    }

    result.map(|_| ()).context("signing failed")
}
