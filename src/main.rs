// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `qrpay` command line client.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qrpay_client::bluetooth::bluez::{BluezRadio, OfflineRadio};
use qrpay_client::bluetooth::{DeviceChooser, FirstMatch, Radio, TerminalPrompt};
use qrpay_client::events::EventLogger;
use qrpay_client::storage::{BindingStore, DisabledBindings, FileBindingStore};
use qrpay_client::{Config, TransactionCoordinator, Wallet};

#[derive(Parser, Debug)]
#[command(name = "qrpay", version, about = "Confirm QR payment offers with a BLE peer")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/qrpay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Handshake response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Do not remember selected devices
    #[arg(long, global = true)]
    no_remember: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a scanned payment offer
    Pay {
        /// Decoded QR text; read from stdin when omitted
        #[arg(long)]
        payload: Option<String>,

        /// Current balance
        #[arg(long, default_value_t = 1000.0)]
        balance: f64,

        /// Take the first matching device instead of prompting
        #[arg(long)]
        first_match: bool,
    },
    /// Forget the device remembered for a token or name
    Forget { key: String },
    /// List remembered devices
    Devices,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "qrpay=debug,qrpay_client=debug"
    } else {
        "qrpay=info,qrpay_client=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config.handshake_timeout_ms = timeout_ms;
    }
    if cli.no_remember {
        config.remember_devices = false;
    }

    match cli.command {
        Command::Pay {
            payload,
            balance,
            first_match,
        } => {
            if first_match {
                config.interactive_chooser = false;
            }
            pay(&config, payload, balance).await
        }
        Command::Forget { key } => {
            FileBindingStore::new(&config.data_dir()).clear(&key);
            println!("Forgot device for '{}'", key);
            Ok(ExitCode::SUCCESS)
        }
        Command::Devices => {
            let store = FileBindingStore::new(&config.data_dir());
            for binding in store.list() {
                println!(
                    "{}\t{}\t{}",
                    binding.app_key(),
                    binding.device_id,
                    binding.updated_at
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn pay(config: &Config, payload: Option<String>, balance: f64) -> Result<ExitCode> {
    let payload = match payload {
        Some(payload) => payload,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read payload from stdin")?;
            buf
        }
    };

    let bindings: Arc<dyn BindingStore> = if config.remember_devices {
        Arc::new(FileBindingStore::new(&config.data_dir()))
    } else {
        Arc::new(DisabledBindings)
    };

    let chooser: Box<dyn DeviceChooser> = if config.interactive_chooser {
        Box::new(TerminalPrompt)
    } else {
        Box::new(FirstMatch)
    };

    let radio: Arc<dyn Radio> = match BluezRadio::new(
        config.adapter.as_deref(),
        config.discovery_timeout(),
        chooser,
    )
    .await
    {
        Ok(radio) => Arc::new(radio),
        Err(e) => {
            warn!("Bluetooth unavailable: {:#}", e);
            Arc::new(OfflineRadio::new(format!("{:#}", e)))
        }
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let logger = tokio::spawn(EventLogger::new().run(event_rx));

    let coordinator = TransactionCoordinator::new(radio, bindings)
        .with_timeout(config.handshake_timeout())
        .with_events(event_tx);

    let mut wallet = Wallet::new(balance);
    let outcome = coordinator.evaluate(payload.trim(), wallet.balance()).await;
    let new_balance = wallet.apply(&outcome);
    drop(coordinator);

    if tokio::time::timeout(Duration::from_secs(1), logger).await.is_err() {
        warn!("Event logger did not finish");
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    println!("balance: {}", new_balance);
    info!("Done");

    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
