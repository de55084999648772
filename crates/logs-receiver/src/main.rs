// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, path::PathBuf, process, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logs_pipeline::{
    config::{self, LogLevel, ReceiverConfig},
    converter::{Batch, LogsConsumer},
    errors::DeliveryError,
    logger,
    operator::{noop, OperatorConfig, Registry},
    receiver::Receiver,
    Entry,
};

const CONFIG_DIR_ENV: &str = "LOGS_RECEIVER_CONFIG_DIR";
const STDIN_RESOURCE: &str = "stdin";

/// Writes every delivered entry to stdout as one JSON line.
struct StdoutConsumer;

#[async_trait]
impl LogsConsumer for StdoutConsumer {
    async fn deliver(&self, batch: Batch) -> Result<(), DeliveryError> {
        let count = batch.len();
        let rejected = |message: String| DeliveryError { count, message };

        let mut out = Vec::new();
        for entry in batch.entries() {
            serde_json::to_writer(&mut out, entry).map_err(|e| rejected(e.to_string()))?;
            out.push(b'\n');
        }

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(&out)
            .await
            .map_err(|e| rejected(e.to_string()))?;
        stdout.flush().await.map_err(|e| rejected(e.to_string()))
    }
}

fn line_to_entry(line: String) -> Entry {
    let body = serde_json::from_str::<Value>(&line).unwrap_or(Value::String(line));
    Entry::new(body).with_resource(STDIN_RESOURCE)
}

fn load_config() -> ReceiverConfig {
    let config_dir = env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));

    // the configured level is not known yet; surface config problems on stderr
    let bootstrap = tracing_subscriber::fmt::Subscriber::builder()
        .with_ansi(false)
        .event_format(logger::Formatter)
        .with_writer(std::io::stderr)
        .with_max_level(LogLevel::default().as_level_filter())
        .finish();
    let mut config =
        tracing::subscriber::with_default(bootstrap, || config::get_config(&config_dir));

    if config.operators.is_empty() {
        config.operators.push(OperatorConfig::new(noop::OPERATOR_TYPE));
    }
    config
}

#[tokio::main]
pub async fn main() {
    let config = load_config();

    let env_filter = format!("sled=warn,{}", config.log_level.as_filter_directive());
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter)
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_directive())),
        )
        .with_ansi(false)
        .event_format(logger::Formatter)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let receiver = match Receiver::new(config, &Registry::with_builtins(), Arc::new(StdoutConsumer)) {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("Invalid receiver configuration: {e}");
            process::exit(1);
        }
    };

    if let Some(mut error_bus) = receiver.take_error_bus() {
        tokio::spawn(async move {
            while let Some(report) = error_bus.rx.recv().await {
                error!("RECEIVER | {report}");
            }
        });
    }

    if let Err(e) = receiver.start().await {
        error!("Failed to start receiver: {e}");
        process::exit(1);
    }

    let handle = receiver.handle();
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            signal_handle.shutdown();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            () = handle.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => receiver.process(line_to_entry(line)).await,
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
        }
    }

    if let Err(e) = receiver.stop().await {
        error!("Receiver did not stop cleanly: {e}");
    }
}
