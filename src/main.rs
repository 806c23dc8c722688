use airdrop_treasury::cycle::{CycleAccounts, Collaborators, Orchestrator, TickOutcome};
use airdrop_treasury::ledger::{JsonFileStore, ReserveLedger};
use airdrop_treasury::providers::dry_run::DryRunGateway;
use airdrop_treasury::providers::http::{
    HeliusHolderIndex, JupiterSwapProvider, PumpPortalClaimProvider, RpcBalanceReader,
};
use airdrop_treasury::runtime::{emit_startup_status, explain_config_lines, parse_runtime_args};
use airdrop_treasury::status::BroadcastSink;
use airdrop_treasury::utils::config::{Config, CycleParams};
use airdrop_treasury::utils::rpc::JsonRpcClient;
use airdrop_treasury::utils::telemetry;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let runtime_args = parse_runtime_args()?;

    // Validate environment files and load defaults before runtime initialization.
    airdrop_treasury::utils::env_guard::harden_env_setup();

    match std::env::var("RUST_LOG") {
        Ok(val) => println!("[STARTUP] RUST_LOG is set to: '{}'", val),
        Err(_) => println!("[STARTUP] RUST_LOG is unset."),
    }

    // Default to `info` when `RUST_LOG` is unset or invalid to avoid silent startup.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        println!("[STARTUP] RUST_LOG invalid or unset; defaulting to 'info'");
        tracing_subscriber::EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    println!("[STARTUP] Tracing initialized.");

    let config = Config::load().map_err(|err| {
        tracing::error!("[STARTUP] Fatal configuration error: {err}");
        anyhow::anyhow!("configuration error: {err}")
    })?;
    let params = CycleParams::from_env();

    if runtime_args.explain_config {
        for line in explain_config_lines(&config, &params) {
            println!("{line}");
        }
        tracing::info!("[OPS] TREASURY_EXPLAIN_CONFIG=true requested; configuration resolved.");
        return Ok(());
    }

    telemetry::init_telemetry();
    println!("[STARTUP] Telemetry initialized.");
    telemetry::emit(
        telemetry::TelemetryLevel::Info,
        "startup",
        format!("airdrop_treasury boot treasury={}", config.treasury.short()),
    );

    let ledger = ReserveLedger::open(
        Box::new(JsonFileStore::new(config.stats_path.clone())),
        params.reserve_fraction,
    );
    emit_startup_status(
        &runtime_args,
        &config,
        &params,
        &ledger.stats(),
        ledger.reserve_amount(),
    );

    let rpc = Arc::new(JsonRpcClient::new(config.rpc_url.clone()));
    tracing::info!("[STARTUP] RPC endpoint: {}", rpc.redacted_url());
    let collaborators = Collaborators {
        balances: Arc::new(RpcBalanceReader::new(rpc, params.base_decimals)),
        claims: Arc::new(PumpPortalClaimProvider::new(config.claim_api_url.clone())),
        swaps: Arc::new(JupiterSwapProvider::new(
            config.swap_quote_url.clone(),
            config.swap_execute_url.clone(),
            config.swap_api_key.clone(),
        )),
        holders: Arc::new(HeliusHolderIndex::new(config.holder_index_url.clone())),
        gateway: Arc::new(DryRunGateway::new()),
    };

    let sink = Arc::new(BroadcastSink::default());
    let accounts = CycleAccounts::new(
        config.treasury.clone(),
        config.gating_mint.clone(),
        config.reward_mint.clone(),
    );
    let mut orchestrator = Orchestrator::new(accounts, params, collaborators, ledger, sink);

    if runtime_args.run_once {
        let outcome = orchestrator.tick().await;
        match &outcome {
            TickOutcome::Completed(result) => tracing::info!(
                "[OPS] Single tick complete: {}",
                serde_json::to_string(result).unwrap_or_default()
            ),
            other => tracing::info!("[OPS] Single tick outcome: {other:?}"),
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    {
        let shutdown_tx_ctrl_c = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("[OPS] Ctrl-C received; shutting down.");
                let _ = shutdown_tx_ctrl_c.send(());
            }
        });
    }

    #[cfg(unix)]
    {
        let shutdown_tx_sigterm = shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut term_signal) = signal(SignalKind::terminate()) else {
                return;
            };
            let _ = term_signal.recv().await;
            telemetry::emit_critical("sigterm", "SIGTERM received; shutting down treasury loop");
            let _ = shutdown_tx_sigterm.send(());
        });
    }

    orchestrator.run(shutdown_rx).await;
    drop(shutdown_tx);

    let stats = orchestrator.ledger().stats();
    tracing::info!(
        "[OPS] Stopped. claimed={:.4} swapped={:.4} airdrops={} distributed={:.2} alerts_dropped={} alerts_suppressed={}",
        stats.total_claimed,
        stats.total_swapped,
        stats.total_airdrops,
        stats.total_distributed,
        telemetry::dropped_alerts(),
        telemetry::suppressed_alerts()
    );
    Ok(())
}
