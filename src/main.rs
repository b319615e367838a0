use anyhow::Result;
use healthdash::config::Config;
use healthdash::logging::{log, obj, v_num, v_str, Domain, Level};
use healthdash::refresh::{default_registry, Orchestrator, Timing};
use healthdash::render::Board;
use healthdash::source::HttpClient;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let board = Board::new();
    let registry = default_registry(&cfg, &board)?;
    let client = HttpClient::new(cfg.http_timeout_secs.map(Duration::from_secs))?;

    let critical: Vec<&str> = registry
        .iter()
        .filter(|r| r.is_critical)
        .map(|r| r.name.as_str())
        .collect();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("base_url", v_str(&cfg.base_url)),
            ("sources", json!(registry.len())),
            ("critical", json!(critical)),
            ("refresh_secs", v_num(cfg.refresh_secs as f64)),
        ]),
    );

    let orch = Arc::new(Orchestrator::new(
        registry,
        Arc::new(client),
        Arc::new(board.clone()),
        Timing::from_config(&cfg),
    ));

    // Print the board after every cycle, whoever triggered it.
    let mut reports = orch.subscribe();
    let printer_board = board.clone();
    tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => println!("{}", printer_board.snapshot_text()),
                Err(RecvError::Closed) => break,
            }
        }
    });

    orch.start().await;

    // Each stdin line requests a refresh; EOF just stops listening.
    let manual = Arc::clone(&orch);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            let orch = Arc::clone(&manual);
            tokio::spawn(async move {
                if orch.refresh_now().await.is_none() {
                    log(
                        Level::Info,
                        Domain::Schedule,
                        "manual_refresh_coalesced",
                        obj(&[("msg", v_str("refresh already in progress"))]),
                    );
                }
            });
        }
    });

    tokio::signal::ctrl_c().await?;
    orch.stop();
    orch.wait_idle().await;
    log(Level::Info, Domain::System, "shutdown", obj(&[("msg", v_str("timer disarmed, idle"))]));
    Ok(())
}
