//! Simulated federation participant: registers, trains, submits, and waits
//! for each round's aggregate.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flc_coordinator::{CoordinatorClient, SimulatedTrainer, Trainer};
use flc_protocol::ClientCapabilities;

#[derive(Parser, Debug)]
#[command(name = "flc-client", version, about = "Simulated federated learning client")]
struct Cli {
    /// Coordinator transport address.
    #[arg(long, default_value = "127.0.0.1:8765")]
    addr: String,

    #[arg(long)]
    client_id: String,

    /// Rounds to take part in before disconnecting.
    #[arg(long, default_value_t = 5)]
    rounds: u64,

    /// Local dataset size reported with every update.
    #[arg(long, default_value_t = 100)]
    data_size: u64,

    /// Seed for the simulated trainer.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, default_value_t = 30)]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let mut client = CoordinatorClient::connect(&cli.addr, cli.client_id.clone()).await?;
    let mut trainer = SimulatedTrainer::new(cli.seed, cli.data_size);

    let capabilities = ClientCapabilities {
        data_size: cli.data_size,
        model_types: vec!["simulated".to_string()],
        ..Default::default()
    };
    let ack = client.register(capabilities).await?;
    if !ack.accepted {
        anyhow::bail!(
            "registration rejected: {}",
            ack.reason.unwrap_or_else(|| "no reason given".to_string())
        );
    }
    tracing::info!(client_id = %cli.client_id, resumed = ack.resumed, round = client.stats().current_round, "Registered");

    let mut heartbeat = tokio::time::interval(Duration::from_secs(cli.heartbeat_secs.max(1)));
    heartbeat.tick().await;

    for _ in 0..cli.rounds {
        let round = client.stats().current_round;
        let update = trainer.train(round);
        let ack = client.submit(&update).await?;
        if !ack.accepted {
            tracing::warn!(round, reason = ?ack.reason, "Submission rejected");
            continue;
        }
        tracing::info!(round, accuracy = update.accuracy, budget = ?ack.privacy_budget, "Update submitted");

        let aggregate = loop {
            let next = tokio::select! {
                aggregate = client.next_aggregation() => Some(aggregate?),
                _ = heartbeat.tick() => None,
            };
            match next {
                Some(aggregate) => break aggregate,
                None => {
                    client.heartbeat().await?;
                }
            }
        };

        tracing::info!(
            round = aggregate.round_number,
            global_accuracy = aggregate.global_accuracy,
            convergence = aggregate.convergence_score,
            participants = aggregate.participating_clients,
            "Round complete"
        );
        client
            .report_evaluation(aggregate.global_accuracy, cli.data_size)
            .await?;
    }

    let stats = client.stats();
    tracing::info!(
        rounds_contributed = stats.rounds_contributed,
        accepted = stats.submissions_accepted,
        privacy_budget = stats.privacy_budget_remaining,
        last_global_accuracy = ?stats.last_global_accuracy,
        broadcasts_dropped = stats.broadcasts_dropped,
        "Done"
    );
    client.disconnect().await?;
    Ok(())
}
