//! CLI entry point for the deal pipeline.
//!
//! # Responsibility
//! - Verify `dealflow_core` linkage with deterministic ping/version output.
//! - Load the pipeline from `DEALFLOW_DB_PATH` (or a seeded in-memory
//!   store) and print per-stage totals.
//! - `move <deal_id> <stage>` performs one optimistic stage move first.

use chrono::NaiveDate;
use dealflow_core::{
    init_logging, CoreConfig, DealDraft, DealId, DealRepository, InMemoryDealRepository,
    MoveOutcome, PipelineStore, SqliteDealRepository, Stage,
};
use log::{error, info};
use std::process::ExitCode;

enum Command {
    Show,
    Move { deal_id: DealId, stage: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    println!("dealflow_core ping={}", dealflow_core::ping());
    println!("dealflow_core version={}", dealflow_core::core_version());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), String> {
    let command = parse_args(std::env::args().skip(1).collect())?;
    let config = CoreConfig::from_env()?;
    if let Some(log_dir) = &config.log_dir {
        let log_dir = log_dir.to_string_lossy();
        init_logging(config.log_level, &log_dir)?;
    }

    match &config.db_path {
        Some(path) => {
            let repo = SqliteDealRepository::open(path).map_err(|err| err.to_string())?;
            info!("event=cli_start module=cli status=ok backend=sqlite");
            run_with(PipelineStore::new(repo), command).await
        }
        None => {
            let repo = seeded_repository().await.map_err(|err| err.to_string())?;
            info!("event=cli_start module=cli status=ok backend=memory");
            run_with(PipelineStore::new(repo), command).await
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<Command, String> {
    match args.as_slice() {
        [] => Ok(Command::Show),
        [cmd, id, stage] if cmd == "move" => {
            let deal_id = id
                .parse::<DealId>()
                .map_err(|_| format!("invalid deal id `{id}`"))?;
            Ok(Command::Move {
                deal_id,
                stage: stage.clone(),
            })
        }
        _ => Err("usage: dealflow_cli [move <deal_id> <stage>]".to_string()),
    }
}

async fn run_with<R: DealRepository>(
    store: PipelineStore<R>,
    command: Command,
) -> Result<(), String> {
    store.load().await.map_err(|err| {
        error!("event=cli_load module=cli status=error error_code={}", err.code());
        format!("{}: {err}", err.user_message())
    })?;

    if let Command::Move { deal_id, stage } = command {
        match store.move_deal_to(deal_id, &stage).await {
            Ok(MoveOutcome::Moved(deal)) => println!("moved deal {} to {}", deal.id, deal.stage),
            Ok(MoveOutcome::Unchanged) => println!("deal {deal_id} already in {stage}"),
            Err(err) => return Err(format!("{}: {err}", err.user_message())),
        }
    }

    print_board(&store);
    Ok(())
}

fn print_board<R: DealRepository>(store: &PipelineStore<R>) {
    for (stage, group) in store.group_by_stage() {
        println!(
            "{:<12} count={:<3} total={:.2}",
            stage.label(),
            group.count(),
            group.total
        );
    }

    let summary = store.summary();
    println!(
        "deals={} open_value={:.2} won_value={:.2} conversion_rate={:.1}% weighted_value={:.2}",
        summary.total_deals,
        summary.open_value,
        summary.won_value,
        summary.conversion_rate,
        summary.weighted_value
    );
}

async fn seeded_repository() -> dealflow_core::RepoResult<InMemoryDealRepository> {
    let repo = InMemoryDealRepository::new();
    let seeds = [
        ("Acme renewal", 12_000.0, Stage::Lead, 10),
        ("Globex pilot", 4_500.0, Stage::Qualified, 30),
        ("Initech rollout", 28_000.0, Stage::Proposal, 55),
        ("Umbrella expansion", 9_800.0, Stage::Negotiation, 75),
        ("Hooli support", 6_200.0, Stage::ClosedWon, 100),
    ];
    let close_date = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap_or_default();

    for (name, value, stage, probability) in seeds {
        let mut draft = DealDraft::new(name, value, close_date);
        draft.stage = stage;
        draft.probability = probability;
        repo.create_deal(&draft).await?;
    }
    Ok(repo)
}
