use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use roster_engine::{Engine, EngineConfig, LeaderboardRequest};
use roster_model::{DateRange, EntityId, Metric, RankChange};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let range_args = [
        Arg::new("metric")
            .long("metric")
            .required(true)
            .help("Counter to read: given | received"),
        Arg::new("start")
            .long("start")
            .required(true)
            .help("First day of the range, YYYY-MM-DD"),
        Arg::new("end")
            .long("end")
            .required(true)
            .help("Last day of the range, YYYY-MM-DD"),
    ];

    Command::new("roster")
        .version(roster_engine::VERSION)
        .about("Resolve and aggregate dashboard entities")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML engine configuration"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .global(true)
                .help("Backend base URL, overriding the configuration"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print results as JSON"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("resolve")
                .about("Resolve identifiers to display records")
                .arg(Arg::new("ids").required(true).num_args(1..).help("Identifiers")),
        )
        .subcommand(
            Command::new("aggregate")
                .about("Count a metric per identifier over a date range")
                .args(range_args.clone())
                .arg(
                    Arg::new("top")
                        .long("top")
                        .value_parser(value_parser!(usize))
                        .help("Only print the top N non-zero counts"),
                )
                .arg(Arg::new("ids").required(true).num_args(1..).help("Identifiers")),
        )
        .subcommand(
            Command::new("leaderboard")
                .about("Rank every listed entity by a metric")
                .args(range_args)
                .arg(
                    Arg::new("top")
                        .long("top")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Rows to show"),
                )
                .arg(
                    Arg::new("previous-start")
                        .long("previous-start")
                        .requires("previous-end")
                        .help("First day of the comparison range"),
                )
                .arg(
                    Arg::new("previous-end")
                        .long("previous-end")
                        .requires("previous-start")
                        .help("Last day of the comparison range"),
                ),
        )
        .subcommand(Command::new("stats").about("Show record store counts"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<EngineConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(url) = matches.get_one::<String>("base-url") {
        config = config.with_base_url(url.clone());
    }
    Ok(config)
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing --{name}"))
}

fn metric_and_range(matches: &ArgMatches) -> Result<(Metric, DateRange)> {
    let metric: Metric = arg(matches, "metric")?.parse()?;
    let range = DateRange::parse(arg(matches, "start")?, arg(matches, "end")?)?;
    Ok((metric, range))
}

fn id_args(matches: &ArgMatches) -> Vec<EntityId> {
    matches
        .get_many::<String>("ids")
        .map(|ids| ids.map(|id| EntityId::new(id.as_str())).collect())
        .unwrap_or_default()
}

fn change_label(change: Option<RankChange>) -> String {
    change.map_or_else(String::new, |change| change.to_string())
}

async fn run(matches: ArgMatches) -> Result<()> {
    let json = matches.get_flag("json");
    let engine = Arc::new(Engine::from_config(load_config(&matches)?)?);

    match matches.subcommand() {
        Some(("resolve", args)) => {
            let ids = id_args(args);
            let records = engine.resolve_many(&ids).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for id in &ids {
                    if let Some(record) = records.get(id) {
                        let avatar = record.avatar_url.as_deref().unwrap_or("-");
                        println!("{id}\t{}\t{avatar}", record.display_name);
                    }
                }
            }
        }
        Some(("aggregate", args)) => {
            let (metric, range) = metric_and_range(args)?;
            let report = engine.aggregate(&id_args(args), metric, range).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if let Some(limit) = args.get_one::<usize>("top") {
                for entry in report.top(*limit) {
                    println!("{}\t{}\t{}", entry.rank, entry.id, entry.count);
                }
            } else {
                let mut counts: Vec<_> = report.counts.iter().collect();
                counts.sort();
                for (id, count) in counts {
                    let marker = if report.failed.contains(id) { "\t(failed)" } else { "" };
                    println!("{id}\t{count}{marker}");
                }
            }
            if !report.is_complete() {
                tracing::warn!(failed = report.failed.len(), "some counts failed and are shown as 0");
            }
        }
        Some(("leaderboard", args)) => {
            let (metric, range) = metric_and_range(args)?;
            let top = args.get_one::<usize>("top").copied().unwrap_or(10);
            let mut request = LeaderboardRequest::new(metric, range, top);
            if let (Some(start), Some(end)) = (
                args.get_one::<String>("previous-start"),
                args.get_one::<String>("previous-end"),
            ) {
                request = request.with_previous(DateRange::parse(start, end)?);
            }

            let board = engine.leaderboard(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&board)?);
            } else {
                println!("{} {} (total {})", board.metric, board.range, board.total);
                for row in &board.rows {
                    println!(
                        "{:>3}\t{}\t{}\t{}",
                        row.rank,
                        row.record.display_name,
                        row.count,
                        change_label(row.change)
                    );
                }
                if board.is_partial() {
                    println!("partial: {} counts failed", board.failed.len());
                }
            }
        }
        Some(("stats", _)) => {
            let stats = engine.store_stats();
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "storageKey": engine.store().storage_key(),
                        "entries": stats.entry_count,
                        "fresh": stats.fresh_count,
                    })
                );
            } else {
                println!("{}: {} entries, {} fresh", engine.store().storage_key(), stats.entry_count, stats.fresh_count);
            }
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }

    let stats = engine.store_stats();
    tracing::debug!(entries = stats.entry_count, fresh = stats.fresh_count, "record store");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    run(matches).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn leaderboard_args_parse() {
        let matches = cli()
            .try_get_matches_from([
                "roster",
                "leaderboard",
                "--metric",
                "received",
                "--start",
                "2024-01-01",
                "--end",
                "2024-01-31",
                "--top",
                "5",
                "--json",
            ])
            .unwrap();
        assert!(matches.get_flag("json"));

        let (_, args) = matches.subcommand().unwrap();
        let (metric, range) = metric_and_range(args).unwrap();
        assert_eq!(metric, Metric::Received);
        assert_eq!(range.to_string(), "2024-01-01..2024-01-31");
        assert_eq!(args.get_one::<usize>("top"), Some(&5));
    }

    #[test]
    fn previous_range_needs_both_ends() {
        let result = cli().try_get_matches_from([
            "roster",
            "leaderboard",
            "--metric",
            "given",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-31",
            "--previous-start",
            "2023-12-01",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_collects_ids() {
        let matches = cli()
            .try_get_matches_from(["roster", "resolve", "U1", "U2"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(id_args(args), vec![EntityId::from("U1"), EntityId::from("U2")]);
    }
}
