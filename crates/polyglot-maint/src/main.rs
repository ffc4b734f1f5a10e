//! Operator maintenance tool for the Polyglot database.
//!
//! Runs one maintenance operation against the configured database and
//! exits. Long-running operations (vacuum, analyze) are deliberately kept
//! out of the serving process's hot path and invoked from here or from cron
//! instead.
//!
//! Usage: `polyglot-maint <command> [config.toml]`
//!
//! Commands: `health`, `stats`, `size`, `vacuum`, `analyze`, `checkpoint`,
//! `backup`.

use polyglot_db::{CheckpointMode, Database, DbError};
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "usage: polyglot-maint <health|stats|size|vacuum|analyze|checkpoint|backup> [config.toml]";

fn resolve_config_path(arg: Option<String>) -> (Option<String>, &'static str) {
    if let Some(path) = arg.filter(|value| !value.trim().is_empty()) {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("POLYGLOT_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

async fn run_command(db: &Database, command: &str) -> Result<String, DbError> {
    match command {
        "stats" => {
            let stats = db.stats();
            Ok(format!(
                "total={} available={} busy={} min={} max={}",
                stats.total, stats.available, stats.busy, stats.min, stats.max
            ))
        }
        "size" => {
            let bytes = db.database_size().await?;
            Ok(format!("{bytes} bytes"))
        }
        "vacuum" => {
            db.vacuum().await?;
            Ok("vacuum completed".to_string())
        }
        "analyze" => {
            db.analyze().await?;
            Ok("analyze completed".to_string())
        }
        "checkpoint" => {
            let result = db.checkpoint(CheckpointMode::Truncate).await?;
            Ok(format!(
                "checkpointed {} of {} frames{}",
                result.checkpointed_frames,
                result.log_frames,
                if result.busy { " (writer busy)" } else { "" }
            ))
        }
        "backup" => {
            let path = db.backup().await?;
            Ok(format!("snapshot written to {}", path.display()))
        }
        other => {
            eprintln!("unknown command: {other}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (resolved_config_path, config_source) = resolve_config_path(args.next());
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = polyglot_db::load_config(selected_config_path)
        .expect("failed to load configuration — cannot run maintenance without valid config");

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved configuration path"
    );

    let db = Database::new(config)
        .expect("invalid database configuration — check path and pool sizing");
    db.initialize()
        .await
        .expect("failed to initialize database — check the database path");

    if command == "health" {
        let healthy = db.health_check().await;
        println!("{healthy}");
        db.close().await;
        std::process::exit(if healthy { 0 } else { 1 });
    }

    match run_command(&db, &command).await {
        Ok(line) => {
            println!("{line}");
            db.close().await;
        }
        Err(e) => {
            tracing::error!(command = %command, error = %e, "maintenance operation failed");
            db.close().await;
            std::process::exit(1);
        }
    }
}
