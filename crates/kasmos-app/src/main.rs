use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kasmos_app::{AppCore, AppOptions, Runtime};
use kasmos_core::config::{self, AppConfig, StoreBackend, DEFAULT_SERVER_BIND, DEFAULT_SERVER_PORT};
use kasmos_core::permission_cache::PermissionCache;
use kasmos_plan::PlanFsm;
use kasmos_server::{ServeConfig, ServeError};
use kasmos_session::TmuxCliFactory;
use kasmos_store::{HttpStore, LocalStore, PlanStore, StoreError};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    /// Start the plan store HTTP server.
    Serve(ServeConfig),
    /// Launch the orchestrator core in the current repository.
    Run,
    Help(String),
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("{0}")]
    Args(String),
    #[error(transparent)]
    Serve(#[from] ServeError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("kasmos: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), MainError> {
    let mut argv = env::args();
    let program = argv.next().unwrap_or_else(|| "kasmos".to_string());
    match parse_cli_args(argv.collect::<Vec<_>>(), &program)? {
        CliCommand::Help(text) => {
            println!("{text}");
            Ok(())
        }
        CliCommand::Serve(serve_config) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(kasmos_server::run(serve_config))?;
            Ok(())
        }
        CliCommand::Run => run_core(),
    }
}

fn run_core() -> Result<(), MainError> {
    let app_config = AppConfig::load_or_default(&config::config_dir().join("config.toml"))?;
    let repo_path = env::current_dir()?;
    let project = repo_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string());

    let plans_dir = repo_path.join(&app_config.plans_dir);
    let (store, fsm): (Box<dyn PlanStore>, PlanFsm) = match &app_config.store {
        StoreBackend::Local => {
            let local = LocalStore::new(&plans_dir);
            std::fs::create_dir_all(&plans_dir)?;
            (Box::new(local.clone()), PlanFsm::new_local(local, &project))
        }
        StoreBackend::Remote { base_url } => {
            let http = HttpStore::new(base_url)?;
            (
                Box::new(http.clone()),
                PlanFsm::new_remote(Box::new(http), &project),
            )
        }
    };
    // The only fatal store condition: unreachable at startup.
    store.ping()?;

    let permission_cache = PermissionCache::new(config::config_dir());
    if let Err(err) = permission_cache.load() {
        warn!(error = %err, "failed to load permission cache");
    }

    let app = AppCore::new(AppOptions {
        project,
        repo_path,
        program: app_config.program.clone(),
        store,
        fsm,
        permission_cache,
        tmux_factory: Arc::new(TmuxCliFactory),
    });
    let runtime = Runtime::new(app);
    let _ticker = runtime.spawn_ticker(Duration::from_millis(app_config.poll_interval_ms));

    info!("kasmos core running (plans: {})", app_config.plans_dir.display());
    runtime.run();
    Ok(())
}

fn parse_cli_args(args: Vec<String>, program: &str) -> Result<CliCommand, MainError> {
    let Some(first) = args.first() else {
        return Ok(CliCommand::Run);
    };

    match first.as_str() {
        "--help" | "-h" => Ok(CliCommand::Help(usage(program))),
        "serve" => parse_serve_args(&args[1..], program),
        other => Err(MainError::Args(format!(
            "unknown command: {other}\n\n{}",
            usage(program)
        ))),
    }
}

fn parse_serve_args(args: &[String], program: &str) -> Result<CliCommand, MainError> {
    let mut serve_config = ServeConfig {
        port: DEFAULT_SERVER_PORT,
        bind: DEFAULT_SERVER_BIND.to_string(),
        db: config::default_db_path(),
    };

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help(usage(program))),
            "--port" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| MainError::Args("missing value for --port".to_string()))?;
                serve_config.port = value.parse::<u16>().map_err(|_| {
                    MainError::Args(format!("invalid --port value: {value} (expected u16)"))
                })?;
            }
            "--bind" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| MainError::Args("missing value for --bind".to_string()))?;
                serve_config.bind = value.clone();
            }
            "--db" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| MainError::Args("missing value for --db".to_string()))?;
                serve_config.db = PathBuf::from(value);
            }
            other => {
                return Err(MainError::Args(format!(
                    "unknown argument: {other}\n\n{}",
                    usage(program)
                )))
            }
        }
        idx += 1;
    }

    Ok(CliCommand::Serve(serve_config))
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [serve] [options]\n\
\n\
Commands:\n\
  (none)   launch the orchestrator in the current repository\n\
  serve    start the plan store HTTP server\n\
\n\
Serve options:\n\
  --port <u16>   port to listen on (default {DEFAULT_SERVER_PORT})\n\
  --bind <addr>  address to bind to (default {DEFAULT_SERVER_BIND})\n\
  --db <path>    SQLite database file (default $HOME/.config/kasmos/plans.db)"
    )
}

#[cfg(test)]
mod tests {
    use super::{parse_cli_args, usage, CliCommand};
    use kasmos_core::config::{DEFAULT_SERVER_BIND, DEFAULT_SERVER_PORT};
    use std::path::PathBuf;

    #[test]
    fn no_args_launches_the_core() {
        let parsed = parse_cli_args(Vec::new(), "kasmos").expect("parse");
        assert_eq!(parsed, CliCommand::Run);
    }

    #[test]
    fn serve_uses_documented_defaults() {
        let parsed = parse_cli_args(vec!["serve".to_string()], "kasmos").expect("parse");
        let CliCommand::Serve(config) = parsed else {
            panic!("expected serve command");
        };
        assert_eq!(config.port, DEFAULT_SERVER_PORT);
        assert_eq!(config.bind, DEFAULT_SERVER_BIND);
        assert!(config.db.ends_with(".config/kasmos/plans.db"));
    }

    #[test]
    fn serve_applies_flag_overrides() {
        let parsed = parse_cli_args(
            vec![
                "serve".to_string(),
                "--port".to_string(),
                "9000".to_string(),
                "--bind".to_string(),
                "127.0.0.1".to_string(),
                "--db".to_string(),
                "/tmp/plans.db".to_string(),
            ],
            "kasmos",
        )
        .expect("parse");
        let CliCommand::Serve(config) = parsed else {
            panic!("expected serve command");
        };
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.db, PathBuf::from("/tmp/plans.db"));
    }

    #[test]
    fn serve_requires_values_for_flags() {
        let err = parse_cli_args(
            vec!["serve".to_string(), "--port".to_string()],
            "kasmos",
        )
        .expect_err("missing port value");
        assert_eq!(err.to_string(), "missing value for --port");

        let err = parse_cli_args(
            vec![
                "serve".to_string(),
                "--port".to_string(),
                "not-a-number".to_string(),
            ],
            "kasmos",
        )
        .expect_err("invalid port value");
        assert!(err.to_string().contains("invalid --port value"));
    }

    #[test]
    fn unknown_command_reports_usage() {
        let err = parse_cli_args(vec!["frobnicate".to_string()], "kasmos")
            .expect_err("unknown command");
        let rendered = err.to_string();
        assert!(rendered.contains("unknown command: frobnicate"));
        assert!(rendered.contains("Usage: kasmos"));
    }

    #[test]
    fn help_flag_returns_usage_text() {
        let parsed = parse_cli_args(vec!["--help".to_string()], "kasmos").expect("parse");
        assert_eq!(parsed, CliCommand::Help(usage("kasmos")));
    }
}
