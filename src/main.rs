pub mod config;
pub mod db {
    pub mod connection;
    pub mod models;
    pub mod validate;
}
pub mod error;
pub mod schema;
pub mod utils;
pub mod services {
    pub mod blocks;
    pub mod days;
    pub mod fake_data;
    pub mod ingest;
    pub mod loader;
    pub mod refs;
    pub mod reports;
}

use crate::config::Config;
use crate::db::connection;
use crate::db::models::{DayKey, Weather};
use crate::error::StoreError;
use crate::services::{days, fake_data, loader, refs, reports};
use crate::utils::{normalize_date, split_handles};
use chrono::NaiveDate;
use diesel::SqliteConnection;
use log::{error, info};
use serde::Serialize;
use std::path::PathBuf;

const USAGE: &str = "\
usage: bikeparkingdb [--env-file PATH] <command> [args...]

commands:
  create <db>                                  create a new database file
  add-org <handle> [name]                      register an organization
  set-visibility <org> [handles]               orgs whose data <org> may read
  add-site <org> [site] [name]                 register a site (default 'unspecified')
  load [--force] <file>...                     import day files (--force may appear anywhere)
  visible <org>                                list orgs visible to <org>
  report <org> [from] [to]                     days visible to <org>
  show-day <org> <site> <date>                 one day with visits and blocks
  delete-day <org> <site> <date>               remove a day and its children
  weather <org> <site> <date> <max_temp> <precip> <dusk>   ('-' = unknown)
  fake <org> <site> <from> <days>              write synthetic days";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Create { db: PathBuf },
    AddOrg { handle: String, name: Option<String> },
    SetVisibility { org: String, handles: Vec<String> },
    AddSite { org: String, site: Option<String>, name: Option<String> },
    Load { force: bool, files: Vec<PathBuf> },
    Visible { org: String },
    Report { org: String, from: Option<String>, to: Option<String> },
    ShowDay { key: DayKey },
    DeleteDay { key: DayKey },
    Weather { key: DayKey, weather: Weather },
    Fake { org: String, site: String, from: NaiveDate, days: u32 },
}

#[derive(Debug, Clone, PartialEq)]
struct Cli {
    env_file: Option<PathBuf>,
    command: Command,
}

#[derive(Debug)]
enum CliError {
    Usage(String),
    Fatal(String),
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Usage(msg) => CliError::Usage(msg),
            other => CliError::Fatal(other.to_string()),
        }
    }
}

fn day_key(args: &[String]) -> DayKey {
    let date = normalize_date(&args[2]).unwrap_or_else(|| args[2].clone());
    DayKey::new(args[0].as_str(), args[1].as_str(), date)
}

fn optional_number(raw: &str, what: &str) -> Result<Option<f64>, String> {
    if raw == "-" {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| format!("{} must be a number or '-', got '{}'", what, raw))
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut env_file: Option<PathBuf> = None;
    let mut rest: &[String] = args;
    while let Some(first) = rest.first() {
        if first == "--env-file" {
            if env_file.is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
            let value = rest.get(1).ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
            env_file = Some(PathBuf::from(value));
            rest = &rest[2..];
        } else if let Some(value) = first.strip_prefix("--env-file=") {
            if env_file.is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
            if value.is_empty() {
                return Err("`--env-file` requires a path argument".to_string());
            }
            env_file = Some(PathBuf::from(value));
            rest = &rest[1..];
        } else {
            break;
        }
    }

    let (name, args) = rest.split_first().ok_or_else(|| "missing command".to_string())?;
    let arity = |min: usize, max: usize| {
        if args.len() < min || args.len() > max {
            Err(format!("wrong number of arguments for '{}'", name))
        } else {
            Ok(())
        }
    };

    let command = match name.as_str() {
        "create" => {
            arity(1, 1)?;
            Command::Create {
                db: PathBuf::from(&args[0]),
            }
        }
        "add-org" => {
            arity(1, 2)?;
            Command::AddOrg {
                handle: args[0].clone(),
                name: args.get(1).cloned(),
            }
        }
        "set-visibility" => {
            arity(1, usize::MAX)?;
            Command::SetVisibility {
                org: args[0].clone(),
                handles: args[1..].iter().flat_map(|a| split_handles(a)).collect(),
            }
        }
        "add-site" => {
            arity(1, 3)?;
            Command::AddSite {
                org: args[0].clone(),
                site: args.get(1).cloned(),
                name: args.get(2).cloned(),
            }
        }
        "load" => {
            let mut force = false;
            let mut files = Vec::new();
            for arg in args {
                match arg.as_str() {
                    "--force" => force = true,
                    flag if flag.starts_with("--") => return Err(format!("unknown option '{}' for 'load'", flag)),
                    file => files.push(PathBuf::from(file)),
                }
            }
            if files.is_empty() {
                return Err("'load' needs at least one file".to_string());
            }
            Command::Load { force, files }
        }
        "visible" => {
            arity(1, 1)?;
            Command::Visible { org: args[0].clone() }
        }
        "report" => {
            arity(1, 3)?;
            Command::Report {
                org: args[0].clone(),
                from: args.get(1).cloned(),
                to: args.get(2).cloned(),
            }
        }
        "show-day" => {
            arity(3, 3)?;
            Command::ShowDay { key: day_key(args) }
        }
        "delete-day" => {
            arity(3, 3)?;
            Command::DeleteDay { key: day_key(args) }
        }
        "weather" => {
            arity(6, 6)?;
            let dusk = match args[5].as_str() {
                "-" => None,
                raw => Some(utils::normalize_time(raw).ok_or_else(|| format!("dusk '{}' is not a time", raw))?),
            };
            Command::Weather {
                key: day_key(args),
                weather: Weather {
                    max_temperature: optional_number(&args[3], "max_temp")?,
                    precipitation: optional_number(&args[4], "precip")?,
                    dusk,
                },
            }
        }
        "fake" => {
            arity(4, 4)?;
            let from = normalize_date(&args[2])
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
                .ok_or_else(|| format!("'{}' is not a date", args[2]))?;
            let days = args[3]
                .parse::<u32>()
                .map_err(|_| format!("day count must be a positive number, got '{}'", args[3]))?;
            Command::Fake {
                org: args[0].clone(),
                site: args[1].clone(),
                from,
                days,
            }
        }
        other => return Err(format!("unknown command '{}'", other)),
    };

    Ok(Cli { env_file, command })
}

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

fn load_env(env_file: Option<&PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        dotenvy::from_path(path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        return Ok(Some(LoadedEnvFile {
            path: path.clone(),
            explicit: true,
        }));
    }
    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if default_path.is_file() {
        dotenvy::from_path(&default_path).map_err(|e| format!("failed to load {}: {}", default_path.display(), e))?;
        Ok(Some(LoadedEnvFile {
            path: default_path,
            explicit: false,
        }))
    } else {
        Ok(None)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Fatal(format!("encoding output failed: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn open(cfg: &Config) -> Result<SqliteConnection, CliError> {
    let conn = connection::open_existing(&cfg.database_path, cfg.busy_timeout)?;
    info!("Connected to database {}", cfg.database_path.display());
    Ok(conn)
}

fn run(command: Command) -> Result<(), CliError> {
    let cfg = Config::from_env().map_err(CliError::Fatal)?;
    info!(
        "Config loaded (database={}, schema_dir={}, busy_timeout={}ms, load_force={})",
        cfg.database_path.display(),
        cfg.schema_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.busy_timeout.as_millis(),
        cfg.load_force
    );

    match command {
        Command::Create { db } => {
            let versions = connection::provision(&db, cfg.schema_dir.as_deref(), cfg.busy_timeout)?;
            println!("Database {} created ({} migration(s) applied)", db.display(), versions.len());
        }
        Command::AddOrg { handle, name } => {
            refs::create_org(&mut open(&cfg)?, &handle, name.as_deref(), &[])?;
        }
        Command::SetVisibility { org, handles } => {
            refs::set_visibility(&mut open(&cfg)?, &org, &handles)?;
        }
        Command::AddSite { org, site, name } => {
            refs::create_site(&mut open(&cfg)?, &org, site.as_deref(), name.as_deref())?;
        }
        Command::Load { force, files } => {
            let report = loader::load_files(&mut open(&cfg)?, &files, force || cfg.load_force);
            println!(
                "{} loaded, {} unchanged, {} rejected",
                report.loaded,
                report.unchanged,
                report.failed.len()
            );
            if !report.failed.is_empty() {
                return Err(CliError::Fatal(format!("{} file(s) rejected", report.failed.len())));
            }
        }
        Command::Visible { org } => {
            print_json(&refs::visible_orgs(&mut open(&cfg)?, &org)?)?;
        }
        Command::Report { org, from, to } => {
            print_json(&reports::visible_days(&mut open(&cfg)?, &org, from.as_deref(), to.as_deref())?)?;
        }
        Command::ShowDay { key } => {
            let detail = reports::day_detail(&mut open(&cfg)?, &key)?
                .ok_or_else(|| StoreError::not_found("day", key.to_string()))?;
            print_json(&detail)?;
        }
        Command::DeleteDay { key } => {
            if !days::delete_day(&mut open(&cfg)?, &key)? {
                return Err(StoreError::not_found("day", key.to_string()).into());
            }
        }
        Command::Weather { key, weather } => {
            days::update_weather(&mut open(&cfg)?, &key, &weather)?;
        }
        Command::Fake { org, site, from, days: count } => {
            let written = fake_data::run(&mut open(&cfg)?, &org, &site, from, count, fake_data::DEFAULT_SEED)?;
            println!("{} synthetic day(s) written for {}/{}", written, org, site);
        }
    }
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("error: {}\n\n{}", err, USAGE);
            std::process::exit(2);
        }
    };
    let loaded_env = match load_env(cli.env_file.as_ref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "bikeparkingdb {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    match run(cli.command) {
        Ok(()) => {}
        Err(CliError::Usage(msg)) => {
            error!("usage: {}", msg);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
        Err(CliError::Fatal(msg)) => {
            error!("fatal: {}", msg);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn create_takes_exactly_one_path() {
        let cli = parse_args(&args(&["create", "parking.db"])).unwrap();
        assert_eq!(
            cli.command,
            Command::Create {
                db: PathBuf::from("parking.db")
            }
        );
        assert!(parse_args(&args(&["create"])).is_err());
        assert!(parse_args(&args(&["create", "a.db", "b.db"])).is_err());
        assert!(parse_args(&args(&[])).is_err());
    }

    #[test]
    fn env_file_precedes_the_command() {
        let cli = parse_args(&args(&["--env-file", "prod.env", "visible", "acme"])).unwrap();
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));
        assert_eq!(cli.command, Command::Visible { org: "acme".to_string() });

        let cli = parse_args(&args(&["--env-file=x.env", "visible", "acme"])).unwrap();
        assert_eq!(cli.env_file, Some(PathBuf::from("x.env")));

        assert!(parse_args(&args(&["--env-file"])).is_err());
        assert!(parse_args(&args(&["--env-file=a", "--env-file=b", "visible", "acme"])).is_err());
    }

    #[test]
    fn load_accepts_force_and_many_files() {
        let cli = parse_args(&args(&["load", "--force", "a.json", "b.json"])).unwrap();
        assert_eq!(
            cli.command,
            Command::Load {
                force: true,
                files: vec![PathBuf::from("a.json"), PathBuf::from("b.json")]
            }
        );
        assert!(parse_args(&args(&["load", "--force"])).is_err());

        let cli = parse_args(&args(&["load", "a.json", "--force"])).unwrap();
        assert_eq!(
            cli.command,
            Command::Load {
                force: true,
                files: vec![PathBuf::from("a.json")]
            }
        );
        assert!(parse_args(&args(&["load", "a.json", "--fast"])).is_err());
    }

    #[test]
    fn day_commands_normalize_the_date() {
        let cli = parse_args(&args(&["show-day", "acme", "main", "2024/06/01"])).unwrap();
        assert_eq!(
            cli.command,
            Command::ShowDay {
                key: DayKey::new("acme", "main", "2024-06-01")
            }
        );
    }

    #[test]
    fn weather_dash_means_unknown() {
        let cli = parse_args(&args(&["weather", "acme", "main", "2024-06-01", "21.5", "-", "2114"])).unwrap();
        match cli.command {
            Command::Weather { weather, .. } => {
                assert_eq!(weather.max_temperature, Some(21.5));
                assert_eq!(weather.precipitation, None);
                assert_eq!(weather.dusk.as_deref(), Some("21:14"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_args(&args(&["weather", "acme", "main", "2024-06-01", "warm", "-", "-"])).is_err());
    }

    #[test]
    fn visibility_handles_are_split() {
        let cli = parse_args(&args(&["set-visibility", "a", "b,c", "d"])).unwrap();
        assert_eq!(
            cli.command,
            Command::SetVisibility {
                org: "a".to_string(),
                handles: vec!["b".to_string(), "c".to_string(), "d".to_string()]
            }
        );
    }

    #[test]
    fn unknown_commands_and_bad_counts_are_usage_errors() {
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["fake", "acme", "main", "2024-06-01", "many"])).is_err());
        assert!(parse_args(&args(&["fake", "acme", "main", "someday", "3"])).is_err());
    }

    #[test]
    fn store_usage_errors_keep_their_exit_class() {
        assert!(matches!(CliError::from(StoreError::Usage("x".into())), CliError::Usage(_)));
        assert!(matches!(
            CliError::from(StoreError::AlreadyExists("db".into())),
            CliError::Fatal(_)
        ));
    }
}
