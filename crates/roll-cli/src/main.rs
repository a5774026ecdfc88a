use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use roll_core::token::validity_from_minutes;
use roll_core::{CallerContext, SystemClock};
use roll_db::Database;

use roll_cli::commands::kiosk::{self, Kiosk};
use roll_cli::commands::{attendance, notify, prefs, roster, slot, status, util};
use roll_cli::{AttendanceAction, Cli, Commands, Config};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn caller(db: &Database, cli: &Cli) -> Result<CallerContext> {
    util::caller(db, cli.user.as_ref(), cli.role)
}

fn run(cli: &Cli) -> Result<()> {
    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (mut db, config) = open_database(cli.config.as_deref())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Status => status::run(&mut out, &db, &config)?,
        Commands::Course(action) => {
            let ctx = caller(&db, cli)?;
            roster::course(&mut out, &mut db, &ctx, action)?;
        }
        Commands::Group(action) => {
            let ctx = caller(&db, cli)?;
            roster::group(&mut out, &mut db, &ctx, action)?;
        }
        Commands::Slot(action) => {
            let ctx = caller(&db, cli)?;
            slot::run(&mut out, &mut db, &ctx, action)?;
        }
        Commands::Attendance(AttendanceAction::Mark) => {
            let ctx = caller(&db, cli)?;
            attendance::mark(io::stdin().lock(), &mut out, &mut db, &ctx)?;
        }
        Commands::Attendance(AttendanceAction::List { course, date, json }) => {
            let ctx = caller(&db, cli)?;
            attendance::list(&mut out, &db, &ctx, course, *date, *json)?;
        }
        Commands::Kiosk(args) => {
            let ctx = caller(&db, cli)?;
            let validity = args
                .validity_minutes
                .map_or_else(|| config.token_validity(), validity_from_minutes)?;
            let base_url = config.check_in_base()?;
            tracing::info!(user = %ctx.user, role = %ctx.role, "kiosk ready");
            let mut station = Kiosk::new(&mut db, ctx, Arc::new(SystemClock), base_url, validity);
            kiosk::serve(io::stdin().lock(), &mut out, &mut station)?;
        }
        Commands::Prefs(action) => {
            let ctx = caller(&db, cli)?;
            prefs::run(&mut out, &mut db, &ctx, action)?;
        }
        Commands::Notify(args) => notify::run(&mut out, &db, args)?,
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support. Logs go to stderr so the
    // kiosk's stdout carries only responses.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", util::render_error(&err));
            ExitCode::FAILURE
        }
    }
}
