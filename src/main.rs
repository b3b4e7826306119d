//! tsk - offline-first task list synced with a remote API.

use clap::Parser;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tasksync::cli::{Cli, Commands, ConfigCommands};
use tasksync::commands::{self, Context, Output};
use tasksync::config::{ConfigOverrides, OutputFormat};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding the log filter (e.g. `debug`, `tasksync=trace`)
const LOG_ENV: &str = "TSK_LOG";

fn main() {
    let cli = Cli::parse();

    let mut overrides = ConfigOverrides::new();
    if let Some(url) = cli.api_url {
        overrides = overrides.with_api_url(url);
    }
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }

    let ctx = match Context::new(&overrides) {
        Ok(ctx) => ctx,
        Err(e) => exit_with_error(&e, cli.human_readable),
    };
    let human = ctx.human();
    let _log_guard = init_logging(&ctx.data_dir);

    if let Err(e) = run_command(cli.command, &ctx, human) {
        exit_with_error(&e, human);
    }
}

fn run_command(command: Commands, ctx: &Context, human: bool) -> Result<(), tasksync::Error> {
    match command {
        Commands::Add { title, description } => {
            output(&commands::task_add(ctx, &title, description.as_deref())?, human)
        }
        Commands::List => output(&commands::task_list(ctx)?, human),
        Commands::Show { id } => output(&commands::task_show(ctx, &id)?, human),
        Commands::Edit {
            id,
            title,
            description,
            status,
        } => output(
            &commands::task_edit(ctx, &id, title, description, status.as_deref())?,
            human,
        ),
        Commands::Rm { id } => output(&commands::task_rm(ctx, &id)?, human),
        Commands::Refresh => output(&commands::refresh(ctx)?, human),
        Commands::Sync => output(&commands::sync(ctx)?, human),
        Commands::Status => output(&commands::status(ctx)?, human),
        Commands::Outbox => output(&commands::outbox(ctx)?, human),
        Commands::Login { email, password } => {
            output(&commands::login(ctx, &email, password)?, human)
        }
        Commands::Register {
            name,
            email,
            password,
        } => output(&commands::register(ctx, &name, &email, password)?, human),
        Commands::Logout => output(&commands::logout(ctx)?, human),
        Commands::Watch { interval } => {
            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = Arc::clone(&stop);
            ctrlc::set_handler(move || handler_stop.store(true, Ordering::Release)).map_err(
                |e| tasksync::Error::Other(format!("Failed to install Ctrl-C handler: {}", e)),
            )?;
            output(&commands::watch(ctx, interval, &stop)?, human)
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => output(&commands::config_show(ctx)?, human),
        },
    }

    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

fn exit_with_error(e: &tasksync::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
    }
    process::exit(1);
}

/// Log to stderr and, as JSON, to `tsk.log` in the data directory.
///
/// File logging is skipped if the log file cannot be created.
fn init_logging(data_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let appender = std::fs::create_dir_all(data_dir).ok().and_then(|_| {
        Builder::new()
            .rotation(Rotation::NEVER)
            .filename_prefix("tsk.log")
            .build(data_dir)
            .ok()
    });

    match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
