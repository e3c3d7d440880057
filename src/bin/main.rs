use nix::unistd::geteuid;
use std::{
    error::Error,
    fmt::Display,
    io::{self, IsTerminal},
    process,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tender::{
    cli::{Cli, Commands, TargetArgs, parse_args},
    config::load_config,
    error::TenderError,
    group::ServiceOrGroup,
    runner::run_service,
    runtime::Paths,
    service::{OperationConfig, ServiceManager, ServiceOutcome},
    status::{render_json, render_table},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let succeeded = match args.command {
        Commands::Run {
            service,
            log,
            command,
        } => {
            let code = run_service(&service, &log, &command.join(" "))?;
            process::exit(code);
        }
        Commands::Start {
            targets,
            skip_build,
        } => {
            let op = targets.operation(skip_build);
            let (manager, resolved) = prepare(&targets, &op, true)?;
            report(manager.start(&resolved, &op))
        }
        Commands::Stop { targets } => {
            let op = targets.operation(false);
            let (manager, resolved) = prepare(&targets, &op, false)?;
            report(manager.stop(&resolved, &op))
        }
        Commands::Restart {
            targets,
            skip_build,
        } => {
            let op = targets.operation(skip_build);
            let (manager, resolved) = prepare(&targets, &op, true)?;
            report(manager.restart(&resolved, &op))
        }
        Commands::Build { targets } => {
            let op = targets.operation(false);
            let (manager, resolved) = prepare(&targets, &op, false)?;
            report(manager.build(&resolved, &op))
        }
        Commands::Status {
            targets,
            json,
            no_color,
        } => {
            let op = targets.operation(false);
            let (manager, resolved) = prepare(&targets, &op, false)?;
            show_status(&manager, &resolved, json, no_color)?
        }
    };

    if !succeeded {
        process::exit(1);
    }
    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Loads the config, resolves the requested targets and, for operations that
/// launch processes, checks root privileges.
fn prepare(
    targets: &TargetArgs,
    op: &OperationConfig,
    launches: bool,
) -> Result<(ServiceManager, Vec<ServiceOrGroup>), TenderError> {
    let config = load_config(targets.config.as_deref())?;
    let resolved = config.resolve_targets(&targets.names)?;

    if launches && !geteuid().is_root() {
        let services: Vec<String> = resolved
            .iter()
            .flat_map(|target| target.sudo_services(op))
            .collect();
        if !services.is_empty() {
            return Err(TenderError::SudoRequired { services });
        }
    }

    let paths = Paths::from_env();
    info!("Using state directory {}", paths.state_dir().display());
    Ok((ServiceManager::new(paths), resolved))
}

/// Prints one line per service. Returns whether every service succeeded.
fn report<T: Display>(outcomes: Vec<ServiceOutcome<T>>) -> bool {
    let mut succeeded = true;
    for outcome in outcomes {
        match outcome.result {
            Ok(result) => println!("{}: {result}", outcome.service),
            Err(err) => {
                succeeded = false;
                error!("{}: {err}", outcome.service);
                println!("{}: failed", outcome.service);
            }
        }
    }
    succeeded
}

fn show_status(
    manager: &ServiceManager,
    targets: &[ServiceOrGroup],
    json: bool,
    no_color: bool,
) -> Result<bool, Box<dyn Error>> {
    let mut succeeded = true;
    let mut statuses = Vec::new();
    for outcome in manager.status(targets) {
        match outcome.result {
            Ok(status) => statuses.push(status),
            Err(err) => {
                succeeded = false;
                error!("{}: {err}", outcome.service);
            }
        }
    }

    if json {
        println!("{}", render_json(&statuses)?);
    } else {
        let color = !no_color && io::stdout().is_terminal();
        print!("{}", render_table(&statuses, color));
    }
    Ok(succeeded)
}
