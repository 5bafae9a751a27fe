use std::{error::Error, process};

use tracing::{error, info};

use warden::{
    cli::parse_args,
    config::Configuration,
    constants::{CHILD_TERM_TIMEOUT, SHUTDOWN_GRACE},
    lifecycle::{LifecycleController, Outcome},
    logs::init_logging,
    signals::SignalBridge,
};

fn main() {
    if let Err(err) = run() {
        error!("{err}");
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(args.log_level.map(|level| level.as_str()));

    let service = args.service();
    let config = args.into_configuration()?;

    // The command child gets its own terminate window before the handler
    // gives up on the callback.
    let mut controller = LifecycleController::new()
        .with_signal_bridge(SignalBridge::new(CHILD_TERM_TIMEOUT + SHUTDOWN_GRACE));

    let outcome = controller.execute(&config, |config, token| match &service {
        Some(service) => service.run(config, &token).map_err(Into::into),
        None => {
            info!("No command given; {} idles until stopped", config.name);
            token.wait();
            Ok(())
        }
    })?;

    report(&config, &outcome);
    if !outcome.is_success() {
        process::exit(1);
    }

    Ok(())
}

fn report(config: &Configuration, outcome: &Outcome) {
    let name = &config.name;
    match outcome {
        Outcome::Started { pid } => println!("{name} started (PID {pid})"),
        Outcome::Completed => println!("{name} finished"),
        Outcome::AlreadyRunning { pid } => println!("{name} is already running (PID {pid})"),
        Outcome::Stopped { report, confirmed } => {
            println!("Stopped {} {name} instance(s)", report.stopped());
            if report.failures() > 0 {
                println!("{} target(s) could not be signalled", report.failures());
            }
            if !confirmed {
                println!("{name} has not exited yet");
            }
        }
        Outcome::NotRunning => println!("{name} is not running"),
        Outcome::TimedOut => println!("{name} did not report running in time"),
    }
}
