use std::{error::Error, process, sync::Arc};

use clap::{command, Parser, Subcommand, ValueHint};
use futures_util::Stream;
use log::{debug, error, info, warn, LevelFilter};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

use music_link_handler::{
    config::Config,
    events::Event,
    intake::{Intake, Status},
    link, platform,
    redirect::State,
    shell::{DryRunShell, Shell, SystemShell},
    signal,
    storage::{FileStorage, Storage},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// State file
    ///
    /// Holds the preferred platform and the debug trail between runs.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("state.toml"))]
    state_file: String,

    /// Odesli links endpoint
    #[arg(long, value_hint = ValueHint::Url, env = "ODESLI_API_URL")]
    api_url: Option<String>,

    /// Country to resolve links for
    ///
    /// Two-letter country code, passed to Odesli as `userCountry`.
    #[arg(long, value_name = "CODE")]
    country: Option<String>,

    /// Print destinations instead of opening them
    #[arg(long, default_value_t = false)]
    no_open: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Redirect a link, as when launched with it
    Open {
        #[arg(value_hint = ValueHint::Url)]
        url: String,
    },

    /// Redirect links read from standard input, one per line
    ///
    /// Runs until standard input is closed or the process is interrupted.
    Listen {
        /// Link the process was launched with
        #[arg(value_hint = ValueHint::Url)]
        url: Option<String>,
    },

    /// Set the preferred platform
    Set {
        /// Platform key, see `platforms`
        platform: String,
    },

    /// List supported platforms
    Platforms,

    /// Show the preferred platform and the debug trail
    Status,

    /// Clear the debug trail
    ClearDebug {
        /// Forget the preferred platform too
        #[arg(long, default_value_t = false)]
        preference: bool,
    },

    /// Redirect a known link to check the setup
    Test,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Lines of standard input, ending at EOF or on the first read error.
fn stdin_links() -> impl Stream<Item = String> {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    futures_util::stream::unfold(lines, |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((line, lines)),
            Ok(None) => None,
            Err(e) => {
                error!("could not read link: {e}");
                None
            }
        }
    })
}

/// Follows the redirect screen until it returns to the main screen.
async fn follow(events: &mut mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Countdown(seconds) => info!("returning to home in {seconds} seconds"),
            Event::ReturnToMain => break,
        }
    }
}

async fn finish(
    state: State,
    events: &mut mpsc::UnboundedReceiver<Event>,
) -> Result<(), Box<dyn Error>> {
    follow(events).await;
    match state {
        State::Error { message } => Err(message.into()),
        _ => Ok(()),
    }
}

fn print_status(status: &Status) {
    println!("Preferred platform: {}", status.preferred_name());
    println!(
        "Last link: {}",
        status.last_link.as_deref().unwrap_or("none received")
    );
    print!("{}", status.breadcrumbs);
}

/// Main application logic.
///
/// # Errors
///
/// This function returns an error when the state file cannot be used, a
/// redirect ends in an error, or the arguments are invalid.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::new()?;
    if let Some(ref api_url) = args.api_url {
        config = config.with_api_url(api_url)?;
    }
    if let Some(ref country) = args.country {
        config = config.with_user_country(country)?;
    }

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&args.state_file));
    let shell: Arc<dyn Shell> = if args.no_open {
        Arc::new(DryRunShell)
    } else {
        Arc::new(SystemShell)
    };

    let mut intake = Intake::new(&config, storage, shell)?;
    let (event_tx, mut events) = mpsc::unbounded_channel();
    intake.register(event_tx);

    match args.command {
        Command::Open { url } => match intake.launch(Some(&url)).await {
            Some(state) => finish(state, &mut events).await?,
            None if !link::is_recognized(&url) => {
                warn!("not an Odesli link: {url}");
            }
            None => {
                warn!("no preferred platform set, run `set` first");
            }
        },

        Command::Listen { url } => {
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        Event::Countdown(seconds) => {
                            info!("returning to home in {seconds} seconds");
                        }
                        Event::ReturnToMain => debug!("back on the main screen"),
                    }
                }
            });

            let mut signals = signal::Handler::new()?;
            tokio::select! {
                biased;

                signal = signals.recv() => info!("shutting down on {signal}"),
                () = intake.listen(url.as_deref(), stdin_links()) => {
                    info!("no more links");
                }
            }
        }

        Command::Set { platform: key } => {
            intake.preferences().set(&key).await?;
            println!(
                "Preferred platform saved: {}",
                platform::display_name(Some(&key))
            );
        }

        Command::Platforms => {
            let preferred = intake.preferences().get().await;
            for descriptor in &platform::PLATFORMS {
                let installed = platform::is_installed(intake.shell(), descriptor.key).await;
                println!(
                    "{} {:<14} {:<14}{}",
                    if preferred.as_deref() == Some(descriptor.key) {
                        '*'
                    } else {
                        ' '
                    },
                    descriptor.key,
                    descriptor.name,
                    if installed { "installed" } else { "" },
                );
            }
        }

        Command::Status => print_status(&intake.status().await),

        Command::ClearDebug { preference } => {
            intake.clear_debug_data().await?;
            if preference {
                intake.preferences().clear().await?;
            }
            println!("Debug data cleared");
        }

        Command::Test => {
            let state = intake.test_link_handling().await?;
            finish(state, &mut events).await?;
        }
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();
    let lang = String::from("en");

    info!("starting {name}/{version}; {BUILD_PROFILE}; {lang}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
