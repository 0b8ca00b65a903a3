//! MQTTNotifier - get notified via MQTT
//!
//! `launch` listens for notifications and shows them on the desktop; `test`
//! publishes a single notification and waits for the broker to accept it.

use clap::{Args, CommandFactory, Parser, Subcommand};
use mqtt_notifier::commands::{self, StopReason};
use mqtt_notifier::config::{
    expand_home, NotifierConfig, RootOptions, Settings, TestOptions, DEFAULT_CONFIG_PATH,
};
use mqtt_notifier::credentials::CredentialResolver;
use mqtt_notifier::isolog;
use mqtt_notifier::notification::{DesktopNotifier, NotificationSink};
use mqtt_notifier::observability::{init_logging, logger, EmitOptions, Level, Logger};
use mqtt_notifier::transport::mqtt::{process_client_id, ConnectionConfig, MqttClient};
use mqtt_notifier::NotifierResult;
use std::process;
use std::sync::Arc;
use tokio::signal;

const EMITTER: &str = "MQTT_NOTIFIER";

/// MQTTNotifier - Get notified via MQTT
#[derive(Parser)]
#[command(name = "mqttnotifier")]
#[command(about = "MQTTNotifier - Get notified via MQTT")]
#[command(version)]
struct Cli {
    /// Read option defaults from the specified TOML file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Broker hostname or ip
    #[arg(short = 'H', long)]
    hostname: Option<String>,

    /// Broker port
    #[arg(short, long)]
    port: Option<u16>,

    /// MQTT topic
    #[arg(short, long)]
    topic: Option<String>,

    /// Ask for credentials (or supply as config, ENV or ARGs)
    #[arg(short, long)]
    login: bool,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// Supply password as argument (Unsafe!)
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Log verbosity threshold
    #[arg(short, long)]
    verbosity: Option<u8>,

    /// Disable colored log output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    /// Options given explicitly on the command line
    fn overrides(&self) -> RootOptions {
        RootOptions {
            hostname: self.hostname.clone(),
            port: self.port,
            topic: self.topic.clone(),
            login: self.login.then_some(true),
            username: self.username.clone(),
            password: self.password.clone(),
            verbosity: self.verbosity,
            no_color: self.no_color.then_some(true),
            test: TestOptions::default(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to MQTT and display notifications
    Launch,
    /// Send a test notification to MQTT
    Test(TestArgs),
}

#[derive(Args)]
struct TestArgs {
    /// Log the payload before sending it
    #[arg(short, long)]
    show: bool,

    /// Notification title
    #[arg(short, long)]
    title: Option<String>,

    /// Notification message
    #[arg(short, long)]
    message: Option<String>,

    /// Notification timeout in seconds
    #[arg(short = 'd', long)]
    timeout: Option<u32>,

    /// Application name shown with the notification
    #[arg(short, long)]
    app_name: Option<String>,

    /// Icon name or path
    #[arg(short = 'i', long)]
    app_icon: Option<String>,
}

impl TestArgs {
    fn overrides(&self) -> TestOptions {
        TestOptions {
            show: self.show.then_some(true),
            title: self.title.clone(),
            message: self.message.clone(),
            timeout: self.timeout,
            app_name: self.app_name.clone(),
            app_icon: self.app_icon.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log = logger();

    let config_path = expand_home(&cli.config);
    let file_config = match NotifierConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            isolog!(
                log,
                lvl = Level::Error,
                opts = EmitOptions::new().exception(&e);
                "Failed to load configuration from",
                config_path.display().to_string()
            );
            process::exit(1);
        }
    };

    let settings = file_config.options.resolve(&cli.overrides());
    log.configure(EMITTER, settings.color, settings.verbosity, settings.verbosity);
    if let Err(e) = init_logging(log.clone()) {
        isolog!(log, lvl = Level::Warn, opts = EmitOptions::new().exception(&e); "Library logging unavailable:");
    }
    isolog!(log, lvl = Level::Version; "MQTTNotifier!", env!("CARGO_PKG_VERSION"));

    let Some(command) = cli.command else {
        isolog!(log, lvl = Level::Error; "No subcommand given!");
        let _ = Cli::command().print_help();
        return;
    };

    match run(command, &settings, &file_config, log.clone()).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            isolog!(log, lvl = Level::Error, opts = EmitOptions::new().exception(&e); "Command failed:");
            process::exit(1);
        }
    }
}

async fn run(
    command: Commands,
    settings: &Settings,
    file_config: &NotifierConfig,
    log: Arc<Logger>,
) -> NotifierResult<i32> {
    let credentials = CredentialResolver::new(log.clone()).resolve(
        &settings.username,
        &settings.password,
        settings.login,
    )?;

    let config = ConnectionConfig::new(&settings.hostname, settings.port, process_client_id())
        .with_credentials(credentials.username, credentials.password);
    let mut client = MqttClient::connect(config, log.clone())?;
    isolog!(log, lvl = Level::Debug; "Client set up");

    match command {
        Commands::Launch => {
            let sink: Arc<dyn NotificationSink> = Arc::new(DesktopNotifier::new(log.clone()));
            let reason =
                commands::run_launch(&mut client, &settings.topic, sink, shutdown_signal(), log)
                    .await?;
            Ok(match reason {
                StopReason::Interrupted => 0,
                StopReason::LoopFailed(_) => 1,
            })
        }
        Commands::Test(args) => {
            let message = file_config.options.test.resolve(&args.overrides());
            commands::run_test(&mut client, &settings.topic, &message, log).await?;
            Ok(0)
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
