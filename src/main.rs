//! Push Identity CLI - anonymous push notification subscription for this device.
//!
//! This is the main binary entry point. See the `push_identity` library
//! for the core functionality.

use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use push_identity::fingerprint::HostSignals;
use push_identity::platform::NativePlatform;
use push_identity::{
    Config, DeviceIdentityStore, FileStore, Mode, NotifyError, PreferenceStore, Schedule,
    SharedStore, SubscriptionManager, SubscriptionState, SyncClient,
};

type Manager = SubscriptionManager<NativePlatform, SyncClient>;

#[derive(Parser)]
#[command(name = "push-identity")]
#[command(version, about = "Anonymous push notifications for this device", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print this device's anonymous id (created on first use)
    Id,
    /// Show subscription state and preferences
    Status,
    /// Subscribe this device to push notifications
    Enable {
        /// Grant notification permission without prompting
        #[arg(long, short)]
        yes: bool,
    },
    /// Unsubscribe and delete this device's settings everywhere
    Disable,
    /// Pause delivery, keeping the subscription
    Pause,
    /// Resume delivery
    Resume,
    /// Manage notification keywords
    Keyword {
        #[command(subcommand)]
        action: KeywordAction,
    },
    /// Set the matching mode (all or keyword)
    Mode {
        /// New mode
        mode: Mode,
    },
    /// Switch a category on or off
    Category {
        /// Category name
        name: String,
        /// New state
        state: Toggle,
    },
    /// Configure the delivery window (KST)
    Schedule {
        /// Enable quiet hours outside the window
        #[arg(long, conflicts_with = "off")]
        on: bool,
        /// Deliver at any time
        #[arg(long)]
        off: bool,
        /// Window start (HH:MM)
        #[arg(long)]
        start: Option<String>,
        /// Window end (HH:MM)
        #[arg(long)]
        end: Option<String>,
    },
    /// Fetch settings from the server and merge them locally
    Pull,
    /// Show a local test notification
    Test,
    /// Forget the local id, preferences and push state without contacting the server
    Reset,
    /// Show or change configuration
    Config {
        /// Key to show or set (all keys when omitted)
        key: Option<String>,
        /// New value (empty clears optional keys)
        value: Option<String>,
    },
}

#[derive(Subcommand)]
enum KeywordAction {
    /// Add a keyword
    Add {
        /// Keyword (2-20 characters)
        keyword: String,
    },
    /// Remove a keyword
    Remove {
        /// Keyword to remove
        keyword: String,
    },
    /// List keywords
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.format_timestamp_secs();

    // Log to PUSHID_LOG_FILE when set so output stays clean
    if let Ok(path) = std::env::var("PUSHID_LOG_FILE") {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

fn build_manager(config: &Config, storage: &SharedStore, assume_yes: bool) -> Result<Manager> {
    let config_dir = Config::config_dir()?;
    let platform = NativePlatform::new(&config_dir, config.push_endpoint.clone(), assume_yes);
    let remote = SyncClient::new(&config.server_url, config.request_timeout())?;
    let identity = DeviceIdentityStore::new(Rc::clone(storage), Rc::new(HostSignals));
    let preferences = PreferenceStore::new(Rc::clone(storage));

    Ok(SubscriptionManager::new(
        platform,
        remote,
        identity,
        preferences,
        config.vapid_public_key.clone().unwrap_or_default(),
    )
    .with_max_keywords(config.max_keywords))
}

fn print_status(manager: &Manager) {
    let prefs = manager.preferences();
    match manager.identity() {
        Some(identity) => println!("Device id:  {identity}"),
        None => println!("Device id:  (not created)"),
    }
    println!("State:      {}", manager.state());
    println!("Enabled:    {}", prefs.enabled);
    println!("Mode:       {}", prefs.mode);
    println!(
        "Keywords:   {}/{} {}",
        prefs.keywords.len(),
        manager.max_keywords(),
        prefs.keywords.join(", ")
    );

    let categories: Vec<_> = prefs
        .categories
        .iter()
        .map(|(name, on)| format!("{name}={}", if *on { "on" } else { "off" }))
        .collect();
    if !categories.is_empty() {
        println!("Categories: {}", categories.join(", "));
    }

    let schedule = prefs.schedule;
    if schedule.enabled {
        let now = if schedule.allows(Utc::now()) {
            "open now"
        } else {
            "quiet now"
        };
        println!(
            "Schedule:   {}-{} KST ({now})",
            schedule.start_time, schedule.end_time
        );
    } else {
        println!("Schedule:   any time");
    }
}

/// Resolve `schedule` flags against the current schedule.
///
/// Flags left out keep their current value.
fn merge_schedule_args(
    current: &Schedule,
    on: bool,
    off: bool,
    start: Option<String>,
    end: Option<String>,
) -> (bool, String, String) {
    let enabled = if on {
        true
    } else if off {
        false
    } else {
        current.enabled
    };
    let start = start.unwrap_or_else(|| current.start_time.to_string());
    let end = end.unwrap_or_else(|| current.end_time.to_string());
    (enabled, start, end)
}

/// Clear everything this device keeps locally. Never touches the network.
fn reset_local(config: &Config, storage: &SharedStore) -> Result<()> {
    DeviceIdentityStore::new(Rc::clone(storage), Rc::new(HostSignals)).clear();
    PreferenceStore::new(Rc::clone(storage))
        .clear()
        .context("Failed to clear preferences")?;
    NativePlatform::new(&Config::config_dir()?, config.push_endpoint.clone(), false).reset()?;
    Ok(())
}

fn run_config(key: Option<String>, value: Option<String>) -> Result<()> {
    match (key, value) {
        (None, _) => println!("{}", serde_json::to_string_pretty(&Config::load()?)?),
        (Some(key), None) => println!("{}", Config::load()?.get(&key)?),
        (Some(key), Some(value)) => {
            let mut saved = Config::load_saved()?;
            saved.set(&key, &value)?;
            saved.save()?;
            println!("{key} = {}", saved.get(&key)?);
        }
    }
    Ok(())
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let storage: SharedStore = Rc::new(FileStore::new(Config::config_dir()?));
    match command {
        Commands::Config { key, value } => return run_config(key, value),
        Commands::Reset => {
            reset_local(&config, &storage)?;
            println!("Local id, preferences and push state cleared.");
            return Ok(());
        }
        _ => {}
    }

    let assume_yes = matches!(command, Commands::Enable { yes: true });
    let manager = build_manager(&config, &storage, assume_yes)?;
    if let Err(e) = manager.restore().await {
        log::warn!("Could not restore subscription state: {e}");
    }

    match command {
        Commands::Id => {
            let identity = manager.ensure_identity();
            println!("{identity}");
            if !identity.is_durable() {
                eprintln!("Storage unavailable: this id lasts for this run only.");
            }
        }
        Commands::Status => print_status(&manager),
        Commands::Enable { .. } => {
            config.application_server_key()?;
            if manager.state() == SubscriptionState::NoPermission {
                manager.request_permission().await?;
            }
            let outcome = manager.subscribe().await?;
            println!("Subscribed as {}", outcome.identity);
            println!("Endpoint: {}", outcome.subscription.endpoint);
            if !outcome.settings_synced {
                eprintln!("Settings could not be sent yet; they will be sent with the next change.");
            }
        }
        Commands::Disable => {
            let outcome = manager.unsubscribe().await?;
            if !outcome.remote_deleted {
                eprintln!("Server settings could not be deleted; they will expire on the server.");
            }
            println!("Unsubscribed.");
        }
        Commands::Pause => {
            manager.set_active(false).await?;
            println!("Notifications paused.");
        }
        Commands::Resume => {
            manager.set_active(true).await?;
            println!("Notifications resumed.");
        }
        Commands::Keyword { action } => match action {
            KeywordAction::Add { keyword } => {
                let prefs = manager.add_keyword(&keyword).await?;
                println!("Keywords: {}", prefs.keywords.join(", "));
            }
            KeywordAction::Remove { keyword } => {
                let prefs = manager.remove_keyword(&keyword).await?;
                println!("Keywords: {}", prefs.keywords.join(", "));
            }
            KeywordAction::List => {
                let prefs = manager.preferences();
                for keyword in &prefs.keywords {
                    println!("{keyword}");
                }
            }
        },
        Commands::Mode { mode } => {
            manager.set_mode(mode).await?;
            println!("Mode: {mode}");
        }
        Commands::Category { name, state } => {
            let on = matches!(state, Toggle::On);
            manager.set_category(&name, on).await?;
            println!("{name}: {}", if on { "on" } else { "off" });
        }
        Commands::Schedule {
            on,
            off,
            start,
            end,
        } => {
            let current = manager.preferences().schedule;
            let (enabled, start, end) = merge_schedule_args(&current, on, off, start, end);
            let prefs = manager.set_schedule(enabled, &start, &end).await?;
            let schedule = prefs.schedule;
            if schedule.enabled {
                println!("Schedule: {}-{} KST", schedule.start_time, schedule.end_time);
            } else {
                println!("Schedule: any time");
            }
        }
        Commands::Pull => match manager.refresh_from_remote().await? {
            Some(_) => print_status(&manager),
            None => println!("No settings on the server for this device."),
        },
        Commands::Test => {
            manager.send_test_notification().await?;
        }
        Commands::Reset | Commands::Config { .. } => unreachable!("handled before setup"),
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    log::info!(
        "push-identity v{} ({})",
        env!("CARGO_PKG_VERSION"),
        push_identity::env::Environment::current()
    );

    let result = match Config::load() {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(notify) = e.downcast_ref::<NotifyError>() {
                log::error!("{notify}");
                eprintln!("{}", notify.user_message());
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(enabled: bool) -> Schedule {
        Schedule::new(enabled, "09:00", "22:00").unwrap()
    }

    fn args(list: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("push-identity").chain(list.iter().copied())).unwrap()
    }

    #[test]
    fn test_schedule_flags_keep_unset_values() {
        assert_eq!(
            merge_schedule_args(&schedule(false), false, false, None, None),
            (false, "09:00".to_string(), "22:00".to_string())
        );
        assert_eq!(
            merge_schedule_args(&schedule(true), false, false, Some("07:00".into()), None),
            (true, "07:00".to_string(), "22:00".to_string())
        );
    }

    #[test]
    fn test_schedule_on_off_override_current() {
        let (enabled, ..) = merge_schedule_args(&schedule(false), true, false, None, None);
        assert!(enabled);
        let (enabled, start, end) =
            merge_schedule_args(&schedule(true), false, true, None, Some("23:30".into()));
        assert!(!enabled);
        assert_eq!((start.as_str(), end.as_str()), ("09:00", "23:30"));
    }

    #[test]
    fn test_schedule_on_and_off_conflict() {
        assert!(Cli::try_parse_from(["push-identity", "schedule", "--on", "--off"]).is_err());
    }

    #[test]
    fn test_parses_subcommands() {
        assert!(matches!(
            args(&["schedule", "--on", "--start", "08:00"]).command,
            Commands::Schedule { on: true, off: false, start: Some(_), end: None }
        ));
        assert!(matches!(
            args(&["mode", "keyword"]).command,
            Commands::Mode { mode: Mode::Keyword }
        ));
        assert!(Cli::try_parse_from(["push-identity", "mode", "some"]).is_err());
        assert!(matches!(
            args(&["category", "economy", "off"]).command,
            Commands::Category { state: Toggle::Off, .. }
        ));
        assert!(matches!(
            args(&["enable", "--yes"]).command,
            Commands::Enable { yes: true }
        ));
        assert!(matches!(
            args(&["config", "max_keywords", "5"]).command,
            Commands::Config { key: Some(_), value: Some(_) }
        ));
    }
}
