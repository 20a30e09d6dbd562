use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    calls::commands,
    daemon,
    models::{CallInput, PermissionStatus, RepeatDay, ScheduledCall, ScreenType},
    reconcile::{BackgroundCycle, BackgroundTask},
    settings::EngineSettings,
    AppState,
};

#[derive(Debug, Parser)]
#[command(name = "fauxcall", version, about = "Schedule fake incoming calls")]
pub struct Cli {
    /// Data directory. Defaults to $FAUXCALL_DATA_DIR, then the platform data dir.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Schedule a new call
    Add(CallArgs),
    /// Change an existing call; omitted fields keep their value
    Edit {
        id: String,
        #[command(flatten)]
        changes: EditArgs,
    },
    List {
        #[arg(long)]
        json: bool,
    },
    /// Flip a call between active and inactive
    Toggle { id: String },
    Remove { id: String },
    /// Delete every scheduled call
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Alerts waiting for their trigger
    Pending,
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Record the notification permission decision
    Permission {
        #[arg(value_enum)]
        decision: PermissionDecision,
    },
    /// Change engine settings; applies the next time the engine starts
    Config(ConfigArgs),
    /// Run one background fetch cycle and exit
    Fetch,
    /// Run the daemon until Ctrl-C
    Run,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PermissionDecision {
    Grant,
    Deny,
    Reset,
}

impl From<PermissionDecision> for PermissionStatus {
    fn from(decision: PermissionDecision) -> Self {
        match decision {
            PermissionDecision::Grant => PermissionStatus::Granted,
            PermissionDecision::Deny => PermissionStatus::Denied,
            PermissionDecision::Reset => PermissionStatus::Undetermined,
        }
    }
}

#[derive(Debug, Args)]
pub struct CallArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub number: String,
    /// RFC 3339 instant, or an offset from now such as +90s, +15m, +2h
    #[arg(long, value_parser = parse_when)]
    pub at: DateTime<Utc>,
    #[arg(long, default_value = "")]
    pub location: String,
    #[arg(long, default_value = "")]
    pub image: String,
    #[arg(long, default_value_t = ScreenType::Samsung)]
    pub screen: ScreenType,
    /// Comma-separated weekdays, e.g. mon,wed,fri
    #[arg(long = "repeat", value_delimiter = ',')]
    pub repeat_days: Vec<RepeatDay>,
}

impl From<CallArgs> for CallInput {
    fn from(args: CallArgs) -> Self {
        Self {
            name: args.name,
            number: args.number,
            location: args.location,
            image: args.image,
            scheduled_date: args.at,
            screen_type: args.screen,
            repeat_days: args.repeat_days.into_iter().collect(),
        }
    }
}

#[derive(Debug, Args)]
pub struct EditArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub number: Option<String>,
    #[arg(long, value_parser = parse_when)]
    pub at: Option<DateTime<Utc>>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub image: Option<String>,
    #[arg(long)]
    pub screen: Option<ScreenType>,
    /// Replaces the repeat days; pass an empty value to stop repeating
    #[arg(long = "repeat", value_delimiter = ',')]
    pub repeat_days: Option<Vec<String>>,
}

impl EditArgs {
    fn apply(self, existing: &ScheduledCall) -> Result<CallInput> {
        let mut input = CallInput::from(existing);
        if let Some(name) = self.name {
            input.name = name;
        }
        if let Some(number) = self.number {
            input.number = number;
        }
        if let Some(at) = self.at {
            input.scheduled_date = at;
        }
        if let Some(location) = self.location {
            input.location = location;
        }
        if let Some(image) = self.image {
            input.image = image;
        }
        if let Some(screen) = self.screen {
            input.screen_type = screen;
        }
        if let Some(days) = self.repeat_days {
            input.repeat_days = days
                .iter()
                .filter(|day| !day.trim().is_empty())
                .map(|day| day.parse::<RepeatDay>().map_err(anyhow::Error::msg))
                .collect::<Result<_>>()?;
        }
        Ok(input)
    }
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Zone offset for repeat days, in minutes east of UTC
    #[arg(long, allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,
    #[arg(long)]
    pub poll_secs: Option<u64>,
    #[arg(long)]
    pub foreground_lookback_secs: Option<u64>,
    #[arg(long)]
    pub background_lookback_secs: Option<u64>,
    #[arg(long)]
    pub retention_days: Option<u32>,
    /// Switch background fetch on or off
    #[arg(long)]
    pub background: Option<bool>,
}

impl ConfigArgs {
    fn apply(self, settings: &mut EngineSettings) {
        if let Some(minutes) = self.utc_offset_minutes {
            settings.recurrence_utc_offset_minutes = minutes;
        }
        if let Some(secs) = self.poll_secs {
            settings.foreground.poll_interval_secs = secs;
        }
        if let Some(secs) = self.foreground_lookback_secs {
            settings.foreground.lookback_secs = secs;
        }
        if let Some(secs) = self.background_lookback_secs {
            settings.background.lookback_secs = secs;
        }
        if let Some(days) = self.retention_days {
            settings.ledger_retention_days = days;
        }
        if let Some(enabled) = self.background {
            settings.background.enabled = enabled;
        }
    }
}

/// Parses `--at`: an RFC 3339 instant or `+<n>[s|m|h|d]` from now (minutes
/// when the unit is omitted).
pub fn parse_when(value: &str) -> Result<DateTime<Utc>, String> {
    parse_when_from(value, Utc::now())
}

fn parse_when_from(value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    let Some(offset) = value.strip_prefix('+') else {
        return DateTime::parse_from_rfc3339(value)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|err| format!("invalid time '{value}': {err}"));
    };

    let (amount, unit) = match offset.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((index, _)) => offset.split_at(index),
        None => (offset, "m"),
    };
    let amount: i64 = amount
        .parse()
        .map_err(|_| format!("invalid offset '{value}'"))?;
    let delta = match unit {
        "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        other => return Err(format!("unknown unit '{other}' in '{value}'")),
    };
    Ok(now + delta)
}

fn print_call(call: &ScheduledCall) {
    let repeat = if call.is_repeating() {
        call.repeat_days
            .iter()
            .map(RepeatDay::as_str)
            .collect::<Vec<_>>()
            .join(",")
    } else {
        "once".to_string()
    };
    println!(
        "{}  {:<8} {:<20} {:<16} {}  {}  [{}]",
        call.id,
        if call.is_active { "active" } else { "inactive" },
        call.name,
        call.number,
        call.scheduled_date.to_rfc3339(),
        repeat,
        call.screen_type,
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to encode output")?
    );
    Ok(())
}

pub async fn execute(cli: Cli, data_dir: PathBuf) -> Result<()> {
    let (state, deliveries) = AppState::open(&data_dir)?;

    match cli.command {
        Commands::Add(args) => {
            let call = commands::create_call(&state, args.into()).await?;
            print_call(&call);
        }
        Commands::Edit { id, changes } => {
            let existing = state
                .store
                .get(&id)
                .await?
                .with_context(|| format!("no scheduled call with id {id}"))?;
            let call = commands::edit_call(&state, &id, changes.apply(&existing)?).await?;
            print_call(&call);
        }
        Commands::List { json } => {
            let calls = commands::list_calls(&state).await?;
            if json {
                print_json(&calls)?;
            } else if calls.is_empty() {
                println!("No scheduled calls");
            } else {
                calls.iter().for_each(print_call);
            }
        }
        Commands::Toggle { id } => {
            let call = commands::toggle_call(&state, &id).await?;
            print_call(&call);
        }
        Commands::Remove { id } => {
            if !commands::delete_call(&state, &id).await? {
                anyhow::bail!("no scheduled call with id {id}");
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete every call without --yes");
            }
            commands::clear_calls(&state).await?;
        }
        Commands::Pending => {
            for pending in commands::list_pending(&state).await {
                println!(
                    "{}  {}  {}",
                    pending.identifier,
                    pending.trigger.instant().map_or_else(
                        || "immediate".to_string(),
                        |at| at.to_rfc3339()
                    ),
                    pending.content.title,
                );
            }
        }
        Commands::Status { json } => {
            let status = commands::engine_status(&state, Utc::now()).await?;
            if json {
                print_json(&status)?;
            } else {
                println!("data dir:      {}", status.data_dir);
                println!("database:      {}", status.database);
                println!("permission:    {}", status.permission.as_str());
                println!("pending:       {}", status.pending_alerts);
                println!("ledger:        {}", status.processed_occurrences);
                match status.background_task {
                    Some(options) => println!(
                        "background:    every {}s",
                        options.minimum_interval.as_secs()
                    ),
                    None => println!("background:    not registered ({})", status.background_fetch),
                }
                let instant = |at: Option<DateTime<Utc>>| {
                    at.map_or_else(|| "-".to_string(), |at| at.to_rfc3339())
                };
                for call in status.calls {
                    println!(
                        "  {} {} next={} last={}",
                        call.id,
                        call.name,
                        instant(call.next_occurrence),
                        instant(call.last_fired),
                    );
                }
            }
        }
        Commands::Permission { decision } => {
            commands::set_permission(&state, decision.into()).await?;
        }
        Commands::Config(changes) => {
            let settings = commands::update_settings(&state, |settings| changes.apply(settings))?;
            print_json(&settings)?;
        }
        Commands::Fetch => {
            let settings = state.settings.snapshot();
            let cycle = BackgroundCycle::new(
                state.reconciler.clone(),
                settings.background_lookback(),
                settings.ledger_retention(),
            );
            let result = cycle.run(Utc::now()).await;
            // Immediate alerts raised by the cycle are already queued.
            daemon::drain_deliveries(&state.reconciler, deliveries).await;
            println!("{result:?}");
        }
        Commands::Run => daemon::run(state, deliveries).await?,
    }

    Ok(())
}
