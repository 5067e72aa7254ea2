use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use palate_api::{
    ConstitutionSubmission, EnvironmentSubmission, MotivationAnswers, MotivationSubmission,
    PalateApi, RecommendRequest, WeightsUpdate,
};
use palate_core::{
    ChoiceLetter, ConstitutionAnswer, Layer, LikertAnswer, Motive, Season, UserPreferences,
    WeatherReading, WeightPreset,
};
use serde_json::Value;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "palate")]
#[command(about = "Palate personalized dish ranking CLI")]
struct Cli {
    #[arg(long, default_value = "./palate.sqlite3")]
    db: PathBuf,

    /// YAML engine configuration layered over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON dish catalog; the bundled demo catalog is used when omitted.
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Print the constitution and motivation question banks.
    Banks,
    Submit {
        #[command(subcommand)]
        command: Box<SubmitCommand>,
    },
    Prefs {
        #[command(subcommand)]
        command: PrefsCommand,
    },
    Weights {
        #[command(subcommand)]
        command: WeightsCommand,
    },
    Profile(DeviceArgs),
    Recommend(RecommendArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DeviceArgs {
    #[arg(long)]
    device: String,
}

#[derive(Debug, Subcommand)]
enum SubmitCommand {
    Constitution(SubmitConstitutionArgs),
    Motivation(SubmitMotivationArgs),
    Environment(SubmitEnvironmentArgs),
}

#[derive(Debug, Args)]
struct SubmitConstitutionArgs {
    #[arg(long)]
    device: String,
    /// Comma-separated `id=score` pairs, e.g. `1=3,2=4`.
    #[arg(long)]
    answers: String,
    #[arg(long)]
    recorded_at: Option<String>,
}

#[derive(Debug, Args)]
struct SubmitMotivationArgs {
    #[arg(long)]
    device: String,
    /// Comma-separated `item=value` pairs, e.g. `Q1=4,Q2=5`.
    #[arg(long, conflicts_with = "forced", required_unless_present = "forced")]
    likert: Option<String>,
    /// Twelve letters A-D, one per forced-choice item.
    #[arg(long)]
    forced: Option<String>,
    #[arg(long)]
    recorded_at: Option<String>,
}

#[derive(Debug, Args)]
struct SubmitEnvironmentArgs {
    #[arg(long)]
    device: String,
    /// 春, 夏, 秋 or 冬; derived from the observation date when omitted.
    #[arg(long)]
    season: Option<String>,
    #[arg(long)]
    region: Option<String>,
    #[arg(long)]
    temperature: Option<f64>,
    #[arg(long)]
    humidity: Option<f64>,
    #[arg(long)]
    wind: Option<f64>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    tag_strength: Option<f64>,
    #[arg(long)]
    observed_at: Option<String>,
}

#[derive(Debug, Subcommand)]
enum PrefsCommand {
    Set(PrefsSetArgs),
}

#[derive(Debug, Args)]
struct PrefsSetArgs {
    #[arg(long)]
    device: String,
    #[arg(long = "allergen")]
    allergens: Vec<String>,
    #[arg(long = "dislike")]
    dislikes: Vec<String>,
    #[arg(long = "crave")]
    craves: Vec<String>,
    #[arg(long = "diet-rule")]
    diet_rules: Vec<String>,
    #[arg(long)]
    oil_max: Option<u8>,
    #[arg(long)]
    spicy_max: Option<u8>,
    #[arg(long)]
    sodium_max: Option<u8>,
}

#[derive(Debug, Subcommand)]
enum WeightsCommand {
    Show(WeightsShowArgs),
    Auto(WeightsShowArgs),
    Preset(WeightsPresetArgs),
    Adjust(WeightsAdjustArgs),
    Lock(WeightsLockArgs),
    Clear(DeviceArgs),
}

#[derive(Debug, Args)]
struct WeightsShowArgs {
    #[arg(long)]
    device: String,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
struct WeightsPresetArgs {
    #[arg(long)]
    device: String,
    #[arg(long, value_enum)]
    preset: PresetArg,
}

#[derive(Debug, Args)]
struct WeightsAdjustArgs {
    #[arg(long)]
    device: String,
    #[arg(long, value_enum)]
    layer: LayerArg,
    #[arg(long)]
    value: f64,
}

#[derive(Debug, Args)]
struct WeightsLockArgs {
    #[arg(long)]
    device: String,
    #[arg(long, value_enum)]
    layer: LayerArg,
    #[arg(long, default_value_t = false)]
    unlock: bool,
}

#[derive(Debug, Args)]
struct RecommendArgs {
    #[arg(long)]
    device: String,
    #[arg(long)]
    as_of: Option<String>,
    /// Restrict output to one motive group: P, H, S or E.
    #[arg(long)]
    motive: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    Balanced,
    ConstitutionFirst,
    EnvironmentFirst,
    DriversFirst,
}

impl From<PresetArg> for WeightPreset {
    fn from(value: PresetArg) -> Self {
        match value {
            PresetArg::Balanced => Self::Balanced,
            PresetArg::ConstitutionFirst => Self::ConstitutionFirst,
            PresetArg::EnvironmentFirst => Self::EnvironmentFirst,
            PresetArg::DriversFirst => Self::DriversFirst,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LayerArg {
    Constitution,
    Environment,
    Drivers,
}

impl From<LayerArg> for Layer {
    fn from(value: LayerArg) -> Self {
        match value {
            LayerArg::Constitution => Self::Constitution,
            LayerArg::Environment => Self::Environment,
            LayerArg::Drivers => Self::Drivers,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PALATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = PalateApi::from_sources(cli.db.clone(), cli.config.as_deref(), cli.catalog.as_deref())?;
    tracing::debug!(db = %cli.db.display(), "opened palate api");
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Banks => {
            emit_json(serde_json::to_value(api.question_banks()).context("failed to serialize question banks")?)
        }
        Command::Submit { command } => run_submit(*command, &api),
        Command::Prefs { command } => run_prefs(command, &api),
        Command::Weights { command } => run_weights(command, &api),
        Command::Profile(args) => {
            let snapshot = api.profile(&args.device)?;
            emit_json(serde_json::to_value(&snapshot).context("failed to serialize device profile")?)
        }
        Command::Recommend(args) => run_recommend(&args, &api),
    }
}

fn run_db(command: DbCommand, api: &PalateApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
    }
}

fn run_submit(command: SubmitCommand, api: &PalateApi) -> Result<()> {
    match command {
        SubmitCommand::Constitution(args) => {
            let stored = api.submit_constitution(ConstitutionSubmission {
                device_id: args.device,
                answers: parse_constitution_answers(&args.answers)?,
                recorded_at: parse_optional_rfc3339(args.recorded_at.as_deref())?,
            })?;
            emit_json(serde_json::to_value(&stored).context("failed to serialize constitution result")?)
        }
        SubmitCommand::Motivation(args) => {
            let answers = match (args.likert.as_deref(), args.forced.as_deref()) {
                (Some(raw), None) => MotivationAnswers::Likert(parse_likert_answers(raw)?),
                (None, Some(raw)) => MotivationAnswers::ForcedChoice(parse_choice_letters(raw)?),
                _ => return Err(anyhow!("exactly one of --likert or --forced is required")),
            };
            let stored = api.submit_motivation(MotivationSubmission {
                device_id: args.device,
                answers,
                recorded_at: parse_optional_rfc3339(args.recorded_at.as_deref())?,
            })?;
            emit_json(serde_json::to_value(&stored).context("failed to serialize motivation result")?)
        }
        SubmitCommand::Environment(args) => {
            let season = args
                .season
                .as_deref()
                .map(|raw| Season::parse(raw).ok_or_else(|| anyhow!("unknown season: {raw}")))
                .transpose()?;
            let weather = if args.temperature.is_some() || args.humidity.is_some() || args.wind.is_some() {
                Some(WeatherReading {
                    temperature_c: args.temperature,
                    humidity_pct: args.humidity,
                    wind_kmh: args.wind,
                })
            } else {
                None
            };
            let stored = api.submit_environment(EnvironmentSubmission {
                device_id: args.device,
                observed_at: parse_optional_rfc3339(args.observed_at.as_deref())?,
                season,
                region: args.region,
                weather,
                climate_tags: args.tags,
                tag_strength: args.tag_strength,
            })?;
            emit_json(serde_json::to_value(&stored).context("failed to serialize environment snapshot")?)
        }
    }
}

fn run_prefs(command: PrefsCommand, api: &PalateApi) -> Result<()> {
    match command {
        PrefsCommand::Set(args) => {
            let preferences = api.set_preferences(
                &args.device,
                UserPreferences {
                    allergens: args.allergens,
                    dislikes: args.dislikes,
                    craves: args.craves,
                    diet_rules: args.diet_rules,
                    oil_max: args.oil_max,
                    spicy_max: args.spicy_max,
                    sodium_max: args.sodium_max,
                },
            )?;
            emit_json(serde_json::json!({
                "device_id": args.device,
                "preferences": preferences,
            }))
        }
    }
}

fn run_weights(command: WeightsCommand, api: &PalateApi) -> Result<()> {
    match command {
        WeightsCommand::Show(args) => {
            let view = api.weights(&args.device, parse_optional_rfc3339(args.as_of.as_deref())?)?;
            emit_json(serde_json::to_value(&view).context("failed to serialize weights")?)
        }
        WeightsCommand::Auto(args) => {
            let report = api.auto_weights(&args.device, parse_optional_rfc3339(args.as_of.as_deref())?)?;
            emit_json(serde_json::to_value(&report).context("failed to serialize weight report")?)
        }
        WeightsCommand::Preset(args) => {
            let manual = api.update_weights(&args.device, WeightsUpdate::Preset { preset: args.preset.into() })?;
            emit_json(serde_json::to_value(manual).context("failed to serialize manual weights")?)
        }
        WeightsCommand::Adjust(args) => {
            let manual = api.update_weights(
                &args.device,
                WeightsUpdate::Adjust { layer: args.layer.into(), value: args.value },
            )?;
            emit_json(serde_json::to_value(manual).context("failed to serialize manual weights")?)
        }
        WeightsCommand::Lock(args) => {
            let manual = api.update_weights(
                &args.device,
                WeightsUpdate::Lock { layer: args.layer.into(), locked: !args.unlock },
            )?;
            emit_json(serde_json::to_value(manual).context("failed to serialize manual weights")?)
        }
        WeightsCommand::Clear(args) => {
            let removed = api.clear_weights(&args.device)?;
            emit_json(serde_json::json!({
                "device_id": args.device,
                "removed": removed,
            }))
        }
    }
}

fn run_recommend(args: &RecommendArgs, api: &PalateApi) -> Result<()> {
    let motive = args
        .motive
        .as_deref()
        .map(|raw| Motive::parse(raw).ok_or_else(|| anyhow!("unknown motive: {raw}")))
        .transpose()?;
    let response = api.recommend(RecommendRequest {
        device_id: args.device.clone(),
        as_of: parse_optional_rfc3339(args.as_of.as_deref())?,
        motive,
        preferences: None,
    })?;
    emit_json(serde_json::to_value(&response).context("failed to serialize recommendation")?)
}

fn split_pairs(raw: &str) -> Result<Vec<(&str, &str)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.trim(), value.trim()))
                .ok_or_else(|| anyhow!("expected `key=value`, got `{pair}`"))
        })
        .collect()
}

fn parse_constitution_answers(raw: &str) -> Result<Vec<ConstitutionAnswer>> {
    split_pairs(raw)?
        .into_iter()
        .map(|(id, score)| {
            Ok(ConstitutionAnswer {
                id: id.parse().with_context(|| format!("invalid question id `{id}`"))?,
                score: score.parse().with_context(|| format!("invalid score `{score}` for question {id}"))?,
            })
        })
        .collect()
}

fn parse_likert_answers(raw: &str) -> Result<Vec<LikertAnswer>> {
    split_pairs(raw)?
        .into_iter()
        .map(|(id, value)| {
            Ok(LikertAnswer {
                id: id.to_string(),
                value: value.parse().with_context(|| format!("invalid value `{value}` for item {id}"))?,
            })
        })
        .collect()
}

fn parse_choice_letters(raw: &str) -> Result<Vec<ChoiceLetter>> {
    raw.chars()
        .filter(|letter| !letter.is_whitespace() && *letter != ',')
        .map(|letter| match letter.to_ascii_uppercase() {
            'A' => Ok(ChoiceLetter::A),
            'B' => Ok(ChoiceLetter::B),
            'C' => Ok(ChoiceLetter::C),
            'D' => Ok(ChoiceLetter::D),
            other => Err(anyhow!("forced-choice answers MUST be A-D, got `{other}`")),
        })
        .collect()
}

fn parse_optional_rfc3339(value: Option<&str>) -> Result<Option<OffsetDateTime>> {
    value.map(parse_rfc3339).transpose()
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
