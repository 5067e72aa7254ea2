use std::path::Path;

use anyhow::{anyhow, Context, Result};
use palate_core::{
    ConstitutionAnswer, ConstitutionProfile, EnvironmentSignal, ForcedChoiceProfile, LikertAnswer,
    ManualWeights, Motive, MotivationProfile, MotiveShares, UserPreferences, WeatherReading,
    RULESET_VERSION,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS constitution_results (
  result_id TEXT PRIMARY KEY,
  device_id TEXT NOT NULL CHECK (length(trim(device_id)) > 0),
  recorded_at TEXT NOT NULL,
  recorded_unix_ms INTEGER NOT NULL,
  algorithm_version TEXT NOT NULL,
  main_type TEXT NOT NULL,
  profile_json TEXT NOT NULL,
  answers_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS motivation_results (
  result_id TEXT PRIMARY KEY,
  device_id TEXT NOT NULL CHECK (length(trim(device_id)) > 0),
  recorded_at TEXT NOT NULL,
  recorded_unix_ms INTEGER NOT NULL,
  algorithm_version TEXT NOT NULL,
  form TEXT NOT NULL CHECK (form IN ('likert', 'forced_choice')),
  main_motive TEXT NOT NULL CHECK (main_motive IN ('P', 'H', 'S', 'E')),
  result_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS environment_snapshots (
  snapshot_id TEXT PRIMARY KEY,
  device_id TEXT NOT NULL CHECK (length(trim(device_id)) > 0),
  recorded_at TEXT NOT NULL,
  recorded_unix_ms INTEGER NOT NULL,
  algorithm_version TEXT NOT NULL,
  season TEXT,
  region TEXT,
  signal_json TEXT NOT NULL,
  reading_json TEXT,
  avoid_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_constitution_results_device
  ON constitution_results(device_id, recorded_unix_ms);
CREATE INDEX IF NOT EXISTS idx_motivation_results_device
  ON motivation_results(device_id, recorded_unix_ms);
CREATE INDEX IF NOT EXISTS idx_environment_snapshots_device
  ON environment_snapshots(device_id, recorded_unix_ms);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS device_preferences (
  device_id TEXT PRIMARY KEY CHECK (length(trim(device_id)) > 0),
  updated_at TEXT NOT NULL,
  preferences_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS device_weights (
  device_id TEXT PRIMARY KEY CHECK (length(trim(device_id)) > 0),
  updated_at TEXT NOT NULL,
  manual_json TEXT NOT NULL
);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredConstitution {
    pub result_id: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub algorithm_version: String,
    pub profile: ConstitutionProfile,
    pub answers: Vec<ConstitutionAnswer>,
}

/// A scored motivation submission in either questionnaire form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum MotivationResult {
    Likert { profile: MotivationProfile, answers: Vec<LikertAnswer> },
    ForcedChoice { profile: ForcedChoiceProfile },
}

impl MotivationResult {
    #[must_use]
    pub fn form(&self) -> &'static str {
        match self {
            Self::Likert { .. } => "likert",
            Self::ForcedChoice { .. } => "forced_choice",
        }
    }

    #[must_use]
    pub fn main(&self) -> Motive {
        match self {
            Self::Likert { profile, .. } => profile.main,
            Self::ForcedChoice { profile } => profile.main,
        }
    }

    #[must_use]
    pub fn shares(&self) -> MotiveShares {
        match self {
            Self::Likert { profile, .. } => MotiveShares::from_profile(profile),
            Self::ForcedChoice { profile } => MotiveShares::from_forced_choice(profile),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMotivation {
    pub result_id: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub algorithm_version: String,
    pub result: MotivationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEnvironment {
    pub snapshot_id: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub algorithm_version: String,
    pub signal: EnvironmentSignal,
    pub reading: Option<WeatherReading>,
    pub avoid: Vec<String>,
}

/// Latest state of every layer for one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub constitution: Option<StoredConstitution>,
    pub motivation: Option<StoredMotivation>,
    pub environment: Option<StoredEnvironment>,
    pub preferences: Option<UserPreferences>,
    pub manual_weights: Option<ManualWeights>,
}

impl SqliteStore {
    /// Open a SQLite-backed profile store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer
    /// than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (target, sql) in [(1_i64, MIGRATION_001_SQL), (2_i64, MIGRATION_002_SQL)] {
            if version >= target {
                continue;
            }
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{target}"))?;
            record_schema_version(&tx, target)?;
            tx.commit().with_context(|| format!("failed to commit migration v{target}"))?;
            tracing::info!(version = target, "applied schema migration");
        }

        Ok(())
    }

    /// Append one constitution result for a device.
    ///
    /// # Errors
    /// Returns an error when the device id is blank or the insert fails.
    pub fn insert_constitution(
        &mut self,
        device_id: &str,
        recorded_at: OffsetDateTime,
        profile: &ConstitutionProfile,
        answers: &[ConstitutionAnswer],
    ) -> Result<StoredConstitution> {
        validate_device_id(device_id)?;
        let stored = StoredConstitution {
            result_id: Ulid::new().to_string(),
            device_id: device_id.to_string(),
            recorded_at: recorded_at.to_offset(UtcOffset::UTC),
            algorithm_version: RULESET_VERSION.to_string(),
            profile: profile.clone(),
            answers: answers.to_vec(),
        };

        self.conn
            .execute(
                "INSERT INTO constitution_results(
                    result_id, device_id, recorded_at, recorded_unix_ms, algorithm_version,
                    main_type, profile_json, answers_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    stored.result_id,
                    stored.device_id,
                    rfc3339(stored.recorded_at)?,
                    unix_ms(stored.recorded_at)?,
                    stored.algorithm_version,
                    stored.profile.main_type.as_str(),
                    to_json(&stored.profile, "constitution profile")?,
                    to_json(&stored.answers, "constitution answers")?,
                ],
            )
            .context("failed to insert constitution result")?;

        Ok(stored)
    }

    /// # Errors
    /// Returns an error when lookup or JSON decoding fails.
    pub fn latest_constitution(&self, device_id: &str) -> Result<Option<StoredConstitution>> {
        self.conn
            .query_row(
                "SELECT result_id, device_id, recorded_at, algorithm_version, profile_json, answers_json
                 FROM constitution_results
                 WHERE device_id = ?1
                 ORDER BY recorded_unix_ms DESC, result_id DESC
                 LIMIT 1",
                params![device_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .context("failed to query latest constitution result")?
            .map(|(result_id, device_id, recorded_at, algorithm_version, profile, answers)| {
                Ok(StoredConstitution {
                    result_id,
                    device_id,
                    recorded_at: parse_rfc3339(&recorded_at)?,
                    algorithm_version,
                    profile: from_json(&profile, "constitution profile")?,
                    answers: from_json(&answers, "constitution answers")?,
                })
            })
            .transpose()
    }

    /// Append one motivation result for a device.
    ///
    /// # Errors
    /// Returns an error when the device id is blank or the insert fails.
    pub fn insert_motivation(
        &mut self,
        device_id: &str,
        recorded_at: OffsetDateTime,
        result: &MotivationResult,
    ) -> Result<StoredMotivation> {
        validate_device_id(device_id)?;
        let stored = StoredMotivation {
            result_id: Ulid::new().to_string(),
            device_id: device_id.to_string(),
            recorded_at: recorded_at.to_offset(UtcOffset::UTC),
            algorithm_version: RULESET_VERSION.to_string(),
            result: result.clone(),
        };

        self.conn
            .execute(
                "INSERT INTO motivation_results(
                    result_id, device_id, recorded_at, recorded_unix_ms, algorithm_version,
                    form, main_motive, result_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    stored.result_id,
                    stored.device_id,
                    rfc3339(stored.recorded_at)?,
                    unix_ms(stored.recorded_at)?,
                    stored.algorithm_version,
                    stored.result.form(),
                    stored.result.main().as_str(),
                    to_json(&stored.result, "motivation result")?,
                ],
            )
            .context("failed to insert motivation result")?;

        Ok(stored)
    }

    /// # Errors
    /// Returns an error when lookup or JSON decoding fails.
    pub fn latest_motivation(&self, device_id: &str) -> Result<Option<StoredMotivation>> {
        self.conn
            .query_row(
                "SELECT result_id, device_id, recorded_at, algorithm_version, result_json
                 FROM motivation_results
                 WHERE device_id = ?1
                 ORDER BY recorded_unix_ms DESC, result_id DESC
                 LIMIT 1",
                params![device_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("failed to query latest motivation result")?
            .map(|(result_id, device_id, recorded_at, algorithm_version, result)| {
                Ok(StoredMotivation {
                    result_id,
                    device_id,
                    recorded_at: parse_rfc3339(&recorded_at)?,
                    algorithm_version,
                    result: from_json(&result, "motivation result")?,
                })
            })
            .transpose()
    }

    /// Append one environment snapshot for a device.
    ///
    /// # Errors
    /// Returns an error when the device id is blank or the insert fails.
    pub fn insert_environment(
        &mut self,
        device_id: &str,
        recorded_at: OffsetDateTime,
        signal: &EnvironmentSignal,
        reading: Option<&WeatherReading>,
        avoid: &[String],
    ) -> Result<StoredEnvironment> {
        validate_device_id(device_id)?;
        let stored = StoredEnvironment {
            snapshot_id: Ulid::new().to_string(),
            device_id: device_id.to_string(),
            recorded_at: recorded_at.to_offset(UtcOffset::UTC),
            algorithm_version: RULESET_VERSION.to_string(),
            signal: signal.clone(),
            reading: reading.copied(),
            avoid: avoid.to_vec(),
        };

        self.conn
            .execute(
                "INSERT INTO environment_snapshots(
                    snapshot_id, device_id, recorded_at, recorded_unix_ms, algorithm_version,
                    season, region, signal_json, reading_json, avoid_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    stored.snapshot_id,
                    stored.device_id,
                    rfc3339(stored.recorded_at)?,
                    unix_ms(stored.recorded_at)?,
                    stored.algorithm_version,
                    stored.signal.season.map(|season| season.as_str()),
                    stored.signal.region,
                    to_json(&stored.signal, "environment signal")?,
                    stored.reading.as_ref().map(|reading| to_json(reading, "weather reading")).transpose()?,
                    to_json(&stored.avoid, "avoid tags")?,
                ],
            )
            .context("failed to insert environment snapshot")?;

        Ok(stored)
    }

    /// # Errors
    /// Returns an error when lookup or JSON decoding fails.
    pub fn latest_environment(&self, device_id: &str) -> Result<Option<StoredEnvironment>> {
        self.conn
            .query_row(
                "SELECT snapshot_id, device_id, recorded_at, algorithm_version, signal_json, reading_json, avoid_json
                 FROM environment_snapshots
                 WHERE device_id = ?1
                 ORDER BY recorded_unix_ms DESC, snapshot_id DESC
                 LIMIT 1",
                params![device_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("failed to query latest environment snapshot")?
            .map(|(snapshot_id, device_id, recorded_at, algorithm_version, signal, reading, avoid)| {
                Ok(StoredEnvironment {
                    snapshot_id,
                    device_id,
                    recorded_at: parse_rfc3339(&recorded_at)?,
                    algorithm_version,
                    signal: from_json(&signal, "environment signal")?,
                    reading: reading.map(|raw| from_json(&raw, "weather reading")).transpose()?,
                    avoid: from_json(&avoid, "avoid tags")?,
                })
            })
            .transpose()
    }

    /// Replace the preferences stored for a device.
    ///
    /// # Errors
    /// Returns an error when the device id is blank or the upsert fails.
    pub fn put_preferences(&mut self, device_id: &str, preferences: &UserPreferences) -> Result<()> {
        validate_device_id(device_id)?;
        self.conn
            .execute(
                "INSERT INTO device_preferences(device_id, updated_at, preferences_json)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(device_id) DO UPDATE SET
                   updated_at = excluded.updated_at,
                   preferences_json = excluded.preferences_json",
                params![device_id, now_rfc3339()?, to_json(preferences, "preferences")?],
            )
            .context("failed to upsert device preferences")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when lookup or JSON decoding fails.
    pub fn get_preferences(&self, device_id: &str) -> Result<Option<UserPreferences>> {
        self.json_column(
            "SELECT preferences_json FROM device_preferences WHERE device_id = ?1",
            device_id,
            "preferences",
        )
    }

    /// Replace the manual weight settings stored for a device.
    ///
    /// # Errors
    /// Returns an error when the device id is blank or the upsert fails.
    pub fn put_manual_weights(&mut self, device_id: &str, manual: &ManualWeights) -> Result<()> {
        validate_device_id(device_id)?;
        self.conn
            .execute(
                "INSERT INTO device_weights(device_id, updated_at, manual_json)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(device_id) DO UPDATE SET
                   updated_at = excluded.updated_at,
                   manual_json = excluded.manual_json",
                params![device_id, now_rfc3339()?, to_json(manual, "manual weights")?],
            )
            .context("failed to upsert device weights")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when lookup or JSON decoding fails.
    pub fn get_manual_weights(&self, device_id: &str) -> Result<Option<ManualWeights>> {
        self.json_column(
            "SELECT manual_json FROM device_weights WHERE device_id = ?1",
            device_id,
            "manual weights",
        )
    }

    /// Remove manual weights so the device falls back to adaptive weighting.
    /// Returns whether a row was removed.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn clear_manual_weights(&mut self, device_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM device_weights WHERE device_id = ?1", params![device_id])
            .context("failed to clear device weights")?;
        Ok(removed > 0)
    }

    /// # Errors
    /// Returns an error when any of the per-layer lookups fails.
    pub fn device_snapshot(&self, device_id: &str) -> Result<DeviceSnapshot> {
        Ok(DeviceSnapshot {
            device_id: device_id.to_string(),
            constitution: self.latest_constitution(device_id)?,
            motivation: self.latest_motivation(device_id)?,
            environment: self.latest_environment(device_id)?,
            preferences: self.get_preferences(device_id)?,
            manual_weights: self.get_manual_weights(device_id)?,
        })
    }

    fn json_column<T: DeserializeOwned>(&self, sql: &str, device_id: &str, what: &str) -> Result<Option<T>> {
        let raw = self
            .conn
            .query_row(sql, params![device_id], |row| row.get::<_, String>(0))
            .optional()
            .with_context(|| format!("failed to query {what}"))?;
        raw.map(|raw| from_json(&raw, what)).transpose()
    }
}

fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.trim().is_empty() {
        return Err(anyhow!("device_id MUST be non-empty"));
    }
    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn to_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to serialize {what}"))
}

fn from_json<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("failed to deserialize stored {what}"))
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn unix_ms(value: OffsetDateTime) -> Result<i64> {
    i64::try_from(value.unix_timestamp_nanos() / 1_000_000)
        .with_context(|| format!("timestamp out of range: {value}"))
}
