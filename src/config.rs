use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{Block, Catalog, Track, TrackDuration};
use crate::sched::{CommandKind, ScheduleEntry, ScheduleError, TimeSpec, Trigger};

const SETTINGS_FILENAME: &str = "showrunner.yml";
const SCHEDULE_FILENAME: &str = "schedule.yml";
const TRACKS_DIRNAME: &str = "tracks";
const BLOCKS_DIRNAME: &str = "blocks";

/// Fatal configuration problems. Anything in here aborts startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("config path {} does not exist", .0.display())]
    MissingPath(PathBuf),
    #[error("no config directory found")]
    NoConfigDir,
    #[error("{}: duplicate identifier {name:?}", .file.display())]
    DuplicateIdentifier { file: PathBuf, name: String },
    #[error("{}: missing required field {field}", .file.display())]
    MissingField { file: PathBuf, field: &'static str },
    #[error("{}: schedule references unknown track {name:?}", .file.display())]
    UnknownTrack { file: PathBuf, name: String },
    #[error("failed to read {}", .file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", .file.display())]
    Yaml {
        file: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Endpoints and timing from `showrunner.yml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_audio_host")]
    pub audio_host: String,
    #[serde(default = "default_audio_port")]
    pub audio_port: u16,

    /// Broadcast address shared by all video players.
    pub broadcast_ip: String,
    pub video_port: u16,
    pub info_port: u16,

    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Wait between the video playlist select and the unpause, so the
    /// players can load the first frame. Best-effort, not a sync primitive.
    #[serde(default = "default_video_load_delay_ms")]
    pub video_load_delay_ms: u64,
    /// Wait between mute and stop in the pause sequence, so the mute lands
    /// before the stop becomes audible.
    #[serde(default = "default_pause_settle_delay_ms")]
    pub pause_settle_delay_ms: u64,
}

fn default_audio_host() -> String {
    "127.0.0.1".to_string()
}

fn default_audio_port() -> u16 {
    8000
}

fn default_listen_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_video_load_delay_ms() -> u64 {
    30
}

fn default_pause_settle_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub settings_file: PathBuf,
    pub schedule_file: PathBuf,
    pub tracks_dir: PathBuf,
    pub blocks_dir: PathBuf,
}

/// Resolves the config directory: the explicit override, else the first of
/// `./config`, `~/.config/showrunner`, `/etc/showrunner` that exists.
pub fn locate(override_dir: Option<&Path>) -> Result<ConfigPaths, LoadError> {
    let dir = match override_dir {
        Some(dir) => {
            if !dir.exists() {
                return Err(LoadError::MissingPath(dir.to_path_buf()));
            }
            dir.to_path_buf()
        }
        None => default_locations()
            .into_iter()
            .find(|p| p.exists())
            .ok_or(LoadError::NoConfigDir)?,
    };
    info!("loading config files from {}", dir.display());

    let paths = ConfigPaths {
        settings_file: dir.join(SETTINGS_FILENAME),
        schedule_file: dir.join(SCHEDULE_FILENAME),
        tracks_dir: dir.join(TRACKS_DIRNAME),
        blocks_dir: dir.join(BLOCKS_DIRNAME),
    };

    // The blocks directory is optional; everything else must be there.
    for required in [&paths.settings_file, &paths.schedule_file, &paths.tracks_dir] {
        if !required.exists() {
            return Err(LoadError::MissingPath(required.clone()));
        }
    }
    Ok(paths)
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from("config")];
    if let Some(home_config) = dirs::config_dir() {
        locations.push(home_config.join("showrunner"));
    }
    locations.push(PathBuf::from("/etc/showrunner"));
    locations
}

pub fn load_settings(paths: &ConfigPaths) -> Result<Settings, LoadError> {
    let file = &paths.settings_file;
    let text = fs::read_to_string(file).map_err(|source| LoadError::Io {
        file: file.clone(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| LoadError::Yaml {
        file: file.clone(),
        source,
    })
}

// --- Catalog loading ------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawTrack {
    name: Option<String>,
    audio_index: Option<i32>,
    video_index: Option<i32>,
    title: Option<String>,
    duration: Option<TrackDuration>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    name: Option<String>,
    tracks: Option<Vec<String>>,
    track_padding: Option<u32>,
}

/// Reads every `*.yml` under the tracks and blocks directories. Track names
/// and audio indices are unique keys; blocks have their own name space.
pub fn load_catalog(paths: &ConfigPaths) -> Result<Catalog, LoadError> {
    let mut tracks: HashMap<String, Track> = HashMap::new();
    let mut seen_audio_indices: HashMap<i32, String> = HashMap::new();

    for file in yaml_files(&paths.tracks_dir)? {
        let raw: RawTrack = parse_yaml(&file)?;
        let track = Track {
            name: required(raw.name, &file, "name")?,
            audio_index: required(raw.audio_index, &file, "audio_index")?,
            video_index: raw.video_index,
            title: required(raw.title, &file, "title")?,
            duration: raw.duration,
        };
        if let Some(holder) = seen_audio_indices.insert(track.audio_index, track.name.clone()) {
            return Err(LoadError::DuplicateIdentifier {
                file,
                name: format!("audio_index {} (also used by {holder:?})", track.audio_index),
            });
        }
        if tracks.contains_key(&track.name) {
            return Err(LoadError::DuplicateIdentifier {
                file,
                name: track.name,
            });
        }
        tracks.insert(track.name.clone(), track);
    }

    let mut blocks: HashMap<String, Block> = HashMap::new();
    if paths.blocks_dir.is_dir() {
        for file in yaml_files(&paths.blocks_dir)? {
            let raw: RawBlock = parse_yaml(&file)?;
            let block = Block {
                name: required(raw.name, &file, "name")?,
                tracks: required(raw.tracks, &file, "tracks")?,
                track_padding: raw.track_padding.unwrap_or(0),
            };
            if blocks.contains_key(&block.name) {
                return Err(LoadError::DuplicateIdentifier {
                    file,
                    name: block.name,
                });
            }
            blocks.insert(block.name.clone(), block);
        }
    }

    Ok(Catalog::new(tracks, blocks))
}

fn required<T>(value: Option<T>, file: &Path, field: &'static str) -> Result<T, LoadError> {
    value.ok_or_else(|| LoadError::MissingField {
        file: file.to_path_buf(),
        field,
    })
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
        file: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LoadError::Io {
            file: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "yml" || ext == "yaml") {
            files.push(path);
        }
    }
    // Deterministic load order keeps duplicate reports stable.
    files.sort();
    Ok(files)
}

fn parse_yaml<T: serde::de::DeserializeOwned>(file: &Path) -> Result<T, LoadError> {
    let text = fs::read_to_string(file).map_err(|source| LoadError::Io {
        file: file.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| LoadError::Yaml {
        file: file.to_path_buf(),
        source,
    })
}

// --- Schedule loading -----------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEntry {
    command: Option<String>,
    track_id: Option<String>,
    hour: Option<u32>,
    minute: Option<u32>,
    second: Option<u32>,
    /// Day numbers (Monday = 0) or names, comma-separated; a bare number is
    /// also accepted.
    day_of_week: Option<serde_yaml::Value>,
    /// One-shot entries carry an absolute RFC 3339 timestamp instead of the
    /// cron fields.
    time: Option<String>,
}

/// Parses the schedule file. Malformed entries are logged and skipped;
/// an entry naming a track that is not in the catalog aborts the load.
pub fn load_schedule(paths: &ConfigPaths, catalog: &Catalog) -> Result<Vec<ScheduleEntry>, LoadError> {
    let file = &paths.schedule_file;
    let raw_entries: Vec<RawEntry> = parse_yaml(file)?;

    let mut entries = Vec::with_capacity(raw_entries.len());
    for (idx, raw) in raw_entries.into_iter().enumerate() {
        match build_entry(raw) {
            Ok(entry) => {
                if catalog.lookup(&entry.track_id).is_none() {
                    return Err(LoadError::UnknownTrack {
                        file: file.clone(),
                        name: entry.track_id,
                    });
                }
                entries.push(entry);
            }
            Err(e) => warn!("skipping schedule entry {idx}: {e}"),
        }
    }
    Ok(entries)
}

fn build_entry(raw: RawEntry) -> Result<ScheduleEntry, ScheduleError> {
    let command = CommandKind::parse(&raw.command.ok_or(ScheduleError::MissingField("command"))?)?;
    let track_id = raw.track_id.ok_or(ScheduleError::MissingField("track_id"))?;

    let trigger = if let Some(time) = raw.time {
        let at = DateTime::parse_from_rfc3339(&time)
            .map_err(|_| ScheduleError::InvalidTimestamp(time.clone()))?
            .with_timezone(&Local);
        Trigger::At(at)
    } else {
        let days = parse_day_value(raw.day_of_week.ok_or(ScheduleError::MissingField("day_of_week"))?)?;
        let spec = TimeSpec::new(
            raw.hour.ok_or(ScheduleError::MissingField("hour"))?,
            raw.minute.ok_or(ScheduleError::MissingField("minute"))?,
            raw.second.ok_or(ScheduleError::MissingField("second"))?,
            days,
        )?;
        Trigger::Cron(spec)
    };

    Ok(ScheduleEntry {
        command,
        track_id,
        trigger,
    })
}

fn parse_day_value(value: serde_yaml::Value) -> Result<Vec<chrono::Weekday>, ScheduleError> {
    match value {
        serde_yaml::Value::String(s) => TimeSpec::parse_days(&s),
        serde_yaml::Value::Number(n) => TimeSpec::parse_days(&n.to_string()),
        other => Err(ScheduleError::InvalidDays(format!("{other:?}"))),
    }
}
