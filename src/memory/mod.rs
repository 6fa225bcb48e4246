//! Persistent character memory.
//!
//! Each character gets one pretty-printed JSON file under the memory
//! directory. The schema is fixed: named fields the tools know about, plus
//! an explicit extension map for anything else a caller wants to persist.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize memory: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CharacterMemory {
    pub character_name: String,
    pub personality: String,
    pub directives: Vec<String>,
    pub goals: Vec<String>,
    pub backstory: String,
    pub play_style: String,
    pub last_session: String,
    pub session_notes: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CharacterMemory {
    pub fn default_for(character_name: &str) -> Self {
        Self {
            character_name: character_name.to_string(),
            personality: "Determined and curious adventurer".to_string(),
            directives: vec![
                "Explore the world".to_string(),
                "Gather experience".to_string(),
                "Help allies".to_string(),
            ],
            goals: vec![
                "Level up".to_string(),
                "Master combat".to_string(),
                "Discover lore".to_string(),
            ],
            backstory: "A wanderer seeking glory and knowledge".to_string(),
            play_style: "Aggressive combat, exploration-focused".to_string(),
            last_session: now_rfc3339(),
            session_notes: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Applies an update and stamps `last_session`.
    pub fn apply(&mut self, update: MemoryUpdate) {
        if let Some(personality) = update.personality {
            self.personality = personality;
        }
        if let Some(directives) = update.directives {
            self.directives = directives;
        }
        if let Some(goals) = update.goals {
            self.goals = goals;
        }
        if let Some(backstory) = update.backstory {
            self.backstory = backstory;
        }
        if let Some(play_style) = update.play_style {
            self.play_style = play_style;
        }
        if let Some(session_notes) = update.session_notes {
            self.session_notes = session_notes;
        }
        self.extra.extend(update.extra);
        self.last_session = now_rfc3339();
    }

    pub fn add_note(&mut self, note: &str) {
        self.session_notes.push(format!("[{}] {}", now_rfc3339(), note));
    }
}

/// Partial update with named optional fields. Keys the schema does not name
/// land in the extension map instead of overwriting arbitrary fields.
#[derive(Debug, Default, Deserialize)]
pub struct MemoryUpdate {
    pub personality: Option<String>,
    pub directives: Option<Vec<String>>,
    pub goals: Option<Vec<String>>,
    pub backstory: Option<String>,
    pub play_style: Option<String>,
    pub session_notes: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

pub struct MemoryStore {
    dir: PathBuf,
}

impl MemoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Platform data directory, e.g. `~/.local/share/mudgate/memory`.
    pub fn resolve_default() -> Self {
        let dir = ProjectDirs::from("", "", "mudgate")
            .map(|dirs| dirs.data_dir().join("memory"))
            .unwrap_or_else(|| PathBuf::from(".mudgate").join("memory"));
        Self::new(dir)
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Loads a character's memory, falling back to defaults when the file is
    /// missing or unreadable. Corruption is logged, never fatal.
    pub fn load(&self, character_name: &str) -> CharacterMemory {
        let path = self.path_for(character_name);
        match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(memory) => {
                    debug!(character = character_name, "loaded memory");
                    memory
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "corrupt memory file, using defaults");
                    CharacterMemory::default_for(character_name)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                CharacterMemory::default_for(character_name)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read memory file, using defaults");
                CharacterMemory::default_for(character_name)
            }
        }
    }

    pub fn save(&self, memory: &CharacterMemory) -> Result<(), MemoryError> {
        fs::create_dir_all(&self.dir).map_err(|source| MemoryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(&memory.character_name);
        let data = serde_json::to_string_pretty(memory)?;
        fs::write(&path, data).map_err(|source| MemoryError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(character = %memory.character_name, path = %path.display(), "saved memory");
        Ok(())
    }

    fn path_for(&self, character_name: &str) -> PathBuf {
        // Character names come from the caller; keep them inside the store.
        let safe: String = character_name
            .chars()
            .map(|ch| {
                if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
