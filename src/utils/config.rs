use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LibraryError, Result};
use crate::utils::now_millis;

pub const DEFAULT_STATE_FILE: &str = ".media-vault.env";
pub const LIBRARY_KEY: &str = "MEDIA_VAULT_LIBRARY";

pub const MANIFEST_FILE: &str = "library.json";
pub const MANIFEST_VERSION: u32 = 1;

/// What the CLI remembers between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    pub last_library: Option<PathBuf>,
}

/// Reads the state file. A missing or unreadable file yields the default state.
pub fn load_state(path: &Path) -> AppState {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return AppState::default(),
    };

    let mut state = AppState::default();
    for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == LIBRARY_KEY && !value.trim().is_empty() {
                state.last_library = Some(PathBuf::from(value.trim()));
            }
        }
    }
    debug!("Loaded app state from {:?}", path);
    state
}

pub fn save_state(path: &Path, state: &AppState) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| LibraryError::io("failed to create state file", path, e))?;
    if let Some(library) = &state.last_library {
        writeln!(file, "{}={}", LIBRARY_KEY, library.display())
            .map_err(|e| LibraryError::io("failed to write state file", path, e))?;
    }
    Ok(())
}

/// The `library.json` marker at the root of every library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryManifest {
    pub version: u32,
    pub created_at: i64,
}

pub fn read_manifest(library_dir: &Path) -> Option<LibraryManifest> {
    let text = fs::read_to_string(library_dir.join(MANIFEST_FILE)).ok()?;
    serde_json::from_str(&text).ok()
}

/// Writes a fresh manifest unless a parseable one is already present.
pub fn ensure_manifest(library_dir: &Path) -> Result<LibraryManifest> {
    if let Some(existing) = read_manifest(library_dir) {
        return Ok(existing);
    }
    let manifest = LibraryManifest {
        version: MANIFEST_VERSION,
        created_at: now_millis(),
    };
    let path = library_dir.join(MANIFEST_FILE);
    let text = serde_json::to_string_pretty(&manifest)?;
    fs::write(&path, text).map_err(|e| LibraryError::io("failed to write manifest", &path, e))?;
    info!("Wrote library manifest at {:?}", path);
    Ok(manifest)
}
