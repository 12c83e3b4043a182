//! # Session Store
//!
//! Persists the active walk so it survives an app restart.
//!
//! The walk is written as flat string entries under `walk_session.*` keys, the
//! layout a host key-value store (preferences, user defaults) handles natively.
//! Structured values (highlights, steps, destination, visited POIs) are JSON.
//!
//! | Key | Value |
//! |-----|-------|
//! | `walk_session.proposal_id` | Route identifier |
//! | `walk_session.title` | Route title |
//! | `walk_session.duration_minutes` | Estimated duration |
//! | `walk_session.distance_meters` | Estimated distance |
//! | `walk_session.description` | Generated story |
//! | `walk_session.polyline` | Encoded route path |
//! | `walk_session.highlights` | JSON array of highlight descriptions |
//! | `walk_session.steps` | JSON array of step descriptions |
//! | `walk_session.mode` | `destination` or `time_based` |
//! | `walk_session.destination` | JSON `{latitude, longitude}` |
//! | `walk_session.visited_pois` | JSON array of `{poi_id, name}` |
//! | `walk_session.current_step` | Step index |

use crate::error::StoreError;
use crate::session::{Route, RouteSession, VisitedPoi, WalkMode};
use crate::GpsPoint;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

const KEY_PROPOSAL_ID: &str = "walk_session.proposal_id";
const KEY_TITLE: &str = "walk_session.title";
const KEY_DURATION: &str = "walk_session.duration_minutes";
const KEY_DISTANCE: &str = "walk_session.distance_meters";
const KEY_DESCRIPTION: &str = "walk_session.description";
const KEY_POLYLINE: &str = "walk_session.polyline";
const KEY_HIGHLIGHTS: &str = "walk_session.highlights";
const KEY_STEPS: &str = "walk_session.steps";
const KEY_MODE: &str = "walk_session.mode";
const KEY_DESTINATION: &str = "walk_session.destination";
const KEY_VISITED_POIS: &str = "walk_session.visited_pois";
const KEY_CURRENT_STEP: &str = "walk_session.current_step";

const ALL_KEYS: [&str; 12] = [
    KEY_PROPOSAL_ID,
    KEY_TITLE,
    KEY_DURATION,
    KEY_DISTANCE,
    KEY_DESCRIPTION,
    KEY_POLYLINE,
    KEY_HIGHLIGHTS,
    KEY_STEPS,
    KEY_MODE,
    KEY_DESTINATION,
    KEY_VISITED_POIS,
    KEY_CURRENT_STEP,
];

// ============================================================================
// Backends
// ============================================================================

/// String key-value storage provided by the host.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&mut self, key: &str) -> Result<(), StoreError>;

    /// Write several entries. Backends that can batch should override this.
    fn set_many(&mut self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Remove several keys. Backends that can batch should override this.
    fn remove_many(&mut self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// In-process store; contents are lost on exit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// All entries in one JSON object file.
///
/// Every write rewrites the file through a temporary sibling and a rename, so
/// a crash mid-write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_many(&[(key, value.to_string())])
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.remove_many(&[key])
    }

    fn set_many(&mut self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut all = self.read_all()?;
        for (key, value) in entries {
            all.insert(key.to_string(), value.clone());
        }
        self.write_all(&all)
    }

    fn remove_many(&mut self, keys: &[&str]) -> Result<(), StoreError> {
        let mut all = self.read_all()?;
        let before = all.len();
        for key in keys {
            all.remove(*key);
        }
        if all.len() == before {
            return Ok(());
        }
        self.write_all(&all)
    }
}

// ============================================================================
// Session Store
// ============================================================================

/// Saves and restores a [`RouteSession`] in a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct SessionStore<S: KeyValueStore> {
    backend: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn into_backend(self) -> S {
        self.backend
    }

    /// Write the whole session. A missing destination removes the stored one.
    pub fn save(&mut self, session: &RouteSession) -> Result<(), StoreError> {
        let route = session.route();
        let steps: Vec<String> = session.steps().into_iter().map(|s| s.description).collect();

        let mut entries = vec![
            (KEY_PROPOSAL_ID, route.id.clone()),
            (KEY_TITLE, route.title.clone()),
            (KEY_DURATION, route.estimated_duration_minutes.to_string()),
            (KEY_DISTANCE, route.estimated_distance_meters.to_string()),
            (KEY_DESCRIPTION, route.generated_story.clone()),
            (KEY_POLYLINE, route.encoded_polyline.clone()),
            (KEY_HIGHLIGHTS, serde_json::to_string(&route.highlights)?),
            (KEY_STEPS, serde_json::to_string(&steps)?),
            (KEY_MODE, session.mode().as_str().to_string()),
            (KEY_VISITED_POIS, serde_json::to_string(session.visited_pois())?),
            (KEY_CURRENT_STEP, session.current_step().to_string()),
        ];
        match session.destination() {
            Some(destination) => entries.push((KEY_DESTINATION, serde_json::to_string(&destination)?)),
            None => self.backend.remove(KEY_DESTINATION)?,
        }

        self.backend.set_many(&entries)?;
        debug!(
            "[SessionStore] Saved session {} (step {}, {} visited POIs)",
            route.id,
            session.current_step(),
            session.visited_pois().len()
        );
        Ok(())
    }

    /// Rebuild the stored session.
    ///
    /// Returns `Ok(None)` when nothing usable is stored: no identifier, or a
    /// polyline that does not decode to a trackable path. Other fields fall
    /// back to defaults when missing or unreadable.
    pub fn load(&self) -> Result<Option<RouteSession>, StoreError> {
        let Some(proposal_id) = self.backend.get(KEY_PROPOSAL_ID)?.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        let Some(encoded) = self.backend.get(KEY_POLYLINE)? else {
            warn!("[SessionStore] Stored session {} has no polyline; ignoring it", proposal_id);
            return Ok(None);
        };

        let title = self.backend.get(KEY_TITLE)?.unwrap_or_default();
        let route = Route::new(proposal_id, title, encoded)
            .with_estimates(
                self.parsed(KEY_DURATION)?.unwrap_or(0),
                self.parsed(KEY_DISTANCE)?.unwrap_or(0),
            )
            .with_highlights(self.json(KEY_HIGHLIGHTS)?.unwrap_or_default())
            .with_story(self.backend.get(KEY_DESCRIPTION)?.unwrap_or_default());

        if !route.is_usable() {
            warn!(
                "[SessionStore] Stored route {} decodes to {} points; ignoring it",
                route.id,
                route.path.len()
            );
            return Ok(None);
        }

        let mode = self
            .backend
            .get(KEY_MODE)?
            .and_then(|m| WalkMode::parse(&m))
            .unwrap_or_default();
        let destination = self.json::<GpsPoint>(KEY_DESTINATION)?.filter(|d| {
            let valid = d.is_valid();
            if !valid {
                warn!("[SessionStore] Dropping out-of-range stored destination {:?}", d);
            }
            valid
        });

        let mut session = RouteSession::new(route, mode, destination);
        let visited: Vec<VisitedPoi> = self.json(KEY_VISITED_POIS)?.unwrap_or_default();
        for poi in visited {
            session.mark_visited(poi);
        }
        session.set_current_step(self.parsed(KEY_CURRENT_STEP)?.unwrap_or(0));

        info!(
            "[SessionStore] Restored session {} at step {} with {} visited POIs",
            session.route().id,
            session.current_step(),
            session.visited_pois().len()
        );
        Ok(Some(session))
    }

    /// Remove every stored session entry.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.backend.remove_many(&ALL_KEYS)?;
        debug!("[SessionStore] Cleared stored session");
        Ok(())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.backend.get(key)?.and_then(|raw| match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("[SessionStore] Unreadable value for {}: {:?}", key, raw);
                None
            }
        }))
    }

    fn json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.backend.get(key)?.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[SessionStore] Unreadable JSON for {}: {}", key, e);
                None
            }
        }))
    }
}
