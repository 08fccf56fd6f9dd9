//! Server profiles and default-profile selection.

use crate::error::EngineResult;
use serde::Deserialize;
use tracing::{debug, warn};
use tvhsync_protocol::HtspMessage;
use tvhsync_store::{ProfileKind, ServerProfile, ServerStatus, Store};

/// Profiles every server is assumed to offer, added locally when missing.
const FALLBACKS: &[(ProfileKind, &str)] = &[
    (ProfileKind::HtspPlayback, "htsp"),
    (ProfileKind::HttpPlayback, "matroska"),
    (ProfileKind::HttpPlayback, "audio"),
    (ProfileKind::HttpPlayback, "pass"),
];

/// Preferred default profile per kind.
const PREFERRED: &[(ProfileKind, &str)] = &[
    (ProfileKind::HtspPlayback, "htsp"),
    (ProfileKind::HttpPlayback, "pass"),
    (ProfileKind::Recording, "Default Profile"),
];

/// Name given to a recording profile the server left unnamed.
pub const DEFAULT_RECORDING_PROFILE: &str = "Default Profile";

#[derive(Debug, Deserialize)]
struct ApiList {
    #[serde(default)]
    entries: Vec<ApiEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiEntry {
    key: Option<String>,
    val: Option<String>,
}

/// Writes server profiles and picks defaults.
pub struct ProfileDefaulter<'a> {
    store: &'a dyn Store,
}

impl<'a> ProfileDefaulter<'a> {
    /// Creates a defaulter working on `store`.
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Inserts a profile unless one with the same name and kind exists.
    fn insert_missing(&self, profile: ServerProfile) -> EngineResult<bool> {
        let profiles = self.store.profiles();
        if profiles.find(&profile.name, profile.kind)?.is_some() {
            return Ok(false);
        }
        debug!(name = %profile.name, kind = ?profile.kind, "adding profile");
        profiles.insert(profile)?;
        Ok(true)
    }

    /// Handles a `getProfiles` reply: inserts unknown HTSP playback profiles.
    pub fn apply_htsp_profiles(&self, msg: &HtspMessage) -> EngineResult<usize> {
        let mut added = 0;
        for entry in msg.messages("profiles") {
            let Some(name) = entry.str("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            let profile = ServerProfile {
                uuid: entry.string("uuid"),
                comment: entry.string("comment"),
                ..ServerProfile::local(name, ProfileKind::HtspPlayback)
            };
            if self.insert_missing(profile)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Handles an `api` reply for `profile/list`: inserts unknown HTTP
    /// playback profiles. Malformed JSON is logged and ignored.
    pub fn apply_http_profiles(&self, msg: &HtspMessage) -> EngineResult<usize> {
        let Some(response) = msg.str("response") else {
            return Ok(0);
        };
        let list: ApiList = match serde_json::from_str(response) {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "could not parse http profile list");
                return Ok(0);
            }
        };

        let mut added = 0;
        for entry in list.entries {
            let (Some(key), Some(name)) = (entry.key, entry.val) else {
                continue;
            };
            let profile = ServerProfile {
                uuid: Some(key),
                ..ServerProfile::local(name, ProfileKind::HttpPlayback)
            };
            if self.insert_missing(profile)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Handles a `getDvrConfigs` reply: upserts recording profiles by uuid.
    pub fn apply_dvr_configs(&self, msg: &HtspMessage) -> EngineResult<usize> {
        let profiles = self.store.profiles();
        let mut count = 0;
        for entry in msg.messages("dvrconfigs") {
            let Some(uuid) = entry.str("uuid") else {
                continue;
            };
            let name = match entry.str("name") {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => DEFAULT_RECORDING_PROFILE.to_string(),
            };
            match profiles.get_by_uuid(uuid)? {
                Some(mut profile) => {
                    profile.name = name;
                    profile.comment = entry.string("comment");
                    profile.kind = ProfileKind::Recording;
                    profiles.upsert(profile)?;
                }
                None => {
                    profiles.insert(ServerProfile {
                        uuid: Some(uuid.to_string()),
                        comment: entry.string("comment"),
                        ..ServerProfile::local(name, ProfileKind::Recording)
                    })?;
                }
            }
            count += 1;
        }
        Ok(count)
    }

    /// Adds the local fallback profiles that are missing.
    pub fn ensure_fallbacks(&self) -> EngineResult<usize> {
        let mut added = 0;
        for &(kind, name) in FALLBACKS {
            if self.insert_missing(ServerProfile::local(name, kind))? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Chooses a default for every kind that has none yet. Returns whether
    /// `status` changed.
    pub fn choose_defaults(&self, status: &mut ServerStatus) -> EngineResult<bool> {
        let mut changed = false;
        for &(kind, name) in PREFERRED {
            if status.default_profile(kind).is_some() {
                continue;
            }
            if let Some(profile) = self.store.profiles().find(name, kind)? {
                debug!(?kind, name, id = profile.id, "selecting default profile");
                status.set_default_profile(kind, Some(profile.id));
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Loads the stored status, chooses defaults and saves it back.
    pub fn select_defaults(&self) -> EngineResult<()> {
        let mut status = self.store.status().load()?;
        if self.choose_defaults(&mut status)? {
            self.store.status().save(&status)?;
        }
        Ok(())
    }

    /// Adds fallbacks, then selects defaults.
    pub fn reconcile(&self) -> EngineResult<()> {
        self.ensure_fallbacks()?;
        self.select_defaults()
    }
}
