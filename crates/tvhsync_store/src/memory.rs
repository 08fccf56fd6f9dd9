//! In-memory store.

use crate::error::{StoreError, StoreResult};
use crate::model::{
    Channel, ChannelTag, ConnectionSettings, Entity, ProfileKind, Program, Recording,
    SeriesRecordingRule, ServerProfile, ServerStatus, TagChannel, TimerRecordingRule,
};
use crate::repository::{
    ProfileRepository, ProgramRepository, Repository, SettingsRepository, StatusRepository,
    Store, TagChannelRepository,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A repository backed by an ordered map behind a read/write lock.
#[derive(Debug)]
pub struct MemoryRepository<E: Entity> {
    items: RwLock<BTreeMap<E::Id, E>>,
}

impl<E: Entity> MemoryRepository<E> {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }

    fn filtered(&self, predicate: impl Fn(&E) -> bool) -> Vec<E> {
        self.items
            .read()
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }
}

impl<E: Entity> Default for MemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Repository<E> for MemoryRepository<E> {
    fn get_all(&self) -> StoreResult<Vec<E>> {
        Ok(self.items.read().values().cloned().collect())
    }

    fn get_by_id(&self, id: &E::Id) -> StoreResult<Option<E>> {
        Ok(self.items.read().get(id).cloned())
    }

    fn upsert(&self, entity: E) -> StoreResult<()> {
        self.items.write().insert(entity.id(), entity);
        Ok(())
    }

    fn upsert_many(&self, entities: Vec<E>) -> StoreResult<()> {
        let mut items = self.items.write();
        for entity in entities {
            items.insert(entity.id(), entity);
        }
        Ok(())
    }

    fn remove_by_id(&self, id: &E::Id) -> StoreResult<bool> {
        Ok(self.items.write().remove(id).is_some())
    }

    fn remove_all(&self) -> StoreResult<()> {
        self.items.write().clear();
        Ok(())
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.items.read().len())
    }
}

impl ProgramRepository for MemoryRepository<Program> {
    fn remove_older_than(&self, timestamp: i64) -> StoreResult<usize> {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, p| p.stop >= timestamp);
        Ok(before - items.len())
    }

    fn last_for_channel(&self, channel_id: u32) -> StoreResult<Option<Program>> {
        Ok(self
            .items
            .read()
            .values()
            .filter(|p| p.channel_id == channel_id)
            .max_by_key(|p| (p.start, p.id))
            .cloned())
    }
}

impl TagChannelRepository for MemoryRepository<TagChannel> {
    fn get_by_tag(&self, tag_id: u32) -> StoreResult<Vec<TagChannel>> {
        Ok(self.filtered(|r| r.tag_id == tag_id))
    }

    fn replace(&self, added: Vec<TagChannel>, removed: Vec<TagChannel>) -> StoreResult<()> {
        let mut items = self.items.write();
        for row in removed {
            items.remove(&row.id());
        }
        for row in added {
            items.insert(row.id(), row);
        }
        Ok(())
    }

    fn remove_by_tag(&self, tag_id: u32) -> StoreResult<usize> {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, r| r.tag_id != tag_id);
        Ok(before - items.len())
    }
}

impl ProfileRepository for MemoryRepository<ServerProfile> {
    fn by_kind(&self, kind: ProfileKind) -> StoreResult<Vec<ServerProfile>> {
        Ok(self.filtered(|p| p.kind == kind))
    }

    fn find(&self, name: &str, kind: ProfileKind) -> StoreResult<Option<ServerProfile>> {
        Ok(self
            .items
            .read()
            .values()
            .find(|p| p.kind == kind && p.name == name)
            .cloned())
    }

    fn get_by_uuid(&self, uuid: &str) -> StoreResult<Option<ServerProfile>> {
        Ok(self
            .items
            .read()
            .values()
            .find(|p| p.uuid.as_deref() == Some(uuid))
            .cloned())
    }

    fn insert(&self, mut profile: ServerProfile) -> StoreResult<u32> {
        if profile.name.is_empty() {
            return Err(StoreError::invalid(ServerProfile::KIND, "empty name"));
        }
        let mut items = self.items.write();
        let id = items.keys().next_back().map_or(1, |last| last + 1);
        profile.id = id;
        items.insert(id, profile);
        Ok(id)
    }
}

/// A single value behind a lock.
#[derive(Debug, Default)]
pub struct MemoryCell<T> {
    value: RwLock<T>,
}

impl<T> MemoryCell<T> {
    fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }
}

impl SettingsRepository for MemoryCell<ConnectionSettings> {
    fn load(&self) -> StoreResult<ConnectionSettings> {
        Ok(self.value.read().clone())
    }

    fn save(&self, settings: &ConnectionSettings) -> StoreResult<()> {
        *self.value.write() = settings.clone();
        Ok(())
    }
}

impl StatusRepository for MemoryCell<ServerStatus> {
    fn load(&self) -> StoreResult<ServerStatus> {
        Ok(self.value.read().clone())
    }

    fn save(&self, status: &ServerStatus) -> StoreResult<()> {
        *self.value.write() = status.clone();
        Ok(())
    }
}

/// An in-memory [`Store`] for one backend connection.
///
/// # Example
///
/// ```
/// use tvhsync_store::{Channel, ConnectionSettings, MemoryStore, Repository, Store};
///
/// let store = MemoryStore::new(ConnectionSettings::new("home", "tvh.local", 9982));
/// store.channels().upsert(Channel { id: 1, ..Channel::default() }).unwrap();
/// assert_eq!(store.channels().count().unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: MemoryRepository<Channel>,
    tags: MemoryRepository<ChannelTag>,
    tag_channels: MemoryRepository<TagChannel>,
    programs: MemoryRepository<Program>,
    recordings: MemoryRepository<Recording>,
    series_rules: MemoryRepository<SeriesRecordingRule>,
    timer_rules: MemoryRepository<TimerRecordingRule>,
    profiles: MemoryRepository<ServerProfile>,
    settings: MemoryCell<ConnectionSettings>,
    status: MemoryCell<ServerStatus>,
}

impl MemoryStore {
    /// Creates an empty store for a connection.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings: MemoryCell::new(settings),
            ..Self::default()
        }
    }

    /// Copies every record out of the store.
    pub fn snapshot(&self) -> StoreResult<Snapshot> {
        Ok(Snapshot {
            settings: self.settings.load()?,
            status: self.status.load()?,
            channels: self.channels.get_all()?,
            tags: self.tags.get_all()?,
            tag_channels: self.tag_channels.get_all()?,
            programs: self.programs.get_all()?,
            recordings: self.recordings.get_all()?,
            series_rules: self.series_rules.get_all()?,
            timer_rules: self.timer_rules.get_all()?,
            profiles: self.profiles.get_all()?,
        })
    }
}

impl Store for MemoryStore {
    fn channels(&self) -> &dyn Repository<Channel> {
        &self.channels
    }

    fn tags(&self) -> &dyn Repository<ChannelTag> {
        &self.tags
    }

    fn tag_channels(&self) -> &dyn TagChannelRepository {
        &self.tag_channels
    }

    fn programs(&self) -> &dyn ProgramRepository {
        &self.programs
    }

    fn recordings(&self) -> &dyn Repository<Recording> {
        &self.recordings
    }

    fn series_rules(&self) -> &dyn Repository<SeriesRecordingRule> {
        &self.series_rules
    }

    fn timer_rules(&self) -> &dyn Repository<TimerRecordingRule> {
        &self.timer_rules
    }

    fn profiles(&self) -> &dyn ProfileRepository {
        &self.profiles
    }

    fn settings(&self) -> &dyn SettingsRepository {
        &self.settings
    }

    fn status(&self) -> &dyn StatusRepository {
        &self.status
    }
}

/// A point-in-time copy of a whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Connection settings.
    pub settings: ConnectionSettings,
    /// Server status.
    pub status: ServerStatus,
    /// Channels.
    pub channels: Vec<Channel>,
    /// Channel tags.
    pub tags: Vec<ChannelTag>,
    /// Tag membership rows.
    pub tag_channels: Vec<TagChannel>,
    /// EPG events.
    pub programs: Vec<Program>,
    /// Recordings.
    pub recordings: Vec<Recording>,
    /// Series recording rules.
    pub series_rules: Vec<SeriesRecordingRule>,
    /// Timer recording rules.
    pub timer_rules: Vec<TimerRecordingRule>,
    /// Server profiles.
    pub profiles: Vec<ServerProfile>,
}
