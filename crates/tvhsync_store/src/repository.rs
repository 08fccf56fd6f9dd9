//! Repository contracts.
//!
//! The sync engine never touches storage directly; it writes through
//! these traits. Implementations serialize their own writes.

use crate::error::StoreResult;
use crate::model::{
    Channel, ChannelTag, ConnectionSettings, Entity, ProfileKind, Program, Recording,
    SeriesRecordingRule, ServerProfile, ServerStatus, TagChannel, TimerRecordingRule,
};

/// Keyed storage for one entity type.
pub trait Repository<E: Entity>: Send + Sync {
    /// All records, ordered by id.
    fn get_all(&self) -> StoreResult<Vec<E>>;

    /// One record by id.
    fn get_by_id(&self, id: &E::Id) -> StoreResult<Option<E>>;

    /// Inserts or replaces a record.
    fn upsert(&self, entity: E) -> StoreResult<()>;

    /// Inserts or replaces many records in one batch.
    fn upsert_many(&self, entities: Vec<E>) -> StoreResult<()>;

    /// Removes a record. Returns whether it existed.
    fn remove_by_id(&self, id: &E::Id) -> StoreResult<bool>;

    /// Removes every record.
    fn remove_all(&self) -> StoreResult<()>;

    /// Number of records.
    fn count(&self) -> StoreResult<usize>;
}

/// EPG event storage.
pub trait ProgramRepository: Repository<Program> {
    /// Removes events that stopped before `timestamp`. Returns how many.
    fn remove_older_than(&self, timestamp: i64) -> StoreResult<usize>;

    /// The latest-starting event of a channel.
    fn last_for_channel(&self, channel_id: u32) -> StoreResult<Option<Program>>;
}

/// Tag membership storage.
pub trait TagChannelRepository: Repository<TagChannel> {
    /// All rows of one tag.
    fn get_by_tag(&self, tag_id: u32) -> StoreResult<Vec<TagChannel>>;

    /// Removes `removed` and inserts `added` as one batch.
    fn replace(&self, added: Vec<TagChannel>, removed: Vec<TagChannel>) -> StoreResult<()>;

    /// Removes all rows of one tag. Returns how many.
    fn remove_by_tag(&self, tag_id: u32) -> StoreResult<usize>;
}

/// Server profile storage.
pub trait ProfileRepository: Repository<ServerProfile> {
    /// All profiles of one kind.
    fn by_kind(&self, kind: ProfileKind) -> StoreResult<Vec<ServerProfile>>;

    /// The profile with this name and kind.
    fn find(&self, name: &str, kind: ProfileKind) -> StoreResult<Option<ServerProfile>>;

    /// The profile with this backend uuid.
    fn get_by_uuid(&self, uuid: &str) -> StoreResult<Option<ServerProfile>>;

    /// Inserts a new profile, assigning it a fresh local id.
    fn insert(&self, profile: ServerProfile) -> StoreResult<u32>;
}

/// Persisted connection settings.
pub trait SettingsRepository: Send + Sync {
    /// Loads the settings.
    fn load(&self) -> StoreResult<ConnectionSettings>;

    /// Saves the settings.
    fn save(&self, settings: &ConnectionSettings) -> StoreResult<()>;
}

/// Persisted server status.
pub trait StatusRepository: Send + Sync {
    /// Loads the status.
    fn load(&self) -> StoreResult<ServerStatus>;

    /// Saves the status.
    fn save(&self, status: &ServerStatus) -> StoreResult<()>;
}

/// All repositories of one backend connection.
pub trait Store: Send + Sync {
    /// Channels.
    fn channels(&self) -> &dyn Repository<Channel>;
    /// Channel tags.
    fn tags(&self) -> &dyn Repository<ChannelTag>;
    /// Tag membership rows.
    fn tag_channels(&self) -> &dyn TagChannelRepository;
    /// EPG events.
    fn programs(&self) -> &dyn ProgramRepository;
    /// Recordings.
    fn recordings(&self) -> &dyn Repository<Recording>;
    /// Series recording rules.
    fn series_rules(&self) -> &dyn Repository<SeriesRecordingRule>;
    /// Timer recording rules.
    fn timer_rules(&self) -> &dyn Repository<TimerRecordingRule>;
    /// Server profiles.
    fn profiles(&self) -> &dyn ProfileRepository;
    /// Connection settings.
    fn settings(&self) -> &dyn SettingsRepository;
    /// Server status.
    fn status(&self) -> &dyn StatusRepository;
}
