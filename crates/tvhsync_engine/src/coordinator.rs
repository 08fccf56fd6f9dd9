//! Sync orchestration.
//!
//! After authentication the coordinator asks the server for its state with
//! one `enableAsyncMetadata` request. Pushes that arrive while the pass is
//! running are buffered per entity type; `initialSyncCompleted` flushes the
//! buffers in a fixed order, fetches secondary metadata and schedules an
//! incremental fetch of more EPG events. Outside a sync pass every push is
//! written straight to the store.

use crate::buffer::{self, Buffer};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::connection::ConnectionListener;
use crate::dispatcher::{Dispatcher, PushHandler};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventSender, SyncStatus};
use crate::icons::IconCache;
use crate::pool::{PoolHandle, ScheduledJob};
use crate::profiles::ProfileDefaulter;
use crate::reconcile::{
    apply_disk_space, apply_server_status, apply_system_time, merge, Reconcile,
};
use crate::signal::Countdown;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use tvhsync_protocol::{
    requests, EpgWindow, EventQuery, HtspMessage, Push, MIN_API_VERSION,
};
use tvhsync_store::{
    Channel, ChannelTag, Program, Recording, Repository, ServerStatus, Store, TagChannel,
};

const CHANNEL_PROGRESS: usize = 25;
const TAG_PROGRESS: usize = 10;
const RECORDING_PROGRESS: usize = 25;
const EVENT_PROGRESS: usize = 50;

/// Phase of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No sync pass running.
    #[default]
    Idle,
    /// `enableAsyncMetadata` is being sent.
    SyncRequested,
    /// The server is streaming its state.
    SyncInProgress,
    /// Buffers are being flushed.
    SyncDone,
}

impl SyncPhase {
    fn is_buffering(self) -> bool {
        matches!(self, SyncPhase::SyncRequested | SyncPhase::SyncInProgress)
    }
}

#[derive(Default)]
struct SyncState {
    phase: SyncPhase,
    sync_required: bool,
    sync_events_required: bool,
    channels_flushed: bool,
    server_order: u32,
    channels: Buffer<Channel>,
    tags: Buffer<ChannelTag>,
    recordings: Buffer<Recording>,
    programs: Buffer<Program>,
}

/// Merges `msg` onto the latest known state of its record: the buffered
/// one if any, else the stored one.
fn merge_current<E, R>(
    buffer: Option<&Buffer<E>>,
    repo: &R,
    msg: &HtspMessage,
    is_update: bool,
) -> EngineResult<Option<E>>
where
    E: Reconcile,
    R: Repository<E> + ?Sized,
{
    let id = E::id_from(msg)?;
    let current = match buffer.and_then(|b| b.lookup(&id)) {
        Some(buffered) => buffered.cloned(),
        None => repo.get_by_id(&id)?,
    };
    Ok(merge(msg, current, is_update)?)
}

/// Drives full and incremental sync passes.
pub struct SyncCoordinator {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    icons: Arc<IconCache>,
    events: EventSender,
    pool: PoolHandle,
    state: Mutex<SyncState>,
    status: Mutex<()>,
    incremental: Mutex<Option<ScheduledJob>>,
    this: Weak<SyncCoordinator>,
}

impl SyncCoordinator {
    pub(crate) fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn Store>,
        dispatcher: Arc<Dispatcher>,
        icons: Arc<IconCache>,
        events: EventSender,
        pool: PoolHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            clock,
            store,
            dispatcher,
            icons,
            events,
            pool,
            state: Mutex::new(SyncState::default()),
            status: Mutex::new(()),
            incremental: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.state.lock().phase
    }

    /// Decides the sync scope and sends `enableAsyncMetadata`.
    pub fn start_sync(&self) -> EngineResult<()> {
        let settings = self.store.settings().load()?;
        let now = self.clock.now();
        let sync_required = settings.sync_required;
        let sync_events_required = sync_required
            || settings.last_update + EngineConfig::secs(self.config.epg_window) < now;

        *self.state.lock() = SyncState {
            phase: SyncPhase::SyncRequested,
            sync_required,
            sync_events_required,
            ..SyncState::default()
        };
        info!(sync_required, sync_events_required, "starting sync");
        if sync_required || sync_events_required {
            self.events
                .status(SyncStatus::SyncStarted, "Loading data from server", None);
        }

        let window = sync_events_required.then(|| EpgWindow {
            max_time: now + EngineConfig::secs(self.config.epg_window),
            last_update: now - EngineConfig::secs(self.config.updates_since),
        });
        let sent = self
            .dispatcher
            .request(requests::enable_async_metadata(window), |_| {
                debug!("enableAsyncMetadata acknowledged")
            });

        let mut state = self.state.lock();
        match sent {
            Ok(()) => {
                if state.phase == SyncPhase::SyncRequested {
                    state.phase = SyncPhase::SyncInProgress;
                }
                Ok(())
            }
            Err(err) => {
                *state = SyncState::default();
                Err(err)
            }
        }
    }

    /// Drops every buffered change and returns to idle.
    pub fn reset(&self) {
        *self.state.lock() = SyncState::default();
        if let Some(job) = self.incremental.lock().take() {
            job.cancel();
        }
    }

    fn handle(&self, push: Push) -> EngineResult<()> {
        match push {
            Push::ChannelAdd(msg) => self.on_channel(&msg, false),
            Push::ChannelUpdate(msg) => self.on_channel(&msg, true),
            Push::ChannelDelete(id) => self.on_channel_delete(id),
            Push::TagAdd(msg) => self.on_tag(&msg, false),
            Push::TagUpdate(msg) => self.on_tag(&msg, true),
            Push::TagDelete(id) => self.on_tag_delete(id),
            Push::DvrEntryAdd(msg) => self.on_recording(&msg, false),
            Push::DvrEntryUpdate(msg) => self.on_recording(&msg, true),
            Push::DvrEntryDelete(id) => self.on_recording_delete(id),
            Push::AutorecEntryAdd(msg) => self.write_rule(self.store.series_rules(), &msg, false),
            Push::AutorecEntryUpdate(msg) => self.write_rule(self.store.series_rules(), &msg, true),
            Push::AutorecEntryDelete(id) => {
                self.store.series_rules().remove_by_id(&id)?;
                Ok(())
            }
            Push::TimerecEntryAdd(msg) => self.write_rule(self.store.timer_rules(), &msg, false),
            Push::TimerecEntryUpdate(msg) => self.write_rule(self.store.timer_rules(), &msg, true),
            Push::TimerecEntryDelete(id) => {
                self.store.timer_rules().remove_by_id(&id)?;
                Ok(())
            }
            Push::EventAdd(msg) => self.on_event(&msg, false),
            Push::EventUpdate(msg) => self.on_event(&msg, true),
            Push::EventDelete(id) => self.on_event_delete(id),
            Push::InitialSyncCompleted => {
                self.complete_sync();
                Ok(())
            }
            Push::ServerStatus(msg) => self.update_status(|s| {
                apply_server_status(s, &msg);
                Ok(())
            }),
            Push::SystemTime(msg) => self.on_system_time(&msg),
            Push::DiskSpace(msg) => self.on_disk_space(&msg),
            Push::Profiles(msg) => ProfileDefaulter::new(&*self.store)
                .apply_htsp_profiles(&msg)
                .map(drop),
            Push::DvrConfigs(msg) => ProfileDefaulter::new(&*self.store)
                .apply_dvr_configs(&msg)
                .map(drop),
            Push::Events(msg) => self.on_events(&msg).map(drop),
        }
    }

    fn progress(&self, count: usize, every: usize, noun: &str) {
        if count % every == 0 {
            self.events.status(
                SyncStatus::SyncInProgress,
                "Receiving data",
                Some(format!("Received {count} {noun}")),
            );
        }
    }

    fn on_channel(&self, msg: &HtspMessage, is_update: bool) -> EngineResult<()> {
        let repo = self.store.channels();
        let mut state = self.state.lock();
        if state.phase.is_buffering() {
            let Some(mut channel) = merge_current(Some(&state.channels), repo, msg, is_update)?
            else {
                return Ok(());
            };
            if !is_update {
                state.server_order += 1;
                channel.server_order = state.server_order;
            }
            let count = state.channels.upsert(channel);
            drop(state);
            self.progress(count, CHANNEL_PROGRESS, "channels");
            return Ok(());
        }
        drop(state);

        let Some(mut channel) = merge_current::<Channel, _>(None, repo, msg, is_update)? else {
            return Ok(());
        };
        if channel.server_order == 0 {
            channel.server_order = u32::try_from(repo.count()? + 1).unwrap_or(u32::MAX);
        }
        let icon = channel.icon.clone();
        repo.upsert(channel)?;
        self.load_icon_later(icon);
        Ok(())
    }

    fn on_channel_delete(&self, id: u32) -> EngineResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase.is_buffering() {
                state.channels.remove(id);
            }
        }
        let repo = self.store.channels();
        if let Some(channel) = repo.get_by_id(&id)? {
            repo.remove_by_id(&id)?;
            self.forget_icon(channel.icon());
        }
        Ok(())
    }

    fn on_tag(&self, msg: &HtspMessage, is_update: bool) -> EngineResult<()> {
        let repo = self.store.tags();
        let mut state = self.state.lock();
        if state.phase.is_buffering() {
            let Some(tag) = merge_current(Some(&state.tags), repo, msg, is_update)? else {
                return Ok(());
            };
            let count = state.tags.upsert(tag);
            drop(state);
            self.progress(count, TAG_PROGRESS, "channel tags");
            return Ok(());
        }
        drop(state);

        let Some(tag) = merge_current::<ChannelTag, _>(None, repo, msg, is_update)? else {
            return Ok(());
        };
        self.save_relations([&tag])?;
        let icon = tag.icon.clone();
        repo.upsert(tag)?;
        self.load_icon_later(icon);
        Ok(())
    }

    fn on_tag_delete(&self, id: u32) -> EngineResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase.is_buffering() {
                state.tags.remove(id);
            }
        }
        let repo = self.store.tags();
        if let Some(tag) = repo.get_by_id(&id)? {
            repo.remove_by_id(&id)?;
            self.forget_icon(tag.icon());
        }
        self.store.tag_channels().remove_by_tag(id)?;
        Ok(())
    }

    fn on_recording(&self, msg: &HtspMessage, is_update: bool) -> EngineResult<()> {
        let repo = self.store.recordings();
        let mut state = self.state.lock();
        if state.phase.is_buffering() {
            let Some(recording) = merge_current(Some(&state.recordings), repo, msg, is_update)?
            else {
                return Ok(());
            };
            let count = state.recordings.upsert(recording);
            drop(state);
            self.progress(count, RECORDING_PROGRESS, "recordings");
            return Ok(());
        }
        drop(state);

        if let Some(recording) = merge_current::<Recording, _>(None, repo, msg, is_update)? {
            repo.upsert(recording)?;
        }
        Ok(())
    }

    fn on_recording_delete(&self, id: u32) -> EngineResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase.is_buffering() {
                state.recordings.remove(id);
            }
        }
        self.store.recordings().remove_by_id(&id)?;
        Ok(())
    }

    fn on_event(&self, msg: &HtspMessage, is_update: bool) -> EngineResult<()> {
        let repo = self.store.programs();
        let mut state = self.state.lock();
        if state.phase.is_buffering() {
            if !is_update && state.sync_required && !state.channels_flushed {
                let channels = state.channels.take();
                let saved = buffer::apply(channels.clone(), self.store.channels(), |c| {
                    self.forget_icon(c.icon());
                    Ok(())
                });
                match saved {
                    Ok(applied) => {
                        state.channels_flushed = true;
                        debug!(channels = applied.upserted, "first event received, channels saved");
                    }
                    Err(err) => {
                        warn!(error = %err, "could not save channels early, kept buffered");
                        state.channels.restore(channels);
                    }
                }
            }
            let Some(program) = merge_current(Some(&state.programs), repo, msg, is_update)?
            else {
                return Ok(());
            };
            let count = state.programs.upsert(program);
            drop(state);
            self.progress(count, EVENT_PROGRESS, "program guide events");
            return Ok(());
        }
        drop(state);

        if let Some(program) = merge_current::<Program, _>(None, repo, msg, is_update)? {
            repo.upsert(program)?;
        }
        Ok(())
    }

    fn on_event_delete(&self, id: u32) -> EngineResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase.is_buffering() {
                state.programs.remove(id);
            }
        }
        self.store.programs().remove_by_id(&id)?;
        Ok(())
    }

    fn write_rule<E: Reconcile>(
        &self,
        repo: &dyn Repository<E>,
        msg: &HtspMessage,
        is_update: bool,
    ) -> EngineResult<()> {
        if let Some(rule) = merge_current::<E, _>(None, repo, msg, is_update)? {
            repo.upsert(rule)?;
        }
        Ok(())
    }

    /// Merges the events of a `getEvents` reply onto the stored programs.
    pub(crate) fn programs_from(&self, msg: &HtspMessage) -> EngineResult<Vec<Program>> {
        let repo = self.store.programs();
        let mut programs = Vec::new();
        for entry in msg.messages("events") {
            if let Some(program) = merge_current::<Program, _>(None, repo, entry, false)? {
                programs.push(program);
            }
        }
        Ok(programs)
    }

    fn on_events(&self, msg: &HtspMessage) -> EngineResult<usize> {
        let programs = self.programs_from(msg)?;
        let count = programs.len();
        if count > 0 {
            self.store.programs().upsert_many(programs)?;
        }
        Ok(count)
    }

    /// Read-modify-write of the server status. Every writer outside the
    /// handshake goes through here so concurrent updates never drop fields.
    pub(crate) fn update_status<T>(
        &self,
        change: impl FnOnce(&mut ServerStatus) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let _guard = self.status.lock();
        let mut status = self.store.status().load()?;
        let result = change(&mut status)?;
        self.store.status().save(&status)?;
        Ok(result)
    }

    pub(crate) fn on_system_time(&self, msg: &HtspMessage) -> EngineResult<()> {
        let dst = self.clock.dst_offset_ms();
        self.update_status(|s| {
            apply_system_time(s, msg, dst);
            Ok(())
        })
    }

    pub(crate) fn on_disk_space(&self, msg: &HtspMessage) -> EngineResult<()> {
        self.update_status(|s| {
            apply_disk_space(s, msg);
            Ok(())
        })
    }

    /// Writes the relation rows of `tags` as one `replace` batch.
    fn save_relations<'t>(&self, tags: impl IntoIterator<Item = &'t ChannelTag>) -> EngineResult<()> {
        let relations = self.store.tag_channels();
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for tag in tags {
            let existing: BTreeSet<u32> = relations
                .get_by_tag(tag.id)?
                .into_iter()
                .map(|r| r.channel_id)
                .collect();
            removed.extend(
                existing
                    .difference(&tag.members)
                    .map(|&channel| TagChannel::new(tag.id, channel)),
            );
            added.extend(
                tag.members
                    .difference(&existing)
                    .map(|&channel| TagChannel::new(tag.id, channel)),
            );
        }
        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }
        debug!(added = added.len(), removed = removed.len(), "updating tag relations");
        relations.replace(added, removed)?;
        Ok(())
    }

    fn forget_icon(&self, icon: Option<&str>) {
        if let Some(url) = icon {
            self.icons.remove(url);
        }
    }

    fn load_icon_later(&self, icon: Option<String>) {
        let Some(url) = icon.filter(|u| !u.is_empty()) else {
            return;
        };
        if self.icons.contains(&url) {
            return;
        }
        let icons = self.icons.clone();
        self.pool.execute(move || {
            if let Err(err) = icons.load(&url) {
                warn!(url = %url, error = %err, "could not load icon");
            }
        });
    }

    /// Runs one flush step. A failure is logged and reported, never fatal.
    fn step(&self, name: &str, run: impl FnOnce() -> EngineResult<()>) -> bool {
        match run() {
            Ok(()) => {
                debug!(step = name, "sync step done");
                true
            }
            Err(err) => {
                warn!(step = name, error = %err, "sync step failed");
                self.events.status(
                    SyncStatus::Failed,
                    format!("Could not save {name}"),
                    Some(err.to_string()),
                );
                false
            }
        }
    }

    fn fetch(&self, msg: HtspMessage) -> EngineResult<HtspMessage> {
        self.dispatcher
            .request_blocking(msg, self.config.request_timeout)
    }

    /// Flushes a sync pass. Always ends in [`SyncPhase::Idle`].
    fn complete_sync(&self) {
        let mut pass = {
            let mut state = self.state.lock();
            if !state.phase.is_buffering() {
                debug!("initialSyncCompleted outside a sync pass ignored");
                return;
            }
            std::mem::replace(
                &mut *state,
                SyncState {
                    phase: SyncPhase::SyncDone,
                    ..SyncState::default()
                },
            )
        };
        let sync_required = pass.sync_required;
        let sync_events_required = pass.sync_events_required;
        info!(sync_required, sync_events_required, "initial sync received, saving");
        if sync_required {
            self.events
                .status(SyncStatus::SyncInProgress, "Saving data", None);
        }

        if sync_required {
            let channels = pass.channels.take();
            self.step("channels", || {
                let applied = buffer::apply(channels, self.store.channels(), |c| {
                    self.forget_icon(c.icon());
                    Ok(())
                })?;
                info!(saved = applied.upserted, removed = applied.removed, "channels saved");
                Ok(())
            });

            let tags = pass.tags.take();
            self.step("channel tags", || {
                let finals: Vec<ChannelTag> = buffer::final_states(&tags)
                    .into_values()
                    .flatten()
                    .cloned()
                    .collect();
                let applied = buffer::apply(tags, self.store.tags(), |t| {
                    self.forget_icon(t.icon());
                    self.store.tag_channels().remove_by_tag(t.id)?;
                    Ok(())
                })?;
                self.save_relations(&finals)?;
                info!(saved = applied.upserted, removed = applied.removed, "channel tags saved");
                Ok(())
            });

            self.step("channel icons", || {
                if self.warm_icons()? {
                    Ok(())
                } else {
                    Err(EngineError::Timeout)
                }
            });
        }

        if sync_events_required {
            let programs = pass.programs.take();
            self.step("program guide events", || {
                let applied = buffer::apply(programs, self.store.programs(), |_| Ok(()))?;
                info!(saved = applied.upserted, "program guide events saved");
                Ok(())
            });
        }

        let recordings = pass.recordings.take();
        self.step("recordings", || {
            self.store.recordings().remove_all()?;
            let applied = buffer::apply(recordings, self.store.recordings(), |_| Ok(()))?;
            info!(saved = applied.upserted, "recordings saved");
            Ok(())
        });

        self.fetch_server_data();

        self.step("default profiles", || {
            let defaulter = ProfileDefaulter::new(&*self.store);
            defaulter.ensure_fallbacks()?;
            self.update_status(|status| defaulter.choose_defaults(status))?;
            Ok(())
        });

        let now = self.clock.now();
        self.step("connection", || {
            let mut settings = self.store.settings().load()?;
            settings.last_update = now;
            settings.sync_required = false;
            self.store.settings().save(&settings)?;
            Ok(())
        });

        if sync_required || sync_events_required {
            self.events
                .status(SyncStatus::SyncDone, "Loading data done", None);
        }

        let cutoff = now - EngineConfig::secs(self.config.event_retention);
        self.step("old events", || {
            let removed = self.store.programs().remove_older_than(cutoff)?;
            debug!(removed, cutoff, "old events pruned");
            Ok(())
        });

        self.schedule_incremental();

        let mut current = self.state.lock();
        if current.phase == SyncPhase::SyncDone {
            *current = SyncState::default();
        }
        info!("sync done");
    }

    /// Step 6: secondary metadata. Every request is independent.
    fn fetch_server_data(&self) {
        self.step("disk space", || {
            let reply = self.fetch(requests::get_disk_space())?;
            self.on_disk_space(&reply)
        });
        self.step("system time", || {
            let reply = self.fetch(requests::get_sys_time())?;
            self.on_system_time(&reply)
        });
        self.step("playback profiles", || {
            let reply = self.fetch(requests::get_profiles())?;
            ProfileDefaulter::new(&*self.store).apply_htsp_profiles(&reply)?;
            Ok(())
        });
        self.step("recording profiles", || {
            let reply = self.fetch(requests::get_dvr_configs())?;
            ProfileDefaulter::new(&*self.store).apply_dvr_configs(&reply)?;
            Ok(())
        });

        let htsp_version = self
            .store
            .status()
            .load()
            .map(|s| s.htsp_version)
            .unwrap_or_default();
        if htsp_version >= MIN_API_VERSION {
            self.step("http profiles", || {
                let reply = self.fetch(requests::api("profile/list"))?;
                ProfileDefaulter::new(&*self.store).apply_http_profiles(&reply)?;
                Ok(())
            });
        } else {
            debug!(htsp_version, "server too old for http profiles");
        }
    }

    /// Loads the icon of every stored channel and tag. Returns false if the
    /// batch timed out.
    pub fn warm_icons(&self) -> EngineResult<bool> {
        let mut urls: Vec<String> = self
            .store
            .channels()
            .get_all()?
            .into_iter()
            .filter_map(|c| c.icon)
            .collect();
        urls.extend(self.store.tags().get_all()?.into_iter().filter_map(|t| t.icon));
        debug!(count = urls.len(), "loading icons");
        Ok(self.icons.warm_all(urls))
    }

    fn schedule_incremental(&self) {
        let this = self.this.clone();
        let count = self.config.incremental_event_count;
        let job = self.pool.schedule(self.config.incremental_delay, move || {
            let Some(coordinator) = this.upgrade() else {
                return;
            };
            match coordinator.get_more_events(count) {
                Ok(saved) => debug!(saved, "incremental event fetch done"),
                Err(err) => warn!(error = %err, "incremental event fetch failed"),
            }
        });
        if let Some(previous) = self.incremental.lock().replace(job) {
            previous.cancel();
        }
    }

    /// Requests `count` further events for every channel and saves all
    /// replies in one batch. Returns the number of events saved.
    pub fn get_more_events(&self, count: u32) -> EngineResult<usize> {
        if !self.dispatcher.is_attached() {
            return Err(EngineError::NotConnected);
        }
        let programs = self.store.programs();
        let mut queries = Vec::new();
        for channel in self.store.channels().get_all()? {
            let start = match programs.last_for_channel(channel.id)? {
                Some(last) => last.next_event_id,
                None if channel.next_event_id != 0 => channel.next_event_id,
                None => channel.event_id,
            };
            if start == 0 {
                debug!(channel = channel.id, "no event to continue from");
                continue;
            }
            queries.push(EventQuery::following(channel.id, start, count));
        }

        let replies = Arc::new(Mutex::new(Vec::new()));
        let countdown = Countdown::new(queries.len());
        for query in &queries {
            let collected = replies.clone();
            let arrived = countdown.clone();
            let sent = self
                .dispatcher
                .request(requests::get_events(query), move |reply| {
                    collected.lock().push(reply);
                    arrived.arrive();
                });
            if let Err(err) = sent {
                warn!(channel = ?query.channel_id, error = %err, "could not request events");
                countdown.arrive();
            }
        }
        if !countdown.wait(self.config.batch_timeout) {
            warn!("not every channel answered in time");
        }

        let replies = std::mem::take(&mut *replies.lock());
        let mut merged = Vec::new();
        for reply in &replies {
            merged.extend(self.programs_from(reply)?);
        }
        let saved = merged.len();
        if saved > 0 {
            programs.upsert_many(merged)?;
        }
        info!(channels = queries.len(), saved, "loaded more events");
        Ok(saved)
    }
}

impl PushHandler for SyncCoordinator {
    fn on_push(&self, push: Push) {
        let method = push.method();
        if let Err(err) = self.handle(push) {
            warn!(method, error = %err, "could not handle push");
        }
    }
}

impl ConnectionListener for SyncCoordinator {
    fn on_authenticated(&self) {
        if let Err(err) = self.start_sync() {
            warn!(error = %err, "could not start sync");
            self.events.status(
                SyncStatus::Failed,
                "Could not start sync",
                Some(err.to_string()),
            );
        }
    }

    fn on_disconnected(&self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::icons::IconFetcher;
    use crate::pool::WorkerPool;
    use crate::transport::{Link, MockTransport, Transport};
    use crate::events::EngineEvent;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tvhsync_protocol::Value;
    use tvhsync_store::{
        Channel, ChannelTag, ConnectionSettings, MemoryStore, ProfileRepository, ProgramRepository,
        Recording, Repository, SeriesRecordingRule, SettingsRepository, StatusRepository, Store,
        StoreError, StoreResult, TagChannelRepository, TimerRecordingRule,
    };

    const NOW: i64 = 1_700_000_000;

    struct NoFetch;

    impl IconFetcher for NoFetch {
        fn fetch(&self, _source: &str) -> EngineResult<Vec<u8>> {
            Err(EngineError::icon("offline"))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        _pool: WorkerPool,
        _link: Arc<dyn Link>,
        transport: Arc<MockTransport>,
        store: Arc<MemoryStore>,
        icons: Arc<IconCache>,
        events: EventSender,
        coordinator: Arc<SyncCoordinator>,
    }

    /// Memory store whose channel writes can be switched off.
    struct FlakyStore {
        inner: Arc<MemoryStore>,
        channels: FlakyChannels,
    }

    struct FlakyChannels {
        inner: Arc<MemoryStore>,
        failing: AtomicBool,
    }

    impl FlakyChannels {
        fn check(&self) -> StoreResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".into()));
            }
            Ok(())
        }
    }

    impl Repository<Channel> for FlakyChannels {
        fn get_all(&self) -> StoreResult<Vec<Channel>> {
            self.inner.channels().get_all()
        }

        fn get_by_id(&self, id: &u32) -> StoreResult<Option<Channel>> {
            self.inner.channels().get_by_id(id)
        }

        fn upsert(&self, entity: Channel) -> StoreResult<()> {
            self.check()?;
            self.inner.channels().upsert(entity)
        }

        fn upsert_many(&self, entities: Vec<Channel>) -> StoreResult<()> {
            self.check()?;
            self.inner.channels().upsert_many(entities)
        }

        fn remove_by_id(&self, id: &u32) -> StoreResult<bool> {
            self.check()?;
            self.inner.channels().remove_by_id(id)
        }

        fn remove_all(&self) -> StoreResult<()> {
            self.check()?;
            self.inner.channels().remove_all()
        }

        fn count(&self) -> StoreResult<usize> {
            self.inner.channels().count()
        }
    }

    impl Store for FlakyStore {
        fn channels(&self) -> &dyn Repository<Channel> {
            &self.channels
        }
        fn tags(&self) -> &dyn Repository<ChannelTag> {
            self.inner.tags()
        }
        fn tag_channels(&self) -> &dyn TagChannelRepository {
            self.inner.tag_channels()
        }
        fn programs(&self) -> &dyn ProgramRepository {
            self.inner.programs()
        }
        fn recordings(&self) -> &dyn Repository<Recording> {
            self.inner.recordings()
        }
        fn series_rules(&self) -> &dyn Repository<SeriesRecordingRule> {
            self.inner.series_rules()
        }
        fn timer_rules(&self) -> &dyn Repository<TimerRecordingRule> {
            self.inner.timer_rules()
        }
        fn profiles(&self) -> &dyn ProfileRepository {
            self.inner.profiles()
        }
        fn settings(&self) -> &dyn SettingsRepository {
            self.inner.settings()
        }
        fn status(&self) -> &dyn StatusRepository {
            self.inner.status()
        }
    }

    fn fixture(settings: ConnectionSettings) -> Fixture {
        let store = Arc::new(MemoryStore::new(settings));
        fixture_on(store.clone(), store)
    }

    /// Wires a coordinator onto `backing`; `store` is the memory store
    /// underneath it, for assertions.
    fn fixture_on(store: Arc<MemoryStore>, backing: Arc<dyn Store>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(4).unwrap();
        let transport = Arc::new(MockTransport::silent());
        let settings = store.settings().load().unwrap();
        let link = transport.open(&settings).unwrap();
        let (dispatcher, _lane) = Dispatcher::new(pool.handle());
        dispatcher.attach(link.clone());
        let config = EngineConfig::new()
            .with_icon_dir(dir.path())
            .with_request_timeout(Duration::from_millis(50))
            .with_batch_timeout(Duration::from_millis(200))
            .with_incremental_delay(Duration::from_secs(600));
        let icons = Arc::new(IconCache::new(
            &config,
            backing.clone(),
            pool.handle(),
            Arc::new(NoFetch),
            Arc::new(NoFetch),
        ));
        let events = EventSender::new(64);
        let coordinator = SyncCoordinator::new(
            config,
            Arc::new(ManualClock::new(NOW)),
            backing,
            Arc::new(dispatcher),
            icons.clone(),
            events.clone(),
            pool.handle(),
        );
        Fixture {
            _dir: dir,
            _pool: pool,
            _link: link,
            transport,
            store,
            icons,
            events,
            coordinator,
        }
    }

    fn forced() -> Fixture {
        fixture(ConnectionSettings::new("test", "tvh.local", 9982))
    }

    fn recent() -> Fixture {
        fixture(ConnectionSettings {
            sync_required: false,
            last_update: NOW - 60,
            ..ConnectionSettings::new("test", "tvh.local", 9982)
        })
    }

    fn channel_add(id: u32, name: &str) -> Push {
        Push::ChannelAdd(
            HtspMessage::request("channelAdd")
                .with("channelId", id)
                .with("channelName", name)
                .with("channelNumber", i64::from(id)),
        )
    }

    fn tag(method: &str, id: u32, members: &[u32]) -> HtspMessage {
        let members: Vec<Value> = members.iter().map(|&m| Value::from(m)).collect();
        HtspMessage::request(method)
            .with("tagId", id)
            .with("tagName", "News")
            .with("members", members)
    }

    fn dvr_add(id: u32) -> Push {
        Push::DvrEntryAdd(
            HtspMessage::request("dvrEntryAdd")
                .with("id", id)
                .with("channel", 101u32)
                .with("title", format!("rec {id}")),
        )
    }

    fn event_add(id: u32, channel: u32, stop: i64) -> Push {
        Push::EventAdd(
            HtspMessage::request("eventAdd")
                .with("eventId", id)
                .with("channelId", channel)
                .with("start", stop - 1800)
                .with("stop", stop),
        )
    }

    fn relations(store: &MemoryStore, tag: u32) -> Vec<u32> {
        store
            .tag_channels()
            .get_by_tag(tag)
            .unwrap()
            .into_iter()
            .map(|r| r.channel_id)
            .collect()
    }

    #[test]
    fn forced_sync_requests_epg_window() {
        let f = forced();
        f.coordinator.start_sync().unwrap();
        assert_eq!(f.coordinator.phase(), SyncPhase::SyncInProgress);

        let sent = f.transport.sent();
        let request = sent.last().unwrap();
        assert_eq!(request.method(), Some("enableAsyncMetadata"));
        assert_eq!(request.i64("epg"), Some(1));
        assert_eq!(request.i64("epgMaxTime"), Some(NOW + 24 * 3600));
        assert_eq!(request.i64("lastUpdate"), Some(NOW - 12 * 3600));
    }

    #[test]
    fn recent_sync_omits_epg_fields() {
        let f = recent();
        f.coordinator.start_sync().unwrap();

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        assert_eq!(request.method(), Some("enableAsyncMetadata"));
        assert!(!request.contains("epg"));
        assert!(!request.contains("epgMaxTime"));
        assert!(!request.contains("lastUpdate"));
    }

    #[test]
    fn stale_sync_requests_events_only() {
        let f = fixture(ConnectionSettings {
            sync_required: false,
            last_update: NOW - 25 * 3600,
            ..ConnectionSettings::default()
        });
        f.coordinator.start_sync().unwrap();
        assert_eq!(f.transport.sent()[0].i64("epg"), Some(1));

        f.coordinator.on_push(channel_add(101, "One"));
        f.coordinator.on_push(event_add(900, 101, NOW + 3600));
        f.coordinator.on_push(Push::InitialSyncCompleted);

        assert_eq!(f.store.channels().count().unwrap(), 0);
        assert_eq!(f.store.programs().count().unwrap(), 1);
    }

    #[test]
    fn pushes_are_buffered_until_completion() {
        let f = forced();
        f.coordinator.start_sync().unwrap();

        for (id, name) in [(101, "One"), (102, "Two"), (103, "Three")] {
            f.coordinator.on_push(channel_add(id, name));
        }
        f.coordinator.on_push(Push::TagAdd(tag("tagAdd", 7, &[101, 102])));
        assert_eq!(f.store.channels().count().unwrap(), 0);
        assert_eq!(f.store.tags().count().unwrap(), 0);

        f.coordinator.on_push(Push::InitialSyncCompleted);

        assert_eq!(f.coordinator.phase(), SyncPhase::Idle);
        let channels = f.store.channels().get_all().unwrap();
        let orders: Vec<u32> = channels.iter().map(|c| c.server_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(f.store.tags().count().unwrap(), 1);
        assert_eq!(relations(&f.store, 7), vec![101, 102]);

        let settings = f.store.settings().load().unwrap();
        assert!(!settings.sync_required);
        assert_eq!(settings.last_update, NOW);
    }

    #[test]
    fn update_merges_onto_buffered_record() {
        let f = forced();
        f.coordinator.start_sync().unwrap();
        f.coordinator.on_push(channel_add(101, "One"));
        f.coordinator.on_push(Push::ChannelUpdate(
            HtspMessage::request("channelUpdate")
                .with("channelId", 101u32)
                .with("channelIcon", "imagecache/1"),
        ));
        f.coordinator.on_push(Push::InitialSyncCompleted);

        let channel = f.store.channels().get_by_id(&101).unwrap().unwrap();
        assert_eq!(channel.name.as_deref(), Some("One"));
        assert_eq!(channel.icon.as_deref(), Some("imagecache/1"));
        assert_eq!(channel.server_order, 1);
    }

    #[test]
    fn first_event_flushes_channels() {
        let f = forced();
        f.coordinator.start_sync().unwrap();
        f.coordinator.on_push(channel_add(101, "One"));
        f.coordinator.on_push(event_add(900, 101, NOW + 3600));

        assert_eq!(f.store.channels().count().unwrap(), 1);
        assert_eq!(f.store.programs().count().unwrap(), 0);
    }

    #[test]
    fn failed_early_channel_save_keeps_channels_buffered() {
        let store = Arc::new(MemoryStore::new(ConnectionSettings::new("test", "tvh.local", 9982)));
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            channels: FlakyChannels {
                inner: store.clone(),
                failing: AtomicBool::new(true),
            },
        });
        let f = fixture_on(store, flaky.clone());
        f.coordinator.start_sync().unwrap();
        f.coordinator.on_push(channel_add(101, "One"));
        f.coordinator.on_push(event_add(900, 101, NOW + 3600));
        assert_eq!(f.store.channels().count().unwrap(), 0);

        flaky.channels.failing.store(false, Ordering::SeqCst);
        f.coordinator.on_push(event_add(901, 101, NOW + 7200));
        let channel = f.store.channels().get_by_id(&101).unwrap().unwrap();
        assert_eq!(channel.name.as_deref(), Some("One"));

        f.coordinator.on_push(Push::InitialSyncCompleted);
        assert_eq!(f.store.channels().count().unwrap(), 1);
        assert_eq!(f.store.programs().count().unwrap(), 2);
    }

    #[test]
    fn failed_save_step_reports_failure() {
        let f = forced();
        let mut rx = f.events.subscribe();
        assert!(!f.coordinator.step("channels", || Err(EngineError::Timeout)));

        let event = rx.try_recv().unwrap();
        match event {
            EngineEvent::Status { state, message, details } => {
                assert_eq!(state, SyncStatus::Failed);
                assert_eq!(message, "Could not save channels");
                assert!(details.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn concurrent_status_writers_keep_both_fields() {
        let f = recent();
        let disk = {
            let coordinator = f.coordinator.clone();
            std::thread::spawn(move || {
                for i in 0..200i64 {
                    let reply = HtspMessage::request("getDiskSpace")
                        .with("freediskspace", i)
                        .with("totaldiskspace", 1000i64);
                    coordinator.on_disk_space(&reply).unwrap();
                }
            })
        };
        let time = {
            let coordinator = f.coordinator.clone();
            std::thread::spawn(move || {
                for i in 0..200i64 {
                    let reply = HtspMessage::request("getSysTime")
                        .with("time", NOW + i)
                        .with("gmtoffset", 0i64);
                    coordinator.on_system_time(&reply).unwrap();
                }
            })
        };
        disk.join().unwrap();
        time.join().unwrap();

        let status = f.store.status().load().unwrap();
        assert_eq!(status.free_disk_space, 199);
        assert_eq!(status.total_disk_space, 1000);
        assert_eq!(status.time, NOW + 199);
    }

    #[test]
    fn channels_are_additive_without_forced_sync() {
        let f = recent();
        f.store
            .channels()
            .upsert(Channel {
                id: 101,
                name: Some("Kept".into()),
                ..Channel::default()
            })
            .unwrap();
        f.coordinator.start_sync().unwrap();
        f.coordinator.on_push(channel_add(102, "Ignored"));
        f.coordinator.on_push(Push::InitialSyncCompleted);

        let ids: Vec<u32> = f.store.channels().get_all().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![101]);
    }

    #[test]
    fn recording_sync_leaves_server_set() {
        let f = recent();
        for id in [1, 2, 3] {
            f.store
                .recordings()
                .upsert(Recording {
                    id,
                    ..Recording::default()
                })
                .unwrap();
        }
        f.coordinator.start_sync().unwrap();
        f.coordinator.on_push(dvr_add(2));
        f.coordinator.on_push(dvr_add(4));
        f.coordinator.on_push(Push::InitialSyncCompleted);

        let ids: Vec<u32> = f.store.recordings().get_all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn live_tag_updates_replace_relations() {
        let f = recent();
        f.coordinator.on_push(Push::TagAdd(tag("tagAdd", 7, &[1, 2, 3])));
        assert_eq!(relations(&f.store, 7), vec![1, 2, 3]);

        f.coordinator.on_push(Push::TagUpdate(tag("tagUpdate", 7, &[2, 3, 4])));
        assert_eq!(relations(&f.store, 7), vec![2, 3, 4]);
        assert_eq!(f.store.tag_channels().count().unwrap(), 3);
    }

    #[test]
    fn live_update_for_unknown_record_is_skipped() {
        let f = recent();
        f.coordinator.on_push(Push::ChannelUpdate(
            HtspMessage::request("channelUpdate")
                .with("channelId", 55u32)
                .with("channelName", "Ghost"),
        ));
        f.coordinator.on_push(Push::DvrEntryUpdate(
            HtspMessage::request("dvrEntryUpdate").with("id", 9u32),
        ));
        assert_eq!(f.store.channels().count().unwrap(), 0);
        assert_eq!(f.store.recordings().count().unwrap(), 0);
    }

    #[test]
    fn tag_delete_removes_icon_and_relations() {
        let f = recent();
        let url = "imagecache/3";
        f.coordinator.on_push(Push::TagAdd(
            tag("tagAdd", 7, &[1, 2]).with("tagIcon", url),
        ));
        std::fs::write(f.icons.path_for(url), b"png").unwrap();

        f.coordinator.on_push(Push::TagDelete(7));

        assert_eq!(f.store.tags().count().unwrap(), 0);
        assert!(relations(&f.store, 7).is_empty());
        assert!(!f.icons.contains(url));
    }

    #[test]
    fn completion_prunes_old_events() {
        let f = recent();
        f.store
            .programs()
            .upsert_many(vec![
                Program {
                    id: 1,
                    channel_id: 101,
                    stop: NOW - 2 * 24 * 3600,
                    ..Program::default()
                },
                Program {
                    id: 2,
                    channel_id: 101,
                    stop: NOW + 3600,
                    ..Program::default()
                },
            ])
            .unwrap();
        f.coordinator.start_sync().unwrap();
        f.coordinator.on_push(Push::InitialSyncCompleted);

        let ids: Vec<u32> = f.store.programs().get_all().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn secondary_pushes_update_status() {
        let f = recent();
        f.coordinator.on_push(Push::DiskSpace(
            HtspMessage::request("getDiskSpace")
                .with("freediskspace", 10i64)
                .with("totaldiskspace", 20i64),
        ));
        f.coordinator.on_push(Push::SystemTime(
            HtspMessage::request("getSysTime")
                .with("time", NOW)
                .with("gmtoffset", 60i64),
        ));

        let status = f.store.status().load().unwrap();
        assert_eq!(status.free_disk_space, 10);
        assert_eq!(status.total_disk_space, 20);
        assert_eq!(status.gmt_offset, 3_600_000);
        assert_eq!(status.time, NOW);
    }

    #[test]
    fn completion_outside_sync_is_ignored() {
        let f = recent();
        f.coordinator.on_push(Push::InitialSyncCompleted);
        assert!(f.transport.sent().is_empty());
        assert_eq!(f.store.settings().load().unwrap().last_update, NOW - 60);
    }

    #[test]
    fn reset_drops_buffers() {
        let f = forced();
        f.coordinator.start_sync().unwrap();
        f.coordinator.on_push(channel_add(101, "One"));
        f.coordinator.on_disconnected();

        assert_eq!(f.coordinator.phase(), SyncPhase::Idle);
        f.coordinator.on_push(Push::InitialSyncCompleted);
        assert_eq!(f.store.channels().count().unwrap(), 0);
    }
}
