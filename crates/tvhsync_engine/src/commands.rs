//! Command surface.
//!
//! Every command first waits, bounded by the auth timeout, for the
//! connection to be authenticated. If it is not, the command fails with
//! [`EngineError::NotAuthenticated`] without sending anything.

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::profiles::ProfileDefaulter;
use crate::reconcile::merge;
use tracing::{debug, warn};
use tvhsync_protocol::{
    requests, AutorecParams, DvrEntryParams, EpgQuery, EventQuery, HtspMessage, ProtocolError,
    RemoveKind, TicketTarget, TimerecParams, MIN_RULE_UPDATE_VERSION,
};
use tvhsync_store::{Channel, Program, ServerStatus};

/// A streaming ticket issued by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    /// Stream path.
    pub path: String,
    /// Ticket to append to the path.
    pub ticket: String,
}

impl Engine {
    /// Opens a new connection, dropping any previous one.
    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Connects unless already connected.
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.connection.close();
    }

    fn authenticated(&self) -> EngineResult<()> {
        if self.connection.wait_authenticated(self.config.auth_timeout) {
            Ok(())
        } else {
            debug!(state = ?self.connection.state(), "command refused, not authenticated");
            Err(EngineError::NotAuthenticated)
        }
    }

    fn call(&self, msg: HtspMessage) -> EngineResult<HtspMessage> {
        self.authenticated()?;
        self.dispatcher
            .request_blocking(msg, self.config.request_timeout)
    }

    /// Sends a command whose reply carries `success`/`error` and broadcasts
    /// the outcome.
    fn command(&self, name: &str, msg: HtspMessage) -> EngineResult<HtspMessage> {
        let reply = self.call(msg)?;
        match reply.command_result() {
            Ok(()) => {
                self.events.outcome(name, None);
                Ok(reply)
            }
            Err(ProtocolError::Rejected(error)) => {
                warn!(command = name, error = %error, "command rejected");
                self.events.outcome(name, Some(error.clone()));
                Err(EngineError::ServerRejected(error))
            }
            Err(other) => {
                self.events.outcome(name, Some(other.to_string()));
                Err(other.into())
            }
        }
    }

    fn htsp_version(&self) -> EngineResult<u32> {
        Ok(self.store.status().load()?.htsp_version)
    }

    /// Refreshes the disk space figures.
    pub fn get_disk_space(&self) -> EngineResult<ServerStatus> {
        let reply = self.call(requests::get_disk_space())?;
        self.coordinator.on_disk_space(&reply)?;
        Ok(self.store.status().load()?)
    }

    /// Refreshes the server time and GMT offset.
    pub fn get_system_time(&self) -> EngineResult<ServerStatus> {
        let reply = self.call(requests::get_sys_time())?;
        self.coordinator.on_system_time(&reply)?;
        Ok(self.store.status().load()?)
    }

    /// Fetches one channel. The result is not saved; its icon is loaded in
    /// the background.
    pub fn get_channel(&self, channel_id: u32) -> EngineResult<Option<Channel>> {
        let reply = self.call(requests::get_channel(channel_id))?;
        if let Some(error) = reply.str("error") {
            return Err(EngineError::ServerRejected(error.to_string()));
        }
        let current = self.store.channels().get_by_id(&channel_id)?;
        let channel = match current {
            Some(channel) => merge(&reply, Some(channel), true)?,
            None if reply.contains("channelId") => merge(&reply, None, false)?,
            None => None,
        };
        if let Some(url) = channel.as_ref().and_then(|c| c.icon.clone()) {
            let icons = self.icons.clone();
            self.jobs.execute(move || {
                if let Err(err) = icons.load(&url) {
                    warn!(url = %url, error = %err, "could not load channel icon");
                }
            });
        }
        Ok(channel)
    }

    /// Fetches one event and saves it.
    pub fn get_event(&self, event_id: u32) -> EngineResult<Option<Program>> {
        let reply = self.call(requests::get_event(event_id))?;
        if let Some(error) = reply.str("error") {
            return Err(EngineError::ServerRejected(error.to_string()));
        }
        if !reply.contains("eventId") {
            return Ok(None);
        }
        let current = self.store.programs().get_by_id(&event_id)?;
        let program = merge(&reply, current, false)?;
        if let Some(program) = &program {
            self.store.programs().upsert(program.clone())?;
        }
        Ok(program)
    }

    /// Fetches events and saves them.
    pub fn get_events(&self, query: &EventQuery) -> EngineResult<Vec<Program>> {
        let reply = self.call(requests::get_events(query))?;
        let programs = self.coordinator.programs_from(&reply)?;
        if !programs.is_empty() {
            self.store.programs().upsert_many(programs.clone())?;
        }
        Ok(programs)
    }

    /// Searches the EPG. Returns the ids of matching events.
    pub fn epg_query(&self, query: &EpgQuery) -> EngineResult<Vec<u32>> {
        let reply = self.call(requests::epg_query(query))?;
        if let Some(error) = reply.str("error") {
            return Err(EngineError::ServerRejected(error.to_string()));
        }
        if reply.contains("events") {
            return Ok(reply
                .messages("events")
                .into_iter()
                .filter_map(|event| event.u32("eventId"))
                .collect());
        }
        Ok(reply.u32_list("eventIds").unwrap_or_default())
    }

    /// Schedules a recording. Returns the new recording id.
    pub fn add_dvr_entry(&self, params: &DvrEntryParams) -> EngineResult<Option<u32>> {
        let reply = self.command("add_dvr_entry", requests::add_dvr_entry(params))?;
        Ok(reply.u32("id"))
    }

    /// Changes a scheduled recording.
    pub fn update_dvr_entry(&self, id: u32, params: &DvrEntryParams) -> EngineResult<()> {
        self.command("update_dvr_entry", requests::update_dvr_entry(id, params))
            .map(drop)
    }

    /// Cancels, stops or deletes a recording.
    pub fn remove_dvr_entry(&self, id: u32, kind: RemoveKind) -> EngineResult<()> {
        self.command("remove_dvr_entry", requests::remove_dvr_entry(id, kind))
            .map(drop)
    }

    /// Adds a series recording rule. Returns the new rule id.
    pub fn add_autorec_entry(&self, params: &AutorecParams) -> EngineResult<Option<String>> {
        let reply = self.command("add_autorec_entry", requests::add_autorec_entry(params))?;
        Ok(reply.string("id"))
    }

    /// Changes a series recording rule. Returns the id the rule has
    /// afterwards.
    ///
    /// Servers older than HTSP 25 cannot update rules; there the rule is
    /// deleted and, if that worked, added again with the new values.
    pub fn update_autorec_entry(
        &self,
        id: &str,
        params: &AutorecParams,
    ) -> EngineResult<Option<String>> {
        if self.htsp_version()? >= MIN_RULE_UPDATE_VERSION {
            self.command(
                "update_autorec_entry",
                requests::update_autorec_entry(id, params),
            )?;
            return Ok(Some(id.to_string()));
        }
        debug!(id, "emulating rule update with delete and add");
        self.delete_autorec_entry(id)?;
        self.add_autorec_entry(params)
    }

    /// Deletes a series recording rule.
    pub fn delete_autorec_entry(&self, id: &str) -> EngineResult<()> {
        self.command("delete_autorec_entry", requests::delete_autorec_entry(id))
            .map(drop)
    }

    /// Adds a timer recording rule. Returns the new rule id.
    pub fn add_timerec_entry(&self, params: &TimerecParams) -> EngineResult<Option<String>> {
        let reply = self.command("add_timerec_entry", requests::add_timerec_entry(params))?;
        Ok(reply.string("id"))
    }

    /// Changes a timer recording rule, see
    /// [`update_autorec_entry`](Self::update_autorec_entry).
    pub fn update_timerec_entry(
        &self,
        id: &str,
        params: &TimerecParams,
    ) -> EngineResult<Option<String>> {
        if self.htsp_version()? >= MIN_RULE_UPDATE_VERSION {
            self.command(
                "update_timerec_entry",
                requests::update_timerec_entry(id, params),
            )?;
            return Ok(Some(id.to_string()));
        }
        debug!(id, "emulating rule update with delete and add");
        self.delete_timerec_entry(id)?;
        self.add_timerec_entry(params)
    }

    /// Deletes a timer recording rule.
    pub fn delete_timerec_entry(&self, id: &str) -> EngineResult<()> {
        self.command("delete_timerec_entry", requests::delete_timerec_entry(id))
            .map(drop)
    }

    /// Requests a streaming ticket and broadcasts it.
    pub fn get_ticket(&self, target: TicketTarget) -> EngineResult<Ticket> {
        let reply = self.call(requests::get_ticket(target))?;
        if let Some(error) = reply.str("error") {
            return Err(EngineError::ServerRejected(error.to_string()));
        }
        let ticket = Ticket {
            path: reply.require_str("path")?.to_string(),
            ticket: reply.require_str("ticket")?.to_string(),
        };
        self.events.ticket(&ticket.path, &ticket.ticket);
        Ok(ticket)
    }

    /// Fetches the HTSP playback profiles. Returns how many were new.
    pub fn get_profiles(&self) -> EngineResult<usize> {
        let reply = self.call(requests::get_profiles())?;
        ProfileDefaulter::new(&*self.store).apply_htsp_profiles(&reply)
    }

    /// Fetches the recording profiles. Returns how many were received.
    pub fn get_dvr_configs(&self) -> EngineResult<usize> {
        let reply = self.call(requests::get_dvr_configs())?;
        ProfileDefaulter::new(&*self.store).apply_dvr_configs(&reply)
    }

    /// Fetches `count` further events for every channel.
    pub fn get_more_events(&self, count: u32) -> EngineResult<usize> {
        self.authenticated()?;
        self.coordinator.get_more_events(count)
    }

    /// Loads the icon of every channel and tag. Returns false if the batch
    /// timed out.
    pub fn load_channel_icons(&self) -> EngineResult<bool> {
        self.authenticated()?;
        self.coordinator.warm_icons()
    }
}
