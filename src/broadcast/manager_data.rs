//! Broadcast sink bookkeeping: per-source BIS sync targets and the
//! manager-wide paused and pending states.

use heapless::Vec;

use crate::DongleError;
use crate::constants::MAX_BROADCAST_SOURCES;

use super::bis_sync::BisSyncState;

/// State kept for one broadcast source added by an assistant
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BroadcastSourceRecord {
    source_id: u8,
    /// Desired sync state used when syncing to the BIG
    target: BisSyncState,
    /// Sync state requested by the assistant in its last add or modify
    requested: BisSyncState,
    sync_to_bis_no_preference: bool,
}

impl BroadcastSourceRecord {
    /// Empty record for `source_id`
    #[must_use]
    pub const fn new(source_id: u8) -> Self {
        Self {
            source_id,
            target: BisSyncState::new(),
            requested: BisSyncState::new(),
            sync_to_bis_no_preference: false,
        }
    }

    /// Scan delegator source id
    #[must_use]
    pub const fn source_id(&self) -> u8 {
        self.source_id
    }

    /// Target sync state
    #[must_use]
    pub const fn target(&self) -> &BisSyncState {
        &self.target
    }

    /// Requested sync state
    #[must_use]
    pub const fn requested(&self) -> &BisSyncState {
        &self.requested
    }

    /// Set an explicit target. Clears the no-preference flag.
    ///
    /// # Errors
    ///
    /// See [`BisSyncState::set`].
    pub fn set_target(&mut self, values: &[u32]) -> Result<(), DongleError> {
        self.target.set(values)?;
        self.sync_to_bis_no_preference = false;
        Ok(())
    }

    /// Stop syncing to any BIS of this source
    pub fn set_target_no_sync(&mut self) {
        self.target.set_no_sync();
    }

    /// Let the next BIGInfo report decide
    pub fn set_target_no_preference(&mut self) {
        self.target.set_no_preference();
    }

    /// Drop the target
    pub fn reset_target(&mut self) {
        self.target.reset();
    }

    /// Store the state an assistant asked for
    ///
    /// # Errors
    ///
    /// See [`BisSyncState::set`].
    pub fn set_requested(&mut self, values: &[u32]) -> Result<(), DongleError> {
        self.requested.set(values)
    }

    /// Forget the assistant's request
    pub fn reset_requested(&mut self) {
        self.requested.reset();
    }

    /// Copy the requested state into the target
    pub fn apply_requested(&mut self) {
        self.target = self.requested.clone();
        self.sync_to_bis_no_preference = false;
    }

    /// Whether sync targets were picked without an assistant preference
    #[must_use]
    pub const fn sync_to_bis_no_preference(&self) -> bool {
        self.sync_to_bis_no_preference
    }

    /// Mark whether the target was chosen without assistant preference
    pub fn set_sync_to_bis_no_preference(&mut self, value: bool) {
        self.sync_to_bis_no_preference = value;
    }

    /// Requested and target states collapse to different values
    #[must_use]
    pub fn is_bis_sync_changed(&self) -> bool {
        self.requested.combined_value() != self.target.combined_value()
    }
}

/// Manager-wide broadcast sink state
#[derive(Debug, Default)]
pub struct BroadcastManagerData {
    sources: Vec<BroadcastSourceRecord, MAX_BROADCAST_SOURCES>,
    paused_source_id: Option<u8>,
    paused: Option<BisSyncState>,
    pending: Option<BisSyncState>,
}

impl BroadcastManagerData {
    /// No sources, nothing paused or pending
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sources: Vec::new(),
            paused_source_id: None,
            paused: None,
            pending: None,
        }
    }

    /// Record for `source_id`, created if missing
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::QueueFull`] when [`MAX_BROADCAST_SOURCES`] records exist.
    pub fn add_source(&mut self, source_id: u8) -> Result<&mut BroadcastSourceRecord, DongleError> {
        let index = match self.sources.iter().position(|s| s.source_id == source_id) {
            Some(index) => index,
            None => {
                self.sources
                    .push(BroadcastSourceRecord::new(source_id))
                    .map_err(|_| DongleError::QueueFull)?;
                self.sources.len() - 1
            }
        };
        Ok(&mut self.sources[index])
    }

    /// Forget `source_id`. A paused state for it is dropped as well.
    pub fn remove_source(&mut self, source_id: u8) -> Option<BroadcastSourceRecord> {
        let index = self.sources.iter().position(|s| s.source_id == source_id)?;
        if self.paused_source_id == Some(source_id) {
            self.reset_paused();
        }
        Some(self.sources.swap_remove(index))
    }

    /// Record for `source_id`
    #[must_use]
    pub fn source(&self, source_id: u8) -> Option<&BroadcastSourceRecord> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// Record for `source_id`, mutable
    pub fn source_mut(&mut self, source_id: u8) -> Option<&mut BroadcastSourceRecord> {
        self.sources.iter_mut().find(|s| s.source_id == source_id)
    }

    /// Every known source
    pub fn sources(&self) -> impl Iterator<Item = &BroadcastSourceRecord> {
        self.sources.iter()
    }

    /// Store the state being synced to until the BIG sync completes
    pub fn set_pending(&mut self, state: &BisSyncState) {
        self.pending = Some(state.clone());
    }

    /// Pending state, if a sync is in flight
    #[must_use]
    pub const fn pending(&self) -> Option<&BisSyncState> {
        self.pending.as_ref()
    }

    /// BIG sync finished. There must be a pending state.
    pub fn reset_pending(&mut self) {
        debug_assert!(self.pending.is_some(), "no pending BIS sync state to reset");
        self.pending = None;
    }

    /// Remember what `source_id` was synced to before a pause. Any previous
    /// paused state must have been reset.
    pub fn set_paused(&mut self, source_id: u8, state: &BisSyncState) {
        debug_assert!(self.paused.is_none(), "paused BIS sync state was not reset");
        self.paused_source_id = Some(source_id);
        self.paused = Some(state.clone());
    }

    /// Forget the paused state
    pub fn reset_paused(&mut self) {
        self.paused_source_id = None;
        self.paused = None;
    }

    /// Source paused by [`BroadcastManagerData::pause_source`]
    #[must_use]
    pub const fn paused_source_id(&self) -> Option<u8> {
        self.paused_source_id
    }

    /// Paused state, if any
    #[must_use]
    pub const fn paused(&self) -> Option<&BisSyncState> {
        self.paused.as_ref()
    }

    /// Pause `source_id`: save its target and stop syncing. Returns `false`
    /// if the source is unknown, in which case any old paused state is dropped.
    pub fn pause_source(&mut self, source_id: u8) -> bool {
        self.reset_paused();
        let Some(target) = self.source(source_id).map(|s| s.target.clone()) else {
            return false;
        };
        self.set_paused(source_id, &target);
        if let Some(source) = self.source_mut(source_id) {
            source.set_target_no_sync();
        }
        true
    }

    /// Resume the paused source, restoring its target. Returns the id of the
    /// resumed source.
    pub fn take_paused(&mut self) -> Option<u8> {
        let source_id = self.paused_source_id.take()?;
        let state = self.paused.take().unwrap_or_default();
        let source = self.source_mut(source_id)?;
        source.target = state;
        source.sync_to_bis_no_preference = false;
        Some(source_id)
    }
}
