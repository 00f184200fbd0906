//! Per-subgroup BIS sync bitmasks.

use heapless::Vec;

use crate::DongleError;
use crate::constants::{BIS_SYNC_NO_PREFERENCE, MAX_SUBGROUPS};

/// BIS sync bitmask of every subgroup of a broadcast source.
///
/// The number of subgroups is the length of the mask list, so an empty state
/// has no subgroups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BisSyncState {
    bis_sync: Vec<u32, MAX_SUBGROUPS>,
}

impl BisSyncState {
    /// No subgroups
    #[must_use]
    pub const fn new() -> Self {
        Self { bis_sync: Vec::new() }
    }

    /// State holding `values`, one per subgroup
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidParameter`] for more than [`MAX_SUBGROUPS`] subgroups.
    pub fn from_values(values: &[u32]) -> Result<Self, DongleError> {
        let mut state = Self::new();
        state.set(values)?;
        Ok(state)
    }

    /// Replace every subgroup mask, resizing when the subgroup count changes
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidParameter`] for more than [`MAX_SUBGROUPS`] subgroups.
    /// The state is left unchanged in that case.
    pub fn set(&mut self, values: &[u32]) -> Result<(), DongleError> {
        let values = Vec::from_slice(values).map_err(|()| DongleError::InvalidParameter)?;
        self.bis_sync = values;
        Ok(())
    }

    /// Drop every subgroup
    pub fn reset(&mut self) {
        self.bis_sync.clear();
    }

    /// Sync to no BIS. Keeps the subgroup count, or creates one subgroup if
    /// there were none.
    pub fn set_no_sync(&mut self) {
        if self.bis_sync.is_empty() {
            debug_assert!(self.bis_sync.capacity() > 0);
            self.bis_sync.push(0).ok();
        } else {
            self.bis_sync.fill(0);
        }
    }

    /// No constraint on any existing subgroup
    pub fn set_no_preference(&mut self) {
        self.bis_sync.fill(BIS_SYNC_NO_PREFERENCE);
    }

    /// Bitwise OR of every subgroup, zero without subgroups
    #[must_use]
    pub fn combined_value(&self) -> u32 {
        self.bis_sync.iter().fold(0, |acc, mask| acc | mask)
    }

    /// Number of subgroups
    #[must_use]
    pub fn num_subgroups(&self) -> usize {
        self.bis_sync.len()
    }

    /// Whether there are no subgroups
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bis_sync.is_empty()
    }

    /// Any subgroup without preference
    #[must_use]
    pub fn is_no_preference(&self) -> bool {
        self.bis_sync.contains(&BIS_SYNC_NO_PREFERENCE)
    }

    /// Subgroup masks
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.bis_sync
    }
}
