//! The one piece of mutable state shared between the statistics task and the
//! valve control task.
//!
//! The statistics engine is the only writer of the snapshot; the valve
//! controller is the only reader that acts on it.  Both go through a bounded
//! `try_lock`, and what happens on contention is a named [`ContentionPolicy`]:
//! the writer drops its tick, the reader comes back after a short delay.
//! The breath phase travels the other way (controller -> statistics) through
//! a lock-free flag.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, MutexGuard};

use crate::config::{STORE_ACQUIRE_SPINS, STORE_RETRY_DELAY};
use crate::data_structs::{BreathPhase, RespiratoryStatistics, Setpoints};
use crate::time_util::Duration;

/// What a task does when the store stays locked past the acquisition bound.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContentionPolicy {
    /// Keep the current state and try again after the given delay.
    RetryAfter(Duration),
    /// Give up on this tick; the previous snapshot stays authoritative.
    DropTick,
}

// Freshness matters less than never stalling the control loop
pub const WRITER_POLICY: ContentionPolicy = ContentionPolicy::DropTick;
// The valve controller must act on a consistent value
pub const READER_POLICY: ContentionPolicy = ContentionPolicy::RetryAfter(STORE_RETRY_DELAY);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Contended,
}

/// Everything published in one statistics tick.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoreSnapshot {
    pub statistics: RespiratoryStatistics,
    pub setpoints: Setpoints,
    /// Number of successful publications, 0 until the first one.
    pub sequence: u32,
}

impl StoreSnapshot {
    pub fn is_published(&self) -> bool {
        self.sequence != 0
    }

    /// Published, and both airway and O2 line pressure have had at least
    /// one good reading.
    pub fn is_measured(&self) -> bool {
        self.is_published() && self.statistics.pressures_measured()
    }
}

pub struct SharedStatisticsStore {
    snapshot: Mutex<StoreSnapshot>,
    inspiration: AtomicBool,
    acquire_spins: u32,
}

impl SharedStatisticsStore {
    pub const fn new() -> SharedStatisticsStore {
        Self::with_acquire_spins(STORE_ACQUIRE_SPINS)
    }

    pub const fn with_acquire_spins(acquire_spins: u32) -> SharedStatisticsStore {
        SharedStatisticsStore {
            snapshot: Mutex::new(StoreSnapshot {
                statistics: RespiratoryStatistics::UNMEASURED,
                setpoints: crate::config::SETPOINTS_MIN,
                sequence: 0,
            }),
            inspiration: AtomicBool::new(false),
            acquire_spins,
        }
    }

    // Bounded acquisition: never blocks longer than `acquire_spins` attempts
    fn acquire(&self) -> Result<MutexGuard<'_, StoreSnapshot>, StoreError> {
        for _ in 0..=self.acquire_spins {
            if let Some(guard) = self.snapshot.try_lock() {
                return Ok(guard);
            }
            core::hint::spin_loop();
        }
        Err(StoreError::Contended)
    }

    /// Replaces the snapshot as a whole.  Returns the new sequence number.
    pub fn publish(
        &self,
        statistics: &RespiratoryStatistics,
        setpoints: &Setpoints,
    ) -> Result<u32, StoreError> {
        let mut snapshot = self.acquire()?;
        let sequence = snapshot.sequence.wrapping_add(1).max(1);
        *snapshot = StoreSnapshot {
            statistics: *statistics,
            setpoints: *setpoints,
            sequence,
        };
        Ok(sequence)
    }

    /// Copies the whole snapshot out under the lock.
    pub fn read(&self) -> Result<StoreSnapshot, StoreError> {
        self.acquire().map(|snapshot| *snapshot)
    }

    #[cfg(test)]
    pub(crate) fn read_guard_for_test(&self) -> MutexGuard<'_, StoreSnapshot> {
        self.snapshot.lock()
    }

    pub fn set_phase(&self, phase: BreathPhase) {
        self.inspiration
            .store(phase == BreathPhase::Inspiration, Ordering::Release);
    }

    pub fn phase(&self) -> BreathPhase {
        if self.inspiration.load(Ordering::Acquire) {
            BreathPhase::Inspiration
        } else {
            BreathPhase::Expiration
        }
    }
}

impl Default for SharedStatisticsStore {
    fn default() -> Self {
        Self::new()
    }
}
