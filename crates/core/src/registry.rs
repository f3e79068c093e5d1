//! Device State Registry
//!
//! Fixed-capacity arena of device records plus an id-to-slot index. Freed
//! slots are reused, so memory stays bounded by the configured capacity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::catalog::ActionId;
use crate::error::{CoreError, Result};
use crate::id::{DeviceId, SessionId};

/// Where a device is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePhase {
    Idle,
    AwaitingResponse { since: Instant },
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceId,
    /// Session that first reported this device
    pub session: SessionId,
    /// Last action assigned to the device
    pub current_action: Option<ActionId>,
    pub phase: DevicePhase,
    pub last_reward: Option<f64>,
    pub last_seen: Instant,
    pub decisions: u64,
    pub fallbacks: u64,
}

impl DeviceRecord {
    fn new(id: DeviceId, session: SessionId) -> Self {
        Self {
            id,
            session,
            current_action: None,
            phase: DevicePhase::Idle,
            last_reward: None,
            last_seen: Instant::now(),
            decisions: 0,
            fallbacks: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.phase, DevicePhase::AwaitingResponse { .. })
    }

    /// How long the outstanding request has been waiting, if any.
    pub fn pending_for(&self, now: Instant) -> Option<Duration> {
        match self.phase {
            DevicePhase::AwaitingResponse { since } => Some(now.saturating_duration_since(since)),
            DevicePhase::Idle => None,
        }
    }
}

/// How a pending request was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Decided,
    Fallback,
}

pub struct DeviceRegistry {
    slots: Vec<Option<DeviceRecord>>,
    index: HashMap<DeviceId, usize>,
    free: Vec<usize>,
    capacity: usize,
}

impl DeviceRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|r| r.is_pending())
            .count()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.index.get(id).and_then(|&slot| self.slots[slot].as_ref())
    }

    fn get_mut(&mut self, id: &DeviceId) -> Result<&mut DeviceRecord> {
        let slot = *self
            .index
            .get(id)
            .ok_or_else(|| CoreError::UnknownDevice(id.clone()))?;
        self.slots[slot]
            .as_mut()
            .ok_or_else(|| CoreError::UnknownDevice(id.clone()))
    }

    /// Look a device up, creating it under `session` on first sight.
    pub fn get_or_create(&mut self, id: &DeviceId, session: SessionId) -> Result<&mut DeviceRecord> {
        let existing = self
            .index
            .get(id)
            .copied()
            .filter(|&slot| self.slots[slot].is_some());

        let slot = match existing {
            Some(slot) => slot,
            None => {
                let slot = if let Some(slot) = self.free.pop() {
                    slot
                } else if self.slots.len() < self.capacity {
                    self.slots.push(None);
                    self.slots.len() - 1
                } else {
                    return Err(CoreError::RegistryFull {
                        capacity: self.capacity,
                    });
                };
                self.index.insert(id.clone(), slot);
                slot
            }
        };

        let record = self.slots[slot].get_or_insert_with(|| DeviceRecord::new(id.clone(), session));
        record.last_seen = Instant::now();
        Ok(record)
    }

    /// Idle -> AwaitingResponse. Fails if a request is already outstanding.
    pub fn mark_pending(&mut self, id: &DeviceId, now: Instant) -> Result<()> {
        let record = self.get_mut(id)?;
        if record.is_pending() {
            return Err(CoreError::AlreadyPending(id.clone()));
        }
        record.phase = DevicePhase::AwaitingResponse { since: now };
        record.last_seen = now;
        Ok(())
    }

    /// Action whose outcome the outstanding request reports.
    pub fn resolve(&self, id: &DeviceId) -> Result<Option<ActionId>> {
        let record = self
            .get(id)
            .ok_or_else(|| CoreError::UnknownDevice(id.clone()))?;
        if !record.is_pending() {
            return Err(CoreError::NoPendingRequest(id.clone()));
        }
        Ok(record.current_action)
    }

    /// AwaitingResponse -> Idle, recording the action sent back.
    pub fn complete(
        &mut self,
        id: &DeviceId,
        action: ActionId,
        reward: Option<f64>,
        how: Completion,
    ) -> Result<()> {
        let record = self.get_mut(id)?;
        if !record.is_pending() {
            return Err(CoreError::NoPendingRequest(id.clone()));
        }
        record.phase = DevicePhase::Idle;
        record.current_action = Some(action);
        if reward.is_some() {
            record.last_reward = reward;
        }
        match how {
            Completion::Decided => record.decisions += 1,
            Completion::Fallback => record.fallbacks += 1,
        }
        Ok(())
    }

    pub fn evict(&mut self, id: &DeviceId) -> Option<DeviceRecord> {
        let slot = self.index.remove(id)?;
        let record = self.slots[slot].take();
        self.free.push(slot);
        record
    }

    /// Evict every device owned by `session`.
    pub fn evict_session(&mut self, session: SessionId) -> Vec<DeviceId> {
        let owned: Vec<DeviceId> = self
            .slots
            .iter()
            .flatten()
            .filter(|r| r.session == session)
            .map(|r| r.id.clone())
            .collect();
        for id in &owned {
            self.evict(id);
        }
        owned
    }
}
