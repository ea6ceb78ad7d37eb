use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;
use crate::tick::Tick;

/// Version vector: the highest tick observed from each device.
///
/// Absent devices are treated as [`Tick::ZERO`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    ticks: BTreeMap<DeviceId, Tick>,
}

impl Version {
    pub fn new() -> Self {
        Self::default()
    }

    /// A version with a single entry.
    pub fn of(device: DeviceId, tick: Tick) -> Self {
        let mut v = Self::new();
        v.set(device, tick);
        v
    }

    pub fn get(&self, device: &DeviceId) -> Tick {
        self.ticks.get(device).copied().unwrap_or(Tick::ZERO)
    }

    /// Set the entry for `device`. Setting [`Tick::ZERO`] removes it.
    pub fn set(&mut self, device: DeviceId, tick: Tick) {
        if tick == Tick::ZERO {
            self.ticks.remove(&device);
        } else {
            self.ticks.insert(device, tick);
        }
    }

    /// Element-wise maximum with `other`.
    pub fn merge(&mut self, other: &Version) {
        for (device, tick) in &other.ticks {
            let entry = self.ticks.entry(*device).or_insert(Tick::ZERO);
            if *tick > *entry {
                *entry = *tick;
            }
        }
    }

    /// Returns `true` if every entry of `other` is covered by `self`.
    pub fn dominates(&self, other: &Version) -> bool {
        other
            .ticks
            .iter()
            .all(|(device, tick)| self.get(device) >= *tick)
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &Tick)> {
        self.ticks.iter()
    }
}
