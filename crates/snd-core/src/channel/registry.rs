//! Fixed-capacity channel table and the active set
//!
//! Slots `0..dynamic` serve entity-driven sounds, the rest serve static
//! and ambient sounds. A full pool refuses new channels; the table never
//! grows after construction.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::{Channel, ChannelFlags, ChannelInfo};

/// Indices of the channels currently playing
///
/// Each member's `active_index` points back at its slot here, so removal
/// swaps the last entry into the hole in constant time.
#[derive(Debug, Default)]
pub struct ActiveChannels {
    list: Vec<usize>,
}

impl ActiveChannels {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, channels: &mut [Channel], index: usize) {
        let channel = &mut channels[index];
        if channel.active_index != 0 {
            return;
        }
        self.list.push(index);
        channel.active_index = self.list.len();
    }

    pub fn remove(&mut self, channels: &mut [Channel], index: usize) {
        let slot = channels[index].active_index;
        if slot == 0 {
            return;
        }
        channels[index].active_index = 0;

        let hole = slot - 1;
        if let Some(last) = self.list.pop() {
            if hole < self.list.len() {
                self.list[hole] = last;
                channels[last].active_index = hole + 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.list
    }

    fn clear(&mut self) {
        self.list.clear();
    }
}

/// Per-frame snapshot of the active set
///
/// Preallocated once; refilling it each frame does not allocate.
#[derive(Debug, Default)]
pub struct ChannelList {
    list: Vec<usize>,
    quashed: Vec<bool>,
}

impl ChannelList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity),
            quashed: Vec::with_capacity(capacity),
        }
    }

    pub fn count(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Registry index of entry `i`
    #[inline]
    pub fn get(&self, i: usize) -> usize {
        self.list[i]
    }

    #[inline]
    pub fn is_quashed(&self, i: usize) -> bool {
        self.quashed[i]
    }

    #[inline]
    pub fn set_quashed(&mut self, i: usize, quashed: bool) {
        self.quashed[i] = quashed;
    }

    /// Drop entry `i`; the last entry takes its place
    pub fn remove_channel(&mut self, i: usize) {
        self.list.swap_remove(i);
        self.quashed.swap_remove(i);
    }

    pub fn indices(&self) -> &[usize] {
        &self.list
    }

    fn fill(&mut self, active: &[usize]) {
        self.list.clear();
        self.list.extend_from_slice(active);
        self.quashed.clear();
        self.quashed.resize(active.len(), false);
    }
}

pub struct ChannelRegistry {
    channels: Vec<Channel>,
    dynamic_slots: usize,
    active: ActiveChannels,
    guids: Arc<AtomicU32>,
}

impl ChannelRegistry {
    pub fn new(dynamic_slots: usize, static_slots: usize) -> Self {
        let capacity = dynamic_slots + static_slots;
        let mut channels = Vec::with_capacity(capacity);
        channels.resize_with(capacity, Channel::default);
        Self {
            channels,
            dynamic_slots,
            active: ActiveChannels::with_capacity(capacity),
            guids: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.channels.len()
    }

    pub fn dynamic_slots(&self) -> usize {
        self.dynamic_slots
    }

    /// Shared guid counter, for callers that reserve ids ahead of the mixer
    pub fn guid_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.guids)
    }

    /// Reserve the next guid; never returns 0
    pub fn next_guid(&self) -> u32 {
        next_guid(&self.guids)
    }

    /// Claim a free entity-driven slot
    pub fn alloc_dynamic(&mut self, guid: u32) -> Option<usize> {
        self.alloc_in(0, self.dynamic_slots, guid)
    }

    /// Claim a free static slot
    pub fn alloc_static(&mut self, guid: u32) -> Option<usize> {
        self.alloc_in(self.dynamic_slots, self.channels.len(), guid)
    }

    fn alloc_in(&mut self, start: usize, end: usize, guid: u32) -> Option<usize> {
        debug_assert_ne!(guid, 0);
        let index = (start..end).find(|&i| self.channels[i].is_free())?;
        let channel = &mut self.channels[index];
        *channel = Channel::default();
        channel.guid = guid;
        channel.flags = ChannelFlags {
            first_pass: true,
            ..ChannelFlags::default()
        };
        Some(index)
    }

    /// Put an allocated channel into the active set
    pub fn activate(&mut self, index: usize) {
        self.active.add(&mut self.channels, index);
    }

    /// Release a channel: its mixer and source reference drop here
    pub fn free(&mut self, index: usize) {
        self.active.remove(&mut self.channels, index);
        self.channels[index] = Channel::default();
    }

    /// Free every channel at once
    pub fn clear(&mut self) {
        self.active.clear();
        for channel in &mut self.channels {
            *channel = Channel::default();
        }
    }

    /// Linear lookup; for tooling, not the mixing path
    pub fn find_by_guid(&self, guid: u32) -> Option<usize> {
        if guid == 0 {
            return None;
        }
        self.channels.iter().position(|c| c.guid == guid)
    }

    /// Fill `out` with this frame's active set, nothing quashed
    pub fn get_active_channels(&self, out: &mut ChannelList) {
        out.fill(self.active.as_slice());
    }

    pub fn count_active(&self) -> usize {
        self.active.len()
    }

    pub fn active(&self) -> &ActiveChannels {
        &self.active
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &Channel {
        &self.channels[index]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.channels[index]
    }

    /// Status rows for every active channel
    pub fn dump_channel_info(&self) -> Vec<ChannelInfo> {
        self.active
            .as_slice()
            .iter()
            .map(|&i| self.channels[i].info(i))
            .collect()
    }
}

/// Advance a shared guid counter, skipping 0 on wrap
pub(crate) fn next_guid(counter: &AtomicU32) -> u32 {
    loop {
        let guid = counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if guid != 0 {
            return guid;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry_with_active(n: usize) -> ChannelRegistry {
        let mut registry = ChannelRegistry::new(n, 0);
        for _ in 0..n {
            let guid = registry.next_guid();
            let index = registry.alloc_dynamic(guid).unwrap();
            registry.activate(index);
        }
        registry
    }

    fn assert_back_links(registry: &ChannelRegistry) {
        for (slot, &index) in registry.active().as_slice().iter().enumerate() {
            assert_eq!(registry.channel(index).active_index, slot + 1);
        }
    }

    #[test]
    fn test_pools_refuse_when_full() {
        let mut registry = ChannelRegistry::new(2, 1);
        assert_eq!(registry.alloc_dynamic(1), Some(0));
        assert_eq!(registry.alloc_dynamic(2), Some(1));
        assert_eq!(registry.alloc_dynamic(3), None);
        assert_eq!(registry.alloc_static(4), Some(2));
        assert_eq!(registry.alloc_static(5), None);
        assert_eq!(registry.capacity(), 3);
    }

    #[test]
    fn test_alloc_zeroes_slot_and_sets_first_pass() {
        let mut registry = ChannelRegistry::new(1, 0);
        let index = registry.alloc_dynamic(9).unwrap();
        registry.channel_mut(index).pitch = 3.0;
        registry.free(index);
        let index = registry.alloc_dynamic(10).unwrap();
        let channel = registry.channel(index);
        assert_eq!(channel.guid, 10);
        assert_eq!(channel.pitch, 0.0);
        assert!(channel.flags.first_pass);
        assert!(!channel.is_active());
    }

    #[test]
    fn test_active_remove_keeps_membership() {
        let mut registry = registry_with_active(6);
        registry.free(2);
        let members: HashSet<usize> = registry.active().as_slice().iter().copied().collect();
        assert_eq!(members, HashSet::from([0, 1, 3, 4, 5]));
        assert_back_links(&registry);

        registry.free(5);
        registry.free(0);
        let members: HashSet<usize> = registry.active().as_slice().iter().copied().collect();
        assert_eq!(members, HashSet::from([1, 3, 4]));
        assert_back_links(&registry);
    }

    #[test]
    fn test_double_add_and_remove_are_ignored() {
        let mut registry = registry_with_active(2);
        registry.activate(0);
        assert_eq!(registry.count_active(), 2);
        registry.free(1);
        registry.free(1);
        assert_eq!(registry.count_active(), 1);
    }

    #[test]
    fn test_channel_list_remove_is_swap() {
        let registry = registry_with_active(6);
        let mut list = ChannelList::with_capacity(6);
        registry.get_active_channels(&mut list);
        let before: HashSet<usize> = list.indices().iter().copied().collect();

        let removed = list.get(1);
        list.set_quashed(5, true);
        list.remove_channel(1);

        assert_eq!(list.count(), 5);
        let after: HashSet<usize> = list.indices().iter().copied().collect();
        let mut expected = before.clone();
        expected.remove(&removed);
        assert_eq!(after, expected);
        // The former last entry moved into slot 1 with its quash flag
        assert!(list.is_quashed(1));
        // The registry's own set is untouched
        assert_eq!(registry.count_active(), 6);
    }

    #[test]
    fn test_find_by_guid_and_clear() {
        let mut registry = registry_with_active(3);
        let guid = registry.channel(2).guid;
        assert_eq!(registry.find_by_guid(guid), Some(2));
        assert_eq!(registry.find_by_guid(0), None);

        registry.clear();
        assert_eq!(registry.count_active(), 0);
        assert_eq!(registry.find_by_guid(guid), None);
        assert!(registry.channel(2).is_free());
    }

    #[test]
    fn test_guid_skips_zero_on_wrap() {
        let counter = AtomicU32::new(u32::MAX - 1);
        assert_eq!(next_guid(&counter), u32::MAX);
        assert_eq!(next_guid(&counter), 1);
    }

    #[test]
    fn test_dump_lists_active_channels() {
        let registry = registry_with_active(2);
        let dump = registry.dump_channel_info();
        assert_eq!(dump.len(), 2);
        assert!(dump.iter().all(|row| row.guid != 0 && row.source.is_empty()));
    }
}
