//! Frame buffers and the arena that owns them.
//!
//! A buffer is referenced by at most one queue position (global transmit
//! queue, holding list or retransmit queue) plus the driver while a
//! transmit is in flight. It is removed from the arena once both are gone.

use bytes::Bytes;

use crate::core::PoolKind;
use crate::hdlc::{Control, FrameKind, Header};

/// Handle to a buffer in a [`FrameStore`].
///
/// Ids carry a generation, so a completion reported for a buffer that was
/// already released cannot reach a newer buffer in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

/// One outgoing frame.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Owning endpoint; `None` once it closed while the driver held the frame.
    pub endpoint: Option<u8>,
    /// Control byte, `ack` refreshed right before each transmit.
    pub control: Control,
    /// Payload without checksum.
    pub payload: Bytes,
    /// Cached header; cleared to force a rebuild.
    pub header: Option<Header>,
    /// Pool the transmit item was drawn from.
    pub item: PoolKind,
    /// The driver still references the frame.
    pub driver_ref: bool,
    /// The endpoint's retransmit queue references the frame.
    pub queued_for_ack: bool,
    /// Sitting in the transmit queue for a resend while still unacknowledged.
    pub pending_resend: bool,
    /// Times this frame was resubmitted.
    pub re_transmit_count: u8,
    /// Position in the owning endpoint's write order.
    pub order: u64,
}

impl FrameBuffer {
    /// Buffer for a frame written by the application.
    pub fn data(endpoint: u8, control: Control, payload: Bytes) -> Self {
        Self::new(endpoint, control, payload, PoolKind::DataItem)
    }

    /// Buffer for an acknowledgment, reject or other control frame.
    pub fn supervisory(endpoint: u8, control: Control, payload: Bytes) -> Self {
        Self::new(endpoint, control, payload, PoolKind::SupervisoryItem)
    }

    fn new(endpoint: u8, control: Control, payload: Bytes, item: PoolKind) -> Self {
        Self {
            endpoint: Some(endpoint),
            control,
            payload,
            header: None,
            item,
            driver_ref: false,
            queued_for_ack: false,
            pending_resend: false,
            re_transmit_count: 0,
            order: 0,
        }
    }

    /// Frame type.
    pub fn kind(&self) -> FrameKind {
        self.control.kind()
    }

    /// Check if the frame consumed transmit-window credit when queued.
    pub fn is_window_charged(&self) -> bool {
        self.item == PoolKind::DataItem
    }

    /// Check if the driver or a queue still references the frame.
    pub fn is_referenced(&self) -> bool {
        self.driver_ref || self.queued_for_ack || self.pending_resend
    }

    /// Check if the frame belongs to `endpoint`.
    pub fn belongs_to(&self, endpoint: u8) -> bool {
        self.endpoint == Some(endpoint)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    frame: Option<FrameBuffer>,
}

/// Arena of frame buffers.
#[derive(Debug, Default)]
pub struct FrameStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl FrameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame and return its id.
    pub fn insert(&mut self, frame: FrameBuffer) -> FrameId {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.frame = Some(frame);
                FrameId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    frame: Some(frame),
                });
                FrameId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Look up a frame.
    pub fn get(&self, id: FrameId) -> Option<&FrameBuffer> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.frame.as_ref())
    }

    /// Look up a frame mutably.
    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut FrameBuffer> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.frame.as_mut())
    }

    /// Remove a frame, invalidating its id.
    pub fn remove(&mut self, id: FrameId) -> Option<FrameBuffer> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let frame = slot.frame.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(frame)
    }

    /// Iterate over all live frames.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FrameId, &mut FrameBuffer)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.frame.as_mut().map(|frame| {
                (
                    FrameId {
                        index: index as u32,
                        generation,
                    },
                    frame,
                )
            })
        })
    }

    /// Number of live frames.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdlc::UnnumberedKind;

    fn iframe(endpoint: u8, seq: u8) -> FrameBuffer {
        FrameBuffer::data(
            endpoint,
            Control::information(seq, 0, false),
            Bytes::from_static(b"x"),
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let mut store = FrameStore::new();
        let id = store.insert(iframe(3, 1));

        assert_eq!(store.len(), 1);
        assert!(store.get(id).unwrap().belongs_to(3));

        let frame = store.remove(id).unwrap();
        assert_eq!(frame.control, Control::information(1, 0, false));
        assert!(store.is_empty());
        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_stale_id_after_reuse() {
        let mut store = FrameStore::new();
        let old = store.insert(iframe(1, 0));
        store.remove(old);

        let new = store.insert(iframe(2, 0));
        assert_ne!(old, new);
        assert!(store.get(old).is_none());
        assert!(store.remove(old).is_none());
        assert!(store.get(new).unwrap().belongs_to(2));
    }

    #[test]
    fn test_window_charge_by_item() {
        let data = iframe(1, 0);
        assert!(data.is_window_charged());

        let ack = FrameBuffer::supervisory(1, Control::ack(1), Bytes::new());
        assert!(!ack.is_window_charged());

        let reset = FrameBuffer::supervisory(
            0,
            Control::unnumbered(UnnumberedKind::Acknowledge),
            Bytes::new(),
        );
        assert_eq!(reset.kind(), FrameKind::Unnumbered);
        assert!(!reset.is_referenced());
    }

    #[test]
    fn test_pending_resend_keeps_frame_referenced() {
        let mut frame = iframe(1, 0);
        frame.pending_resend = true;
        assert!(frame.is_referenced());

        frame.pending_resend = false;
        assert!(!frame.is_referenced());
    }

    #[test]
    fn test_iter_mut_visits_live_frames() {
        let mut store = FrameStore::new();
        let a = store.insert(iframe(1, 0));
        let b = store.insert(iframe(1, 1));
        store.remove(a);

        let ids: Vec<FrameId> = store.iter_mut().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![b]);
    }
}
