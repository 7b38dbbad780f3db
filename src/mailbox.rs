//! Single-slot handoff between a platform frame thread and the polling thread.
//!
//! The producer (a WinRT `FrameArrived` handler or a ScreenCaptureKit output
//! handler) publishes the newest frame; the consumer takes a deep copy. Only
//! the most recent frame is retained, older frames are dropped.

use std::sync::{Arc, Mutex};

use crate::frame::BasicFrame;

#[derive(Default)]
struct Slot {
    frame: Option<BasicFrame>,
    /// Incremented on every publish, used to tell new frames from replays.
    frame_id: u64,
}

#[derive(Clone, Default)]
pub struct FrameMailbox {
    slot: Arc<Mutex<Slot>>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored frame.
    pub fn publish(&self, frame: BasicFrame) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.frame = Some(frame);
            slot.frame_id = slot.frame_id.wrapping_add(1);
        }
    }

    /// Deep copy of the latest frame, leaving it in place for the next poll.
    pub fn latest(&self) -> Option<BasicFrame> {
        let slot = self.slot.lock().ok()?;
        slot.frame.clone()
    }

    /// Identifier of the latest publish, 0 when nothing was published yet.
    pub fn frame_id(&self) -> u64 {
        self.slot.lock().map(|slot| slot.frame_id).unwrap_or(0)
    }

    pub fn has_frame(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.frame.is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.frame = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::geometry::Size;
    use std::thread;

    fn frame_with_time(time_us: i64) -> BasicFrame {
        let mut frame = BasicFrame::new(Size::new(2, 2));
        frame.set_capture_time_us(time_us);
        frame
    }

    #[test]
    fn test_empty_mailbox() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.latest().is_none());
        assert!(!mailbox.has_frame());
        assert_eq!(mailbox.frame_id(), 0);
    }

    #[test]
    fn test_only_latest_is_kept() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame_with_time(1));
        mailbox.publish(frame_with_time(2));
        mailbox.publish(frame_with_time(3));

        let latest = mailbox.latest().unwrap();
        assert_eq!(latest.capture_time_us(), 3);
        assert_eq!(mailbox.frame_id(), 3);
        // Reading does not consume.
        assert!(mailbox.latest().is_some());
    }

    #[test]
    fn test_latest_is_a_deep_copy() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame_with_time(5));
        let mut copy = mailbox.latest().unwrap();
        copy.data_mut()[0] = 0xFF;
        assert_eq!(mailbox.latest().unwrap().data()[0], 0);
    }

    #[test]
    fn test_clear_drops_frame() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame_with_time(5));
        mailbox.clear();
        assert!(!mailbox.has_frame());
    }

    #[test]
    fn test_publish_from_other_thread() {
        let mailbox = FrameMailbox::new();
        let producer = mailbox.clone();
        thread::spawn(move || {
            for t in 0..10 {
                producer.publish(frame_with_time(t));
            }
        })
        .join()
        .unwrap();
        assert_eq!(mailbox.latest().unwrap().capture_time_us(), 9);
    }
}
