//! Frames and the frame hub.
//!
//! - `Frame`: one captured RGB image, owned by the detection session while it
//!   is classified and annotated.
//! - `FrameHub`: bounded ring of recently published JPEG frames. The
//!   detection session publishes; any number of stream subscribers read.
//!   Detection never waits on a subscriber, and a subscriber that falls
//!   behind skips to the oldest frame still buffered.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Default number of encoded frames kept for subscribers.
pub const DEFAULT_HUB_CAPACITY: usize = 4;

pub struct Frame {
    image: RgbImage,
    /// Position of this frame in its capture stream, starting at 1.
    pub index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// Builds a frame from packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self { image, index })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }
}

/// An annotated, JPEG-encoded frame ready for streaming.
#[derive(Debug)]
pub struct EncodedFrame {
    /// Hub-wide monotonic sequence number.
    pub sequence: u64,
    pub session_id: u64,
    pub jpeg: Vec<u8>,
}

#[derive(Debug)]
pub enum HubRecv {
    Frame(Arc<EncodedFrame>),
    /// No new frame within the wait window; the session is still open.
    Timeout,
    /// The session this subscription follows has ended.
    Closed,
}

struct HubState {
    ring: VecDeque<Arc<EncodedFrame>>,
    capacity: usize,
    last_sequence: u64,
    session_id: u64,
    open: bool,
}

pub struct FrameHub {
    state: Mutex<HubState>,
    changed: Condvar,
}

impl FrameHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState {
                ring: VecDeque::with_capacity(capacity.max(1)),
                capacity: capacity.max(1),
                last_sequence: 0,
                session_id: 0,
                open: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HubState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("frame hub lock poisoned"))
    }

    /// Starts accepting frames for `session_id`. Frames of earlier sessions
    /// are dropped and their subscribers see `Closed`.
    pub fn open(&self, session_id: u64) -> Result<()> {
        let mut state = self.lock()?;
        state.ring.clear();
        state.session_id = session_id;
        state.open = true;
        self.changed.notify_all();
        Ok(())
    }

    /// Publishes a frame. Returns false when `session_id` no longer owns the hub.
    pub fn publish(&self, session_id: u64, jpeg: Vec<u8>) -> Result<bool> {
        let mut state = self.lock()?;
        if !state.open || state.session_id != session_id {
            return Ok(false);
        }
        state.last_sequence += 1;
        let frame = Arc::new(EncodedFrame {
            sequence: state.last_sequence,
            session_id,
            jpeg,
        });
        while state.ring.len() >= state.capacity {
            state.ring.pop_front();
        }
        state.ring.push_back(frame);
        self.changed.notify_all();
        Ok(true)
    }

    /// Marks `session_id` as finished. A no-op if another session owns the hub.
    pub fn close(&self, session_id: u64) -> Result<()> {
        let mut state = self.lock()?;
        if state.session_id == session_id {
            state.open = false;
            self.changed.notify_all();
        }
        Ok(())
    }

    /// Follows `session_id`, starting from the most recent buffered frame.
    pub fn subscribe(&self, session_id: u64) -> Result<Subscription<'_>> {
        let state = self.lock()?;
        let last_seen = match state.ring.back() {
            Some(latest) if state.session_id == session_id => latest.sequence - 1,
            _ => state.last_sequence,
        };
        Ok(Subscription {
            hub: self,
            session_id,
            last_seen,
        })
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

pub struct Subscription<'a> {
    hub: &'a FrameHub,
    session_id: u64,
    last_seen: u64,
}

impl Subscription<'_> {
    /// Waits up to `timeout` for the next unseen frame.
    ///
    /// Buffered frames are still delivered after the session closes; `Closed`
    /// is returned once they are drained.
    pub fn recv(&mut self, timeout: Duration) -> Result<HubRecv> {
        let mut state = self.hub.lock()?;
        loop {
            if state.session_id != self.session_id {
                return Ok(HubRecv::Closed);
            }
            if let Some(frame) = state
                .ring
                .iter()
                .find(|frame| frame.sequence > self.last_seen)
            {
                self.last_seen = frame.sequence;
                return Ok(HubRecv::Frame(frame.clone()));
            }
            if !state.open {
                return Ok(HubRecv::Closed);
            }
            let (next, wait) = self
                .hub
                .changed
                .wait_timeout(state, timeout)
                .map_err(|_| anyhow!("frame hub lock poisoned"))?;
            state = next;
            if wait.timed_out() {
                let fresh = state.session_id == self.session_id
                    && state.ring.iter().any(|f| f.sequence > self.last_seen);
                if !fresh && state.open && state.session_id == self.session_id {
                    return Ok(HubRecv::Timeout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_frame(recv: HubRecv) -> Arc<EncodedFrame> {
        match recv {
            HubRecv::Frame(frame) => frame,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn frame_from_rgb_validates_length() {
        assert!(Frame::from_rgb(2, 2, vec![0u8; 12], 1).is_ok());
        assert!(Frame::from_rgb(2, 2, vec![0u8; 11], 1).is_err());
    }

    #[test]
    fn hub_enforces_capacity() -> Result<()> {
        let hub = FrameHub::new(2);
        hub.open(1)?;
        let mut sub = hub.subscribe(1)?;
        for i in 0..5u8 {
            hub.publish(1, vec![i])?;
        }
        // A slow subscriber only finds the newest `capacity` frames.
        assert_eq!(expect_frame(sub.recv(Duration::from_millis(10))?).jpeg, vec![3]);
        assert_eq!(expect_frame(sub.recv(Duration::from_millis(10))?).jpeg, vec![4]);
        assert!(matches!(sub.recv(Duration::from_millis(10))?, HubRecv::Timeout));
        Ok(())
    }

    #[test]
    fn subscriber_starts_at_latest_and_sees_new_frames() -> Result<()> {
        let hub = FrameHub::new(4);
        hub.open(7)?;
        hub.publish(7, vec![1])?;
        hub.publish(7, vec![2])?;

        let mut sub = hub.subscribe(7)?;
        assert_eq!(expect_frame(sub.recv(Duration::from_millis(10))?).jpeg, vec![2]);
        assert!(matches!(
            sub.recv(Duration::from_millis(10))?,
            HubRecv::Timeout
        ));

        hub.publish(7, vec![3])?;
        assert_eq!(expect_frame(sub.recv(Duration::from_millis(10))?).jpeg, vec![3]);
        Ok(())
    }

    #[test]
    fn closed_session_drains_then_closes() -> Result<()> {
        let hub = FrameHub::new(4);
        hub.open(1)?;
        let mut sub = hub.subscribe(1)?;
        hub.publish(1, vec![9])?;
        hub.close(1)?;

        assert_eq!(expect_frame(sub.recv(Duration::from_millis(10))?).jpeg, vec![9]);
        assert!(matches!(sub.recv(Duration::from_millis(10))?, HubRecv::Closed));
        Ok(())
    }

    #[test]
    fn stale_session_cannot_publish() -> Result<()> {
        let hub = FrameHub::new(4);
        hub.open(1)?;
        hub.open(2)?;
        assert!(!hub.publish(1, vec![0])?);
        assert!(hub.publish(2, vec![0])?);

        let mut old = hub.subscribe(1)?;
        assert!(matches!(old.recv(Duration::from_millis(10))?, HubRecv::Closed));
        Ok(())
    }

    #[test]
    fn subscriber_wakes_on_publish_from_other_thread() -> Result<()> {
        let hub = Arc::new(FrameHub::new(4));
        hub.open(3)?;
        let publisher = {
            let hub = hub.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                hub.publish(3, vec![42]).unwrap();
            })
        };
        let mut sub = hub.subscribe(3)?;
        let frame = expect_frame(sub.recv(Duration::from_secs(5))?);
        assert_eq!(frame.jpeg, vec![42]);
        publisher.join().unwrap();
        Ok(())
    }
}
