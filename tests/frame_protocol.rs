//! Frame protocol against a scripted driver: fence pacing, image ownership,
//! swapchain staleness and minimized windows.

use std::collections::VecDeque;

use anyhow::Result;
use lumen_vk::backend::frame::{AcquireOutcome, FrameDriver, FrameLoop, FrameStatus, PresentOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    WaitSlot(usize),
    Acquire(usize),
    WaitOwner(usize),
    Record(usize, u32),
    Submit(usize),
    Present(usize, u32),
    Recreate,
}

/// Simulated GPU. A submitted slot stays busy until its fence is waited on,
/// which models the worst case where the GPU never finishes early.
struct ScriptedDriver {
    images: usize,
    images_after_recreate: usize,
    acquires: VecDeque<AcquireOutcome>,
    presents: VecDeque<PresentOutcome>,
    busy: Vec<bool>,
    /// Image-available semaphore per slot: signaled by a successful acquire,
    /// consumed by the submit that waits on it.
    signaled: Vec<bool>,
    max_busy: usize,
    calls: Vec<Call>,
}

impl ScriptedDriver {
    fn new(slots: usize, images: usize) -> Self {
        Self {
            images,
            images_after_recreate: images,
            acquires: VecDeque::new(),
            presents: VecDeque::new(),
            busy: vec![false; slots],
            signaled: vec![false; slots],
            max_busy: 0,
            calls: Vec::new(),
        }
    }

    fn acquire_sequence(mut self, indices: &[u32]) -> Self {
        self.acquires.extend(indices.iter().map(|&image_index| AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        }));
        self
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn recreates(&self) -> usize {
        self.count(|c| *c == Call::Recreate)
    }

    fn records(&self) -> usize {
        self.count(|c| matches!(c, Call::Record(..)))
    }
}

impl FrameDriver for ScriptedDriver {
    fn image_count(&self) -> usize {
        self.images
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::WaitSlot(slot));
        self.busy[slot] = false;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        let next = self.acquires.pop_front().unwrap_or(AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: false,
        });
        if let AcquireOutcome::Acquired { .. } = next {
            assert!(
                !self.signaled[slot],
                "acquired on slot {} whose semaphore is still signaled",
                slot
            );
            self.signaled[slot] = true;
        }
        Ok(next)
    }

    fn wait_for_image_owner(&mut self, owner_slot: usize) -> Result<()> {
        self.calls.push(Call::WaitOwner(owner_slot));
        self.busy[owner_slot] = false;
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        assert!(!self.busy[slot], "recorded into slot {} while the GPU still uses it", slot);
        self.calls.push(Call::Record(slot, image_index));
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        assert!(!self.busy[slot], "resubmitted slot {} before its fence signaled", slot);
        self.calls.push(Call::Submit(slot));
        self.signaled[slot] = false;
        self.busy[slot] = true;
        let in_flight = self.busy.iter().filter(|b| **b).count();
        self.max_busy = self.max_busy.max(in_flight);
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.calls.push(Call::Present(slot, image_index));
        Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.calls.push(Call::Recreate);
        // Recreation waits for device idle.
        self.busy.iter_mut().for_each(|b| *b = false);
        self.images = self.images_after_recreate;
        Ok(())
    }
}

fn tick(frames: &mut FrameLoop, driver: &mut ScriptedDriver) -> (FrameStatus, FrameStatus) {
    let prepared = frames.prepare(driver).unwrap();
    let finished = frames.finish(driver).unwrap();
    (prepared, finished)
}

#[test]
fn in_flight_frames_never_exceed_slot_count() {
    for slots in 1..=3 {
        let mut driver = ScriptedDriver::new(slots, 3).acquire_sequence(&[0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        let mut frames = FrameLoop::new(slots, 3);

        for _ in 0..10 {
            assert_eq!(
                tick(&mut frames, &mut driver),
                (FrameStatus::Recorded, FrameStatus::Presented)
            );
        }

        assert_eq!(driver.max_busy, slots.min(3));
        assert!(driver.max_busy <= slots);
    }
}

#[test]
fn each_tick_follows_protocol_order() {
    let mut driver = ScriptedDriver::new(2, 2).acquire_sequence(&[1]);
    let mut frames = FrameLoop::new(2, 2);

    tick(&mut frames, &mut driver);

    assert_eq!(
        driver.calls,
        vec![
            Call::WaitSlot(0),
            Call::Acquire(0),
            Call::Record(0, 1),
            Call::Submit(0),
            Call::Present(0, 1),
        ]
    );
    assert_eq!(frames.current_frame(), 1);
}

#[test]
fn out_of_order_image_waits_for_its_owner() {
    // Slot 0 takes image 0, slot 1 takes image 1, then slot 0 is handed
    // image 1 again while slot 1 may still be rendering to it.
    let mut driver = ScriptedDriver::new(2, 3).acquire_sequence(&[0, 1, 1]);
    let mut frames = FrameLoop::new(2, 3);

    tick(&mut frames, &mut driver);
    tick(&mut frames, &mut driver);
    driver.calls.clear();
    tick(&mut frames, &mut driver);

    assert_eq!(
        driver.calls,
        vec![
            Call::WaitSlot(0),
            Call::Acquire(0),
            Call::WaitOwner(1),
            Call::Record(0, 1),
            Call::Submit(0),
            Call::Present(0, 1),
        ]
    );
}

#[test]
fn image_owned_by_current_slot_needs_no_extra_wait() {
    let mut driver = ScriptedDriver::new(2, 2).acquire_sequence(&[0, 1, 0, 1]);
    let mut frames = FrameLoop::new(2, 2);

    for _ in 0..4 {
        tick(&mut frames, &mut driver);
    }
    assert_eq!(driver.count(|c| matches!(c, Call::WaitOwner(_))), 0);
}

#[test]
fn out_of_date_acquire_recreates_once_and_skips_drawing() {
    let mut driver = ScriptedDriver::new(2, 2);
    driver.acquires.extend([
        AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: false,
        },
        AcquireOutcome::OutOfDate,
        AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: false,
        },
    ]);
    let mut frames = FrameLoop::new(2, 2);

    assert_eq!(
        tick(&mut frames, &mut driver),
        (FrameStatus::Recorded, FrameStatus::Presented)
    );

    // The stale tick: exactly one recreate, nothing recorded or submitted.
    let records_before = driver.records();
    assert_eq!(
        tick(&mut frames, &mut driver),
        (FrameStatus::Skipped, FrameStatus::Skipped)
    );
    assert_eq!(driver.recreates(), 1);
    assert_eq!(driver.records(), records_before);
    assert_eq!(driver.count(|c| matches!(c, Call::Submit(_))), 1);

    // Next tick draws normally on the same slot.
    assert_eq!(
        tick(&mut frames, &mut driver),
        (FrameStatus::Recorded, FrameStatus::Presented)
    );
    assert_eq!(driver.recreates(), 1);
    assert_eq!(driver.records(), 2);
    assert!(driver.calls.contains(&Call::Record(1, 1)));
}

#[test]
fn stale_present_recreates_after_presenting() {
    let mut driver = ScriptedDriver::new(2, 2).acquire_sequence(&[0, 1]);
    driver.presents.push_back(PresentOutcome::Stale);
    let mut frames = FrameLoop::new(2, 2);

    assert_eq!(
        tick(&mut frames, &mut driver),
        (FrameStatus::Recorded, FrameStatus::Presented)
    );
    assert_eq!(driver.calls.last(), Some(&Call::Recreate));
    assert_eq!(driver.recreates(), 1);

    tick(&mut frames, &mut driver);
    assert_eq!(driver.recreates(), 1);
}

#[test]
fn suboptimal_acquire_still_draws_then_recreates() {
    let mut driver = ScriptedDriver::new(2, 2);
    driver.acquires.push_back(AcquireOutcome::Acquired {
        image_index: 0,
        suboptimal: true,
    });
    let mut frames = FrameLoop::new(2, 2);

    assert_eq!(
        tick(&mut frames, &mut driver),
        (FrameStatus::Recorded, FrameStatus::Presented)
    );
    let present_at = driver.calls.iter().position(|c| *c == Call::Present(0, 0));
    let recreate_at = driver.calls.iter().position(|c| *c == Call::Recreate);
    assert!(present_at.is_some());
    assert!(recreate_at > present_at);
}

#[test]
fn minimized_window_skips_until_images_exist() {
    let mut driver = ScriptedDriver::new(2, 0);
    driver.images_after_recreate = 0;
    let mut frames = FrameLoop::new(2, 0);

    for _ in 0..3 {
        assert_eq!(
            tick(&mut frames, &mut driver),
            (FrameStatus::Skipped, FrameStatus::Skipped)
        );
    }
    assert_eq!(driver.recreates(), 3);
    assert_eq!(driver.records(), 0);

    driver.images_after_recreate = 2;
    assert_eq!(
        tick(&mut frames, &mut driver),
        (FrameStatus::Recorded, FrameStatus::Presented)
    );
    assert_eq!(driver.recreates(), 4);
}

#[test]
fn resize_request_rebuilds_before_next_acquire() {
    let mut driver = ScriptedDriver::new(2, 2);
    let mut frames = FrameLoop::new(2, 2);

    frames.request_recreate();
    tick(&mut frames, &mut driver);

    assert_eq!(driver.calls.first(), Some(&Call::Recreate));
    assert_eq!(driver.recreates(), 1);
    assert_eq!(driver.records(), 1);
}

#[test]
fn recreate_between_prepare_and_finish_waits_for_the_submit() {
    let mut driver = ScriptedDriver::new(2, 2).acquire_sequence(&[0, 1, 0]);
    let mut frames = FrameLoop::new(2, 2);

    assert_eq!(frames.prepare(&mut driver).unwrap(), FrameStatus::Recorded);
    frames.recreate(&mut driver).unwrap();
    assert_eq!(driver.recreates(), 0);

    // The recorded frame still goes out, then the swapchain is rebuilt.
    assert_eq!(frames.finish(&mut driver).unwrap(), FrameStatus::Presented);
    assert_eq!(driver.calls[driver.calls.len() - 3..], [
        Call::Submit(0),
        Call::Present(0, 0),
        Call::Recreate,
    ]);
    assert!(driver.signaled.iter().all(|s| !s));

    for _ in 0..2 {
        assert_eq!(
            tick(&mut frames, &mut driver),
            (FrameStatus::Recorded, FrameStatus::Presented)
        );
    }
    assert_eq!(driver.recreates(), 1);
}
