// Frame protocol
//
// Drives the per-tick sequence over N frame slots:
//
//   prepare: wait slot fence -> acquire image -> wait image owner -> record
//   finish:  reset fence + submit -> present -> advance slot
//
// The GPU side sits behind FrameDriver so the ordering rules can be checked
// without a device. Out-of-date acquires recreate the swapchain and skip the
// tick; suboptimal acquires and stale presents recreate after presenting.

use anyhow::Result;

pub use super::swapchain::{AcquireOutcome, PresentOutcome};

/// Outcome of one `prepare`/`finish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Commands for the acquired image are recorded and waiting for `finish`.
    Recorded,
    /// The recorded frame was submitted and handed to the presentation engine.
    Presented,
    /// Nothing was drawn this tick (swapchain rebuilt, minimized, or nothing
    /// recorded).
    Skipped,
}

/// GPU operations used by the frame protocol, one call per protocol step.
pub trait FrameDriver {
    /// Swapchain images currently available, 0 while no swapchain exists.
    fn image_count(&self) -> usize;

    /// Block until the last submission on `slot` has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Block until the submission of another slot that still owns the
    /// acquired image has completed.
    fn wait_for_image_owner(&mut self, owner_slot: usize) -> Result<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Reset the slot fence and submit its command buffer.
    fn submit(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Wait for idle and rebuild every swapchain-dependent object.
    fn recreate_swapchain(&mut self) -> Result<()>;
}

pub struct FrameLoop {
    max_frames_in_flight: usize,
    current_frame: usize,
    /// Slot whose fence guards each swapchain image, if any.
    images_in_flight: Vec<Option<usize>>,
    pending_image: Option<u32>,
    recreate_requested: bool,
}

impl FrameLoop {
    pub fn new(max_frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            max_frames_in_flight: max_frames_in_flight.max(1),
            current_frame: 0,
            images_in_flight: vec![None; image_count],
            pending_image: None,
            recreate_requested: false,
        }
    }

    pub fn max_frames_in_flight(&self) -> usize {
        self.max_frames_in_flight
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Rebuild the swapchain at the start of the next `prepare`.
    pub fn request_recreate(&mut self) {
        self.recreate_requested = true;
    }

    /// Wait for the current slot, acquire an image and record into it.
    pub fn prepare<D: FrameDriver>(&mut self, driver: &mut D) -> Result<FrameStatus> {
        if self.pending_image.is_some() {
            anyhow::bail!("prepare called twice without finishing the recorded frame");
        }

        if self.recreate_requested || driver.image_count() == 0 {
            self.recreate(driver)?;
            if driver.image_count() == 0 {
                return Ok(FrameStatus::Skipped);
            }
        }

        let slot = self.current_frame;
        driver.wait_for_slot(slot)?;

        let image_index = match driver.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::debug!("Swapchain suboptimal, recreating after present");
                    self.recreate_requested = true;
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date, skipping frame");
                self.recreate(driver)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        let image = image_index as usize;
        if image >= self.images_in_flight.len() {
            anyhow::bail!(
                "Acquired image {} but swapchain has {} images",
                image,
                self.images_in_flight.len()
            );
        }
        if let Some(owner) = self.images_in_flight[image] {
            if owner != slot {
                driver.wait_for_image_owner(owner)?;
            }
        }
        self.images_in_flight[image] = Some(slot);

        driver.record(slot, image_index)?;
        self.pending_image = Some(image_index);
        Ok(FrameStatus::Recorded)
    }

    /// Submit and present the recorded frame, then move to the next slot.
    pub fn finish<D: FrameDriver>(&mut self, driver: &mut D) -> Result<FrameStatus> {
        let Some(image_index) = self.pending_image.take() else {
            return Ok(FrameStatus::Skipped);
        };
        let slot = self.current_frame;

        driver.submit(slot)?;
        let outcome = driver.present(slot, image_index)?;
        self.current_frame = (slot + 1) % self.max_frames_in_flight;

        if outcome == PresentOutcome::Stale || self.recreate_requested {
            self.recreate(driver)?;
        }
        Ok(FrameStatus::Presented)
    }

    /// Rebuild the swapchain now, or right after `finish` if a recorded
    /// frame is pending. Its acquire already signaled the slot's semaphore,
    /// so the frame must be submitted before the swapchain goes away.
    pub fn recreate<D: FrameDriver>(&mut self, driver: &mut D) -> Result<()> {
        if self.pending_image.is_some() {
            log::debug!("Frame pending, deferring swapchain rebuild until it is presented");
            self.recreate_requested = true;
            return Ok(());
        }
        self.recreate_requested = false;
        driver.recreate_swapchain()?;
        // The device is idle here, so no image is owned by a pending fence.
        self.images_in_flight = vec![None; driver.image_count()];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Driver with two images that always succeeds.
    #[derive(Default)]
    struct Steady {
        next_image: u32,
        recreated: usize,
    }

    impl FrameDriver for Steady {
        fn image_count(&self) -> usize {
            2
        }
        fn wait_for_slot(&mut self, _: usize) -> Result<()> {
            Ok(())
        }
        fn acquire_image(&mut self, _: usize) -> Result<AcquireOutcome> {
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % 2;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }
        fn wait_for_image_owner(&mut self, _: usize) -> Result<()> {
            Ok(())
        }
        fn record(&mut self, _: usize, _: u32) -> Result<()> {
            Ok(())
        }
        fn submit(&mut self, _: usize) -> Result<()> {
            Ok(())
        }
        fn present(&mut self, _: usize, _: u32) -> Result<PresentOutcome> {
            Ok(PresentOutcome::Presented)
        }
        fn recreate_swapchain(&mut self) -> Result<()> {
            self.recreated += 1;
            Ok(())
        }
    }

    #[test]
    fn slots_advance_modulo_max() {
        let mut driver = Steady::default();
        let mut frames = FrameLoop::new(2, 2);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(frames.current_frame());
            assert_eq!(frames.prepare(&mut driver).unwrap(), FrameStatus::Recorded);
            assert_eq!(frames.finish(&mut driver).unwrap(), FrameStatus::Presented);
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
        assert_eq!(driver.recreated, 0);
    }

    #[test]
    fn finish_without_prepare_is_skipped() {
        let mut driver = Steady::default();
        let mut frames = FrameLoop::new(2, 2);
        assert_eq!(frames.finish(&mut driver).unwrap(), FrameStatus::Skipped);
        assert_eq!(frames.current_frame(), 0);
    }

    #[test]
    fn double_prepare_is_an_error() {
        let mut driver = Steady::default();
        let mut frames = FrameLoop::new(2, 2);
        frames.prepare(&mut driver).unwrap();
        assert!(frames.prepare(&mut driver).is_err());
    }

    #[test]
    fn requested_recreate_runs_on_next_prepare() {
        let mut driver = Steady::default();
        let mut frames = FrameLoop::new(2, 2);
        frames.request_recreate();
        assert_eq!(frames.prepare(&mut driver).unwrap(), FrameStatus::Recorded);
        assert_eq!(driver.recreated, 1);
    }

    #[test]
    fn zero_slots_is_treated_as_one() {
        let frames = FrameLoop::new(0, 2);
        assert_eq!(frames.max_frames_in_flight(), 1);
    }
}
