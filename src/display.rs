//! The display driver: lifecycle, buffer swapping and brightness.
//!
//! # Double buffering
//!
//! Two frame buffers exist. At any time one is the write target for the
//! encoders and the other is replayed by the hardware. [`LedDisplay::update`]
//! flips them: the bus is pointed at the freshly written buffer and the
//! previous one becomes the write target. The hardware finishes its current
//! scan pass before switching, and raises the completion callback once per
//! pass; a blocking update waits for that signal so the caller never writes
//! into a buffer the hardware still scans out.
//!
//! One producer context drives the display. The completion signal is a
//! single-slot primitive raised from interrupt context with at most one
//! waiter; violating the single-writer discipline produces tearing on the
//! panel, not memory unsafety in this API.

use alloc::alloc::alloc_zeroed;
use alloc::alloc::Layout;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::convert::Infallible;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::prelude::Size;
use log::debug;
use log::info;
use log::warn;

use crate::bus::BusConfig;
use crate::bus::DmaDescriptor;
use crate::bus::ParallelBus;
use crate::config::Config;
use crate::config::Correction;
use crate::frame::Frame;
use crate::framebuffer::DmaFrameBuffer;
use crate::framebuffer::Modulation;
use crate::framebuffer::COLOR_DEPTH_BITS;
use crate::gamma::gamma;
use crate::plan;
use crate::Color;
use crate::Error;
use crate::FRAME_BUFFER_COUNT;

/// Default brightness applied by `init`, in percent.
const DEFAULT_BRIGHTNESS: u8 = 75;

/// Parallel bus word width, fixed by the 16-bit entry format.
const BUS_BITS: u8 = 16;

type ShiftComplete = Signal<CriticalSectionRawMutex, ()>;

/// HUB75 LED matrix display driver.
///
/// `ROWS` is the panel height, `COLS` the width and `NROWS` the number of
/// half-row pairs scanned in parallel pairs (see
/// [`crate::framebuffer::compute_rows`]); the preset aliases in the crate
/// root cover the supported geometries. `B` is the parallel-output DMA
/// peripheral behind the [`ParallelBus`] contract.
pub struct LedDisplay<B, const ROWS: usize, const COLS: usize, const NROWS: usize>
where
    B: ParallelBus,
{
    bus: B,
    frames: Option<Box<[DmaFrameBuffer<ROWS, COLS, NROWS>; FRAME_BUFFER_COUNT]>>,
    descriptors_a: Vec<DmaDescriptor>,
    descriptors_b: Vec<DmaDescriptor>,
    current_frame: usize,
    modulation: Modulation,
    correction: Correction,
    brightness_percent: u8,
    shift_complete: Arc<ShiftComplete>,
}

impl<B, const ROWS: usize, const COLS: usize, const NROWS: usize> LedDisplay<B, ROWS, COLS, NROWS>
where
    B: ParallelBus,
{
    /// Brings up the display.
    ///
    /// Sets the default brightness, allocates and blanks both frame
    /// buffers, plans the descriptor chains for the panel geometry and
    /// budget in `config`, builds the chains and hands them to the bus.
    ///
    /// # Errors
    /// The first fatal condition becomes the result: allocation failures
    /// and an unsatisfiable RAM budget map to [`Error::OutOfMemory`], an
    /// unreachable minimum refresh rate to [`Error::RefreshRate`] and a
    /// rejected bus configuration to [`Error::Bus`]. The display is fully
    /// torn down before the error is returned.
    pub fn init(bus: B, config: Config) -> Result<Self, Error<B::Error>> {
        info!("{}x{} ({} bits)", COLS, ROWS, COLOR_DEPTH_BITS);

        let mut display = Self {
            bus,
            frames: None,
            descriptors_a: Vec::new(),
            descriptors_b: Vec::new(),
            current_frame: 0,
            modulation: Modulation::default(),
            correction: config.correction,
            brightness_percent: 0,
            shift_complete: Arc::new(Signal::new()),
        };
        display.set_brightness(DEFAULT_BRIGHTNESS);

        match display.init_internal(&config) {
            Ok(()) => {
                info!("init done");
                Ok(display)
            }
            Err(error) => {
                warn!("init failed");
                display.shutdown();
                Err(error)
            }
        }
    }

    fn init_internal(&mut self, config: &Config) -> Result<(), Error<B::Error>> {
        debug!(
            "frame buffers: size={} (available total={}, largest={})",
            FRAME_BUFFER_COUNT * DmaFrameBuffer::<ROWS, COLS, NROWS>::dma_buffer_size_bytes(),
            config.dma_ram.total_free,
            config.dma_ram.largest_free_block
        );
        self.frames = Some(Self::alloc_frames()?);

        // blank both buffers with the output-enable duty forced to zero so
        // nothing lights up before the first real update
        let previous = self.set_brightness(0);
        self.current_frame = 1;
        self.fill(Color::BLACK);
        self.current_frame = 0;
        self.fill(Color::BLACK);
        self.set_brightness(previous);

        let plan = plan::build(COLS, NROWS, config)?;
        self.modulation.transition_bit = plan.transition_bit;

        let count = plan.descriptors_per_row * NROWS;
        self.descriptors_a = Self::alloc_descriptors(count)?;
        self.descriptors_b = Self::alloc_descriptors(count)?;
        if let Some(frames) = &self.frames {
            link_chain(
                &mut self.bus,
                &mut self.descriptors_a,
                &frames[0],
                plan.transition_bit,
            );
            link_chain(
                &mut self.bus,
                &mut self.descriptors_b,
                &frames[1],
                plan.transition_bit,
            );
        }

        let signal = self.shift_complete.clone();
        self.bus
            .set_completion_callback(Box::new(move || signal.signal(())));

        let bus_config = BusConfig {
            bits: BUS_BITS,
            clock_hz: config.clock_speed.hz(),
            descriptors_a: &self.descriptors_a,
            descriptors_b: &self.descriptors_b,
        };
        self.bus.setup(&bus_config).map_err(Error::Bus)?;
        Ok(())
    }

    fn alloc_frames(
    ) -> Result<Box<[DmaFrameBuffer<ROWS, COLS, NROWS>; FRAME_BUFFER_COUNT]>, Error<B::Error>>
    {
        let layout = Layout::new::<[DmaFrameBuffer<ROWS, COLS, NROWS>; FRAME_BUFFER_COUNT]>();
        // SAFETY: layout matches the boxed type exactly and all-zero bytes
        // are a valid entry bit pattern; the fill below formats the buffers
        let pointer = unsafe { alloc_zeroed(layout) };
        if pointer.is_null() {
            warn!("framebuf alloc");
            return Err(Error::OutOfMemory);
        }
        Ok(unsafe { Box::from_raw(pointer.cast()) })
    }

    fn alloc_descriptors(count: usize) -> Result<Vec<DmaDescriptor>, Error<B::Error>> {
        let mut descriptors = Vec::new();
        if descriptors.try_reserve_exact(count).is_err() {
            warn!("desc alloc");
            return Err(Error::OutOfMemory);
        }
        descriptors.resize(count, DmaDescriptor::EMPTY);
        Ok(descriptors)
    }

    /// Stops the bus and releases the frame buffers and descriptor chains.
    ///
    /// Idempotent, also runs on drop, and safe after a partially failed
    /// `init`.
    pub fn shutdown(&mut self) {
        info!("shutdown");
        self.bus.stop();
        self.frames = None;
        self.descriptors_a = Vec::new();
        self.descriptors_b = Vec::new();
    }

    /// Flips the freshly written frame buffer to the hardware and makes the
    /// other buffer the write target.
    ///
    /// With `block` set this waits until the hardware has finished the scan
    /// pass on the old buffer, i.e. until the new write target is no longer
    /// being transmitted.
    pub fn update(&mut self, block: bool) {
        self.bus.flip_to_buffer(self.current_frame);
        self.current_frame = (self.current_frame + 1) % FRAME_BUFFER_COUNT;
        if block {
            block_on(self.shift_complete.wait());
        }
    }

    /// Encodes a whole caller-owned frame and flips it to the hardware.
    ///
    /// Waits for the completion signal first so the encode never races the
    /// scan-out of the write target.
    pub fn update_frame(&mut self, frame: &Frame<ROWS, COLS>) {
        block_on(self.shift_complete.wait());
        if let Some(frames) = self.frames.as_mut() {
            frames[self.current_frame].copy_frame(frame, self.correction, self.modulation);
        }
        self.update(false);
    }

    /// Encodes one pixel into the write-target buffer. Out-of-range
    /// coordinates are ignored.
    pub fn set_pixel(&mut self, x: usize, y: usize, color: Color) {
        if let Some(frames) = self.frames.as_mut() {
            frames[self.current_frame].set_pixel(x, y, color, self.correction, self.modulation);
        }
    }

    /// Encodes one color into every pixel of the write-target buffer.
    pub fn fill(&mut self, color: Color) {
        if let Some(frames) = self.frames.as_mut() {
            frames[self.current_frame].fill(color, self.correction, self.modulation);
        }
    }

    /// Sets the brightness in percent (clamped to 0..=100) and returns the
    /// previously set value.
    pub fn set_brightness(&mut self, percent: u8) -> u8 {
        let previous = self.brightness_percent;
        if percent == 0 {
            self.brightness_percent = 0;
            self.modulation.duty = 0;
        } else if percent >= 100 {
            self.brightness_percent = 100;
            self.modulation.duty = COLS;
        } else {
            self.brightness_percent = percent;
            // scale percent to a column count for this panel width
            let duty = (1000 * COLS * percent as usize + 500) / 1000 / 100;
            self.modulation.duty = match self.correction {
                Correction::None => duty,
                Correction::Strict => corrected_duty(duty, COLS),
                Correction::Modified => corrected_duty(duty, COLS).max(1),
            };
        }
        previous
    }

    /// The last brightness percentage set.
    pub fn brightness(&self) -> u8 {
        self.brightness_percent
    }

    /// The transition bit the plan builder chose at init.
    pub fn transition_bit(&self) -> u8 {
        self.modulation.transition_bit
    }
}

/// Maps an output-enable duty through the luminance table at the panel's
/// column resolution.
fn corrected_duty(duty: usize, cols: usize) -> usize {
    let f = 256 / cols;
    gamma((duty * f) as u8) as usize / f
}

fn link_chain<B, const ROWS: usize, const COLS: usize, const NROWS: usize>(
    bus: &mut B,
    descriptors: &mut [DmaDescriptor],
    frame: &DmaFrameBuffer<ROWS, COLS, NROWS>,
    transition_bit: u8,
) where
    B: ParallelBus,
{
    let plane_size = DmaFrameBuffer::<ROWS, COLS, NROWS>::bitplane_size_bytes();
    let transition = transition_bit as usize;
    let mut offset = 0;
    for row in 0..NROWS {
        // one merged pass over all planes: this displays every plane once,
        // which covers everything up to and including the transition bit
        link_next(
            bus,
            descriptors,
            &mut offset,
            frame.bitplane_ptr(row, 0),
            plane_size * COLOR_DEPTH_BITS,
        );
        // each plane above it sweeps through to the MSB; sweeping instead of
        // repeating single planes halves the number of descriptors needed
        for plane in transition + 1..COLOR_DEPTH_BITS {
            for _ in 0..(1usize << (plane - transition - 1)) {
                link_next(
                    bus,
                    descriptors,
                    &mut offset,
                    frame.bitplane_ptr(row, plane),
                    plane_size * (COLOR_DEPTH_BITS - plane),
                );
            }
        }
    }
    // close the ring: the last descriptor ends the scan pass and wraps to
    // the chain head
    let head = descriptors.as_mut_ptr();
    if let Some(last) = descriptors.last_mut() {
        last.eof = true;
        last.next = head;
    }
}

fn link_next<B>(
    bus: &mut B,
    descriptors: &mut [DmaDescriptor],
    offset: &mut usize,
    buffer: *const u8,
    size: usize,
) where
    B: ParallelBus,
{
    let (head, tail) = descriptors.split_at_mut(*offset);
    bus.link_descriptor(&mut tail[0], head.last_mut(), buffer, size);
    *offset += 1;
}

impl<B, const ROWS: usize, const COLS: usize, const NROWS: usize> Drop
    for LedDisplay<B, ROWS, COLS, NROWS>
where
    B: ParallelBus,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<B, const ROWS: usize, const COLS: usize, const NROWS: usize>
    embedded_graphics::prelude::OriginDimensions for LedDisplay<B, ROWS, COLS, NROWS>
where
    B: ParallelBus,
{
    fn size(&self) -> Size {
        Size::new(COLS as u32, ROWS as u32)
    }
}

impl<B, const ROWS: usize, const COLS: usize, const NROWS: usize>
    embedded_graphics::draw_target::DrawTarget for LedDisplay<B, ROWS, COLS, NROWS>
where
    B: ParallelBus,
{
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = embedded_graphics::Pixel<Self::Color>>,
    {
        for embedded_graphics::Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(point.x as usize, point.y as usize, color);
            }
        }
        Ok(())
    }
}
