//! Driver for HUB75-style RGB LED matrix panels over a parallel-output DMA
//! peripheral.
//!
//! HUB75 panels have no memory of their own. They expose a shift register
//! per panel half plus row address lines, and show an image only while the
//! controller continuously rescans it. This crate turns that chore into a
//! double-buffered [`LedDisplay`]: pixels are encoded into bitplane frame
//! buffers that a DMA engine replays autonomously through circularly linked
//! descriptor chains, so the CPU touches the panel only when the image
//! changes.
//!
//! Color depth comes from binary code modulation. Each of the eight
//! bitplanes is shown for a duration proportional to its significance, with
//! the low-order planes merged into a single pass to keep descriptor memory
//! bounded (see [`plan`]).
//!
//! The hardware side is abstracted behind the [`ParallelBus`] trait, so the
//! same driver runs on any peripheral that can clock 16-bit words out of
//! memory via linked-list DMA.
//!
//! ```
//! # use leddisplay::{BusConfig, CompletionCallback, Config, LedDisplay64x32Scan16, ParallelBus};
//! # struct NullBus;
//! # impl ParallelBus for NullBus {
//! #     type Error = ();
//! #     fn setup(&mut self, _config: &BusConfig) -> Result<(), ()> { Ok(()) }
//! #     fn flip_to_buffer(&mut self, _buffer: usize) {}
//! #     fn stop(&mut self) {}
//! #     fn set_completion_callback(&mut self, _callback: CompletionCallback) {}
//! # }
//! use embedded_graphics::pixelcolor::Rgb888;
//!
//! let mut display = LedDisplay64x32Scan16::init(NullBus, Config::default())?;
//! display.set_pixel(0, 0, Rgb888::new(255, 0, 0));
//! display.update(false);
//! # Ok::<(), leddisplay::Error<()>>(())
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use embedded_graphics::pixelcolor::Rgb888;

pub mod bus;
pub mod config;
pub mod display;
pub mod frame;
pub mod framebuffer;
pub mod gamma;
pub mod plan;

pub use bus::BusConfig;
pub use bus::CompletionCallback;
pub use bus::DmaDescriptor;
pub use bus::ParallelBus;
pub use config::ClockSpeed;
pub use config::Config;
pub use config::Correction;
pub use config::DmaRam;
pub use display::LedDisplay;
pub use frame::Frame;

pub type Color = Rgb888;

/// Frame buffers per display. One is scanned out by the hardware while the
/// other receives writes.
pub const FRAME_BUFFER_COUNT: usize = 2;

/// Reasons display initialization can fail.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<B> {
    /// Frame buffers or descriptor chains do not fit the DMA RAM budget.
    OutOfMemory,
    /// No descriptor chain layout reaches the minimum refresh rate.
    RefreshRate,
    /// The bus driver rejected its configuration.
    Bus(B),
}

impl<B> From<plan::PlanError> for Error<B> {
    fn from(error: plan::PlanError) -> Self {
        match error {
            plan::PlanError::OutOfMemory => Error::OutOfMemory,
            plan::PlanError::RefreshRate => Error::RefreshRate,
        }
    }
}

/// 32x16 panel scanning 4 rows in parallel. Known not to work yet.
pub type LedDisplay32x16Scan4<B> = LedDisplay<B, 16, 32, 4>;
/// 32x16 panel scanning 8 rows in parallel.
pub type LedDisplay32x16Scan8<B> = LedDisplay<B, 16, 32, 8>;
/// 32x32 panel scanning 8 rows in parallel. Known not to work yet.
pub type LedDisplay32x32Scan8<B> = LedDisplay<B, 32, 32, 8>;
/// 32x32 panel scanning 16 rows in parallel.
pub type LedDisplay32x32Scan16<B> = LedDisplay<B, 32, 32, 16>;
/// 64x32 panel scanning 8 rows in parallel. Known not to work yet.
pub type LedDisplay64x32Scan8<B> = LedDisplay<B, 32, 64, 8>;
/// 64x32 panel scanning 16 rows in parallel.
pub type LedDisplay64x32Scan16<B> = LedDisplay<B, 32, 64, 16>;
/// 64x64 panel scanning 32 rows in parallel.
pub type LedDisplay64x64Scan32<B> = LedDisplay<B, 64, 64, 32>;
