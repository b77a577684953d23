//! Contract between the display driver and the parallel-output DMA
//! peripheral.
//!
//! The driver owns the frame buffers and descriptor chains; the peripheral
//! driver behind [`ParallelBus`] owns pins, clocking and the DMA engine. The
//! hardware autonomously replays one circular chain per scan pass and keeps
//! doing so until it is pointed at the other chain or stopped.

use alloc::boxed::Box;

/// Callback invoked from interrupt context once per completed scan pass.
pub type CompletionCallback = Box<dyn Fn() + Send + Sync>;

/// One element of a circularly linked DMA descriptor chain.
///
/// `next` is a raw link because the hardware walks the chain by address;
/// the driver guarantees every link points into the same allocation for the
/// lifetime of the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct DmaDescriptor {
    /// Start of the pixel data this descriptor transmits.
    pub buffer: *const u8,
    /// Number of bytes to transmit.
    pub size: usize,
    /// The descriptor the hardware moves to next.
    pub next: *mut DmaDescriptor,
    /// Marks the end of one scan pass. The peripheral raises the completion
    /// callback when it passes an `eof` descriptor.
    pub eof: bool,
}

impl DmaDescriptor {
    /// An unlinked descriptor, used to pre-fill freshly allocated chains.
    pub const EMPTY: Self = Self {
        buffer: core::ptr::null(),
        size: 0,
        next: core::ptr::null_mut(),
        eof: false,
    };
}

/// Everything the peripheral needs to start replaying the chains.
pub struct BusConfig<'a> {
    /// Parallel bus width in bits. This driver always configures 16.
    pub bits: u8,
    /// Bus clock in Hz.
    pub clock_hz: u32,
    /// Descriptor chain of frame buffer 0.
    pub descriptors_a: &'a [DmaDescriptor],
    /// Descriptor chain of frame buffer 1.
    pub descriptors_b: &'a [DmaDescriptor],
}

/// A parallel-output DMA peripheral driver.
///
/// Implementations wrap the chip-specific engine (I2S in parallel mode, a
/// LCD/camera controller, a mock in tests). All operations are expected to
/// return quickly; only the hardware itself runs continuously.
pub trait ParallelBus {
    /// Peripheral-specific configuration error.
    type Error;

    /// Configures pins and clock and installs both descriptor chains.
    fn setup(&mut self, config: &BusConfig) -> Result<(), Self::Error>;

    /// Points the hardware at the given frame buffer's chain. Takes effect
    /// when the current scan pass finishes.
    fn flip_to_buffer(&mut self, buffer: usize);

    /// Halts replay. Must be safe to call repeatedly and before `setup`.
    fn stop(&mut self);

    /// Registers the callback raised from interrupt context once per scan
    /// pass, replacing any previous registration.
    fn set_completion_callback(&mut self, callback: CompletionCallback);

    /// Fills one descriptor and links it after its predecessor.
    ///
    /// The default body performs plain linked-list setup. Peripherals whose
    /// descriptor words carry extra ownership or interrupt flags override
    /// this to set them in the same place.
    fn link_descriptor(
        &mut self,
        descriptor: &mut DmaDescriptor,
        previous: Option<&mut DmaDescriptor>,
        buffer: *const u8,
        size: usize,
    ) {
        descriptor.buffer = buffer;
        descriptor.size = size;
        descriptor.next = core::ptr::null_mut();
        descriptor.eof = false;
        if let Some(previous) = previous {
            previous.next = descriptor;
        }
    }
}
