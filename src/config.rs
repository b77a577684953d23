//! Runtime configuration for the display driver.

/// Bus clock tiers supported by the parallel peripheral.
///
/// Higher clocks raise the achievable refresh rate but need shorter wires
/// and better signal quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSpeed {
    /// 13.33 MHz
    Mhz13,
    /// 16 MHz
    #[default]
    Mhz16,
    /// 20 MHz
    Mhz20,
    /// 26.67 MHz
    Mhz26,
}

impl ClockSpeed {
    /// The exact clock frequency in Hz.
    pub const fn hz(self) -> u32 {
        match self {
            ClockSpeed::Mhz13 => 13_333_334,
            ClockSpeed::Mhz16 => 16_000_000,
            ClockSpeed::Mhz20 => 20_000_000,
            ClockSpeed::Mhz26 => 26_666_667,
        }
    }
}

/// Luminance correction applied to color channels and the brightness duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Correction {
    /// Raw values, no correction.
    #[default]
    None,
    /// Gamma-correct channels and map the brightness duty through the same
    /// table. Low percentages can round the duty down to zero.
    Strict,
    /// Like [`Correction::Strict`], but a nonzero brightness percentage
    /// never maps below a duty of one column.
    Modified,
}

/// DMA-capable memory budget available to `init`.
///
/// The descriptor chains must fit into the largest free block and must leave
/// `reserved` bytes of the total untouched for the rest of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaRam {
    /// Total free DMA-capable memory in bytes.
    pub total_free: usize,
    /// Largest contiguous free DMA-capable block in bytes.
    pub largest_free_block: usize,
    /// Bytes of the total to leave untouched.
    pub reserved: usize,
}

impl Default for DmaRam {
    /// An unconstrained budget. Targets with a real allocator should fill in
    /// the measured numbers instead.
    fn default() -> Self {
        Self {
            total_free: usize::MAX,
            largest_free_block: usize::MAX,
            reserved: 0,
        }
    }
}

/// Display driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Parallel bus clock tier.
    pub clock_speed: ClockSpeed,
    /// Luminance correction mode.
    pub correction: Correction,
    /// Minimum acceptable refresh rate in Hz. Planning fails if no
    /// transition bit reaches it.
    pub min_refresh_rate: u32,
    /// DMA-capable memory budget for the descriptor chains.
    pub dma_ram: DmaRam,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clock_speed: ClockSpeed::default(),
            correction: Correction::default(),
            min_refresh_rate: 60,
            dma_ram: DmaRam::default(),
        }
    }
}
