//! Descriptor chain planning for binary code modulation.
//!
//! Bitplane `i` must be displayed for a duration proportional to `2^i`. The
//! naive chain (one descriptor per plane repeat) costs RAM exponential in
//! the color depth, so the planes `0..=t` for a transition bit `t` are
//! merged into a single pass and every plane above `t` sweeps through to
//! the MSB, halving the repeat counts. A larger `t` saves descriptor RAM
//! and raises the refresh rate, but dims the low-order planes' share of the
//! frame period relative to true binary weighting.
//!
//! [`build`] searches for the smallest `t` whose chains fit the DMA RAM
//! budget while keeping the configured minimum refresh rate.

use log::debug;
use log::warn;

use crate::bus::DmaDescriptor;
use crate::config::Config;
use crate::framebuffer::COLOR_DEPTH_BITS;
use crate::FRAME_BUFFER_COUNT;

/// The shape of both descriptor chains for one panel geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Plan {
    /// Chosen LSB-to-MSB transition bit, `0..=7`.
    pub transition_bit: u8,
    /// Descriptors per half-row pair in each chain.
    pub descriptors_per_row: usize,
    /// Descriptor memory for both chains in bytes.
    pub ram_required: usize,
    /// Achievable refresh rate in Hz.
    pub refresh_rate: u32,
}

/// Why no transition bit was acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlanError {
    /// Even the smallest chain does not fit the DMA RAM budget.
    OutOfMemory,
    /// Even the fastest chain stays below the minimum refresh rate.
    RefreshRate,
}

/// Descriptors needed per half-row pair for a given transition bit: one for
/// the merged `0..=t` pass, then `2^(i-t-1)` sweeps for each plane above.
pub const fn descriptors_per_row(transition_bit: u8) -> usize {
    let transition = transition_bit as usize;
    let mut count = 1;
    let mut i = transition + 1;
    while i < COLOR_DEPTH_BITS {
        count += 1 << (i - transition - 1);
        i += 1;
    }
    count
}

/// Descriptor memory for both chains in bytes.
pub const fn ram_required(transition_bit: u8, nrows: usize) -> usize {
    descriptors_per_row(transition_bit)
        * nrows
        * FRAME_BUFFER_COUNT
        * core::mem::size_of::<DmaDescriptor>()
}

/// Refresh rate in Hz for a given transition bit, panel geometry and bus
/// clock. Fractional latch periods of the merged pass are ignored.
pub fn refresh_rate(transition_bit: u8, cols: usize, nrows: usize, clock_hz: u32) -> u32 {
    let transition = transition_bit as usize;
    let ps_per_clock = 1_000_000_000_000u64 / clock_hz as u64;
    let ns_per_latch = cols as u64 * ps_per_clock / 1000;
    // one merged pass shifts every plane once
    let mut ns_per_row = COLOR_DEPTH_BITS as u64 * ns_per_latch;
    // plus the repeated sweeps from each plane above the transition bit
    for i in transition + 1..COLOR_DEPTH_BITS {
        ns_per_row += (1u64 << (i - transition - 1))
            * (COLOR_DEPTH_BITS - i) as u64
            * ns_per_latch;
    }
    let ns_per_frame = ns_per_row * nrows as u64;
    (1_000_000_000u64 / ns_per_frame) as u32
}

/// Finds the smallest transition bit that satisfies the DMA RAM budget and
/// the minimum refresh rate.
pub fn build(cols: usize, nrows: usize, config: &Config) -> Result<Plan, PlanError> {
    let budget = config.dma_ram;
    let clock_hz = config.clock_speed.hz();

    let mut transition_bit: u8 = 0;
    loop {
        let per_row = descriptors_per_row(transition_bit);
        let ram = ram_required(transition_bit, nrows);
        let refresh = refresh_rate(transition_bit, cols, nrows, clock_hz);

        let ram_okay = ram < budget.largest_free_block
            && ram < budget.total_free.saturating_sub(budget.reserved);
        let refresh_okay = refresh >= config.min_refresh_rate;

        debug!(
            "transition_bit={}: ram_required={} available={} largest={} {}, refresh_rate={} {}",
            transition_bit,
            ram,
            budget.total_free,
            budget.largest_free_block,
            if ram_okay { ":-)" } else { ":-(" },
            refresh,
            if refresh_okay { ":-)" } else { ":-(" },
        );

        if ram_okay && refresh_okay {
            debug!(
                "finally: transition_bit={}/{}, rows={}, ram={}, refresh={}",
                transition_bit,
                COLOR_DEPTH_BITS - 1,
                nrows,
                ram,
                refresh
            );
            return Ok(Plan {
                transition_bit,
                descriptors_per_row: per_row,
                ram_required: ram,
                refresh_rate: refresh,
            });
        }

        if (transition_bit as usize) < COLOR_DEPTH_BITS - 1 {
            transition_bit += 1;
            continue;
        }

        if !ram_okay {
            warn!("descriptor chains do not fit the dma ram budget");
        }
        if !refresh_okay {
            warn!("refresh rate below minimum");
        }
        return Err(if refresh_okay {
            PlanError::OutOfMemory
        } else {
            PlanError::RefreshRate
        });
    }
}
