//! End-to-end driver tests against a recording bus.
//!
//! The mock stands in for the DMA peripheral: it keeps a copy of the
//! descriptor chains handed to `setup`, records buffer flips and exposes the
//! completion callback so tests can raise it like the interrupt handler
//! would.

use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use embedded_graphics::pixelcolor::Rgb888;
use leddisplay::plan;
use leddisplay::BusConfig;
use leddisplay::CompletionCallback;
use leddisplay::Config;
use leddisplay::DmaDescriptor;
use leddisplay::DmaRam;
use leddisplay::Error;
use leddisplay::Frame;
use leddisplay::LedDisplay64x32Scan16;
use leddisplay::ParallelBus;

const ROWS: usize = 32;
const COLS: usize = 64;
const NROWS: usize = 16;
const ENTRY_BYTES: usize = 2;
const PLANE_BYTES: usize = ENTRY_BYTES * COLS;
const PLANES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rejected;

/// Pointer-free copy of one descriptor, comparable across test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Descriptor {
    buffer: usize,
    size: usize,
    next: usize,
    eof: bool,
}

#[derive(Default)]
struct State {
    bits: u8,
    clock_hz: u32,
    chain_a: Vec<Descriptor>,
    chain_b: Vec<Descriptor>,
    head_a: usize,
    head_b: usize,
    flips: Vec<usize>,
    stopped: bool,
}

#[derive(Default)]
struct MockBus {
    state: Arc<Mutex<State>>,
    callback: Arc<Mutex<Option<CompletionCallback>>>,
    reject_setup: bool,
}

fn copy_chain(descriptors: &[DmaDescriptor]) -> Vec<Descriptor> {
    descriptors
        .iter()
        .map(|d| Descriptor {
            buffer: d.buffer as usize,
            size: d.size,
            next: d.next as usize,
            eof: d.eof,
        })
        .collect()
}

impl ParallelBus for MockBus {
    type Error = Rejected;

    fn setup(&mut self, config: &BusConfig) -> Result<(), Rejected> {
        if self.reject_setup {
            return Err(Rejected);
        }
        let mut state = self.state.lock().unwrap();
        state.bits = config.bits;
        state.clock_hz = config.clock_hz;
        state.chain_a = copy_chain(config.descriptors_a);
        state.chain_b = copy_chain(config.descriptors_b);
        state.head_a = config.descriptors_a.as_ptr() as usize;
        state.head_b = config.descriptors_b.as_ptr() as usize;
        Ok(())
    }

    fn flip_to_buffer(&mut self, buffer: usize) {
        self.state.lock().unwrap().flips.push(buffer);
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().stopped = true;
    }

    fn set_completion_callback(&mut self, callback: CompletionCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }
}

fn fire(callback: &Arc<Mutex<Option<CompletionCallback>>>) {
    let guard = callback.lock().unwrap();
    (guard.as_ref().expect("no callback registered"))();
}

/// Checks one chain against the plan shape: per row one merged pass over all
/// planes followed by the weighted sweeps, all singly linked in array order
/// with the last descriptor closing the ring.
fn assert_chain_shape(chain: &[Descriptor], head: usize, transition_bit: u8) {
    let per_row = plan::descriptors_per_row(transition_bit);
    let transition = transition_bit as usize;
    assert_eq!(chain.len(), per_row * NROWS);

    let descriptor_bytes = core::mem::size_of::<DmaDescriptor>();
    let frame_base = chain[0].buffer;
    let mut index = 0;
    for row in 0..NROWS {
        let row_base = frame_base + row * PLANES * PLANE_BYTES;
        assert_eq!(chain[index].buffer, row_base, "row {row} merged pass");
        assert_eq!(chain[index].size, PLANES * PLANE_BYTES);
        index += 1;
        for plane in transition + 1..PLANES {
            for repeat in 0..(1usize << (plane - transition - 1)) {
                let descriptor = chain[index];
                assert_eq!(
                    descriptor.buffer,
                    row_base + plane * PLANE_BYTES,
                    "row {row} plane {plane} repeat {repeat}"
                );
                assert_eq!(descriptor.size, (PLANES - plane) * PLANE_BYTES);
                index += 1;
            }
        }
    }
    assert_eq!(index, chain.len());

    for (i, descriptor) in chain.iter().enumerate() {
        if i == chain.len() - 1 {
            assert!(descriptor.eof, "last descriptor ends the scan pass");
            assert_eq!(descriptor.next, head, "ring closes on the head");
        } else {
            assert!(!descriptor.eof);
            assert_eq!(descriptor.next, head + (i + 1) * descriptor_bytes);
        }
    }
}

fn entry_bits(chain: &[Descriptor], per_row: usize, row: usize, plane: usize, x: usize) -> u16 {
    let merged = chain[row * per_row];
    let address = merged.buffer + plane * PLANE_BYTES + (x ^ 1) * ENTRY_BYTES;
    // the descriptors point into the display's live frame buffer, which
    // outlives every use in these tests
    unsafe { core::ptr::read(address as *const u16) }
}

#[test]
fn setup_receives_plan_shaped_chains() {
    let bus = MockBus::default();
    let state = Arc::clone(&bus.state);
    let display = LedDisplay64x32Scan16::init(bus, Config::default()).unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.bits, 16);
    assert_eq!(state.clock_hz, 16_000_000);
    assert_eq!(display.transition_bit(), 0);
    assert_chain_shape(&state.chain_a, state.head_a, display.transition_bit());
    assert_chain_shape(&state.chain_b, state.head_b, display.transition_bit());
    assert_ne!(state.chain_a[0].buffer, state.chain_b[0].buffer);
}

#[test]
fn ram_budget_raises_the_transition_bit() {
    let bus = MockBus::default();
    let state = Arc::clone(&bus.state);
    let config = Config {
        dma_ram: DmaRam {
            largest_free_block: plan::ram_required(6, NROWS),
            ..DmaRam::default()
        },
        ..Config::default()
    };
    let display = LedDisplay64x32Scan16::init(bus, config).unwrap();

    assert_eq!(display.transition_bit(), 7);
    let state = state.lock().unwrap();
    assert_eq!(state.chain_a.len(), NROWS);
    assert_chain_shape(&state.chain_a, state.head_a, 7);
}

#[test]
fn update_alternates_buffers() {
    let bus = MockBus::default();
    let state = Arc::clone(&bus.state);
    let mut display = LedDisplay64x32Scan16::init(bus, Config::default()).unwrap();

    display.update(false);
    display.update(false);
    display.update(false);
    assert_eq!(state.lock().unwrap().flips, vec![0, 1, 0]);
}

#[test]
fn blocking_update_waits_for_the_scan_pass() {
    let bus = MockBus::default();
    let callback = Arc::clone(&bus.callback);
    let mut display = LedDisplay64x32Scan16::init(bus, Config::default()).unwrap();

    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        fire(&callback);
    });
    display.update(true);
    raiser.join().unwrap();
}

#[test]
fn update_frame_encodes_into_the_flipped_buffer() {
    let bus = MockBus::default();
    let state = Arc::clone(&bus.state);
    let callback = Arc::clone(&bus.callback);
    let mut display = LedDisplay64x32Scan16::init(bus, Config::default()).unwrap();

    let mut frame = Frame::<ROWS, COLS>::new();
    frame.set_pixel(2, 0, Rgb888::new(255, 0, 0));
    fire(&callback);
    display.update_frame(&frame);

    let state = state.lock().unwrap();
    assert_eq!(state.flips, vec![0]);
    let per_row = plan::descriptors_per_row(display.transition_bit());
    for plane in 0..PLANES {
        let entry = entry_bits(&state.chain_a, per_row, 0, plane, 2);
        assert_eq!(entry & 1, 1, "red1 set on plane {plane}");
        let neighbor = entry_bits(&state.chain_a, per_row, 0, plane, 3);
        assert_eq!(neighbor & 0b111, 0, "neighbor column stays dark");
    }
}

#[test]
fn writes_never_touch_the_scanned_buffer() {
    let bus = MockBus::default();
    let state = Arc::clone(&bus.state);
    let mut display = LedDisplay64x32Scan16::init(bus, Config::default()).unwrap();

    // buffer 0 goes to the hardware, buffer 1 becomes the write target
    display.update(false);

    let per_row;
    let snapshot: Vec<u16> = {
        let state = state.lock().unwrap();
        per_row = plan::descriptors_per_row(display.transition_bit());
        (0..NROWS)
            .flat_map(|row| (0..PLANES).map(move |plane| (row, plane)))
            .flat_map(|(row, plane)| {
                (0..COLS).map(move |x| (row, plane, x))
            })
            .map(|(row, plane, x)| entry_bits(&state.chain_a, per_row, row, plane, x))
            .collect()
    };

    display.set_pixel(5, 5, Rgb888::new(255, 255, 255));
    display.fill(Rgb888::new(1, 2, 3));

    let state = state.lock().unwrap();
    let after: Vec<u16> = (0..NROWS)
        .flat_map(|row| (0..PLANES).map(move |plane| (row, plane)))
        .flat_map(|(row, plane)| (0..COLS).map(move |x| (row, plane, x)))
        .map(|(row, plane, x)| entry_bits(&state.chain_a, per_row, row, plane, x))
        .collect();
    assert_eq!(snapshot, after);
}

#[test]
fn unreachable_refresh_rate_fails_init() {
    let config = Config {
        min_refresh_rate: 1_000_000,
        ..Config::default()
    };
    let error = match LedDisplay64x32Scan16::init(MockBus::default(), config) {
        Ok(_) => panic!("init succeeded"),
        Err(error) => error,
    };
    assert_eq!(error, Error::RefreshRate);
}

#[test]
fn exhausted_ram_budget_fails_init() {
    let config = Config {
        dma_ram: DmaRam {
            largest_free_block: 16,
            ..DmaRam::default()
        },
        ..Config::default()
    };
    let error = match LedDisplay64x32Scan16::init(MockBus::default(), config) {
        Ok(_) => panic!("init succeeded"),
        Err(error) => error,
    };
    assert_eq!(error, Error::OutOfMemory);
}

#[test]
fn rejected_setup_fails_init_and_stops_the_bus() {
    let bus = MockBus {
        reject_setup: true,
        ..MockBus::default()
    };
    let state = Arc::clone(&bus.state);
    let error = match LedDisplay64x32Scan16::init(bus, Config::default()) {
        Ok(_) => panic!("init succeeded"),
        Err(error) => error,
    };
    assert_eq!(error, Error::Bus(Rejected));
    assert!(state.lock().unwrap().stopped);
}

#[test]
fn set_brightness_returns_the_previous_value() {
    let mut display =
        LedDisplay64x32Scan16::init(MockBus::default(), Config::default()).unwrap();
    assert_eq!(display.brightness(), 75);
    assert_eq!(display.set_brightness(10), 75);
    assert_eq!(display.brightness(), 10);
    assert_eq!(display.set_brightness(255), 10);
    assert_eq!(display.brightness(), 100);
}

#[test]
fn drop_stops_the_bus() {
    let bus = MockBus::default();
    let state = Arc::clone(&bus.state);
    let display = LedDisplay64x32Scan16::init(bus, Config::default()).unwrap();
    drop(display);
    assert!(state.lock().unwrap().stopped);
}
