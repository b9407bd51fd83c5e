//! shared.rs
//!
//! The device as a `static`: a `LockMut` around the whole `Device` so the tick interrupt,
//! the button interrupt and the main loop take turns inside a critical section.

use critical_section_lock_mut::LockMut;

use crate::device::Device;
use crate::events::{GattEvent, GattResponse, Notification};
use crate::hal::HardwareAbstraction;

pub struct SharedDevice<H> {
    inner: LockMut<Device<H>>,
}

impl<H: HardwareAbstraction> SharedDevice<H> {
    pub const fn new() -> Self {
        SharedDevice {
            inner: LockMut::new(),
        }
    }

    /// Install the device. Must happen once, before interrupts are unmasked.
    pub fn init(&self, device: Device<H>) {
        self.inner.init(device);
    }

    /// Run `f` with exclusive access to the device.
    pub fn with<R>(&self, f: impl FnOnce(&mut Device<H>) -> R) -> Option<R> {
        let mut out = None;
        self.inner.with_lock(|device| out = Some(f(device)));
        out
    }

    /// Timer interrupt body.
    pub fn tick(&self) {
        self.inner.with_lock(|device| device.on_tick());
    }

    /// Main-loop housekeeping.
    pub fn service(&self) {
        self.inner.with_lock(|device| device.service());
    }

    pub fn handle(&self, event: GattEvent<'_>) -> Option<GattResponse> {
        self.with(|device| device.handle(event))
    }

    pub fn next_notification(&self) -> Option<Notification> {
        self.with(|device| device.next_notification()).flatten()
    }

    pub fn is_sleeping(&self) -> bool {
        self.with(|device| device.is_sleeping()).unwrap_or(false)
    }
}
