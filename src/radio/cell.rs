//! Process-wide home of the radio driver
//!
//! The GPIO interrupt and the poll loop both reach the driver through a
//! [`RadioCell`]. Access happens inside a critical section, so the interrupt
//! can never observe the driver mid-update.

use crate::radio::driver::RadioDriver;
use crate::radio::traits::ChipFactory;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Driver slot usable from a `static`
pub struct RadioCell<F: ChipFactory> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Option<RadioDriver<F>>>>,
}

impl<F: ChipFactory> RadioCell<F> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Install `driver`, returning the previous one after shutting it down
    pub fn install(&self, driver: RadioDriver<F>) -> Option<RadioDriver<F>> {
        let mut previous = self.inner.lock(|cell| cell.borrow_mut().replace(driver));
        if let Some(old) = previous.as_mut() {
            old.shutdown();
        }
        previous
    }

    /// Take the driver out, shut down
    ///
    /// Interrupts arriving afterwards find an empty cell and do nothing.
    pub fn remove(&self) -> Option<RadioDriver<F>> {
        let mut driver = self.inner.lock(|cell| cell.borrow_mut().take())?;
        driver.shutdown();
        Some(driver)
    }

    pub fn is_installed(&self) -> bool {
        self.inner.lock(|cell| cell.borrow().is_some())
    }

    /// Run `f` on the installed driver inside a critical section
    ///
    /// Returns `None` when no driver is installed.
    pub fn with<R>(&self, f: impl FnOnce(&mut RadioDriver<F>) -> R) -> Option<R> {
        self.inner.lock(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            slot.as_mut().map(f)
        })
    }

    /// Interrupt trampoline for the radio IRQ line
    ///
    /// Does nothing unless an initialised driver is installed.
    pub fn on_interrupt(&self) {
        self.inner.lock(|cell| {
            if let Ok(mut slot) = cell.try_borrow_mut() {
                if let Some(driver) = slot.as_mut() {
                    driver.handle_interrupt();
                }
            }
        });
    }
}

impl<F: ChipFactory> Default for RadioCell<F> {
    fn default() -> Self {
        Self::new()
    }
}
