//! SPI bus and control pins owned by the active chip handle

use crate::radio::sx126x::Sx126x;
use crate::radio::sx127x::Sx127x;
use crate::radio::traits::{ChipFactory, RadioChip, RadioError};
use crate::radio::variant::{ChipFamily, ChipVariant};
use alloc::boxed::Box;
use core::marker::PhantomData;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiBus;

/// SPI bus plus the control pins of one radio module
///
/// `busy` is the BUSY line on SX126x parts; SX127x parts never read it.
pub struct RadioBus<Spi, Nss, Nrst, Busy, Delay> {
    pub spi: Spi,
    pub nss: Nss,
    pub nrst: Nrst,
    pub busy: Busy,
    pub delay: Delay,
}

impl<Spi, Nss, Nrst, Busy, Delay> RadioBus<Spi, Nss, Nrst, Busy, Delay>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Nrst: OutputPin,
    Busy: InputPin,
    Delay: DelayNs,
{
    /// Pulse the reset line low
    pub fn reset(&mut self, low_ms: u32, settle_ms: u32) {
        let _ = self.nrst.set_low();
        self.delay.delay_ms(low_ms);
        let _ = self.nrst.set_high();
        self.delay.delay_ms(settle_ms);
    }

    /// Run `f` with NSS asserted, flushing the bus before releasing it
    pub fn transaction<R>(
        &mut self,
        f: impl FnOnce(&mut Spi) -> Result<R, Spi::Error>,
    ) -> Result<R, RadioError> {
        let _ = self.nss.set_low();
        let result = f(&mut self.spi).and_then(|r| self.spi.flush().map(|_| r));
        let _ = self.nss.set_high();
        result.map_err(|_| RadioError::SpiError)
    }
}

/// Factory building real SX127x / SX126x handles
pub struct HalChipFactory<Spi, Nss, Nrst, Busy, Delay> {
    _bus: PhantomData<fn() -> RadioBus<Spi, Nss, Nrst, Busy, Delay>>,
}

impl<Spi, Nss, Nrst, Busy, Delay> HalChipFactory<Spi, Nss, Nrst, Busy, Delay> {
    pub const fn new() -> Self {
        Self { _bus: PhantomData }
    }
}

impl<Spi, Nss, Nrst, Busy, Delay> Default for HalChipFactory<Spi, Nss, Nrst, Busy, Delay> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Spi, Nss, Nrst, Busy, Delay> ChipFactory for HalChipFactory<Spi, Nss, Nrst, Busy, Delay>
where
    Spi: SpiBus + Send + 'static,
    Nss: OutputPin + Send + 'static,
    Nrst: OutputPin + Send + 'static,
    Busy: InputPin + Send + 'static,
    Delay: DelayNs + Send + 'static,
{
    type Bus = RadioBus<Spi, Nss, Nrst, Busy, Delay>;

    fn build(&self, variant: ChipVariant, bus: Self::Bus) -> Box<dyn RadioChip<Self::Bus>> {
        match variant.family() {
            ChipFamily::Sx127x => Box::new(Sx127x::new(variant, bus)),
            ChipFamily::Sx126x => Box::new(Sx126x::new(variant, bus)),
        }
    }
}

#[cfg(test)]
pub mod mock {
    //! Recording SPI bus and inert pins for chip-level tests

    use core::convert::Infallible;
    use embedded_hal::delay::DelayNs;
    use embedded_hal::digital::{ErrorType as DigitalErrorType, InputPin, OutputPin};
    use embedded_hal::spi::{ErrorType as SpiErrorType, SpiBus};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    #[derive(Debug, Default)]
    struct SpiLogState {
        writes: Vec<Vec<u8>>,
        reads: VecDeque<Vec<u8>>,
    }

    /// SPI bus recording every write and answering reads from a queue
    ///
    /// Reads with nothing queued return zeros.
    #[derive(Debug, Clone, Default)]
    pub struct SpiLog {
        state: Arc<Mutex<SpiLogState>>,
    }

    impl SpiLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_read(&self, data: &[u8]) {
            self.state.lock().unwrap().reads.push_back(data.to_vec());
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().writes.clone()
        }

        fn next_read(&self, out: &mut [u8]) {
            let queued = self.state.lock().unwrap().reads.pop_front().unwrap_or_default();
            for (i, byte) in out.iter_mut().enumerate() {
                *byte = queued.get(i).copied().unwrap_or(0);
            }
        }
    }

    impl SpiErrorType for SpiLog {
        type Error = Infallible;
    }

    impl SpiBus for SpiLog {
        fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
            self.next_read(words);
            Ok(())
        }

        fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
            self.state.lock().unwrap().writes.push(words.to_vec());
            Ok(())
        }

        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
            self.write(write)?;
            self.next_read(read);
            Ok(())
        }

        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
            self.write(words)?;
            self.next_read(words);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// Pin that accepts any output level and reads back a fixed input level
    #[derive(Debug, Clone, Copy)]
    pub struct MockPin {
        level: bool,
    }

    impl MockPin {
        pub fn output() -> Self {
            Self { level: false }
        }

        pub fn input(high: bool) -> Self {
            Self { level: high }
        }
    }

    impl DigitalErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    impl InputPin for MockPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.level)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.level)
        }
    }

    /// Delay that returns immediately
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MockDelay;

    impl DelayNs for MockDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }
}
