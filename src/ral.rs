//! FX3 USB 2.0 IN-endpoint register access
//!
//! The MULT workaround touches exactly two register banks: the
//! per-endpoint configuration registers (`DEV_EPI_CS`), which carry the
//! ISO MULT field, and the egress endpoint memory status registers
//! (`EEPM_ENDPOINT`), which report how much data is sitting in the
//! endpoint's FIFO. [`InEndpointRegisters`] is the drop-in body for a
//! [`Transport`](crate::Transport) implementation's `occupancy` and
//! `write_mult` on real silicon; everything else in the engine stays
//! register-free.

#![allow(non_snake_case, non_upper_case_globals)]

use ral_registers::{modify_reg, read_reg, RWRegister};

use crate::Peripherals;

/// Base address of the USB 2.0 IN-endpoint configuration bank.
pub const DEV_EPI_CS_BASE: u32 = 0xe003_1418;
/// Base address of the egress endpoint memory status bank.
pub const EEPM_ENDPOINT_BASE: u32 = 0xe003_1c40;

/// IN endpoints carrying a `DEV_EPI_CS` / `EEPM_ENDPOINT` register pair.
pub const IN_ENDPOINT_COUNT: usize = 16;

/// `DEV_EPI_CS` register fields.
pub mod DEV_EPI_CS {
    /// ISO MULT: packets the endpoint may burst per micro-frame.
    pub mod MULT {
        pub const offset: u32 = 12;
        pub const mask: u32 = 0x3 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
}

/// `EEPM_ENDPOINT` register fields.
pub mod EEPM_ENDPOINT {
    /// The endpoint memory holds data ready to transmit.
    pub mod READY {
        pub const offset: u32 = 30;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Bytes of data available in the endpoint memory.
    pub mod DSIZE {
        pub const offset: u32 = 11;
        pub const mask: u32 = 0xFFFF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
}

struct EpCs<'a> {
    DEV_EPI_CS: &'a RWRegister<u32>,
}

struct Epm<'a> {
    EEPM_ENDPOINT: &'a RWRegister<u32>,
}

/// One IN endpoint's configuration and FIFO-status register pair.
pub struct InEndpointRegisters {
    cs: *const RWRegister<u32>,
    epm: *const RWRegister<u32>,
}

// Safety: the registers are memory-mapped hardware cells; the producer
// and notifier contexts may both read them.
unsafe impl Send for InEndpointRegisters {}
unsafe impl Sync for InEndpointRegisters {}

impl InEndpointRegisters {
    /// Access the register pair for `endpoint`.
    ///
    /// # Panics
    ///
    /// Panics if `endpoint` is not an IN endpoint index the banks cover.
    pub fn new<P: Peripherals>(peripherals: &P, endpoint: usize) -> Self {
        assert!(
            endpoint < IN_ENDPOINT_COUNT,
            "no IN endpoint {}",
            endpoint
        );
        // Safety: Peripherals implementations guarantee the pointers
        // address the full register banks.
        unsafe {
            InEndpointRegisters {
                cs: peripherals.ep_cfg().cast::<RWRegister<u32>>().add(endpoint),
                epm: peripherals.epm().cast::<RWRegister<u32>>().add(endpoint),
            }
        }
    }

    fn cs(&self) -> EpCs<'_> {
        EpCs {
            // Safety: pointer valid per construction.
            DEV_EPI_CS: unsafe { &*self.cs },
        }
    }

    fn epm(&self) -> Epm<'_> {
        Epm {
            // Safety: pointer valid per construction.
            EEPM_ENDPOINT: unsafe { &*self.epm },
        }
    }

    /// Bytes ready in the endpoint's egress FIFO, or `None` when the
    /// endpoint memory reports not-ready.
    pub fn occupancy(&self) -> Option<u32> {
        let epm = self.epm();
        if read_reg!(self, &epm, EEPM_ENDPOINT, READY == 1) {
            Some(read_reg!(self, &epm, EEPM_ENDPOINT, DSIZE))
        } else {
            None
        }
    }

    /// Program the ISO MULT field, leaving the rest of the endpoint
    /// configuration untouched.
    pub fn write_mult(&self, mult: u8) {
        let cs = self.cs();
        modify_reg!(self, &cs, DEV_EPI_CS, MULT: u32::from(mult));
    }
}

#[cfg(test)]
mod test {
    use super::{InEndpointRegisters, IN_ENDPOINT_COUNT};
    use crate::Peripherals;
    use ral_registers::RWRegister;

    struct TestBanks {
        cs: [RWRegister<u32>; IN_ENDPOINT_COUNT],
        epm: [RWRegister<u32>; IN_ENDPOINT_COUNT],
    }

    impl TestBanks {
        fn new() -> Self {
            // Registers are plain volatile cells; zeroed is valid.
            unsafe { core::mem::zeroed() }
        }
    }

    unsafe impl Peripherals for TestBanks {
        fn ep_cfg(&self) -> *const () {
            self.cs.as_ptr().cast()
        }
        fn epm(&self) -> *const () {
            self.epm.as_ptr().cast()
        }
    }

    #[test]
    fn occupancy_requires_ready() {
        let banks = TestBanks::new();
        let regs = InEndpointRegisters::new(&banks, 3);

        banks.epm[3].write(2500 << 11);
        assert_eq!(regs.occupancy(), None);

        banks.epm[3].write((1 << 30) | (2500 << 11));
        assert_eq!(regs.occupancy(), Some(2500));

        // A ready, empty endpoint memory reads as zero bytes.
        banks.epm[3].write(1 << 30);
        assert_eq!(regs.occupancy(), Some(0));
    }

    #[test]
    fn write_mult_preserves_other_fields() {
        let banks = TestBanks::new();
        let regs = InEndpointRegisters::new(&banks, 5);

        banks.cs[5].write(0xABCD_0FFF);
        regs.write_mult(2);
        assert_eq!(banks.cs[5].read(), (0xABCD_0FFF & !0x3000) | 0x2000);

        regs.write_mult(1);
        assert_eq!(banks.cs[5].read(), (0xABCD_0FFF & !0x3000) | 0x1000);
    }

    #[test]
    #[should_panic(expected = "no IN endpoint")]
    fn rejects_out_of_range_endpoint() {
        let banks = TestBanks::new();
        let _ = InEndpointRegisters::new(&banks, IN_ENDPOINT_COUNT);
    }
}
