//! Programmable interval timer, counter 0.

use super::outb;
use bitfield_struct::bitfield;
use kernel_info::sched::{PIT_COUNTER0_VALUE, TIMER_FREQUENCY_HZ};

const PIT_COUNTER0: u16 = 0x40;
const PIT_CONTROL: u16 = 0x43;

/// Mode/command register of the PIT.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct PitCommand {
    /// Count in BCD instead of binary (bit 0).
    pub bcd: bool,

    /// Operating mode (bits 1-3). 2 is the rate generator.
    #[bits(3)]
    pub mode: u8,

    /// Access mode (bits 4-5). 3 writes the low byte, then the high byte.
    #[bits(2)]
    pub access: u8,

    /// Counter to program (bits 6-7).
    #[bits(2)]
    pub channel: u8,
}

impl PitCommand {
    /// Counter 0 as a binary rate generator, reloaded low byte first.
    pub const fn periodic_counter0() -> Self {
        Self::new().with_channel(0).with_access(3).with_mode(2)
    }
}

/// Interrupt [`TIMER_FREQUENCY_HZ`] times a second on IRQ 0.
pub(super) fn start_periodic() {
    let [low, high] = PIT_COUNTER0_VALUE.to_le_bytes();
    unsafe {
        outb(PIT_CONTROL, PitCommand::periodic_counter0().into_bits());
        outb(PIT_COUNTER0, low);
        outb(PIT_COUNTER0, high);
    }
    log::info!("timer: {TIMER_FREQUENCY_HZ} Hz, reload {PIT_COUNTER0_VALUE}");
}
