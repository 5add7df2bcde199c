//! 8259 programmable interrupt controller pair.

use super::idt::VECTOR_IRQ_BASE;
use super::port::{inb, io_wait, outb};

const MASTER_COMMAND: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_COMMAND: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;
const EOI: u8 = 0x20;

/// Remap the controllers so IRQs 0-15 land on vectors 32-47, then restore
/// the masks the loader captured in real mode.
pub fn init(mask_master: u8, mask_slave: u8) {
    // SAFETY: the standard 8259 initialization sequence on the standard
    // ports; only the PICs observe these writes.
    unsafe {
        outb(MASTER_COMMAND, ICW1_INIT | ICW1_ICW4);
        io_wait();
        outb(SLAVE_COMMAND, ICW1_INIT | ICW1_ICW4);
        io_wait();
        outb(MASTER_DATA, VECTOR_IRQ_BASE);
        io_wait();
        outb(SLAVE_DATA, VECTOR_IRQ_BASE + 8);
        io_wait();
        outb(MASTER_DATA, 1 << 2); // slave on IRQ2
        io_wait();
        outb(SLAVE_DATA, 2);
        io_wait();
        outb(MASTER_DATA, ICW4_8086);
        io_wait();
        outb(SLAVE_DATA, ICW4_8086);
        io_wait();

        outb(MASTER_DATA, mask_master);
        outb(SLAVE_DATA, mask_slave);
    }
    log::debug!(
        "pic: remapped to {:#x}, masks {:#04x}/{:#04x}",
        VECTOR_IRQ_BASE,
        mask_master,
        mask_slave
    );
}

/// Acknowledge an IRQ; the slave needs its own EOI for IRQs 8-15.
pub fn end_of_interrupt(irq: u8) {
    // SAFETY: EOI writes only acknowledge the in-service interrupt.
    unsafe {
        if irq >= 8 {
            outb(SLAVE_COMMAND, EOI);
        }
        outb(MASTER_COMMAND, EOI);
    }
}

/// Unmask one IRQ line.
pub fn enable_irq(irq: u8) {
    let (port, bit) = if irq < 8 {
        (MASTER_DATA, irq)
    } else {
        (SLAVE_DATA, irq - 8)
    };
    // SAFETY: read-modify-write of the mask register.
    unsafe {
        let mask = inb(port) & !(1 << bit);
        outb(port, mask);
    }
}

/// Mask one IRQ line.
pub fn disable_irq(irq: u8) {
    let (port, bit) = if irq < 8 {
        (MASTER_DATA, irq)
    } else {
        (SLAVE_DATA, irq - 8)
    };
    // SAFETY: read-modify-write of the mask register.
    unsafe {
        let mask = inb(port) | (1 << bit);
        outb(port, mask);
    }
}
