//! Per-vector interrupt stubs and the common frame builder.
//!
//! Each stub normalizes the stack (vectors without a CPU error code push
//! a zero), tags the vector number, and falls into the common stub which
//! saves the full register image described by
//! [`InterruptFrame`](super::frame::InterruptFrame), loads kernel data
//! segments, and calls the dispatcher.

use super::idt::HARDWARE_VECTORS;

core::arch::global_asm!(
    r#"
.macro ISR_NOERR vec
.global isr_stub_\vec
isr_stub_\vec:
    push 0
    push \vec
    jmp isr_common
.endm

.macro ISR_ERR vec
.global isr_stub_\vec
isr_stub_\vec:
    push \vec
    jmp isr_common
.endm

// Exceptions 0-31; 8, 10-14 and 17 push a CPU error code.
ISR_NOERR 0
ISR_NOERR 1
ISR_NOERR 2
ISR_NOERR 3
ISR_NOERR 4
ISR_NOERR 5
ISR_NOERR 6
ISR_NOERR 7
ISR_ERR   8
ISR_NOERR 9
ISR_ERR   10
ISR_ERR   11
ISR_ERR   12
ISR_ERR   13
ISR_ERR   14
ISR_NOERR 15
ISR_NOERR 16
ISR_ERR   17
ISR_NOERR 18
ISR_NOERR 19
ISR_NOERR 20
ISR_NOERR 21
ISR_NOERR 22
ISR_NOERR 23
ISR_NOERR 24
ISR_NOERR 25
ISR_NOERR 26
ISR_NOERR 27
ISR_NOERR 28
ISR_NOERR 29
ISR_NOERR 30
ISR_NOERR 31

// Remapped IRQs 0-15 on vectors 32-47.
ISR_NOERR 32
ISR_NOERR 33
ISR_NOERR 34
ISR_NOERR 35
ISR_NOERR 36
ISR_NOERR 37
ISR_NOERR 38
ISR_NOERR 39
ISR_NOERR 40
ISR_NOERR 41
ISR_NOERR 42
ISR_NOERR 43
ISR_NOERR 44
ISR_NOERR 45
ISR_NOERR 46
ISR_NOERR 47

// Software gates.
ISR_NOERR 128
ISR_NOERR 129

isr_common:
    pusha
    mov eax, ds
    push eax
    mov eax, es
    push eax
    mov eax, fs
    push eax
    mov eax, gs
    push eax

    mov eax, cr0
    push eax
    mov eax, cr2
    push eax
    mov eax, cr3
    push eax
    mov eax, cr4
    push eax

    mov eax, dr7
    push eax
    mov eax, dr6
    push eax
    mov eax, dr3
    push eax
    mov eax, dr2
    push eax
    mov eax, dr1
    push eax
    mov eax, dr0
    push eax

    sub esp, 108
    fnsave [esp]

    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax

    push esp
    call interrupt_dispatch
    add esp, 4

    frstor [esp]
    add esp, 108

    // Debug and control registers are a read-only capture.
    add esp, 24
    add esp, 16

    pop eax
    mov gs, ax
    pop eax
    mov fs, ax
    pop eax
    mov es, ax
    pop eax
    mov ds, ax

    popa
    add esp, 8
    iretd

.global ISR_STUB_TABLE
ISR_STUB_TABLE:
    .long isr_stub_0
    .long isr_stub_1
    .long isr_stub_2
    .long isr_stub_3
    .long isr_stub_4
    .long isr_stub_5
    .long isr_stub_6
    .long isr_stub_7
    .long isr_stub_8
    .long isr_stub_9
    .long isr_stub_10
    .long isr_stub_11
    .long isr_stub_12
    .long isr_stub_13
    .long isr_stub_14
    .long isr_stub_15
    .long isr_stub_16
    .long isr_stub_17
    .long isr_stub_18
    .long isr_stub_19
    .long isr_stub_20
    .long isr_stub_21
    .long isr_stub_22
    .long isr_stub_23
    .long isr_stub_24
    .long isr_stub_25
    .long isr_stub_26
    .long isr_stub_27
    .long isr_stub_28
    .long isr_stub_29
    .long isr_stub_30
    .long isr_stub_31
    .long isr_stub_32
    .long isr_stub_33
    .long isr_stub_34
    .long isr_stub_35
    .long isr_stub_36
    .long isr_stub_37
    .long isr_stub_38
    .long isr_stub_39
    .long isr_stub_40
    .long isr_stub_41
    .long isr_stub_42
    .long isr_stub_43
    .long isr_stub_44
    .long isr_stub_45
    .long isr_stub_46
    .long isr_stub_47
    .long isr_stub_128
    .long isr_stub_129
"#
);

extern "C" {
    static ISR_STUB_TABLE: [u32; HARDWARE_VECTORS + 2];
}

/// Stub addresses for the 48 hardware vectors.
pub fn hardware_stub_table() -> [u32; HARDWARE_VECTORS] {
    let mut table = [0u32; HARDWARE_VECTORS];
    // SAFETY: the asm block above defines the table with exactly
    // HARDWARE_VECTORS + 2 entries.
    let stubs = unsafe { &ISR_STUB_TABLE };
    table.copy_from_slice(&stubs[..HARDWARE_VECTORS]);
    table
}

/// Stub address for the `int 0x80` system-call gate.
pub fn user_call_stub() -> u32 {
    // SAFETY: see `hardware_stub_table`.
    unsafe { ISR_STUB_TABLE[HARDWARE_VECTORS] }
}

/// Stub address for the `int 0x81` driver-call gate.
pub fn driver_call_stub() -> u32 {
    // SAFETY: see `hardware_stub_table`.
    unsafe { ISR_STUB_TABLE[HARDWARE_VECTORS + 1] }
}
