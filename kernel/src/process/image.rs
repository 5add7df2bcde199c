//! Executable image parsing.
//!
//! Two formats are accepted, discriminated by signature: 32-bit ELF
//! (`\x7fELF`) and the native chunk format, a stream of tagged chunks
//! starting with `INIT` (entry point and minima), followed by `CODE`,
//! `DATA`, `STCK`, and optional `FXUP` relocation chunks.

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{KernelError, Result};
use crate::mm::layout::{LA_KERNEL, LA_USER};
use crate::mm::{Linear, PAGE_MASK};

/// ELF signature, little-endian `\x7fELF`.
pub const ELF_SIGNATURE: u32 = 0x464C_457F;

/// Native chunk tags.
pub const CHUNK_INIT: [u8; 4] = *b"INIT";
pub const CHUNK_CODE: [u8; 4] = *b"CODE";
pub const CHUNK_DATA: [u8; 4] = *b"DATA";
pub const CHUNK_STACK: [u8; 4] = *b"STCK";
pub const CHUNK_FIXUP: [u8; 4] = *b"FXUP";

/// One loadable region of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRegion {
    /// Target linear address in the user window.
    pub base: Linear,
    /// Byte range inside the file.
    pub file_offset: u32,
    pub file_size: u32,
    /// In-memory size; the tail past `file_size` is zero-filled.
    pub mem_size: u32,
    pub writable: bool,
}

impl LoadRegion {
    /// The region's backing bytes inside the image file.
    pub fn slice_of<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.file_offset as usize;
        let end = start + self.file_size as usize;
        bytes.get(start..end).ok_or(KernelError::BadParameter)
    }
}

/// Parsed executable image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableImage {
    pub entry: Linear,
    pub regions: Vec<LoadRegion>,
    /// Smallest user stack the image demands.
    pub stack_minimum: u32,
    /// Smallest heap the image demands.
    pub heap_minimum: u32,
}

impl ExecutableImage {
    /// Page-aligned end of the highest region.
    pub fn highest_address(&self) -> u32 {
        self.regions
            .iter()
            .map(|r| (r.base.as_u32() + r.mem_size + PAGE_MASK) & !PAGE_MASK)
            .max()
            .unwrap_or(LA_USER.as_u32())
    }

    fn validate(self) -> Result<Self> {
        if self.entry.as_u32() < LA_USER.as_u32() || self.entry.as_u32() >= LA_KERNEL.as_u32() {
            return Err(KernelError::BadParameter);
        }
        for region in &self.regions {
            let base = region.base.as_u32();
            let end = base.checked_add(region.mem_size).ok_or(KernelError::BadParameter)?;
            if base < LA_USER.as_u32() || end > LA_KERNEL.as_u32() {
                return Err(KernelError::BadParameter);
            }
            if region.file_size > region.mem_size {
                return Err(KernelError::BadParameter);
            }
        }
        Ok(self)
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let slice = bytes
        .get(offset..offset + 4)
        .ok_or(KernelError::BadParameter)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    let slice = bytes
        .get(offset..offset + 2)
        .ok_or(KernelError::BadParameter)?;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

/// Parse an image, picking the format from its signature.
pub fn parse(bytes: &[u8]) -> Result<ExecutableImage> {
    match read_u32(bytes, 0)? {
        ELF_SIGNATURE => parse_elf(bytes),
        _ if bytes.get(..4) == Some(&CHUNK_INIT) => parse_native(bytes),
        _ => Err(KernelError::BadParameter),
    }
}

// ---------------------------------------------------------------------
// ELF32
// ---------------------------------------------------------------------

const ELF_CLASS_32: u8 = 1;
const ELF_DATA_LSB: u8 = 1;
const ELF_MACHINE_386: u16 = 3;
const PT_LOAD: u32 = 1;
const PF_W: u32 = 2;

fn parse_elf(bytes: &[u8]) -> Result<ExecutableImage> {
    if bytes.get(4) != Some(&ELF_CLASS_32) || bytes.get(5) != Some(&ELF_DATA_LSB) {
        return Err(KernelError::BadParameter);
    }
    if read_u16(bytes, 18)? != ELF_MACHINE_386 {
        return Err(KernelError::BadParameter);
    }

    let entry = read_u32(bytes, 24)?;
    let ph_offset = read_u32(bytes, 28)? as usize;
    let ph_entry_size = read_u16(bytes, 42)? as usize;
    let ph_count = read_u16(bytes, 44)? as usize;
    if ph_entry_size < 32 {
        return Err(KernelError::BadParameter);
    }

    let mut regions = Vec::new();
    for index in 0..ph_count {
        let at = ph_offset + index * ph_entry_size;
        if read_u32(bytes, at)? != PT_LOAD {
            continue;
        }
        let file_offset = read_u32(bytes, at + 4)?;
        let vaddr = read_u32(bytes, at + 8)?;
        let file_size = read_u32(bytes, at + 16)?;
        let mem_size = read_u32(bytes, at + 20)?;
        let flags = read_u32(bytes, at + 24)?;
        if mem_size == 0 {
            continue;
        }
        regions.push(LoadRegion {
            base: Linear(vaddr),
            file_offset,
            file_size,
            mem_size,
            writable: flags & PF_W != 0,
        });
    }
    if regions.is_empty() {
        return Err(KernelError::BadParameter);
    }

    ExecutableImage {
        entry: Linear(entry),
        regions,
        stack_minimum: 0,
        heap_minimum: 0,
    }
    .validate()
}

// ---------------------------------------------------------------------
// Native chunk format
// ---------------------------------------------------------------------

/// INIT chunk payload layout: entry, code base/size, data base/size,
/// stack minimum, heap minimum (all u32 little-endian).
const INIT_PAYLOAD_SIZE: u32 = 28;

fn parse_native(bytes: &[u8]) -> Result<ExecutableImage> {
    let mut offset = 0usize;
    let mut entry = Linear::NULL;
    let mut stack_minimum = 0u32;
    let mut heap_minimum = 0u32;
    let mut code_base = Linear::NULL;
    let mut data_base = Linear::NULL;
    let mut regions = Vec::new();
    let mut seen_init = false;

    while offset + 8 <= bytes.len() {
        let tag = [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]];
        let size = read_u32(bytes, offset + 4)?;
        let payload = offset + 8;
        let end = payload + size as usize;
        if end > bytes.len() {
            return Err(KernelError::BadParameter);
        }

        match tag {
            CHUNK_INIT => {
                if size < INIT_PAYLOAD_SIZE {
                    return Err(KernelError::BadParameter);
                }
                entry = Linear(read_u32(bytes, payload)?);
                code_base = Linear(read_u32(bytes, payload + 4)?);
                data_base = Linear(read_u32(bytes, payload + 12)?);
                stack_minimum = read_u32(bytes, payload + 20)?;
                heap_minimum = read_u32(bytes, payload + 24)?;
                seen_init = true;
            }
            CHUNK_CODE => {
                regions.push(LoadRegion {
                    base: code_base,
                    file_offset: payload as u32,
                    file_size: size,
                    mem_size: size,
                    writable: false,
                });
            }
            CHUNK_DATA => {
                regions.push(LoadRegion {
                    base: data_base,
                    file_offset: payload as u32,
                    file_size: size,
                    mem_size: size,
                    writable: true,
                });
            }
            CHUNK_STACK => {
                // Sizing chunk only; the stack region itself is allocated
                // at process creation.
                if size >= 4 {
                    stack_minimum = stack_minimum.max(read_u32(bytes, payload)?);
                }
            }
            CHUNK_FIXUP => {
                // Flat images need no fixups; the chunk is tolerated and
                // skipped.
            }
            _ => {
                // Unknown chunks are skipped for forward compatibility.
            }
        }
        offset = end;
    }

    if !seen_init || regions.is_empty() {
        return Err(KernelError::BadParameter);
    }

    ExecutableImage {
        entry,
        regions,
        stack_minimum,
        heap_minimum,
    }
    .validate()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn push_chunk(out: &mut Vec<u8>, tag: [u8; 4], payload: &[u8]) {
        out.extend_from_slice(&tag);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }

    fn native_image() -> Vec<u8> {
        let mut init = Vec::new();
        init.extend_from_slice(&0x0040_0000u32.to_le_bytes()); // entry
        init.extend_from_slice(&0x0040_0000u32.to_le_bytes()); // code base
        init.extend_from_slice(&0u32.to_le_bytes()); // code size hint
        init.extend_from_slice(&0x0041_0000u32.to_le_bytes()); // data base
        init.extend_from_slice(&0u32.to_le_bytes()); // data size hint
        init.extend_from_slice(&0x8000u32.to_le_bytes()); // stack minimum
        init.extend_from_slice(&0x4000u32.to_le_bytes()); // heap minimum

        let mut file = Vec::new();
        push_chunk(&mut file, CHUNK_INIT, &init);
        push_chunk(&mut file, CHUNK_CODE, &[0x90; 64]);
        push_chunk(&mut file, CHUNK_DATA, &[0xAB; 32]);
        file
    }

    #[test]
    fn native_image_parses() {
        let file = native_image();
        let image = parse(&file).unwrap();
        assert_eq!(image.entry, Linear(0x0040_0000));
        assert_eq!(image.stack_minimum, 0x8000);
        assert_eq!(image.heap_minimum, 0x4000);
        assert_eq!(image.regions.len(), 2);
        assert!(!image.regions[0].writable);
        assert!(image.regions[1].writable);
        assert_eq!(image.regions[0].slice_of(&file).unwrap(), &[0x90u8; 64][..]);
    }

    #[test]
    fn elf_image_parses() {
        let mut file = std::vec![0u8; 0x74 + 64];
        file[0..4].copy_from_slice(&ELF_SIGNATURE.to_le_bytes());
        file[4] = ELF_CLASS_32;
        file[5] = ELF_DATA_LSB;
        file[18..20].copy_from_slice(&ELF_MACHINE_386.to_le_bytes());
        file[24..28].copy_from_slice(&0x0040_0100u32.to_le_bytes()); // entry
        file[28..32].copy_from_slice(&52u32.to_le_bytes()); // phoff
        file[42..44].copy_from_slice(&32u16.to_le_bytes()); // phentsize
        file[44..46].copy_from_slice(&1u16.to_le_bytes()); // phnum
        // Program header at 52.
        file[52..56].copy_from_slice(&PT_LOAD.to_le_bytes());
        file[56..60].copy_from_slice(&0x74u32.to_le_bytes()); // offset
        file[60..64].copy_from_slice(&0x0040_0000u32.to_le_bytes()); // vaddr
        file[68..72].copy_from_slice(&64u32.to_le_bytes()); // filesz
        file[72..76].copy_from_slice(&128u32.to_le_bytes()); // memsz
        file[76..80].copy_from_slice(&(PF_W | 4).to_le_bytes()); // flags

        let image = parse(&file).unwrap();
        assert_eq!(image.entry, Linear(0x0040_0100));
        assert_eq!(image.regions.len(), 1);
        let region = image.regions[0];
        assert_eq!(region.base, Linear(0x0040_0000));
        assert_eq!(region.file_size, 64);
        assert_eq!(region.mem_size, 128);
        assert!(region.writable);
    }

    #[test]
    fn kernel_window_addresses_are_rejected() {
        let mut file = native_image();
        // Point the code base into the kernel window.
        file[12..16].copy_from_slice(&0xC000_0000u32.to_le_bytes());
        assert!(parse(&file).is_err());
    }

    #[test]
    fn unknown_signatures_are_rejected() {
        assert!(parse(b"MZ\x90\x00rest").is_err());
        assert!(parse(&[]).is_err());
    }
}
