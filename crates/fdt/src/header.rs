//! FDT header and big-endian primitive readers.
//!
//! All multi-byte integers in a DTB blob are big-endian per the Devicetree
//! Specification, regardless of the host/target endianness.

/// FDT magic number, `0xD00DFEED`, stored big-endian at offset 0.
pub const FDT_MAGIC: u32 = 0xD00D_FEED;

/// Size in bytes of the fixed-format FDT header.
pub const HEADER_SIZE: usize = 40;

/// Reads a big-endian `u32` at a byte `offset` in `data`.
pub(crate) fn read_be32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Reads a big-endian `u64` at a byte `offset` in `data`.
pub(crate) fn read_be64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Rounds `offset` up to the next 4-byte boundary, as the structure block
/// token stream requires after every name and property payload.
pub(crate) const fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

/// Parsed FDT header fields, by fixed word index per the spec.
#[derive(Debug, Clone, Copy)]
pub struct FdtHeader {
    pub magic: u32,
    pub total_size: u32,
    pub off_dt_struct: u32,
    pub size_dt_struct: u32,
    pub off_dt_strings: u32,
    pub size_dt_strings: u32,
    pub off_mem_rsvmap: u32,
    pub version: u32,
    pub last_comp_version: u32,
    pub boot_cpuid_phys: u32,
}

impl FdtHeader {
    /// Reads the header out of the start of a DTB blob.
    ///
    /// Does not validate the magic number or bounds-check the block
    /// offsets against `data.len()`; callers do that next.
    pub(crate) fn read(data: &[u8]) -> Option<Self> {
        Some(Self {
            magic: read_be32(data, 0)?,
            total_size: read_be32(data, 4)?,
            off_dt_struct: read_be32(data, 8)?,
            off_dt_strings: read_be32(data, 12)?,
            off_mem_rsvmap: read_be32(data, 16)?,
            version: read_be32(data, 20)?,
            last_comp_version: read_be32(data, 24)?,
            boot_cpuid_phys: read_be32(data, 28)?,
            size_dt_strings: read_be32(data, 32)?,
            size_dt_struct: read_be32(data, 36)?,
        })
    }
}
