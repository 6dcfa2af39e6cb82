//! Little-endian primitives shared by the on-disk codecs.
//!
//! All cartograph artifacts (corpus, codebook, neighbourhood, best-matching
//! units, counts) are little-endian binary files. The helpers here keep the
//! header encoding in one place; each owning type writes its own payload.
//!
//! A short read is reported as [`CartographError::CorruptInput`] rather than
//! a bare I/O error, so a truncated artifact is distinguishable from a
//! missing or unreadable one.

use std::io::{Read, Write};

use crate::error::{CartographError, Result};

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CartographError::CorruptInput("unexpected end of file".to_string())
        } else {
            CartographError::Io(e)
        }
    })
}

pub(crate) fn write_u8<W: Write>(writer: &mut W, value: u8) -> Result<()> {
    writer.write_all(&[value])?;
    Ok(())
}

pub(crate) fn write_u16<W: Write>(writer: &mut W, value: u16) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_f32<W: Write>(writer: &mut W, value: f32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

/// Narrows a stored 64-bit map dimension to the 16-bit range the engine
/// supports, rejecting zero.
pub(crate) fn dimension_from_u64(value: u64, what: &str) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|&v| v >= 1)
        .ok_or_else(|| {
            CartographError::CorruptInput(format!(
                "stored {} {} is outside the supported range",
                what, value
            ))
        })
}
