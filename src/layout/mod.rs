//! Typed encoders for the fixed-width keys and values of shared tables
//!
//! Every layout encodes to exactly `WIDTH` bytes and decodes back to an
//! equal value. Over-long input is rejected, never truncated.

pub mod net;
pub mod overrides;
pub mod process;

pub use net::{DnsName, HttpAction, HttpResponsePattern, HttpRoute, HttpRouteKey, Ipv4Value, RawPacket};
pub use overrides::{
    ImageAction, ImageOverride, ImageOverrideKey, PingAction, PostgresMd5, PostgresRole,
    QueryPattern,
};
pub use process::{CommPair, CommProgram, FsWatchKey, PipedProgram};

use crate::{KitError, Result};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

pub trait Layout: Sized {
    /// Name used in error messages
    const NAME: &'static str;
    const WIDTH: usize;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()>;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self>;

    fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::WIDTH);
        self.write(&mut buf)?;
        if buf.len() != Self::WIDTH {
            return Err(KitError::layout(
                Self::NAME,
                format!("encoded {} bytes, expected {}", buf.len(), Self::WIDTH),
            ));
        }
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::WIDTH {
            return Err(KitError::layout(
                Self::NAME,
                format!("got {} bytes, expected {}", bytes.len(), Self::WIDTH),
            ));
        }
        Self::read(&mut Cursor::new(bytes))
    }
}

impl Layout for u8 {
    const NAME: &'static str = "u8";
    const WIDTH: usize = 1;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(*self);
        Ok(())
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(cursor.read_u8()?)
    }
}

impl Layout for u32 {
    const NAME: &'static str = "u32";
    const WIDTH: usize = 4;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u32::<NativeEndian>(*self)?;
        Ok(())
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(cursor.read_u32::<NativeEndian>()?)
    }
}

impl Layout for u64 {
    const NAME: &'static str = "u64";
    const WIDTH: usize = 8;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u64::<NativeEndian>(*self)?;
        Ok(())
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(cursor.read_u64::<NativeEndian>()?)
    }
}

/// Append `bytes` zero padded to `width`
pub(crate) fn put_bytes(
    buf: &mut Vec<u8>,
    layout: &'static str,
    bytes: &[u8],
    width: usize,
) -> Result<()> {
    if bytes.len() > width {
        return Err(KitError::layout(
            layout,
            format!("{} bytes do not fit in {}", bytes.len(), width),
        ));
    }
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + width - bytes.len(), 0);
    Ok(())
}

/// Append a string padded to `width`. A string filling the whole field
/// carries no terminating NUL.
pub(crate) fn put_str(buf: &mut Vec<u8>, layout: &'static str, s: &str, width: usize) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(KitError::layout(layout, format!("{:?} contains a NUL byte", s)));
    }
    put_bytes(buf, layout, s.as_bytes(), width)
}

/// Append a NUL terminated string padded to `width`
pub(crate) fn put_cstr(buf: &mut Vec<u8>, layout: &'static str, s: &str, width: usize) -> Result<()> {
    if s.len() >= width {
        return Err(KitError::layout(
            layout,
            format!("{:?} needs {} bytes, {} available", s, s.len() + 1, width),
        ));
    }
    put_str(buf, layout, s, width)
}

pub(crate) fn take_bytes(cursor: &mut Cursor<&[u8]>, width: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; width];
    cursor.read_exact(&mut out)?;
    Ok(out)
}

/// Read a `width` byte field up to its first NUL
pub(crate) fn take_cstr(
    cursor: &mut Cursor<&[u8]>,
    layout: &'static str,
    width: usize,
) -> Result<String> {
    let raw = take_bytes(cursor, width)?;
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8(raw[..end].to_vec())
        .map_err(|e| KitError::layout(layout, format!("not UTF-8: {}", e)))
}
