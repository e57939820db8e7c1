//! Checkpoint plumbing: a length-prefixed record buffer and the scalar codecs
//! every persisted type is built from.
//!
//! The host owns the checkpoint file; this crate only appends and reads back
//! its own fields, in a fixed order, through [`ModelBuffer`]. Numbers are
//! little-endian.

use crate::{AutoMlError, Interaction, Namespace};

/// Append-only / read-sequential record I/O.
pub trait ModelBuffer {
    /// Append one record; returns the number of bytes written (prefix included).
    fn write_field(&mut self, bytes: &[u8]) -> usize;

    /// Read the next record.
    fn read_field(&mut self) -> Result<Vec<u8>, AutoMlError>;
}

/// Types that contribute fields to a checkpoint.
pub trait Persist: Sized {
    fn write_to<B: ModelBuffer + ?Sized>(&self, buf: &mut B) -> usize;
    fn read_from<B: ModelBuffer + ?Sized>(buf: &mut B) -> Result<Self, AutoMlError>;
}

/// Largest payload one record can carry behind its `u32` length prefix.
pub const MAX_RECORD_BYTES: usize = u32::MAX as usize;

/// In-memory [`ModelBuffer`]: each record is a `u32` length followed by the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoBuf {
    data: Vec<u8>,
    pos: usize,
}

impl IoBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap previously written bytes for reading from the start.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes not yet consumed by `read_field`.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
}

impl ModelBuffer for IoBuf {
    fn write_field(&mut self, bytes: &[u8]) -> usize {
        debug_assert!(
            bytes.len() <= MAX_RECORD_BYTES,
            "record of {} bytes overflows its length prefix",
            bytes.len()
        );
        let len = bytes.len() as u32;
        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(bytes);
        4 + bytes.len()
    }

    fn read_field(&mut self) -> Result<Vec<u8>, AutoMlError> {
        if self.remaining() < 4 {
            return Err(AutoMlError::decode(format!(
                "truncated record header at byte {}",
                self.pos
            )));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let start = self.pos + 4;
        if self.data.len() - start < len {
            return Err(AutoMlError::decode(format!(
                "record at byte {} claims {len} bytes, {} available",
                self.pos,
                self.data.len() - start
            )));
        }
        self.pos = start + len;
        Ok(self.data[start..start + len].to_vec())
    }
}

// ============================================================================
// Scalar codecs
// ============================================================================

fn read_exact<const N: usize, B: ModelBuffer + ?Sized>(
    buf: &mut B,
    what: &str,
) -> Result<[u8; N], AutoMlError> {
    let bytes = buf.read_field()?;
    bytes.as_slice().try_into().map_err(|_| {
        AutoMlError::decode(format!(
            "field '{what}': expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}

pub(crate) fn write_u64<B: ModelBuffer + ?Sized>(buf: &mut B, v: u64) -> usize {
    buf.write_field(&v.to_le_bytes())
}

pub(crate) fn read_u64<B: ModelBuffer + ?Sized>(buf: &mut B, what: &str) -> Result<u64, AutoMlError> {
    Ok(u64::from_le_bytes(read_exact::<8, B>(buf, what)?))
}

pub(crate) fn write_u128<B: ModelBuffer + ?Sized>(buf: &mut B, v: u128) -> usize {
    buf.write_field(&v.to_le_bytes())
}

pub(crate) fn read_u128<B: ModelBuffer + ?Sized>(buf: &mut B, what: &str) -> Result<u128, AutoMlError> {
    Ok(u128::from_le_bytes(read_exact::<16, B>(buf, what)?))
}

pub(crate) fn write_f64<B: ModelBuffer + ?Sized>(buf: &mut B, v: f64) -> usize {
    buf.write_field(&v.to_le_bytes())
}

pub(crate) fn read_f64<B: ModelBuffer + ?Sized>(buf: &mut B, what: &str) -> Result<f64, AutoMlError> {
    Ok(f64::from_le_bytes(read_exact::<8, B>(buf, what)?))
}

pub(crate) fn write_f32<B: ModelBuffer + ?Sized>(buf: &mut B, v: f32) -> usize {
    buf.write_field(&v.to_le_bytes())
}

pub(crate) fn read_f32<B: ModelBuffer + ?Sized>(buf: &mut B, what: &str) -> Result<f32, AutoMlError> {
    Ok(f32::from_le_bytes(read_exact::<4, B>(buf, what)?))
}

pub(crate) fn write_u8<B: ModelBuffer + ?Sized>(buf: &mut B, v: u8) -> usize {
    buf.write_field(&[v])
}

pub(crate) fn read_u8<B: ModelBuffer + ?Sized>(buf: &mut B, what: &str) -> Result<u8, AutoMlError> {
    Ok(read_exact::<1, B>(buf, what)?[0])
}

pub(crate) fn write_bool<B: ModelBuffer + ?Sized>(buf: &mut B, v: bool) -> usize {
    write_u8(buf, v as u8)
}

pub(crate) fn read_bool<B: ModelBuffer + ?Sized>(buf: &mut B, what: &str) -> Result<bool, AutoMlError> {
    match read_u8(buf, what)? {
        0 => Ok(false),
        1 => Ok(true),
        x => Err(AutoMlError::decode(format!("field '{what}': invalid bool {x}"))),
    }
}

/// Length of a persisted collection, bounded to reject garbage before allocating.
pub(crate) fn read_len<B: ModelBuffer + ?Sized>(
    buf: &mut B,
    what: &str,
    max: u64,
) -> Result<usize, AutoMlError> {
    let n = read_u64(buf, what)?;
    if n > max {
        return Err(AutoMlError::decode(format!(
            "field '{what}': length {n} exceeds limit {max}"
        )));
    }
    Ok(n as usize)
}

pub(crate) fn write_f32_slice<B: ModelBuffer + ?Sized>(buf: &mut B, v: &[f32]) -> usize {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    buf.write_field(&bytes)
}

pub(crate) fn read_f32_vec<B: ModelBuffer + ?Sized>(
    buf: &mut B,
    what: &str,
) -> Result<Vec<f32>, AutoMlError> {
    let bytes = buf.read_field()?;
    if bytes.len() % 4 != 0 {
        return Err(AutoMlError::decode(format!(
            "field '{what}': {} bytes is not a whole number of f32",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

// ============================================================================
// Interactions
// ============================================================================

const MAX_INTERACTIONS: u64 = 1 << 20;

impl Persist for Interaction {
    fn write_to<B: ModelBuffer + ?Sized>(&self, buf: &mut B) -> usize {
        let bytes: Vec<u8> = self.0.iter().map(|ns| ns.0).collect();
        buf.write_field(&bytes)
    }

    fn read_from<B: ModelBuffer + ?Sized>(buf: &mut B) -> Result<Self, AutoMlError> {
        let bytes = buf.read_field()?;
        if bytes.is_empty() {
            return Err(AutoMlError::decode("empty interaction tuple"));
        }
        Ok(Interaction(bytes.into_iter().map(Namespace).collect()))
    }
}

pub(crate) fn write_interactions<'a, B, I>(buf: &mut B, list: I) -> usize
where
    B: ModelBuffer + ?Sized,
    I: ExactSizeIterator<Item = &'a Interaction>,
{
    let mut n = write_u64(buf, list.len() as u64);
    for i in list {
        n += i.write_to(buf);
    }
    n
}

pub(crate) fn read_interactions<B: ModelBuffer + ?Sized>(
    buf: &mut B,
    what: &str,
) -> Result<Vec<Interaction>, AutoMlError> {
    let n = read_len(buf, what, MAX_INTERACTIONS)?;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(Interaction::read_from(buf)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_read_back_in_write_order() {
        let mut b = IoBuf::new();
        let n = write_u64(&mut b, 42) + write_f64(&mut b, 0.25) + write_bool(&mut b, true);
        assert_eq!(n, b.len());

        let mut r = IoBuf::from_bytes(b.into_bytes());
        assert_eq!(read_u64(&mut r, "a").unwrap(), 42);
        assert_eq!(read_f64(&mut r, "b").unwrap(), 0.25);
        assert!(read_bool(&mut r, "c").unwrap());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn wrong_width_is_a_deserialization_error() {
        let mut b = IoBuf::new();
        write_u8(&mut b, 3);
        let mut r = IoBuf::from_bytes(b.into_bytes());
        let err = read_u64(&mut r, "lease").unwrap_err();
        assert!(matches!(err, AutoMlError::Deserialization(_)));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let mut b = IoBuf::new();
        write_u64(&mut b, 1);
        let mut bytes = b.into_bytes();
        bytes.truncate(6);
        let mut r = IoBuf::from_bytes(bytes);
        assert!(r.read_field().is_err());
        assert!(IoBuf::new().read_field().is_err());
    }

    #[test]
    fn bool_field_rejects_other_bytes() {
        let mut b = IoBuf::new();
        write_u8(&mut b, 2);
        let mut r = IoBuf::from_bytes(b.into_bytes());
        assert!(read_bool(&mut r, "flag").is_err());
    }

    #[test]
    fn interaction_lists_round_trip() {
        let list = vec![Interaction::from("ab"), Interaction::from("bcd")];
        let mut b = IoBuf::new();
        write_interactions(&mut b, list.iter());
        let mut r = IoBuf::from_bytes(b.into_bytes());
        assert_eq!(read_interactions(&mut r, "live").unwrap(), list);
    }

    #[test]
    fn oversized_length_is_rejected_before_allocation() {
        let mut b = IoBuf::new();
        write_u64(&mut b, u64::MAX);
        let mut r = IoBuf::from_bytes(b.into_bytes());
        assert!(read_interactions(&mut r, "live").is_err());
    }
}
