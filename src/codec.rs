//! Byte-level helpers for the TLS presentation language.
//!
//! Parsing goes through `nom`; writing goes straight into a `Vec<u8>`.
//! Length-prefixed vectors are written by reserving the prefix and filling
//! it in once the body is known. A body too long for its prefix is an
//! [`Error::EncodeError`], never a truncated length.

use nom::bytes::complete::take;
use nom::multi::length_data;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use crate::Error;

pub(crate) fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, bytes) = take(6usize)(input)?;
    let mut v = 0u64;
    for b in bytes {
        v = (v << 8) | *b as u64;
    }
    Ok((input, v))
}

/// `opaque data<0..2^8-1>`
pub(crate) fn vec8(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u8)(input)
}

/// `opaque data<0..2^16-1>`
pub(crate) fn vec16(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u16)(input)
}

/// `opaque data<0..2^24-1>`
pub(crate) fn vec24(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u24)(input)
}

pub(crate) fn fixed<const N: usize>(input: &[u8]) -> IResult<&[u8], [u8; N]> {
    let (input, bytes) = take(N)(input)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok((input, out))
}

/// Parse a vector of fixed-width items with a 16-bit byte length prefix.
pub(crate) fn list16<'a, T, F>(mut item: F) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Vec<T>>
where
    F: FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
{
    move |input: &'a [u8]| {
        let (rest, mut body) = vec16(input)?;
        let mut out = Vec::new();
        while !body.is_empty() {
            let (b, v) = item(body)?;
            body = b;
            out.push(v);
        }
        Ok((rest, out))
    }
}

pub(crate) fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_u24(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes()[1..]);
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_u48(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes()[2..]);
}

/// Length of a prefixed vector, or an error if `len` does not fit `max`.
fn prefix_len(len: usize, max: usize) -> Result<usize, Error> {
    if len > max {
        return Err(Error::EncodeError(format!(
            "{} bytes in a vector of at most {}",
            len, max
        )));
    }
    Ok(len)
}

pub(crate) fn put_vec8(out: &mut Vec<u8>, data: &[u8]) -> Result<(), Error> {
    let len = prefix_len(data.len(), u8::MAX as usize)?;
    out.push(len as u8);
    out.extend_from_slice(data);
    Ok(())
}

pub(crate) fn put_vec16(out: &mut Vec<u8>, data: &[u8]) -> Result<(), Error> {
    let len = prefix_len(data.len(), u16::MAX as usize)?;
    put_u16(out, len as u16);
    out.extend_from_slice(data);
    Ok(())
}

pub(crate) fn put_vec24(out: &mut Vec<u8>, data: &[u8]) -> Result<(), Error> {
    let len = prefix_len(data.len(), U24_MAX)?;
    put_u24(out, len as u32);
    out.extend_from_slice(data);
    Ok(())
}

const U24_MAX: usize = (1 << 24) - 1;

/// Write a 16-bit length prefix around whatever `f` appends.
pub(crate) fn with_len16<R>(
    out: &mut Vec<u8>,
    f: impl FnOnce(&mut Vec<u8>) -> Result<R, Error>,
) -> Result<R, Error> {
    let at = out.len();
    out.extend_from_slice(&[0, 0]);
    let r = f(out)?;
    let len = prefix_len(out.len() - at - 2, u16::MAX as usize)?;
    out[at..at + 2].copy_from_slice(&(len as u16).to_be_bytes());
    Ok(r)
}

/// Write an 8-bit length prefix around whatever `f` appends.
pub(crate) fn with_len8<R>(
    out: &mut Vec<u8>,
    f: impl FnOnce(&mut Vec<u8>) -> Result<R, Error>,
) -> Result<R, Error> {
    let at = out.len();
    out.push(0);
    let r = f(out)?;
    out[at] = prefix_len(out.len() - at - 1, u8::MAX as usize)? as u8;
    Ok(r)
}

/// Write a 24-bit length prefix around whatever `f` appends.
pub(crate) fn with_len24<R>(
    out: &mut Vec<u8>,
    f: impl FnOnce(&mut Vec<u8>) -> Result<R, Error>,
) -> Result<R, Error> {
    let at = out.len();
    out.extend_from_slice(&[0, 0, 0]);
    let r = f(out)?;
    let len = prefix_len(out.len() - at - 3, U24_MAX)?;
    out[at..at + 3].copy_from_slice(&(len as u32).to_be_bytes()[1..]);
    Ok(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_lengths() {
        let mut out = Vec::new();
        with_len16(&mut out, |out| {
            put_u8(out, 1);
            with_len8(out, |out| {
                out.extend_from_slice(b"abc");
                Ok(())
            })
        })
        .unwrap();
        assert_eq!(out, [0, 5, 1, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn u48() {
        let mut out = Vec::new();
        put_u48(&mut out, 0x0102_0304_0506);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
        let (rest, v) = be_u48(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(v, 0x0102_0304_0506);
    }

    #[test]
    fn list_of_u16() {
        let input = [0, 4, 0, 29, 0, 23, 0xff];
        let (rest, v) = list16(be_u16)(&input).unwrap();
        assert_eq!(v, vec![29, 23]);
        assert_eq!(rest, [0xff]);
    }

    #[test]
    fn short_vector_is_error() {
        assert!(vec16(&[0, 5, 1, 2]).is_err());
    }

    #[test]
    fn oversized_vectors_are_errors() {
        let mut out = Vec::new();
        assert!(matches!(
            put_vec16(&mut out, &vec![0; 70_000]),
            Err(Error::EncodeError(_))
        ));
        assert!(out.is_empty());
        assert!(matches!(put_vec8(&mut out, &[0; 256]), Err(Error::EncodeError(_))));

        let r = with_len16(&mut out, |out| {
            out.resize(out.len() + 65_536, 7);
            Ok(())
        });
        assert!(matches!(r, Err(Error::EncodeError(_))));

        // The largest body that fits is fine.
        let mut out = Vec::new();
        put_vec16(&mut out, &vec![1; 65_535]).unwrap();
        assert_eq!(&out[..2], &[0xff, 0xff]);
    }
}
