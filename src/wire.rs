//! Hand-rolled tag/length-delimited binary encoding for the fixed payload
//! messages (`HashBucket`, `HashRecord`, `PostingList`, and the key
//! variants). The shape matches a protobuf wire format closely enough that
//! tag numbers in the on-disk layout are interoperable, but nothing here
//! depends on a protobuf runtime: these schemas are fixed, so decoding is a
//! short explicit routine per message rather than a reflection-driven one.

use integer_encoding::{VarIntReader, VarIntWriter};
use std::io::{self, Read, Write};

const WIRE_VARINT: u64 = 0;
const WIRE_LEN: u64 = 2;

fn write_tag<W: Write>(w: &mut W, field: u64, wire_type: u64) -> io::Result<()> {
    w.write_varint((field << 3) | wire_type)?;
    Ok(())
}

fn read_tag<R: Read>(r: &mut R) -> io::Result<(u64, u64)> {
    let tag: u64 = r.read_varint()?;
    Ok((tag >> 3, tag & 0x7))
}

/// Writes a length-delimited field: the tag, a varint length, then `bytes`.
pub fn write_bytes_field<W: Write>(w: &mut W, field: u64, bytes: &[u8]) -> io::Result<()> {
    write_tag(w, field, WIRE_LEN)?;
    w.write_varint(bytes.len() as u64)?;
    w.write_all(bytes)
}

/// Writes a packed-varint repeated int64 field (protobuf "packed" encoding):
/// tag, total byte length, then each value as a varint back to back.
pub fn write_packed_i64_field<W: Write>(w: &mut W, field: u64, values: &[i64]) -> io::Result<()> {
    let mut buf = Vec::new();
    for v in values {
        buf.write_varint(*v as u64)?;
    }
    write_tag(w, field, WIRE_LEN)?;
    w.write_varint(buf.len() as u64)?;
    w.write_all(&buf)
}

/// Writes a singular (non-packed) varint field, e.g. a scalar `int64`.
pub fn write_varint_field<W: Write>(w: &mut W, field: u64, value: i64) -> io::Result<()> {
    write_tag(w, field, WIRE_VARINT)?;
    w.write_varint(value as u64)?;
    Ok(())
}

/// Reads one (field, wire_type, payload) entry, consuming a varint value in
/// place for `WIRE_VARINT` fields so callers never have to special-case it.
pub enum WireValue {
    Varint(u64),
    Bytes(Vec<u8>),
}

pub fn read_field<R: Read>(r: &mut R) -> io::Result<Option<(u64, WireValue)>> {
    let (field, wire_type) = match read_tag(r) {
        Ok(ft) => ft,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    match wire_type {
        WIRE_VARINT => {
            let v: u64 = r.read_varint()?;
            Ok(Some((field, WireValue::Varint(v))))
        }
        WIRE_LEN => {
            let len: u64 = r.read_varint()?;
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf)?;
            Ok(Some((field, WireValue::Bytes(buf))))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported wire type {other}"),
        )),
    }
}

/// Decodes a packed-varint repeated int64 field's payload bytes.
pub fn decode_packed_i64(bytes: &[u8]) -> io::Result<Vec<i64>> {
    let mut cursor = io::Cursor::new(bytes);
    let mut out = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        let v: u64 = cursor.read_varint()?;
        out.push(v as i64);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn packed_i64_roundtrip() {
        let values = vec![0i64, 1, 2, 1000, 1 << 40];
        let mut buf = Vec::new();
        write_packed_i64_field(&mut buf, 2, &values).unwrap();

        let mut cursor = Cursor::new(buf);
        let (field, value) = read_field(&mut cursor).unwrap().unwrap();
        assert_eq!(field, 2);
        let WireValue::Bytes(payload) = value else {
            panic!("expected length-delimited field");
        };
        assert_eq!(decode_packed_i64(&payload).unwrap(), values);
    }

    #[test]
    fn bytes_field_roundtrip() {
        let mut buf = Vec::new();
        write_bytes_field(&mut buf, 1, b"hello").unwrap();
        let mut cursor = Cursor::new(buf);
        let (field, value) = read_field(&mut cursor).unwrap().unwrap();
        assert_eq!(field, 1);
        let WireValue::Bytes(payload) = value else {
            panic!("expected length-delimited field");
        };
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn empty_input_reads_as_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_field(&mut cursor).unwrap().is_none());
    }
}
