// Deterministic byte encoding for signing and hashing

use std::io::{self, Write};

/// Types with a canonical byte encoding that feeds a digest
pub trait Encodable {
    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.encode(&mut buf);
        buf
    }
}

/// Write a variable-length integer (VarInt)
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x10000..=0xffffffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_small() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100).unwrap();
        assert_eq!(buf, vec![100]);
    }

    #[test]
    fn test_varint_medium() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 1000).unwrap();
        assert_eq!(buf, vec![0xfd, 0xe8, 0x03]);
    }

    #[test]
    fn test_varint_large() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100000).unwrap();
        assert_eq!(buf.len(), 5); // 0xfe + 4 bytes

        let mut buf = Vec::new();
        write_varint(&mut buf, u64::MAX).unwrap();
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn test_var_bytes_prefix_separates_fields() {
        // "ab" + "c" and "a" + "bc" must not encode the same
        let mut first = Vec::new();
        write_var_bytes(&mut first, b"ab").unwrap();
        write_var_bytes(&mut first, b"c").unwrap();

        let mut second = Vec::new();
        write_var_bytes(&mut second, b"a").unwrap();
        write_var_bytes(&mut second, b"bc").unwrap();

        assert_ne!(first, second);
    }
}
