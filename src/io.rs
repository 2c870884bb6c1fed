//! Thin fixed-width read/write helpers over any `Read`/`Write`, the same
//! shape as this crate's reader-side unpacking helpers: one trait per
//! direction, blanket-implemented for anything that already satisfies
//! `std::io::Read`/`Write`. The wire format embeds the writer's native
//! integer width (`Header::word_size`) but every fixed-width scalar is
//! always written in full, native-endian width, so there is nothing here
//! that needs bit-packing the way the legacy varint helpers these are
//! descended from did.

use std::io::{Read, Write};

use anyhow::Result;

pub trait WireRead: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_ne_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn read_u128(&mut self) -> Result<u128> {
        let mut buf = [0; 16];
        self.read_exact(&mut buf)?;
        Ok(u128::from_ne_bytes(buf))
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }
    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }
    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }
    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }
    fn read_i128(&mut self) -> Result<i128> {
        Ok(self.read_u128()? as i128)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }
    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl<R: Read + ?Sized> WireRead for R {}

pub trait WireWrite: Write {
    fn write_u8(&mut self, v: u8) -> Result<()> {
        Ok(self.write_all(&[v])?)
    }
    fn write_u16(&mut self, v: u16) -> Result<()> {
        Ok(self.write_all(&v.to_ne_bytes())?)
    }
    fn write_u32(&mut self, v: u32) -> Result<()> {
        Ok(self.write_all(&v.to_ne_bytes())?)
    }
    fn write_u64(&mut self, v: u64) -> Result<()> {
        Ok(self.write_all(&v.to_ne_bytes())?)
    }
    fn write_u128(&mut self, v: u128) -> Result<()> {
        Ok(self.write_all(&v.to_ne_bytes())?)
    }
    fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_u8(v as u8)
    }
    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_u16(v as u16)
    }
    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_u32(v as u32)
    }
    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_u64(v as u64)
    }
    fn write_i128(&mut self, v: i128) -> Result<()> {
        self.write_u128(v as u128)
    }
    fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_u32(v.to_bits())
    }
    fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_u64(v.to_bits())
    }
    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(v as u8)
    }
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        Ok(self.write_all(bytes)?)
    }
}

impl<W: Write + ?Sized> WireWrite for W {}
