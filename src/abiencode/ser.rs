//! Solidity ABI encoding (`abi.encode`) as a serde [ser::Serializer].
//!
//! Encoding needs the head size of a value before anything can be written
//! (offsets of dynamic members point past it), so every value is visited in
//! up to four passes, see [Pass].

use super::error::{Error, Result};
use serde::{
    ser::{
        self, SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant, SerializeTuple,
        SerializeTupleStruct, SerializeTupleVariant,
    },
    Serialize,
};
use tracing::trace;

/// Type name used for marking a struct as fake-dynamic (dynamic but
/// transparent). The characters have no special meaning, they are chosen so
/// that no normal Rust type has this name.
const MARK_DYNAMIC_NAME: &str = ":$&_DYNAMIC";

const SLOT_SIZE: usize = 32; // bytes

/// PhantomData type to mark a struct/tuple as dynamic, even if none of its
/// fields are.
///
/// [ser::Serializer::serialize_bytes] has to write `bytes32` (and the other
/// fixed-size types) in place, so it cannot also represent the dynamic
/// `bytes`. Instead `bytes` is serialized as a tuple (see
/// [as_bytes][super::as_bytes]):
/// - A [DynamicMarker] to make the tuple dynamic but transparent (its content
///   is not put behind another offset).
/// - The length (number of bytes without padding).
/// - The data, padded to [SLOT_SIZE].
///
/// # Important
/// Used wrongly the output may not represent anything in Solidity. Prefer
/// [as_bytes][super::as_bytes].
pub struct DynamicMarker;
impl Serialize for DynamicMarker {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_unit_struct(MARK_DYNAMIC_NAME)
    }
}

/// Sink for the encoded 32 byte slots.
pub trait Writer {
    fn write(&mut self, slot: &[u8]);
}

impl Writer for Vec<u8> {
    fn write(&mut self, slot: &[u8]) {
        self.extend_from_slice(slot);
    }
}

struct NoWriter;

impl Writer for NoWriter {
    fn write(&mut self, _: &[u8]) {
        unreachable!("size passes never write");
    }
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    /// Don't write, only compute the head size and whether the type is
    /// dynamic (stored in the serializer, all passes need it).
    HeadSize(usize),
    /// Write the static part, `offset` is where the next dynamic value goes.
    Head { offset: usize },
    /// Don't write, only compute the size of the dynamic part.
    TailSize(usize),
    /// Write the dynamic part.
    Tail,
}

pub struct Serializer<'a, W>
where
    W: Writer,
{
    writer: &'a mut W,
    pass: Pass,
    is_dynamic: bool,
    is_fake_dynamic: bool,
}

/// `abi.encode(value)`: a dynamic value is prefixed with the offset of its
/// encoding (`0x20`).
pub fn to_writer<T, W>(value: &T, writer: &mut W) -> Result<()>
where
    T: Serialize + ?Sized,
    W: Writer,
{
    to_writer_internal(value, writer, true)
}

/// Encode the fields of `value` as a list of function arguments, i.e.
/// `abi.encode(a, b, ...)`. There is no outer offset slot.
pub fn to_fnargs_writer<T, W>(value: &T, writer: &mut W) -> Result<()>
where
    T: Serialize + ?Sized,
    W: Writer,
{
    to_writer_internal(value, writer, false)
}

pub fn to_bytes<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    to_writer(value, &mut buf)?;
    Ok(buf)
}

pub fn to_fnargs_bytes<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    to_fnargs_writer(value, &mut buf)?;
    Ok(buf)
}

pub(super) fn to_writer_internal<T, W>(
    value: &T,
    writer: &mut W,
    include_outer_struct: bool,
) -> Result<()>
where
    T: Serialize + ?Sized,
    W: Writer,
{
    let (head_size, is_dynamic, is_fake_dynamic) = compute_size(value)?;

    let mut serializer = Serializer {
        writer,
        pass: Pass::Head { offset: head_size },
        is_dynamic,
        is_fake_dynamic,
    };

    if is_dynamic && include_outer_struct {
        serializer.write_right_aligned(SLOT_SIZE.to_be_bytes())
    }

    value.serialize(&mut serializer)?;
    if is_dynamic {
        serializer.pass = Pass::Tail;
        value.serialize(&mut serializer)?;
    }
    Ok(())
}

/// Returns `(head_size, is_dynamic, is_fake_dynamic)`.
fn compute_size<T>(value: &T) -> Result<(usize, bool, bool)>
where
    T: Serialize + ?Sized,
{
    let mut serializer = Serializer {
        writer: &mut NoWriter,
        pass: Pass::HeadSize(0),
        is_dynamic: false,
        is_fake_dynamic: false,
    };
    value.serialize(&mut serializer)?;

    match serializer.pass {
        Pass::HeadSize(head_size) => {
            Ok((head_size, serializer.is_dynamic, serializer.is_fake_dynamic))
        }
        _ => unreachable!("the serializer never changes the pass of a size computation"),
    }
}

fn compute_tail_size<T>(value: &T) -> Result<usize>
where
    T: Serialize + ?Sized,
{
    let mut serializer = Serializer {
        writer: &mut NoWriter,
        pass: Pass::TailSize(0),
        is_dynamic: false,
        is_fake_dynamic: false,
    };
    value.serialize(&mut serializer)?;

    match serializer.pass {
        Pass::TailSize(tail_size) => Ok(tail_size),
        _ => unreachable!("the serializer never changes the pass of a size computation"),
    }
}

/// Number of bytes `len` bytes take up when padded to whole slots.
fn padded_len(len: usize) -> usize {
    let r = len % SLOT_SIZE;
    (len - r) + if r == 0 { 0 } else { SLOT_SIZE }
}

impl<'a, W> Serializer<'a, W>
where
    W: Writer,
{
    // Panics if v.len() > SLOT_SIZE
    fn write_left_aligned_slice(&mut self, v: &[u8]) {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[..v.len()].copy_from_slice(v);
        self.writer.write(bytes.as_slice());
    }

    // Panics if N > SLOT_SIZE
    fn write_right_aligned<const N: usize>(&mut self, v: [u8; N]) {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[SLOT_SIZE - N..].copy_from_slice(v.as_slice());
        self.writer.write(bytes.as_slice())
    }

    // Panics if N > SLOT_SIZE
    fn write_signed<const N: usize>(&mut self, negative: bool, v: [u8; N]) {
        let filler = if negative { 0xff } else { 0x00 };
        let mut bytes = [filler; SLOT_SIZE];
        bytes[SLOT_SIZE - N..].copy_from_slice(v.as_slice());
        self.writer.write(bytes.as_slice())
    }

    fn write_padded(&mut self, v: &[u8]) {
        let iter = v.chunks_exact(SLOT_SIZE);
        let rem = iter.remainder();
        for chunk in iter {
            self.writer.write(chunk);
        }
        if !rem.is_empty() {
            self.write_left_aligned_slice(rem);
        }
    }

    /// Serialize `value` with a fresh serializer (sharing the writer) in the
    /// given pass.
    fn serialize_nested<T>(&mut self, value: &T, pass: Pass) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (_, is_dynamic, is_fake_dynamic) = compute_size(value)?;
        let mut serializer = Serializer {
            writer: &mut *self.writer,
            pass,
            is_dynamic,
            is_fake_dynamic,
        };
        value.serialize(&mut serializer)
    }

    /// Tail pass of a (really) dynamic member: its own head, then its own
    /// tail.
    ///
    /// The offset given to the nested head pass does not affect the
    /// enclosing sequence, it is the base for the offsets of the member's own
    /// children, which start after the member's head.
    fn write_member_tail<T>(&mut self, value: &T, head_size: usize) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_nested(value, Pass::Head { offset: head_size })?;
        self.serialize_nested(value, Pass::Tail)
    }

    /// Shared by struct fields, tuple elements and newtypes: static members
    /// are written in place during the head pass, dynamic members get an
    /// offset in the head and their content in the tail.
    fn serialize_tuple_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (member_head_size, is_dyn, is_fake_dynamic) = compute_size(value)?;
        let really_dynamic = is_dyn && !is_fake_dynamic;
        match self.pass {
            Pass::HeadSize(ref mut head_size) => {
                *head_size += if really_dynamic {
                    SLOT_SIZE
                } else {
                    member_head_size
                };
                self.is_dynamic |= is_dyn || is_fake_dynamic;
                Ok(())
            }
            Pass::Head { offset } => {
                if really_dynamic {
                    self.write_right_aligned(offset.to_be_bytes());
                    trace!(offset, "member offset (head)");
                    self.pass = Pass::Head {
                        offset: offset + member_head_size + compute_tail_size(value)?,
                    };
                    Ok(())
                } else {
                    self.serialize_nested(value, Pass::Head { offset })
                }
            }
            Pass::TailSize(size) => {
                let member_tail_size = compute_tail_size(value)?;
                self.pass = Pass::TailSize(
                    size + if really_dynamic { member_head_size } else { 0 } + member_tail_size,
                );
                Ok(())
            }
            Pass::Tail => {
                if really_dynamic {
                    self.write_member_tail(value, member_head_size)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Like [Self::serialize_tuple_element], but for array elements: offsets
    /// of dynamic elements are relative to the first element, not to the
    /// length slot in front of it.
    fn serialize_seq_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (element_head_size, is_dyn, is_fake_dynamic) = compute_size(value)?;
        let really_dynamic = is_dyn && !is_fake_dynamic;
        match self.pass {
            Pass::HeadSize(ref mut head_size) => {
                *head_size += if really_dynamic {
                    SLOT_SIZE
                } else {
                    element_head_size
                };
                Ok(())
            }
            Pass::Head { offset } => {
                if really_dynamic {
                    self.write_right_aligned((offset - SLOT_SIZE).to_be_bytes());
                    trace!(offset = offset - SLOT_SIZE, "element offset (head)");
                    self.pass = Pass::Head {
                        offset: offset + element_head_size + compute_tail_size(value)?,
                    };
                    Ok(())
                } else {
                    // None of the element's members can be dynamic, so the
                    // offset is never read.
                    self.serialize_nested(
                        value,
                        Pass::Head {
                            offset: element_head_size,
                        },
                    )
                }
            }
            Pass::TailSize(size) => {
                let element_tail_size = compute_tail_size(value)?;
                self.pass = Pass::TailSize(
                    size + if really_dynamic { element_head_size } else { 0 } + element_tail_size,
                );
                Ok(())
            }
            Pass::Tail => {
                if really_dynamic {
                    self.write_member_tail(value, element_head_size)
                } else {
                    Ok(())
                }
            }
        }
    }
}

// All unsigned integers occupy one right-aligned slot.
macro_rules! serialize_unsigned {
    ($($method:ident: $T:ty),*) => {
        $(
            fn $method(self, v: $T) -> Result<()> {
                match self.pass {
                    Pass::HeadSize(ref mut head_size) => *head_size += SLOT_SIZE,
                    Pass::Head { .. } => self.write_right_aligned(v.to_be_bytes()),
                    Pass::TailSize(_) | Pass::Tail => {}
                };
                Ok(())
            }
        )*
    };
}

// Signed integers are sign-extended to the full slot.
macro_rules! serialize_signed {
    ($($method:ident: $T:ty),*) => {
        $(
            fn $method(self, v: $T) -> Result<()> {
                match self.pass {
                    Pass::HeadSize(ref mut head_size) => *head_size += SLOT_SIZE,
                    Pass::Head { .. } => self.write_signed(v < 0, v.to_be_bytes()),
                    Pass::TailSize(_) | Pass::Tail => {}
                };
                Ok(())
            }
        )*
    };
}

impl<'a, 'b, W> ser::Serializer for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.serialize_u8(u8::from(v))
    }

    serialize_unsigned!(
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_u128: u128
    );

    serialize_signed!(
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_i128: i128
    );

    fn serialize_f32(self, _: f32) -> Result<()> {
        Err(Error::TypeNotRepresentable("f32"))
    }

    fn serialize_f64(self, _: f64) -> Result<()> {
        Err(Error::TypeNotRepresentable("f64"))
    }

    fn serialize_char(self, _: char) -> Result<()> {
        Err(Error::TypeNotYetSupported("char"))
    }

    // Same layout as dynamic `bytes`, without the DynamicMarker tuple since
    // nothing else needs serialize_str.
    fn serialize_str(self, v: &str) -> Result<()> {
        match self.pass {
            Pass::HeadSize(_) => {
                self.is_dynamic = true;
            }
            Pass::Head { .. } => {}
            Pass::TailSize(ref mut size) => {
                *size += SLOT_SIZE + padded_len(v.len());
            }
            Pass::Tail => {
                self.write_right_aligned(v.len().to_be_bytes());
                trace!(len = v.len(), "str length (tail)");
                self.write_padded(v.as_bytes());
            }
        };
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        match self.pass {
            Pass::HeadSize(ref mut head_size) => *head_size += padded_len(v.len()),
            Pass::Head { .. } => self.write_padded(v),
            Pass::TailSize(_) | Pass::Tail => {}
        }
        Ok(())
    }

    fn serialize_none(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("none"))
    }

    fn serialize_some<T>(self, _: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::TypeNotRepresentable("some"))
    }

    fn serialize_unit(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("unit"))
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<()> {
        if name != MARK_DYNAMIC_NAME {
            return Err(Error::TypeNotRepresentable("unit struct"));
        }
        if let Pass::HeadSize(_) = self.pass {
            self.is_fake_dynamic = true;
        }
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<()> {
        Err(Error::TypeNotRepresentable("unit variant (enum)"))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_tuple_element(value)
    }

    fn serialize_newtype_variant<T>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::TypeNotRepresentable("newtype variant (enum)"))
    }

    fn serialize_seq(self, size: Option<usize>) -> Result<Self::SerializeSeq> {
        match self.pass {
            Pass::HeadSize(ref mut head_size) => {
                self.is_dynamic = true;
                *head_size += SLOT_SIZE;
            }
            Pass::Head { .. } => {
                let len = size.ok_or(Error::UnknownSequenceLength)?;
                self.write_right_aligned(len.to_be_bytes());
                trace!(len, "seq length");
            }
            Pass::TailSize(_) | Pass::Tail => {}
        }
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::TypeNotRepresentable("tuple variant (enum)"))
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Error::TypeNotRepresentable("map"))
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::TypeNotRepresentable("struct variant"))
    }

    fn collect_str<T>(self, _value: &T) -> Result<()>
    where
        T: core::fmt::Display + ?Sized,
    {
        Err(Error::TypeNotYetSupported("collect_str"))
    }
}

impl<'a, 'b, W> SerializeSeq for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_seq_element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeTuple for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_tuple_element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeTupleStruct for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_tuple_element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeStruct for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        trace!(field = name, pass = ?self.pass, "struct field");
        self.serialize_tuple_element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

// Enums and maps are rejected when they are started, so the following are
// never reached.

impl<'a, 'b, W> SerializeTupleVariant for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, _value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::TypeNotRepresentable("tuple variant (enum)"))
    }

    fn end(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("tuple variant (enum)"))
    }
}

impl<'a, 'b, W> SerializeMap for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_key<T>(&mut self, _key: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::TypeNotRepresentable("map"))
    }

    fn serialize_value<T>(&mut self, _value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::TypeNotRepresentable("map"))
    }

    fn end(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("map"))
    }
}

impl<'a, 'b, W> SerializeStructVariant for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, _key: &'static str, _value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::TypeNotRepresentable("struct variant"))
    }

    fn end(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("struct variant"))
    }
}
