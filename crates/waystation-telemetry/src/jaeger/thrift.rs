//! Write side of the Thrift binary protocol.
//!
//! Only what the Jaeger collector model needs: structs, lists, and the
//! scalar types below. Multi-byte integers are big-endian, strings are
//! length-prefixed with an `i32`.

/// Thrift wire type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum TType {
    Stop = 0,
    Bool = 2,
    Double = 4,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    List = 15,
}

/// Anything that can be written as a Thrift struct.
pub(crate) trait ThriftStruct {
    fn write(&self, w: &mut ThriftWriter);
}

/// Append-only encoder over a byte buffer.
#[derive(Debug, Default)]
pub(crate) struct ThriftWriter {
    buf: Vec<u8>,
}

impl ThriftWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn field_begin(&mut self, ttype: TType, id: i16) {
        self.buf.push(ttype as u8);
        self.buf.extend_from_slice(&id.to_be_bytes());
    }

    /// Terminates the current struct.
    pub(crate) fn stop(&mut self) {
        self.buf.push(TType::Stop as u8);
    }

    pub(crate) fn bool_field(&mut self, id: i16, value: bool) {
        self.field_begin(TType::Bool, id);
        self.buf.push(u8::from(value));
    }

    pub(crate) fn double_field(&mut self, id: i16, value: f64) {
        self.field_begin(TType::Double, id);
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    pub(crate) fn i32_field(&mut self, id: i16, value: i32) {
        self.field_begin(TType::I32, id);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn i64_field(&mut self, id: i16, value: i64) {
        self.field_begin(TType::I64, id);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn string_field(&mut self, id: i16, value: &str) {
        self.field_begin(TType::String, id);
        self.write_string(value);
    }

    pub(crate) fn struct_field<T: ThriftStruct>(&mut self, id: i16, value: &T) {
        self.field_begin(TType::Struct, id);
        value.write(self);
    }

    /// Writes a `list<struct>` field. Empty lists are still written.
    pub(crate) fn list_field<T: ThriftStruct>(&mut self, id: i16, items: &[T]) {
        self.field_begin(TType::List, id);
        self.buf.push(TType::Struct as u8);
        let len = i32::try_from(items.len()).unwrap_or(i32::MAX);
        self.buf.extend_from_slice(&len.to_be_bytes());
        for item in items.iter().take(len as usize) {
            item.write(self);
        }
    }

    fn write_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        let len = i32::try_from(bytes.len()).unwrap_or(i32::MAX);
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(&bytes[..len as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        name: &'static str,
        count: i32,
    }

    impl ThriftStruct for Pair {
        fn write(&self, w: &mut ThriftWriter) {
            w.string_field(1, self.name);
            w.i32_field(2, self.count);
            w.stop();
        }
    }

    #[test]
    fn test_scalar_fields() {
        let mut w = ThriftWriter::new();
        w.bool_field(1, true);
        w.i64_field(2, -1);
        w.stop();

        assert_eq!(
            w.into_bytes(),
            vec![
                2, 0, 1, 1, // bool, id 1, true
                10, 0, 2, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // i64, id 2, -1
                0,
            ]
        );
    }

    #[test]
    fn test_double_is_big_endian_bits() {
        let mut w = ThriftWriter::new();
        w.double_field(4, 1.0);
        assert_eq!(
            w.into_bytes(),
            vec![4, 0, 4, 0x3f, 0xf0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_string_is_length_prefixed() {
        let mut w = ThriftWriter::new();
        w.string_field(1, "ab");
        assert_eq!(w.into_bytes(), vec![11, 0, 1, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_struct_list() {
        let mut w = ThriftWriter::new();
        w.list_field(
            2,
            &[Pair {
                name: "x",
                count: 7,
            }],
        );

        assert_eq!(
            w.into_bytes(),
            vec![
                15, 0, 2, // list, id 2
                12, 0, 0, 0, 1, // of 1 struct
                11, 0, 1, 0, 0, 0, 1, b'x', // name
                8, 0, 2, 0, 0, 0, 7, // count
                0,
            ]
        );
    }

    #[test]
    fn test_empty_list() {
        let mut w = ThriftWriter::new();
        w.list_field::<Pair>(6, &[]);
        assert_eq!(w.into_bytes(), vec![15, 0, 6, 12, 0, 0, 0, 0]);
    }
}
