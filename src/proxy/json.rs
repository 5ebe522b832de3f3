//! Deterministic JSON re-serialization for rewritten bodies
//!
//! Bodies are written back with `", "` and `": "` separators, keys in their
//! original order and non-ASCII text left unescaped.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;

/// Compact formatter with a space after every separator
#[derive(Debug, Default, Clone, Copy)]
pub struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serialize a value to UTF-8 bytes using [`SpacedFormatter`]
pub fn to_spaced_vec(value: &Value) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserialize(input: &str) -> String {
        let value: Value = serde_json::from_str(input).unwrap();
        String::from_utf8(to_spaced_vec(&value).unwrap()).unwrap()
    }

    #[test]
    fn test_spaced_separators() {
        assert_eq!(
            reserialize(r#"[{"displayName":"Bob","id":1}]"#),
            r#"[{"displayName": "Bob", "id": 1}]"#
        );
    }

    #[test]
    fn test_key_order_is_preserved() {
        assert_eq!(
            reserialize(r#"{"z":1,"a":{"y":[1,2],"b":null},"m":true}"#),
            r#"{"z": 1, "a": {"y": [1, 2], "b": null}, "m": true}"#
        );
    }

    #[test]
    fn test_non_ascii_is_not_escaped() {
        assert_eq!(reserialize(r#"["Zoë","é"]"#), r#"["Zoë", "é"]"#);
    }

    #[test]
    fn test_numbers_keep_their_spelling() {
        assert_eq!(
            reserialize(r#"[76561198000000000123,-0,1.50,-12,3e2]"#),
            "[76561198000000000123, -0, 1.50, -12, 3e2]"
        );
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(reserialize(r#"[[],{}]"#), "[[], {}]");
    }
}
