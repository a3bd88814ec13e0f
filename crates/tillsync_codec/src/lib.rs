//! # tillsync Codec
//!
//! Record value model and CBOR encoding for tillsync.
//!
//! Queued mutation payloads and cached reference entities are both
//! [`Record`]s: flat maps of text field names to dynamic [`Value`]s. This
//! crate owns that model and the CBOR encoding used when records are
//! written to the local durable store.
//!
//! ## Usage
//!
//! ```
//! use tillsync_codec::{from_cbor, record, to_cbor, Record};
//!
//! let order = record! { "entity_id" => "E1", "total" => 5000 };
//! let bytes = to_cbor(&order).unwrap();
//! let decoded: Record = from_cbor(&bytes).unwrap();
//! assert_eq!(order, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod record;
mod value;

pub use error::{CodecError, CodecResult};
pub use record::Record;
pub use value::Value;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR
/// for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nested_record_survives_encoding() {
        let line = crate::record! { "sku" => "A-1", "qty" => 2 };
        let order = crate::record! {
            "entity_id" => "E1",
            "total" => 5000,
            "paid" => false,
            "note" => Value::Null,
            "lines" => Value::Array(vec![Value::from(line)]),
        };

        let bytes = to_cbor(&order).unwrap();
        let decoded: Record = from_cbor(&bytes).unwrap();
        assert_eq!(order, decoded);
    }

    #[test]
    fn field_order_does_not_change_bytes() {
        let a = crate::record! { "x" => 1, "y" => 2 };
        let b = crate::record! { "y" => 2, "x" => 1 };
        assert_eq!(to_cbor(&a).unwrap(), to_cbor(&b).unwrap());
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result: CodecResult<Record> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    proptest! {
        #[test]
        fn integer_fields_keep_exact_values(n in any::<i64>(), name in "[a-z_]{1,12}") {
            let record = Record::new().with(name.clone(), n);
            let decoded: Record = from_cbor(&to_cbor(&record).unwrap()).unwrap();
            prop_assert_eq!(decoded.get(&name), Some(&Value::Integer(n)));
        }
    }
}
