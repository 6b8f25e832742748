//! Binary layout of one identity record
//!
//! Fixed header followed by a variable trailer. Integers are native endian;
//! the log header records the byte order it was written with.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ HEADER (29 bytes)                        │
//! │   flag: u8          (0 deleted, 1 live)  │
//! │   total_size: u32   (header + trailer)   │
//! │   global_id: i64                         │
//! │   created_at: i64   (epoch ms)           │
//! │   name_len: u32     (0 = no name)        │
//! │   opaque_len: u32   (0 = no opaque key)  │
//! ├──────────────────────────────────────────┤
//! │ TRAILER                                  │
//! │   name: [u8; name_len]     (UTF-8)       │
//! │   opaque: [u8; opaque_len]               │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The flag byte is owned by the log: [`encode`] always writes a live record
//! and tombstoning rewrites that single byte in place.

use crate::store::error::{StoreError, StoreResult};
use crate::store::types::MetricIdentity;

/// Flag value of a deleted record; zero-filled space therefore reads as deleted
pub const FLAG_DELETED: u8 = 0;
/// Flag value of a live record
pub const FLAG_LIVE: u8 = 1;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 29;

pub const OFFSET_FLAG: usize = 0;
const OFFSET_TOTAL_SIZE: usize = 1;
const OFFSET_GLOBAL_ID: usize = 5;
const OFFSET_CREATED_AT: usize = 13;
const OFFSET_NAME_LEN: usize = 21;
const OFFSET_OPAQUE_LEN: usize = 25;

/// Encoded size of `record`
pub fn encoded_len(record: &MetricIdentity) -> usize {
    HEADER_SIZE
        + record.name.as_ref().map_or(0, |n| n.len())
        + record.opaque_key.as_ref().map_or(0, |k| k.len())
}

/// Encode `record` as a live record
pub fn encode(record: &MetricIdentity) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(encoded_len(record));
    encode_into(record, &mut buf)?;
    Ok(buf)
}

/// Append the encoding of `record` to `buf`
pub fn encode_into(record: &MetricIdentity, buf: &mut Vec<u8>) -> StoreResult<()> {
    let name = record.name.as_deref().map_or(&[][..], str::as_bytes);
    let opaque = record.opaque_key.as_deref().unwrap_or(&[]);

    let name_len = checked_u32(name.len(), "name")?;
    let opaque_len = checked_u32(opaque.len(), "opaque key")?;
    let total_size = checked_u32(HEADER_SIZE + name.len() + opaque.len(), "record")?;

    buf.reserve(total_size as usize);
    buf.push(FLAG_LIVE);
    buf.extend_from_slice(&total_size.to_ne_bytes());
    buf.extend_from_slice(&record.global_id.to_ne_bytes());
    buf.extend_from_slice(&record.created_at.to_ne_bytes());
    buf.extend_from_slice(&name_len.to_ne_bytes());
    buf.extend_from_slice(&opaque_len.to_ne_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(opaque);

    Ok(())
}

/// Decode one record; `tombstoned` reflects the flag byte
pub fn decode(bytes: &[u8]) -> StoreResult<MetricIdentity> {
    if bytes.len() < HEADER_SIZE {
        return Err(StoreError::CorruptRecord(format!(
            "{} bytes is smaller than the {} byte header",
            bytes.len(),
            HEADER_SIZE
        )));
    }

    let total_size = read_u32(bytes, OFFSET_TOTAL_SIZE) as usize;
    let name_len = read_u32(bytes, OFFSET_NAME_LEN) as usize;
    let opaque_len = read_u32(bytes, OFFSET_OPAQUE_LEN) as usize;

    if total_size != HEADER_SIZE + name_len + opaque_len || total_size > bytes.len() {
        return Err(StoreError::CorruptRecord(format!(
            "size {} doesn't match header + name {} + opaque {} (have {} bytes)",
            total_size,
            name_len,
            opaque_len,
            bytes.len()
        )));
    }

    let name_end = HEADER_SIZE + name_len;
    let name = if name_len == 0 {
        None
    } else {
        let text = std::str::from_utf8(&bytes[HEADER_SIZE..name_end])
            .map_err(|e| StoreError::CorruptRecord(format!("name is not UTF-8: {}", e)))?;
        Some(text.to_owned())
    };

    let opaque_key = if opaque_len == 0 {
        None
    } else {
        Some(bytes[name_end..total_size].to_vec())
    };

    Ok(MetricIdentity {
        global_id: read_i64(bytes, OFFSET_GLOBAL_ID),
        created_at: read_i64(bytes, OFFSET_CREATED_AT),
        name,
        opaque_key,
        tombstoned: bytes[OFFSET_FLAG] != FLAG_LIVE,
    })
}

/// Total size declared by a record header, if the header is complete
pub fn declared_size(header: &[u8]) -> Option<usize> {
    (header.len() >= HEADER_SIZE).then(|| read_u32(header, OFFSET_TOTAL_SIZE) as usize)
}

/// Global ID of a record without decoding its trailer
pub fn global_id(bytes: &[u8]) -> Option<i64> {
    (bytes.len() >= HEADER_SIZE).then(|| read_i64(bytes, OFFSET_GLOBAL_ID))
}

/// Whether a record is deleted; undersized records count as deleted
pub fn is_tombstoned(bytes: &[u8]) -> bool {
    bytes.len() < HEADER_SIZE || bytes[OFFSET_FLAG] != FLAG_LIVE
}

fn checked_u32(len: usize, what: &str) -> StoreResult<u32> {
    u32::try_from(len)
        .map_err(|_| StoreError::CapacityExceeded(format!("{} of {} bytes", what, len)))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(buf)
}

fn read_i64(bytes: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_ne_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn identity(name: Option<&str>, opaque: Option<&[u8]>) -> MetricIdentity {
        MetricIdentity::new(42, name, opaque).created_at(1_700_000_000_000)
    }

    #[test]
    fn test_round_trip_both_keys() {
        let record = identity(Some("cpu.load"), Some(&[0xAA, 0xBB]));
        let bytes = encode(&record).unwrap();

        assert_eq!(bytes.len(), HEADER_SIZE + 8 + 2);
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_round_trip_single_key() {
        for record in [identity(Some("mem.free"), None), identity(None, Some(&[1, 2, 3]))] {
            let bytes = encode(&record).unwrap();
            assert_eq!(decode(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_field_offsets() {
        let record = identity(Some("ab"), Some(&[9]));
        let bytes = encode(&record).unwrap();

        assert_eq!(bytes[0], FLAG_LIVE);
        assert_eq!(read_u32(&bytes, 1), 32);
        assert_eq!(read_i64(&bytes, 5), 42);
        assert_eq!(read_i64(&bytes, 13), 1_700_000_000_000);
        assert_eq!(read_u32(&bytes, 21), 2);
        assert_eq!(read_u32(&bytes, 25), 1);
        assert_eq!(&bytes[29..31], b"ab");
        assert_eq!(bytes[31], 9);
    }

    #[test]
    fn test_tombstone_flag_is_not_round_tripped() {
        let mut record = identity(Some("x"), None);
        record.tombstoned = true;
        let mut bytes = encode(&record).unwrap();

        assert!(!is_tombstoned(&bytes));
        assert!(!decode(&bytes).unwrap().tombstoned);

        bytes[OFFSET_FLAG] = FLAG_DELETED;
        assert!(is_tombstoned(&bytes));
        assert!(decode(&bytes).unwrap().tombstoned);
    }

    #[test]
    fn test_undersized_record_is_corrupt() {
        let bytes = [FLAG_LIVE; 10];
        assert!(matches!(decode(&bytes), Err(StoreError::CorruptRecord(_))));
        assert!(is_tombstoned(&bytes));
        assert_eq!(declared_size(&bytes), None);
        assert_eq!(global_id(&bytes), None);
    }

    #[test]
    fn test_inconsistent_lengths_are_corrupt() {
        let mut bytes = encode(&identity(Some("cpu"), None)).unwrap();
        bytes[OFFSET_NAME_LEN..OFFSET_NAME_LEN + 4].copy_from_slice(&10u32.to_ne_bytes());
        assert!(matches!(decode(&bytes), Err(StoreError::CorruptRecord(_))));
    }

    #[test]
    fn test_invalid_utf8_name_is_corrupt() {
        let mut bytes = encode(&identity(Some("ok"), None)).unwrap();
        bytes[HEADER_SIZE] = 0xFF;
        assert!(matches!(decode(&bytes), Err(StoreError::CorruptRecord(_))));
    }

    #[test]
    fn test_empty_keys_encode_as_absent() {
        let record = MetricIdentity::new(3, Some(""), Some(&[][..])).created_at(0);
        assert_eq!(record.name, None);
        assert_eq!(record.opaque_key, None);

        let bytes = encode(&record).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_every_truncation_is_corrupt() {
        let bytes = encode(&identity(Some("svc.requests"), Some(&[1, 2, 3, 4]))).unwrap();

        for len in 0..bytes.len() {
            assert!(
                matches!(decode(&bytes[..len]), Err(StoreError::CorruptRecord(_))),
                "prefix of {} bytes decoded",
                len
            );
        }
    }

    fn identity_strategy() -> impl Strategy<Value = MetricIdentity> {
        (
            any::<i64>(),
            any::<i64>(),
            prop::option::of("\\PC{1,40}"),
            prop::option::of(prop::collection::vec(any::<u8>(), 1..64)),
        )
            .prop_map(|(global_id, created_at, name, opaque_key)| MetricIdentity {
                global_id,
                created_at,
                name,
                opaque_key,
                tombstoned: false,
            })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(record in identity_strategy()) {
            let bytes = encode(&record).unwrap();

            prop_assert_eq!(bytes.len(), encoded_len(&record));
            prop_assert_eq!(declared_size(&bytes), Some(bytes.len()));
            prop_assert_eq!(global_id(&bytes), Some(record.global_id));
            prop_assert_eq!(decode(&bytes).unwrap(), record);
        }

        #[test]
        fn prop_truncated_records_are_rejected(
            record in identity_strategy(),
            cut in any::<prop::sample::Index>(),
        ) {
            let bytes = encode(&record).unwrap();
            let len = cut.index(bytes.len());

            prop_assert!(decode(&bytes[..len]).is_err());
        }
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = vec![0xEE];
        let record = identity(Some("n"), None);
        encode_into(&record, &mut buf).unwrap();

        assert_eq!(buf.len(), 1 + encoded_len(&record));
        assert_eq!(decode(&buf[1..]).unwrap(), record);
        assert_eq!(declared_size(&buf[1..]), Some(encoded_len(&record)));
        assert_eq!(global_id(&buf[1..]), Some(42));
    }
}
