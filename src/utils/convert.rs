use crate::ConvertError;
use crate::Result;

/// Key separator inside composite sled keys. Ids never contain a NUL byte.
pub const KEY_SEPARATOR: u8 = 0;

/// Converts a `u64` to an 8-byte array in big-endian byte order, so that
/// sled's lexicographic key order matches numeric order.
///
/// # Examples
/// ```
/// use entity_dispatch::convert::safe_kv;
///
/// let bytes = safe_kv(0x1234_5678_9ABC_DEF0);
/// assert_eq!(bytes, [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]);
/// ```
pub const fn safe_kv(num: u64) -> [u8; 8] {
    num.to_be_bytes()
}

pub fn safe_vk<K: AsRef<[u8]>>(bytes: K) -> Result<u64> {
    let bytes = bytes.as_ref();
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ConvertError::InvalidLength(bytes.len()))?;
    Ok(u64::from_be_bytes(array))
}

/// Joins key parts with [`KEY_SEPARATOR`].
pub fn composite_key(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len() + 1).sum();
    let mut key = Vec::with_capacity(len);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.extend_from_slice(part);
    }
    key
}

/// Prefix matching every composite key whose first parts equal `parts`.
pub fn composite_prefix(parts: &[&[u8]]) -> Vec<u8> {
    let mut prefix = composite_key(parts);
    prefix.push(KEY_SEPARATOR);
    prefix
}

/// Splits a composite key into exactly `N` parts.
pub fn split_key<const N: usize>(key: &[u8]) -> Result<[&[u8]; N]> {
    let parts: Vec<&[u8]> = key.splitn(N, |b| *b == KEY_SEPARATOR).collect();
    parts.try_into().map_err(|p: Vec<&[u8]>| {
        ConvertError::ConversionFailure(format!("expected {} key parts, found {}", N, p.len())).into()
    })
}

pub fn utf8_part(part: &[u8]) -> Result<String> {
    String::from_utf8(part.to_vec())
        .map_err(|e| ConvertError::ConversionFailure(format!("key part is not utf-8: {e}")).into())
}
