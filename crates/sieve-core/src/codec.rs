//! Bincode helpers for values stored in LMDB tables.

use crate::error::SieveError;

/// Encode a value with the standard bincode configuration.
pub fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, SieveError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| SieveError::Encoding(e.to_string()))
}

/// Decode a value, rejecting trailing bytes.
pub fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, SieveError> {
    let (value, read): (T, usize) =
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| SieveError::Encoding(e.to_string()))?;
    if read != bytes.len() {
        return Err(SieveError::Encoding(format!(
            "trailing bytes: decoded {read} of {}",
            bytes.len()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hash256, Position};

    #[test]
    fn position_survives_encoding() {
        let p = Position::new(42, Hash256([9; 32]));
        let bytes = encode(&p).unwrap();
        let back: Position = decode(&bytes).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(&7u32).unwrap();
        bytes.push(0);
        assert!(decode::<u32>(&bytes).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(decode::<Position>(&[0xFF]).is_err());
    }
}
