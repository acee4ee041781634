//! Descriptor blob encoding: `DESCRIPTOR_DIM` little-endian `f32` values.

use snapattend_core::{Descriptor, DescriptorError, DESCRIPTOR_DIM};

pub(crate) const BLOB_LEN: usize = DESCRIPTOR_DIM * 4;

pub(crate) fn encode(descriptor: &Descriptor) -> Vec<u8> {
    descriptor
        .values()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

pub(crate) fn decode(blob: &[u8]) -> Result<Descriptor, DescriptorError> {
    if blob.len() != BLOB_LEN {
        return Err(DescriptorError::InvalidLength(blob.len() / 4));
    }
    let values = blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Descriptor::new(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_layout() {
        let d = Descriptor::from_features(&[1.0, -2.5]);
        let blob = encode(&d);
        assert_eq!(blob.len(), BLOB_LEN);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(&blob[4..8], &(-2.5f32).to_le_bytes());
        assert_eq!(decode(&blob).unwrap(), d);
    }

    #[test]
    fn test_short_blob_rejected() {
        assert_eq!(decode(&[0u8; 16]), Err(DescriptorError::InvalidLength(4)));
    }
}
