use bincode::config;
use serde::{de::DeserializeOwned, Serialize};

use crate::fs::{FsError, FsResult};

/// Trait for digesting an object which stores digest in the object itself
pub trait DigestInSelf {
    fn digest(&mut self) -> FsResult<()>;
    fn verify_digest(&mut self) -> FsResult<bool>;
}

/// Trait for records stored in a fixed-size slot of the image
/// # Note
/// Records are encoded with the bincode `legacy` configuration
/// (fixed-width little endian integers), so every value of a type
/// has the same encoded length, which must not exceed [FixedRecord::RECORD_SIZE].
pub trait FixedRecord: Serialize + DeserializeOwned {
    /// size of the slot reserved for one record
    const RECORD_SIZE: usize;

    /// serialize into the head of `buf`, zeroing the rest of the slot
    /// # Returns
    /// The number of bytes written if successful
    fn encode_into(&self, buf: &mut [u8]) -> FsResult<usize> {
        let buf_len = buf.len();
        let slot = buf.get_mut(..Self::RECORD_SIZE).ok_or_else(|| {
            FsError::Corrupt(format!(
                "record slot of {buf_len} bytes is shorter than {}",
                Self::RECORD_SIZE
            ))
        })?;
        slot.fill(0);
        let config = config::legacy();
        Ok(bincode::serde::encode_into_slice(self, slot, config)?)
    }

    /// deserialize from the head of `buf`
    fn decode_from(buf: &[u8]) -> FsResult<Self> {
        let slot = buf.get(..Self::RECORD_SIZE).ok_or_else(|| {
            FsError::Corrupt(format!(
                "record slot of {} bytes is shorter than {}",
                buf.len(),
                Self::RECORD_SIZE
            ))
        })?;
        let config = config::legacy();
        let (object, _bytes_read) = bincode::serde::decode_from_slice(slot, config)?;
        Ok(object)
    }

    /// the length of this record once encoded
    fn encoded_len(&self) -> FsResult<usize> {
        let config = config::legacy();
        Ok(bincode::serde::encode_to_vec(self, config)?.len())
    }
}
