use crate::error::{ChannelError, Result};

/// A message with a fixed wire size and no framing.
///
/// The bytes are the value itself: no header, length prefix or checksum.
/// Both ends must agree on the type, since nothing on the wire says what it is.
pub trait FixedMessage: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write the value into `dst`, which is exactly [`Self::SIZE`] bytes.
    fn encode(&self, dst: &mut [u8]);

    /// Read a value back from `src`.
    fn decode(src: &[u8]) -> Result<Self>;
}

/// Fail with [`ChannelError::Protocol`] unless `actual == expected`.
pub fn check_size(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ChannelError::Protocol { expected, actual })
    }
}

// Native endianness: peers share a host.
impl FixedMessage for i32 {
    const SIZE: usize = std::mem::size_of::<i32>();

    fn encode(&self, dst: &mut [u8]) {
        dst.copy_from_slice(&self.to_ne_bytes());
    }

    fn decode(src: &[u8]) -> Result<Self> {
        let bytes: [u8; 4] = src.try_into().map_err(|_| ChannelError::Protocol {
            expected: Self::SIZE,
            actual: src.len(),
        })?;
        Ok(i32::from_ne_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_uses_host_byte_order() {
        let mut buf = [0u8; 4];
        0x0102_0304i32.encode(&mut buf);
        assert_eq!(buf, 0x0102_0304i32.to_ne_bytes());
        assert_eq!(i32::decode(&buf).unwrap(), 0x0102_0304);
    }

    #[test]
    fn short_or_long_input_is_a_protocol_error() {
        assert!(matches!(
            i32::decode(&[1, 2, 3]),
            Err(ChannelError::Protocol {
                expected: 4,
                actual: 3
            })
        ));
        assert!(matches!(
            i32::decode(&[0; 8]),
            Err(ChannelError::Protocol { actual: 8, .. })
        ));
    }

    #[test]
    fn size_check() {
        assert!(check_size(4, 4).is_ok());
        assert!(check_size(4, 5).is_err());
    }
}
