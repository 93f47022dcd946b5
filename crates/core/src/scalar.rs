//! Typed single-value broadcasts.
//!
//! Handshake messages are single scalars sent as a length-1 buffer of their
//! declared type. Routing every scalar through `WireScalar` pins the byte
//! width and encoding on both the sending and the receiving side.

use crate::{CollectiveChannel, CollectiveError};
use cosim_types::Rank;

/// A fixed-width value with a little-endian wire encoding.
pub trait WireScalar: Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    fn write_le(self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_scalar {
    ($($ty:ty),*) => {
        $(
            impl WireScalar for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_wire_scalar!(i32, u32, f32);

/// Broadcast helpers for typed scalars, available on every channel.
pub trait ScalarBroadcast: CollectiveChannel {
    /// Broadcast `value` from `root`. Non-root ranks pass a placeholder
    /// that is ignored and receive the root's value.
    fn broadcast_scalar<T: WireScalar>(
        &mut self,
        root: Rank,
        value: T,
    ) -> Result<T, CollectiveError> {
        let mut buf = vec![0u8; T::WIDTH];
        if self.rank() == root {
            value.write_le(&mut buf);
        }
        self.broadcast(root, &mut buf)?;
        Ok(T::read_le(&buf))
    }
}

impl<C: CollectiveChannel + ?Sized> ScalarBroadcast for C {}
