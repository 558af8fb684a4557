//! Byte-channel abstraction underneath the sampler.
//!
//! The DRO exposes two unidirectional bulk endpoints. A [`Transport`] is the
//! host side of that pair: one packet out, one packet in, both bounded by a
//! timeout. Implementations must report an expired timeout as
//! [`DroError::Timeout`](crate::DroError::Timeout) and every other fault as
//! [`DroError::Channel`](crate::DroError::Channel).

use std::time::Duration;

use crate::error::DroResult;

/// Half-duplex packet channel to the device.
pub trait Transport {
    /// Write one packet. Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8], timeout: Duration) -> DroResult<usize>;

    /// Read one packet into `buf`. Returns the number of bytes received.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> DroResult<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8], timeout: Duration) -> DroResult<usize> {
        (**self).write(data, timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> DroResult<usize> {
        (**self).read(buf, timeout)
    }
}
