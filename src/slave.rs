// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bus addressing.

use std::{fmt, num::ParseIntError, str::FromStr};

/// The raw slave identifier, the first byte of every PDU.
pub type SlaveId = u8;

/// A device address on a Modbus bus.
///
/// RTU devices answer to an assigned address between
/// [`MIN_DEVICE`](Self::MIN_DEVICE) and [`MAX_DEVICE`](Self::MAX_DEVICE).
/// Address 0 broadcasts a one-way request that every device executes and
/// none answers. A Modbus/TCP endpoint is selected by its IP address
/// instead, so it expects the reserved unit id
/// [`TCP_DEVICE`](Self::TCP_DEVICE) unless a gateway forwards the request
/// onto a serial line behind it.
///
/// [`rtu::Connection::await_request_for`](crate::rtu::Connection::await_request_for)
/// uses this type to pick the frames a device must handle out of the shared
/// bus traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slave(pub SlaveId);

impl Slave {
    /// The broadcast address: executed by all devices, answered by none.
    pub const BROADCAST: Self = Self(0);

    /// The lowest address assignable to a single device.
    pub const MIN_DEVICE: Self = Self(1);

    /// The highest address assignable to a single device.
    pub const MAX_DEVICE: Self = Self(247);

    /// The reserved unit id of a directly connected Modbus/TCP endpoint.
    pub const TCP_DEVICE: Self = Self(0xFF);

    /// The raw identifier.
    #[must_use]
    pub const fn id(self) -> SlaveId {
        self.0
    }

    /// Checks if this is the broadcast address.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    /// Checks if the address can belong to a single device.
    #[must_use]
    pub const fn is_device(self) -> bool {
        self.0 >= Self::MIN_DEVICE.0 && self.0 <= Self::MAX_DEVICE.0
    }

    /// Checks if the address lies in the reserved range above 247.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 > Self::MAX_DEVICE.0
    }
}

impl From<SlaveId> for Slave {
    fn from(id: SlaveId) -> Self {
        Self(id)
    }
}

impl From<Slave> for SlaveId {
    fn from(slave: Slave) -> Self {
        slave.0
    }
}

impl FromStr for Slave {
    type Err = ParseIntError;

    /// Parses a decimal address, or a hexadecimal one with a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = match s.strip_prefix("0x") {
            Some(hex) => SlaveId::from_str_radix(hex, 16)?,
            None => s.parse()?,
        };
        Ok(Self(id))
    }
}

impl fmt::Display for Slave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_classes() {
        assert!(Slave::BROADCAST.is_broadcast());
        assert!(!Slave::BROADCAST.is_device());
        assert!(Slave::MIN_DEVICE.is_device());
        assert!(Slave::MAX_DEVICE.is_device());
        assert!(!Slave(248).is_device());
        assert!(Slave(248).is_reserved());
        assert!(Slave::TCP_DEVICE.is_reserved());
        assert!(!Slave::MAX_DEVICE.is_reserved());
    }

    #[test]
    fn id_roundtrip() {
        assert_eq!(Slave::TCP_DEVICE.id(), 0xFF);
        assert_eq!(SlaveId::from(Slave(0x11)), 0x11);
        assert_eq!(Slave::from(0x11), Slave(0x11));
    }

    #[test]
    fn parse() {
        assert_eq!("0".parse(), Ok(Slave::BROADCAST));
        assert_eq!("17".parse(), Ok(Slave(17)));
        assert_eq!("247".parse(), Ok(Slave::MAX_DEVICE));
        assert_eq!("0x11".parse(), Ok(Slave(0x11)));
        assert_eq!("0xff".parse(), Ok(Slave::TCP_DEVICE));
        assert_eq!("0xFF".parse(), Ok(Slave::TCP_DEVICE));
        assert!("-1".parse::<Slave>().is_err());
        assert!("256".parse::<Slave>().is_err());
        assert!("0x100".parse::<Slave>().is_err());
        assert!("0X11".parse::<Slave>().is_err());
    }

    #[test]
    fn display_is_decimal() {
        // Matches the bare decimal of the error strings.
        assert_eq!(format!("{}", Slave(0x11)), "17");
        assert_eq!(format!("{}", Slave::TCP_DEVICE), "255");
    }
}
