//! Open-time permission hook
//!
//! The manager asks the policy once per open, before the native handle
//! is created. Names are bus-specific: `"<controller>:<address>"` for
//! I2C and SPI (either part left out when defaulted) and the port name
//! for UART.

use core::fmt;

use crate::error::{Error, Result};

/// Bus a permission request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusKind {
    I2c,
    Spi,
    Uart,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusKind::I2c => "i2c",
            BusKind::Spi => "spi",
            BusKind::Uart => "uart",
        })
    }
}

/// Decides whether a device may be opened
pub trait SecurityPolicy: Send + Sync {
    /// `Ok` to allow; typically [`Error::PermissionDenied`] to refuse
    fn check(&self, bus: BusKind, name: &str) -> Result<()>;
}

/// Policy that allows every open
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SecurityPolicy for AllowAll {
    fn check(&self, _bus: BusKind, _name: &str) -> Result<()> {
        Ok(())
    }
}

impl<F> SecurityPolicy for F
where
    F: Fn(BusKind, &str) -> Result<()> + Send + Sync,
{
    fn check(&self, bus: BusKind, name: &str) -> Result<()> {
        self(bus, name)
    }
}

/// Security name of an addressed bus device
pub(crate) fn device_name(controller: Option<u32>, address: Option<u32>) -> String {
    let mut name = controller.map(|c| c.to_string()).unwrap_or_default();
    if let Some(address) = address {
        name.push(':');
        name.push_str(&address.to_string());
    }
    name
}

/// Refuse with [`Error::PermissionDenied`] naming the device
pub fn deny(bus: BusKind, name: &str) -> Error {
    Error::PermissionDenied(format!("{bus} {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_names() {
        assert_eq!(device_name(None, Some(0x50)), ":80");
        assert_eq!(device_name(Some(1), Some(0x50)), "1:80");
        assert_eq!(device_name(Some(2), None), "2");
        assert_eq!(device_name(None, None), "");
    }

    #[test]
    fn test_closure_policy() {
        let policy = |bus: BusKind, name: &str| {
            if bus == BusKind::Uart && name == "ttyS9" {
                Err(deny(bus, name))
            } else {
                Ok(())
            }
        };
        assert!(policy.check(BusKind::Uart, "ttyS0").is_ok());
        assert!(matches!(
            policy.check(BusKind::Uart, "ttyS9"),
            Err(Error::PermissionDenied(msg)) if msg == "uart ttyS9"
        ));
        assert!(AllowAll.check(BusKind::I2c, "anything").is_ok());
    }
}
