//! Device manager
//!
//! Runtime context shared by every device it opens: handle identities,
//! the SPI transaction counter, the serial port table and the security
//! policy. Opening goes through the bus driver traits of `peribus-hal`.

use std::sync::Arc;

use peribus_hal::i2c::{I2cConfig, I2cDriver};
use peribus_hal::spi::{SpiConfig, SpiDriver};
use peribus_hal::uart::{UartConfig, UartDriver, UartTransport};
use peribus_hal::AccessMode;
use portable_atomic::{AtomicU32, Ordering};

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::handle::HandleId;
use crate::i2c::I2cDevice;
use crate::security::{device_name, AllowAll, BusKind, SecurityPolicy};
use crate::spi::SpiDevice;
use crate::uart::Uart;

/// Opens devices and owns their shared runtime state
pub struct DeviceManager {
    next_handle: AtomicU32,
    transactions: Arc<AtomicU32>,
    comm_ports: Vec<String>,
    policy: Box<dyn SecurityPolicy>,
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    /// Manager allowing every open, with no serial ports
    pub fn new() -> Self {
        Self::with_policy(AllowAll)
    }

    pub fn with_policy<P: SecurityPolicy + 'static>(policy: P) -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            transactions: Arc::new(AtomicU32::new(1)),
            comm_ports: Vec::new(),
            policy: Box::new(policy),
        }
    }

    /// Manager set up from the `[manager]` table of a configuration file
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new().with_comm_ports(config.comm_ports.iter().cloned())
    }

    /// Replace the serial port table; the first port is the default UART
    pub fn with_comm_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.comm_ports = ports.into_iter().map(Into::into).collect();
        self
    }

    pub fn comm_ports(&self) -> &[String] {
        &self.comm_ports
    }

    fn allocate_id(&self) -> HandleId {
        HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Open an I2C slave
    pub fn open_i2c<D: I2cDriver>(&self, driver: &D, config: I2cConfig) -> Result<I2cDevice<D::Transport>> {
        if !config.address_is_valid() {
            return Err(Error::InvalidConfig(format!(
                "i2c address {:#x} exceeds {:?} addressing",
                config.address, config.address_size
            )));
        }
        let name = device_name(config.controller, Some(u32::from(config.address)));
        self.policy.check(BusKind::I2c, &name)?;

        let transport = driver.open(&config).map_err(Error::native)?;
        Ok(I2cDevice::new(self.allocate_id(), transport, config))
    }

    /// Open an SPI slave
    ///
    /// The word length reported by the driver wins over the requested one.
    pub fn open_spi<D: SpiDriver>(&self, driver: &D, config: SpiConfig) -> Result<SpiDevice<D::Transport>> {
        if !(1..=32).contains(&config.word_length) {
            return Err(Error::InvalidConfig(format!(
                "spi word length {} outside 1-32",
                config.word_length
            )));
        }
        let name = device_name(config.controller, config.address);
        self.policy.check(BusKind::Spi, &name)?;

        let transport = driver.open(&config).map_err(Error::native)?;
        SpiDevice::new(
            self.allocate_id(),
            transport,
            config,
            self.transactions.clone(),
        )
    }

    /// Open a serial port
    ///
    /// Only exclusive access is supported.
    pub fn open_uart<D>(&self, driver: &D, config: UartConfig) -> Result<Uart<D::Transport>>
    where
        D: UartDriver,
        D::Transport: UartTransport + 'static,
    {
        if config.access != AccessMode::Exclusive {
            return Err(Error::Unsupported("shared access to a UART"));
        }
        if config.baudrate == 0 {
            return Err(Error::InvalidConfig("uart baud rate must be positive".into()));
        }
        let port = self.resolve_port(&config)?;
        self.policy.check(BusKind::Uart, &port)?;

        let transport = driver.open(&port, &config).map_err(Error::native)?;
        Uart::open(self.allocate_id(), transport, config, port)
    }

    /// Native port name for a UART configuration
    ///
    /// An explicit controller name must be ASCII alphanumeric. Without
    /// one, `controller` indexes the comm port table (default 0).
    pub fn resolve_port(&self, config: &UartConfig) -> Result<String> {
        if let Some(name) = &config.controller_name {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::InvalidConfig(format!(
                    "unacceptable port name {}",
                    name.as_str()
                )));
            }
            return Ok(name.as_str().to_string());
        }

        let index = config.controller.unwrap_or(0) as usize;
        self.comm_ports
            .get(index)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("comm port {index}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::deny;
    use peribus_hal_sim::{SimI2cBus, SimSerial, SimSpiBus};

    #[test]
    fn test_handle_ids_are_unique() {
        let manager = DeviceManager::new();
        let bus = SimI2cBus::new();
        let a = manager.open_i2c(&bus, I2cConfig::new(0x10)).unwrap();
        let b = manager.open_i2c(&bus, I2cConfig::new(0x11)).unwrap();
        assert!(a.id() < b.id());
    }

    #[test]
    fn test_security_names() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let seen = Arc::new(seen);
        let log = seen.clone();
        let manager = DeviceManager::with_policy(move |bus: BusKind, name: &str| {
            log.lock().push((bus, name.to_string()));
            Ok(())
        })
        .with_comm_ports(["ttyS0"]);

        manager
            .open_i2c(&SimI2cBus::new(), I2cConfig::new(0x50).with_controller(1))
            .unwrap();
        let spi = SpiConfig {
            address: Some(2),
            ..SpiConfig::default()
        };
        manager.open_spi(&SimSpiBus::new(), spi).unwrap();
        let serial = SimSerial::new();
        let _port = serial.add_port("ttyS0");
        manager.open_uart(&serial, UartConfig::default()).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (BusKind::I2c, "1:80".to_string()),
                (BusKind::Spi, ":2".to_string()),
                (BusKind::Uart, "ttyS0".to_string()),
            ]
        );
    }

    #[test]
    fn test_policy_refusal_skips_native_open() {
        let manager = DeviceManager::with_policy(|bus: BusKind, name: &str| Err(deny(bus, name)));
        let bus = SimI2cBus::new();
        assert!(matches!(
            manager.open_i2c(&bus, I2cConfig::new(0x10)),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_invalid_i2c_address() {
        let manager = DeviceManager::new();
        assert!(matches!(
            manager.open_i2c(&SimI2cBus::new(), I2cConfig::new(0x90)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_spi_word_length_from_driver() {
        let manager = DeviceManager::new();
        let dev = manager
            .open_spi(&SimSpiBus::with_word_length(12), SpiConfig::default())
            .unwrap();
        assert_eq!(dev.word_length().unwrap(), 12);

        assert!(matches!(
            manager.open_spi(&SimSpiBus::with_word_length(40), SpiConfig::default()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_transaction_counter_is_shared() {
        let manager = DeviceManager::new();
        let a = manager.open_spi(&SimSpiBus::new(), SpiConfig::default()).unwrap();
        let b = manager.open_spi(&SimSpiBus::new(), SpiConfig::default()).unwrap();

        let first = a.begin_transaction().unwrap();
        let second = b.begin_transaction().unwrap();
        assert_eq!(second.get(), first.get() + 1);
        a.end_transaction(first).unwrap();
        b.end_transaction(second).unwrap();
    }

    #[test]
    fn test_uart_port_resolution() {
        let manager = DeviceManager::new().with_comm_ports(["ttyS0", "ttyUSB0"]);

        let second = UartConfig {
            controller: Some(1),
            ..UartConfig::default()
        };
        assert_eq!(manager.resolve_port(&second).unwrap(), "ttyUSB0");

        let missing = UartConfig {
            controller: Some(5),
            ..UartConfig::default()
        };
        assert!(matches!(
            manager.resolve_port(&missing),
            Err(Error::NotFound(_))
        ));

        let mut named = UartConfig::default();
        named.controller_name = Some(heapless::String::try_from("ttyACM0").unwrap());
        assert_eq!(manager.resolve_port(&named).unwrap(), "ttyACM0");

        named.controller_name = Some(heapless::String::try_from("../tty").unwrap());
        assert!(matches!(
            manager.resolve_port(&named),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_uart_requires_exclusive_access() {
        let manager = DeviceManager::new().with_comm_ports(["ttyS0"]);
        let serial = SimSerial::new();
        let _port = serial.add_port("ttyS0");
        let shared = UartConfig {
            access: AccessMode::Shared,
            ..UartConfig::default()
        };
        assert!(matches!(
            manager.open_uart(&serial, shared),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_uart_port_busy() {
        let manager = DeviceManager::new().with_comm_ports(["ttyS0"]);
        let serial = SimSerial::new();
        let _port = serial.add_port("ttyS0");
        let _first = manager.open_uart(&serial, UartConfig::default()).unwrap();
        assert!(matches!(
            manager.open_uart(&serial, UartConfig::default()),
            Err(Error::Unavailable(_))
        ));
    }
}
