//! End-to-end behaviour of the engine against the simulated driver

use std::sync::mpsc;
use std::time::Duration;

use peribus_core::peribus_hal::i2c::{Frame, I2cConfig};
use peribus_core::peribus_hal::spi::SpiConfig;
use peribus_core::peribus_hal::uart::UartConfig;
use peribus_core::uart::RoundCompletion;
use peribus_core::{Buffer, DeviceManager, Error};
use peribus_hal_sim::{I2cRecord, SimI2cBus, SimSerial, SimSpiBus, SpiRecord};
use proptest::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_i2c_subaddressed_read() {
    let bus = SimI2cBus::new();
    bus.respond(0x3C, &[0xAA, 0xBB, 0xCC, 0xDD]);
    let manager = DeviceManager::new();
    let dev = manager.open_i2c(&bus, I2cConfig::new(0x3C)).unwrap();

    let dst = Buffer::allocate(4);
    assert_eq!(dev.read_subaddress(0x10, 1, &dst).unwrap(), 4);
    assert_eq!(dst.to_vec(), vec![0xAA, 0xBB, 0xCC, 0xDD]);
    assert_eq!(dst.position(), 4);
}

#[test]
fn test_subaddressed_read_matches_combined_message() {
    let manager = DeviceManager::new();

    let direct_bus = SimI2cBus::new();
    direct_bus.respond(0x20, &[1, 2, 3]);
    let direct = manager.open_i2c(&direct_bus, I2cConfig::new(0x20)).unwrap();
    let dst = Buffer::allocate(3);
    let n = direct.read_subaddress(0x0102, 2, &dst).unwrap();

    let combined_bus = SimI2cBus::new();
    combined_bus.respond(0x20, &[1, 2, 3]);
    let combined = manager.open_i2c(&combined_bus, I2cConfig::new(0x20)).unwrap();
    let prefix = Buffer::wrap(vec![0x01, 0x02]);
    let dst2 = Buffer::allocate(3);
    let mut message = combined.bus().create_combined_message();
    message
        .append_write(&combined, &prefix)
        .unwrap()
        .append_read(&combined, &dst2)
        .unwrap();
    let counts = message.transfer().unwrap();

    assert_eq!(counts[1], n);
    assert_eq!(dst.to_vec(), dst2.to_vec());
    assert_eq!(direct_bus.records(), combined_bus.records());
    assert!(matches!(
        direct_bus.records().first(),
        Some(I2cRecord::Write {
            frame: Frame::Start,
            ..
        })
    ));
}

#[test]
fn test_spi_short_source_is_padded() {
    let bus = SimSpiBus::new();
    let manager = DeviceManager::new();
    let dev = manager.open_spi(&bus, SpiConfig::default()).unwrap();

    let src = Buffer::wrap(vec![0x11, 0x22, 0x33]);
    let dst = Buffer::allocate(6);
    assert_eq!(dev.write_and_read(&src, &dst).unwrap(), 6);
    // Loopback slave returns the dummy bytes clocked out after the source
    assert_eq!(dst.to_vec(), vec![0x11, 0x22, 0x33, 0, 0, 0]);
    assert_eq!(bus.records().first(), Some(&SpiRecord::Begin));
    assert_eq!(bus.records().last(), Some(&SpiRecord::End));
}

#[test]
fn test_end_with_foreign_token_keeps_transaction() {
    let manager = DeviceManager::new();
    let a = manager.open_spi(&SimSpiBus::new(), SpiConfig::default()).unwrap();
    let b = manager.open_spi(&SimSpiBus::new(), SpiConfig::default()).unwrap();

    let token_a = a.begin_transaction().unwrap();
    let token_b = b.begin_transaction().unwrap();
    assert!(matches!(
        a.end_transaction(token_b),
        Err(Error::InvalidState(_))
    ));
    // Still open under its own token
    assert!(matches!(
        a.begin_transaction(),
        Err(Error::InvalidState(_))
    ));
    a.end_transaction(token_a).unwrap();
    b.end_transaction(token_b).unwrap();
}

#[test]
fn test_uart_double_buffer_rounds() {
    let serial = SimSerial::new();
    let port = serial.add_port("ttyS0");
    let manager = DeviceManager::new().with_comm_ports(["ttyS0"]);
    let uart = manager.open_uart(&serial, UartConfig::default()).unwrap();

    let a = Buffer::allocate(4);
    let b = Buffer::allocate(4);
    let (tx, rx) = mpsc::channel();
    uart.start_reading_double(&a, &b, move |c: &RoundCompletion| {
        tx.send((c.buffer.clone(), c.count)).unwrap();
    })
    .unwrap();

    port.inject(&[1, 2, 3, 4]);
    let (first, count) = rx.recv_timeout(WAIT).unwrap();
    assert!(Buffer::ptr_eq(&first, &a));
    assert_eq!(count, 4);
    assert_eq!(a.to_vec(), vec![1, 2, 3, 4]);

    port.inject(&[5, 6, 7, 8]);
    let (second, _) = rx.recv_timeout(WAIT).unwrap();
    assert!(Buffer::ptr_eq(&second, &b));
    assert_eq!(b.to_vec(), vec![5, 6, 7, 8]);

    uart.stop_reading().unwrap();
    uart.start_reading(&Buffer::allocate(4), |_: &RoundCompletion| {})
        .unwrap();
    uart.stop_reading().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_read_advances_by_count(
        capacity in 1usize..16,
        position in 0usize..16,
        skip in 0usize..4,
        available in 0usize..24,
    ) {
        let position = position.min(capacity);
        let bus = SimI2cBus::new();
        bus.limit_transfers(0x40, available);
        let manager = DeviceManager::new();
        let dev = manager.open_i2c(&bus, I2cConfig::new(0x40)).unwrap();

        let dst = Buffer::allocate(capacity);
        dst.set_position(position).unwrap();
        let n = dev.read_skip(skip, &dst).unwrap();

        let expected = available.min(capacity - position + skip).saturating_sub(skip);
        prop_assert_eq!(n, expected);
        prop_assert_eq!(dst.position(), position + n);
        prop_assert_eq!(dst.limit(), capacity);
    }

    #[test]
    fn prop_word_length_rejected_before_bus(bits in 9u8..=32, len in 1usize..12) {
        let bus = SimSpiBus::with_word_length(bits);
        let manager = DeviceManager::new();
        let dev = manager.open_spi(&bus, SpiConfig::default()).unwrap();
        let word = usize::from(bits).div_ceil(8);

        let result = dev.write(&Buffer::wrap(vec![0; len]));
        if len % word == 0 {
            prop_assert_eq!(result.unwrap(), len);
        } else {
            let rejected = matches!(result, Err(Error::InvalidWordLength { .. }));
            prop_assert!(rejected);
            prop_assert!(bus.records().is_empty());
        }
    }
}
