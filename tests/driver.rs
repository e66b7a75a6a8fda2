//! Driver tests against scripted I2C transactions.

#![cfg(not(feature = "async"))]

use core::cell::Cell;

use embedded_hal_mock::eh1::delay::NoopDelay;
use embedded_hal_mock::eh1::i2c::{Mock, Transaction};
use tmf8801::{
    Bit, Clock, DriverError, Error, GpioMode, Register, Tmf8801, DEFAULT_ADDRESS,
    DEFAULT_CALIBRATION_DATA, DEFAULT_COMMAND_DATA,
};

const ADDR: u8 = DEFAULT_ADDRESS;

const REG_APPID: u8 = 0x00;
const REG_APPREQID: u8 = 0x02;
const REG_CMD_DATA7: u8 = 0x08;
const REG_CMD_DATA0: u8 = 0x0F;
const REG_COMMAND: u8 = 0x10;
const REG_CONTENTS: u8 = 0x1E;
const REG_RESULT_NUMBER: u8 = 0x20;
const REG_STATE_DATA_WR0: u8 = 0x2E;
const REG_ENABLE: u8 = 0xE0;
const REG_INT_STATUS: u8 = 0xE1;
const REG_INT_ENAB: u8 = 0xE2;
const REG_ID: u8 = 0xE3;

const ENABLE_READY: u8 = 0x41;
const ALGO_STATE: [u8; 11] = [0xB1, 0xA9, 0x02, 0, 0, 0, 0, 0, 0, 0, 0];

/// A fake monotonic clock advancing by a fixed step on every read.
struct StepClock {
    now: Cell<u32>,
    step: u32,
}

impl StepClock {
    fn new(step: u32) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> u32 {
        let now = self.now.get().wrapping_add(self.step);
        self.now.set(now);
        now
    }
}

fn read_reg(register: u8, value: u8) -> Transaction {
    Transaction::write_read(ADDR, vec![register], vec![value])
}

fn write_reg(register: u8, value: u8) -> Transaction {
    Transaction::write(ADDR, vec![register, value])
}

fn write_block(register: u8, data: &[u8]) -> Transaction {
    let mut payload = vec![register];
    payload.extend_from_slice(data);
    Transaction::write(ADDR, payload)
}

// The CPU reset bit is applied read-modify-write on the enable register.
fn cpu_reset_rmw() -> Vec<Transaction> {
    vec![read_reg(REG_ENABLE, 0x00), write_reg(REG_ENABLE, 0x80)]
}

// The back half of the bring-up: calibration command, the three write
// windows, then the measurement start command.
fn state_download(calibration: &[u8; 14], command_data: &[u8; 8]) -> Vec<Transaction> {
    vec![
        write_reg(REG_COMMAND, 0x0B),
        write_block(REG_RESULT_NUMBER, calibration),
        write_block(REG_STATE_DATA_WR0, &ALGO_STATE),
        write_block(REG_CMD_DATA7, command_data),
        write_reg(REG_COMMAND, 0x02),
    ]
}

// A full successful init where the CPU reports ready on the
// `ready_polls`-th poll and the application on the `app_polls`-th.
fn init_expectations(ready_polls: usize, app_polls: usize) -> Vec<Transaction> {
    let mut expectations = vec![Transaction::write(ADDR, vec![])];
    expectations.extend(cpu_reset_rmw());
    for _ in 1..ready_polls {
        expectations.push(read_reg(REG_ENABLE, 0x00));
    }
    expectations.push(read_reg(REG_ENABLE, ENABLE_READY));
    expectations.push(read_reg(REG_ID, 0x07));
    expectations.push(write_reg(REG_APPREQID, 0xC0));
    for _ in 1..app_polls {
        expectations.push(read_reg(REG_APPID, 0x00));
    }
    expectations.push(read_reg(REG_APPID, 0xC0));
    expectations.extend(state_download(&DEFAULT_CALIBRATION_DATA, &DEFAULT_COMMAND_DATA));
    expectations
}

#[test]
fn init_succeeds_after_a_few_polls() {
    let mut i2c = Mock::new(&init_expectations(3, 2));
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert!(sensor.init().is_ok());
    assert_eq!(sensor.last_error(), DriverError::None);
    i2c.done();
}

#[test]
fn init_succeeds_on_the_last_allowed_poll() {
    let mut i2c = Mock::new(&init_expectations(200, 1));
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert!(sensor.init().is_ok());
    assert_eq!(sensor.last_error(), DriverError::None);
    i2c.done();
}

#[test]
fn init_fails_when_the_cpu_never_becomes_ready() {
    let mut expectations = vec![Transaction::write(ADDR, vec![])];
    expectations.extend(cpu_reset_rmw());
    for _ in 0..200 {
        expectations.push(read_reg(REG_ENABLE, 0x00));
    }

    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert!(matches!(sensor.init(), Err(Error::CpuResetTimeout)));
    assert_eq!(sensor.last_error(), DriverError::CpuResetTimeout);
    i2c.done();
}

#[test]
fn init_fails_on_a_wrong_chip_id() {
    let mut expectations = vec![Transaction::write(ADDR, vec![])];
    expectations.extend(cpu_reset_rmw());
    expectations.push(read_reg(REG_ENABLE, ENABLE_READY));
    expectations.push(read_reg(REG_ID, 0x08));

    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert!(matches!(sensor.init(), Err(Error::WrongChipId(0x08))));
    assert_eq!(sensor.last_error(), DriverError::WrongChipId);
    i2c.done();
}

#[test]
fn init_fails_when_the_application_never_loads() {
    let mut expectations = vec![Transaction::write(ADDR, vec![])];
    expectations.extend(cpu_reset_rmw());
    expectations.push(read_reg(REG_ENABLE, ENABLE_READY));
    expectations.push(read_reg(REG_ID, 0x07));
    expectations.push(write_reg(REG_APPREQID, 0xC0));
    for _ in 0..200 {
        // The bootloader keeps answering instead of the application.
        expectations.push(read_reg(REG_APPID, 0x80));
    }

    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert!(matches!(sensor.init(), Err(Error::ApplicationLoad)));
    assert_eq!(sensor.last_error(), DriverError::AppLoad);
    i2c.done();
}

#[test]
fn result_info_splits_into_status_and_reliability() {
    for info in 0..=255u8 {
        let expectations = [Transaction::write_read(
            ADDR,
            vec![REG_RESULT_NUMBER],
            vec![0x07, info, 0x34, 0x12],
        )];
        let mut i2c = Mock::new(&expectations);
        let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

        sensor.update_measurement().unwrap();
        assert_eq!(sensor.measurement_status(), info >> 6);
        assert_eq!(sensor.measurement_reliability(), info & 0x3F);
        assert_eq!(sensor.measurement_number(), 0x07);
        assert_eq!(sensor.distance_peak(), 0x1234);
        assert_eq!(sensor.measurement_enabled(), info >> 6 == 0);
        i2c.done();
    }
}

#[test]
fn get_distance_clears_the_interrupt_before_reading() {
    let expectations = [
        read_reg(REG_INT_STATUS, 0x00),
        write_reg(REG_INT_STATUS, 0x01),
        Transaction::write_read(ADDR, vec![REG_RESULT_NUMBER], vec![0x01, 0x3F, 0xE8, 0x03]),
    ];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert_eq!(sensor.get_distance().unwrap(), 1000);
    assert_eq!(sensor.measurement_reliability(), 63);
    assert!(sensor.measurement_enabled());
    i2c.done();
}

#[test]
fn interrupt_enable_and_disable_touch_only_the_mask_bit() {
    let expectations = [
        // enable: set bit 0, settle, refresh the snapshot
        read_reg(REG_INT_ENAB, 0x10),
        write_reg(REG_INT_ENAB, 0x11),
        Transaction::write_read(ADDR, vec![REG_RESULT_NUMBER], vec![0, 0, 0, 0]),
        // disable: clear bit 0 only
        read_reg(REG_INT_ENAB, 0x11),
        write_reg(REG_INT_ENAB, 0x10),
    ];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    sensor.enable_interrupt().unwrap();
    sensor.disable_interrupt().unwrap();
    i2c.done();
}

#[test]
fn gpio0_mode_preserves_the_gpio1_nibble() {
    let expectations = [
        read_reg(REG_CMD_DATA0, 0xA0),
        Transaction::write(ADDR, vec![REG_CMD_DATA0, 0xA3, 0x0F]),
    ];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    sensor.set_gpio0_mode(GpioMode::Vcsel).unwrap();
    assert_eq!(sensor.command_data()[7], 0xA3);
    i2c.done();
}

#[test]
fn gpio1_mode_preserves_the_gpio0_nibble() {
    let expectations = [
        read_reg(REG_CMD_DATA0, 0x05),
        Transaction::write(ADDR, vec![REG_CMD_DATA0, 0x45, 0x0F]),
    ];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    sensor.set_gpio1_mode(GpioMode::LowOutput).unwrap();
    assert_eq!(sensor.command_data()[7], 0x45);
    i2c.done();
}

#[test]
fn invalid_gpio_modes_are_silently_ignored() {
    // No transactions expected: the call must not touch the bus.
    let mut i2c = Mock::new(&[]);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    for raw in 6..=255u8 {
        assert!(sensor.set_gpio0_mode(GpioMode::from(raw)).is_ok());
        assert!(sensor.set_gpio1_mode(GpioMode::from(raw)).is_ok());
    }
    assert_eq!(sensor.command_data(), &DEFAULT_COMMAND_DATA);
    i2c.done();
}

#[test]
fn gpio_mode_getters_split_the_nibbles() {
    let expectations = [read_reg(REG_CMD_DATA0, 0x53), read_reg(REG_CMD_DATA0, 0x53)];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert_eq!(sensor.gpio0_mode().unwrap(), GpioMode::Vcsel);
    assert_eq!(sensor.gpio1_mode().unwrap(), GpioMode::HighOutput);
    i2c.done();
}

#[test]
fn set_calibration_data_pushes_the_new_payload_on_reset() {
    let calibration: [u8; 14] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];

    let mut expectations = cpu_reset_rmw();
    expectations.push(read_reg(REG_ENABLE, ENABLE_READY));
    expectations.push(write_reg(REG_APPREQID, 0xC0));
    expectations.push(read_reg(REG_APPID, 0xC0));
    expectations.extend(state_download(&calibration, &DEFAULT_COMMAND_DATA));

    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    sensor.set_calibration_data(&calibration).unwrap();
    assert_eq!(sensor.calibration_data(), &calibration);
    assert_eq!(sensor.last_error(), DriverError::None);
    i2c.done();
}

#[test]
fn calibration_read_back_round_trips() {
    let calibration: [u8; 14] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];

    let expectations = [
        write_reg(REG_COMMAND, 0xFF),
        // first attempt: not ready yet
        write_reg(REG_COMMAND, 0x0A),
        read_reg(REG_CONTENTS, 0x00),
        // second attempt: calibration content ready
        write_reg(REG_COMMAND, 0x0A),
        read_reg(REG_CONTENTS, 0x0A),
        Transaction::write_read(ADDR, vec![REG_RESULT_NUMBER], calibration.to_vec()),
    ];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    let mut out = [0u8; 14];
    sensor
        .get_calibration_data(&StepClock::new(60), &mut out)
        .unwrap();
    assert_eq!(out, calibration);
    assert_eq!(sensor.last_error(), DriverError::None);
    i2c.done();
}

#[test]
fn calibration_read_back_gives_up_after_the_wall_clock_ceiling() {
    // The clock advances 5 seconds per reading, so the loop gets exactly
    // six attempts before the 30 second ceiling.
    let mut expectations = vec![write_reg(REG_COMMAND, 0xFF)];
    for _ in 0..6 {
        expectations.push(write_reg(REG_COMMAND, 0x0A));
        expectations.push(read_reg(REG_CONTENTS, 0x00));
    }

    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    let mut out = [0xAA; 14];
    let result = sensor.get_calibration_data(&StepClock::new(5000), &mut out);
    assert!(matches!(result, Err(Error::FactoryCalibrationTimeout)));
    assert_eq!(sensor.last_error(), DriverError::FactoryCalibration);
    assert_eq!(out, [0xAA; 14]);
    i2c.done();
}

#[test]
fn serial_number_polls_for_the_serial_sentinel() {
    let expectations = [
        write_reg(REG_COMMAND, 0x47),
        read_reg(REG_CONTENTS, 0x00),
        write_reg(REG_COMMAND, 0x47),
        read_reg(REG_CONTENTS, 0x47),
        Transaction::write_read(ADDR, vec![0x28], vec![0x34, 0x12]),
    ];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert_eq!(sensor.serial_number().unwrap(), 0x1234);
    i2c.done();
}

#[test]
fn data_available_checks_the_result_sentinel() {
    let expectations = [read_reg(REG_CONTENTS, 0x55), read_reg(REG_CONTENTS, 0x0A)];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert!(sensor.data_available().unwrap());
    assert!(!sensor.data_available().unwrap());
    i2c.done();
}

#[test]
fn is_connected_requires_the_chip_id() {
    let expectations = [
        Transaction::write(ADDR, vec![]),
        read_reg(REG_ID, 0x07),
        Transaction::write(ADDR, vec![]),
        read_reg(REG_ID, 0x55),
    ];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    assert!(sensor.is_connected().unwrap());
    assert!(!sensor.is_connected().unwrap());
    i2c.done();
}

#[test]
fn register_bit_helpers_do_read_modify_write() {
    let expectations = [
        read_reg(REG_ENABLE, 0x01),
        write_reg(REG_ENABLE, 0x41),
        read_reg(REG_ENABLE, 0x41),
        write_reg(REG_ENABLE, 0x01),
        read_reg(REG_ENABLE, 0x41),
    ];
    let mut i2c = Mock::new(&expectations);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    sensor.set_register_bit(Register::Enable, Bit::CPU_READY).unwrap();
    sensor
        .clear_register_bit(Register::Enable, Bit::CPU_READY)
        .unwrap();
    assert!(sensor.is_bit_set(Register::Enable, Bit::CPU_READY).unwrap());
    i2c.done();
}

#[test]
fn bit_positions_are_validated_at_construction() {
    assert!(Bit::new(8).is_none());
    assert!(Bit::new(255).is_none());
    let bit = Bit::new(7).unwrap();
    assert_eq!(bit.position(), 7);
    assert_eq!(bit.mask(), 0x80);
    assert_eq!(Bit::CPU_READY.mask(), 0x40);
}

#[test]
fn oversize_register_writes_are_rejected() {
    let mut i2c = Mock::new(&[]);
    let mut sensor = Tmf8801::new(i2c.clone(), NoopDelay);

    let result = sensor.write_bytes(Register::CmdData7, &[0u8; 15]);
    assert!(matches!(result, Err(Error::InvalidArgument)));
    i2c.done();
}
