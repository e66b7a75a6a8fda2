//! # TMF8801 Time-of-Flight Distance Sensor Driver
//!
//! This crate provides a `no_std` driver for the AMS TMF8801 time-of-flight
//! distance sensor. The TMF8801 is a register-addressed I2C device that runs a
//! downloadable measurement application on an internal CPU; the driver brings
//! the chip out of reset, loads the measurement application, injects factory
//! calibration data and starts measurements.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use tmf8801::Tmf8801;
//!
//! let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
//! let delay = embedded_hal_mock::eh1::delay::NoopDelay;
//! let mut sensor = Tmf8801::new(i2c, delay);
//!
//! sensor.init().unwrap();
//!
//! let distance = sensor.get_distance().unwrap();
//! if sensor.measurement_enabled() {
//!     println!("Distance: {} counts", distance);
//! }
//! ```
//!
//! ## Error reporting
//!
//! Every fallible operation returns a [`Result`]. In addition, the protocol
//! level operations ([`init`](Tmf8801::init), [`reset`](Tmf8801::reset),
//! [`set_calibration_data`](Tmf8801::set_calibration_data) and
//! [`get_calibration_data`](Tmf8801::get_calibration_data)) record a
//! [`DriverError`] code on the handle, queryable with
//! [`last_error`](Tmf8801::last_error). The code is last-write-wins and is
//! cleared to [`DriverError::None`] when the operation succeeds.
#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod fmt; // <-- must be first module!

#[cfg(not(feature = "async"))]
use embedded_hal::{delay::DelayNs, i2c::I2c};
#[cfg(feature = "async")]
use embedded_hal_async::{delay::DelayNs, i2c::I2c};

/// Default I2C address of the TMF8801.
pub const DEFAULT_ADDRESS: u8 = 0x41;

/// Value reported by the [`Register::Id`] register on a genuine TMF8801.
pub const CHIP_ID: u8 = 0x07;

/// Application ID of the measurement application.
pub const APPLICATION: u8 = 0xC0;

/// Length of the factory calibration payload in bytes.
pub const CALIBRATION_DATA_LENGTH: usize = 14;

/// Length of the CMD_DATA_7..CMD_DATA_0 configuration block in bytes.
pub const COMMAND_DATA_LENGTH: usize = 8;

/// Command opcode starting a distance measurement.
pub const COMMAND_MEASURE: u8 = 0x02;
/// Command opcode requesting the factory calibration data.
pub const COMMAND_FACTORY_CALIBRATION: u8 = 0x0A;
/// Command opcode announcing a calibration data download.
pub const COMMAND_CALIBRATION: u8 = 0x0B;
/// Command opcode requesting the device serial number.
pub const COMMAND_SERIAL: u8 = 0x47;
/// Command opcode stopping the running application.
pub const COMMAND_STOP: u8 = 0xFF;

/// [`Register::RegisterContents`] sentinel: a measurement result is available.
pub const CONTENT_RESULT: u8 = 0x55;
/// [`Register::RegisterContents`] sentinel: calibration data is available.
pub const CONTENT_CALIBRATION: u8 = 0x0A;
/// [`Register::RegisterContents`] sentinel: the serial number is available.
pub const CONTENT_SERIAL: u8 = 0x47;

/// Mask shared by the interrupt status and interrupt enable registers.
pub const INTERRUPT_MASK: u8 = 0x01;

/// Factory calibration payload the driver ships with until
/// [`set_calibration_data`](Tmf8801::set_calibration_data) replaces it.
pub const DEFAULT_CALIBRATION_DATA: [u8; CALIBRATION_DATA_LENGTH] = [
    0xC1, 0x22, 0x00, 0x1C, 0x09, 0x40, 0x8C, 0x98, 0xA5, 0xB6, 0xFB, 0x05, 0xFC, 0x1F,
];

/// CMD_DATA_7..CMD_DATA_0 configuration block written on every bring-up.
/// Values taken from application note AN000597, pp. 22.
pub const DEFAULT_COMMAND_DATA: [u8; COMMAND_DATA_LENGTH] =
    [0x03, 0x23, 0x00, 0x00, 0x00, 0x64, 0xD8, 0xA4];

// Algorithm state blob from AN000597, pp. 22, written on every bring-up.
const ALGO_STATE: [u8; 11] = [0xB1, 0xA9, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

// Readiness polls run on a 100ms tick with a 200 tick ceiling (20s).
const POLL_INTERVAL_MS: u32 = 100;
const POLL_ATTEMPTS: u16 = 200;

// Wall-clock ceiling for the factory calibration read-back.
const CALIBRATION_TIMEOUT_MS: u32 = 30_000;

// Settle delays after the measurement start command.
const INIT_SETTLE_MS: u32 = 10;
const RESET_SETTLE_MS: u32 = 50;

/// Register addresses of the TMF8801.
///
/// Addresses `0x00..=0x3A` belong to the running application and change
/// meaning with the loaded application; `0xE0..=0xE4` are always present.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// ID of the currently running application (0x00)
    AppId = 0x00,
    /// Major version of the running application (0x01)
    AppRevMajor = 0x01,
    /// Application request register, written to load an application (0x02)
    AppReqId = 0x02,
    /// Command data byte 9 (0x06)
    CmdData9 = 0x06,
    /// Command data byte 8 (0x07)
    CmdData8 = 0x07,
    /// Command data byte 7, base of the 8-byte configuration block (0x08)
    CmdData7 = 0x08,
    /// Command data byte 6 (0x09)
    CmdData6 = 0x09,
    /// Command data byte 5 (0x0A)
    CmdData5 = 0x0A,
    /// Command data byte 4 (0x0B)
    CmdData4 = 0x0B,
    /// Command data byte 3 (0x0C)
    CmdData3 = 0x0C,
    /// Command data byte 2 (0x0D)
    CmdData2 = 0x0D,
    /// Command data byte 1 (0x0E)
    CmdData1 = 0x0E,
    /// Command data byte 0, holds the GPIO mode nibbles (0x0F)
    CmdData0 = 0x0F,
    /// Command register accepting the `COMMAND_*` opcodes (0x10)
    Command = 0x10,
    /// Previously executed command (0x11)
    Previous = 0x11,
    /// Minor version of the running application (0x12)
    AppRevMinor = 0x12,
    /// Patch version of the running application (0x13)
    AppRevPatch = 0x13,
    /// Status of the last command (0x1D)
    Status = 0x1D,
    /// Describes what the result registers currently hold (0x1E)
    RegisterContents = 0x1E,
    /// Transaction ID, increments on every result update (0x1F)
    Tid = 0x1F,
    /// Result number, first byte of the 4-byte result block (0x20)
    ResultNumber = 0x20,
    /// Result info: bits 7:6 status, bits 5:0 reliability (0x21)
    ResultInfo = 0x21,
    /// Peak distance, low byte (0x22)
    DistancePeak0 = 0x22,
    /// Peak distance, high byte (0x23)
    DistancePeak1 = 0x23,
    /// System clock, byte 0 (0x24)
    SysClock0 = 0x24,
    /// System clock, byte 1 (0x25)
    SysClock1 = 0x25,
    /// System clock, byte 2 (0x26)
    SysClock2 = 0x26,
    /// System clock, byte 3 (0x27)
    SysClock3 = 0x27,
    /// Algorithm state, byte 0; also base of the serial number (0x28)
    StateData0 = 0x28,
    /// Algorithm state, byte 1 (0x29)
    StateData1 = 0x29,
    /// Algorithm state, byte 2 (0x2A)
    StateData2 = 0x2A,
    /// Algorithm state, byte 3 (0x2B)
    StateData3 = 0x2B,
    /// Algorithm state, byte 4 (0x2C)
    StateData4 = 0x2C,
    /// Algorithm state, byte 5 (0x2D)
    StateData5 = 0x2D,
    /// Algorithm state, byte 6 (0x2E)
    StateData6 = 0x2E,
    /// Algorithm state, byte 7 (0x2F)
    StateData7 = 0x2F,
    /// Crosstalk, high byte (0x30)
    StateData8XtalkMsb = 0x30,
    /// Crosstalk, low byte (0x31)
    StateData9XtalkLsb = 0x31,
    /// Junction temperature (0x32)
    StateData10Tj = 0x32,
    /// Reference hits, byte 0 (0x33)
    ReferenceHits0 = 0x33,
    /// Reference hits, byte 1 (0x34)
    ReferenceHits1 = 0x34,
    /// Reference hits, byte 2 (0x35)
    ReferenceHits2 = 0x35,
    /// Reference hits, byte 3 (0x36)
    ReferenceHits3 = 0x36,
    /// Object hits, byte 0 (0x37)
    ObjectHits0 = 0x37,
    /// Object hits, byte 1 (0x38)
    ObjectHits1 = 0x38,
    /// Object hits, byte 2 (0x39)
    ObjectHits2 = 0x39,
    /// Object hits, byte 3 (0x3A)
    ObjectHits3 = 0x3A,
    /// Enable register: bit 6 CPU ready, bit 7 CPU reset (0xE0)
    Enable = 0xE0,
    /// Interrupt status register, write-1-to-clear (0xE1)
    IntStatus = 0xE1,
    /// Interrupt enable register (0xE2)
    IntEnab = 0xE2,
    /// Chip ID register, reads [`CHIP_ID`] on a TMF8801 (0xE3)
    Id = 0xE3,
    /// Hardware revision register (0xE4)
    RevId = 0xE4,
}

impl Register {
    /// Base of the 14-byte factory calibration window. Shares its address
    /// with the measurement result block; the device remaps the window while
    /// a calibration command is in flight.
    pub const FACTORY_CALIB_0: Self = Self::ResultNumber;

    /// Base of the 11-byte algorithm state write window. Shares its address
    /// with [`Register::StateData6`].
    pub const STATE_DATA_WR_0: Self = Self::StateData6;
}

impl From<Register> for u8 {
    fn from(r: Register) -> Self {
        r as u8
    }
}

/// A validated bit position (0 = LSB .. 7 = MSB) within an 8-bit register.
///
/// Construction through [`Bit::new`] makes an out-of-range position a
/// construction-time error instead of an out-of-range shift at the point of
/// use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bit(u8);

impl Bit {
    /// CPU ready bit of the [`Register::Enable`] register.
    pub const CPU_READY: Self = Self(6);
    /// CPU reset bit of the [`Register::Enable`] register. Self-clearing on
    /// the device side.
    pub const CPU_RESET: Self = Self(7);

    /// Creates a bit position, returning `None` for positions above 7.
    #[must_use]
    pub const fn new(position: u8) -> Option<Self> {
        if position < 8 {
            Some(Self(position))
        } else {
            None
        }
    }

    /// Returns the bit position (0..=7).
    #[must_use]
    pub const fn position(self) -> u8 {
        self.0
    }

    /// Returns the single-bit mask for this position.
    #[must_use]
    pub const fn mask(self) -> u8 {
        1 << self.0
    }
}

/// GPIO modes accepted by the two general purpose pins of the TMF8801.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpioMode {
    /// Pin is an input
    Input,
    /// Pin is an input, active low
    LowInput,
    /// Pin is an input, active high
    HighInput,
    /// Pin follows the VCSEL pulse
    Vcsel,
    /// Pin is an output, driven low
    LowOutput,
    /// Pin is an output, driven high
    HighOutput,
    /// Raw mode value not understood by the driver
    Unknown(u8),
}

impl From<GpioMode> for u8 {
    fn from(mode: GpioMode) -> Self {
        match mode {
            GpioMode::Input => 0,
            GpioMode::LowInput => 1,
            GpioMode::HighInput => 2,
            GpioMode::Vcsel => 3,
            GpioMode::LowOutput => 4,
            GpioMode::HighOutput => 5,
            GpioMode::Unknown(value) => value,
        }
    }
}

impl From<u8> for GpioMode {
    fn from(value: u8) -> Self {
        match value {
            0 => GpioMode::Input,
            1 => GpioMode::LowInput,
            2 => GpioMode::HighInput,
            3 => GpioMode::Vcsel,
            4 => GpioMode::LowOutput,
            5 => GpioMode::HighOutput,
            _ => GpioMode::Unknown(value),
        }
    }
}

/// Error code recorded on the device handle by the protocol level operations.
///
/// Mirrors the error taxonomy of the vendor protocol: mutually exclusive,
/// last-write-wins, cleared to [`DriverError::None`] on success.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// The last protocol operation succeeded
    #[default]
    None,
    /// The connectivity probe failed or the bus dropped mid-sequence
    I2cComm,
    /// The CPU ready bit never came up within the poll ceiling
    CpuResetTimeout,
    /// The chip ID register did not read [`CHIP_ID`]
    WrongChipId,
    /// The measurement application did not come up within the poll ceiling
    AppLoad,
    /// The factory calibration read-back exceeded its 30 second ceiling
    FactoryCalibration,
}

/// A monotonic time source with millisecond precision.
///
/// Only used to bound the factory calibration read-back, which is capped by
/// wall-clock time rather than a poll count.
pub trait Clock {
    /// Get the current time in milliseconds. Wrap-around is handled by the
    /// driver.
    fn now_ms(&self) -> u32;
}

/// TMF8801 time-of-flight distance sensor driver.
///
/// The driver owns the I2C handle, the delay implementation and all mutable
/// device state (calibration payload, configuration block, last error code
/// and the latest measurement snapshot). It is not safe to share a handle
/// between threads of control; wrap it in an exclusive-access guard if you
/// must.
///
/// A freshly constructed handle is not usable until [`init`](Tmf8801::init)
/// has returned `Ok`.
pub struct Tmf8801<I2C, D> {
    /// I2C interface for communication with the sensor
    i2c: I2C,
    /// I2C address of the sensor
    address: u8,
    /// Delay implementation for timing operations
    delay: D,
    /// Factory calibration payload, pushed to the device on every bring-up
    calibration_data: [u8; CALIBRATION_DATA_LENGTH],
    /// Mirror of the CMD_DATA_7..CMD_DATA_0 registers
    command_data: [u8; COMMAND_DATA_LENGTH],
    /// Error code of the last protocol operation
    last_error: DriverError,
    /// Latest measurement snapshot: result number
    result_number: u8,
    /// Latest measurement snapshot: result info byte
    result_info: u8,
    /// Latest measurement snapshot: peak distance in raw counts
    distance_peak: u16,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
impl<I2C, E, D> Tmf8801<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
    D: DelayNs,
{
    /// Creates a new driver instance on the default I2C address (0x41).
    ///
    /// The sensor is not yet initialized and must be brought up with
    /// [`init`](Self::init) before use.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use tmf8801::Tmf8801;
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    ///
    /// let mut sensor = Tmf8801::new(i2c, delay);
    /// ```
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self::new_with_address(i2c, DEFAULT_ADDRESS, delay)
    }

    /// Creates a new driver instance on a non-default I2C address.
    pub fn new_with_address(i2c: I2C, address: u8, delay: D) -> Self {
        Self {
            i2c,
            address,
            delay,
            calibration_data: DEFAULT_CALIBRATION_DATA,
            command_data: DEFAULT_COMMAND_DATA,
            last_error: DriverError::None,
            result_number: 0,
            result_info: 0,
            distance_peak: 0,
        }
    }

    /// Brings the sensor from power-on into the running measurement
    /// application.
    ///
    /// The sequence is: connectivity probe, CPU reset, CPU ready poll (100ms
    /// tick, 200 tick ceiling), chip ID check, measurement application load
    /// with the same poll policy, calibration and configuration download, and
    /// finally the measurement start command followed by a 10ms settle.
    ///
    /// On failure the handle records the matching [`DriverError`] and must
    /// not be used for measurements.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the probe or a register transaction failed
    /// * [`Error::CpuResetTimeout`] - the CPU never reported ready
    /// * [`Error::WrongChipId`] - the chip ID register did not read `0x07`
    /// * [`Error::ApplicationLoad`] - the measurement application never
    ///   reported ready
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use tmf8801::Tmf8801;
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = Tmf8801::new(i2c, delay);
    ///
    /// sensor.init().unwrap();
    /// assert_eq!(sensor.last_error(), tmf8801::DriverError::None);
    /// ```
    pub async fn init(&mut self) -> Result<(), Error<E>> {
        let result = self.run_init().await;
        self.record(&result);
        result
    }

    async fn run_init(&mut self) -> Result<(), Error<E>> {
        self.probe().await?;

        // The reset bit clears itself on the device side.
        self.set_register_bit(Register::Enable, Bit::CPU_RESET).await?;

        info!("waiting for the cpu to come out of reset");
        if !self.cpu_ready().await? {
            return Err(Error::CpuResetTimeout);
        }

        let id = self.read_byte(Register::Id).await?;
        if id != CHIP_ID {
            error!("unexpected chip id: {}", id);
            return Err(Error::WrongChipId(id));
        }

        info!("loading the measurement application");
        self.write_byte(Register::AppReqId, APPLICATION).await?;
        if !self.application_ready().await? {
            return Err(Error::ApplicationLoad);
        }

        self.push_device_state().await?;

        self.write_byte(Register::Command, COMMAND_MEASURE).await?;
        self.delay.delay_ms(INIT_SETTLE_MS).await;
        Ok(())
    }

    /// Resets the sensor and replays the back half of the bring-up sequence.
    ///
    /// Unlike [`init`](Self::init) this does not re-probe the bus or re-check
    /// the chip ID, and the readiness polls loop without a ceiling: a chip
    /// that has already been identified is trusted to come back eventually.
    /// The settle delay after the measurement start command is 50ms.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    pub async fn reset(&mut self) -> Result<(), Error<E>> {
        let result = self.run_reset().await;
        self.record(&result);
        result
    }

    async fn run_reset(&mut self) -> Result<(), Error<E>> {
        self.set_register_bit(Register::Enable, Bit::CPU_RESET).await?;
        while !self.cpu_ready().await? {}

        self.write_byte(Register::AppReqId, APPLICATION).await?;
        while !self.application_ready().await? {}

        self.push_device_state().await?;

        self.write_byte(Register::Command, COMMAND_MEASURE).await?;
        self.delay.delay_ms(RESET_SETTLE_MS).await;
        Ok(())
    }

    // Calibration command plus the three write windows: factory calibration,
    // algorithm state and the CMD_DATA configuration block.
    async fn push_device_state(&mut self) -> Result<(), Error<E>> {
        self.write_byte(Register::Command, COMMAND_CALIBRATION).await?;
        let calibration = self.calibration_data;
        self.write_bytes(Register::FACTORY_CALIB_0, &calibration).await?;
        self.write_bytes(Register::STATE_DATA_WR_0, &ALGO_STATE).await?;
        let command_data = self.command_data;
        self.write_bytes(Register::CmdData7, &command_data).await
    }

    async fn cpu_ready(&mut self) -> Result<bool, Error<E>> {
        for _ in 0..POLL_ATTEMPTS {
            if self.is_bit_set(Register::Enable, Bit::CPU_READY).await? {
                return Ok(true);
            }
            self.delay.delay_ms(POLL_INTERVAL_MS).await;
        }
        Ok(false)
    }

    async fn application_ready(&mut self) -> Result<bool, Error<E>> {
        for _ in 0..POLL_ATTEMPTS {
            if self.read_byte(Register::AppId).await? == APPLICATION {
                return Ok(true);
            }
            self.delay.delay_ms(POLL_INTERVAL_MS).await;
        }
        Ok(false)
    }

    fn record<T>(&mut self, result: &Result<T, Error<E>>) {
        self.last_error = match result {
            Ok(_) => DriverError::None,
            Err(e) => e.driver_error(),
        };
    }

    /// Returns the error code of the last protocol operation.
    #[must_use]
    pub fn last_error(&self) -> DriverError {
        self.last_error
    }

    /// Replaces the factory calibration payload and resets the device so the
    /// new payload takes effect.
    ///
    /// The fixed-size parameter keeps the 14-byte length invariant out of the
    /// runtime error space.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed during the reset
    pub async fn set_calibration_data(
        &mut self,
        data: &[u8; CALIBRATION_DATA_LENGTH],
    ) -> Result<(), Error<E>> {
        self.calibration_data = *data;
        self.reset().await
    }

    /// Reads the factory calibration data generated by the device.
    ///
    /// Stops the running application, then repeatedly issues the factory
    /// calibration command until the register contents report the
    /// calibration sentinel, capped at 30 seconds of wall-clock time on
    /// `clock`. On success 14 bytes are copied into `out`; on failure `out`
    /// is left untouched.
    ///
    /// Factory calibration should be performed in a dark environment with
    /// no target within 40cm of the sensor.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    /// * [`Error::FactoryCalibrationTimeout`] - the 30 second ceiling passed
    ///   without the device reporting calibration data
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use tmf8801::{Clock, Tmf8801};
    ///
    /// struct Uptime;
    /// impl Clock for Uptime {
    ///     fn now_ms(&self) -> u32 {
    ///         0 // read a hardware timer here
    ///     }
    /// }
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = Tmf8801::new(i2c, delay);
    ///
    /// sensor.init().unwrap();
    /// let mut calibration = [0u8; 14];
    /// sensor.get_calibration_data(&Uptime, &mut calibration).unwrap();
    /// sensor.set_calibration_data(&calibration).unwrap();
    /// ```
    pub async fn get_calibration_data(
        &mut self,
        clock: &impl Clock,
        out: &mut [u8; CALIBRATION_DATA_LENGTH],
    ) -> Result<(), Error<E>> {
        let result = self.read_factory_calibration(clock).await;
        self.record(&result);
        *out = result?;
        Ok(())
    }

    async fn read_factory_calibration(
        &mut self,
        clock: &impl Clock,
    ) -> Result<[u8; CALIBRATION_DATA_LENGTH], Error<E>> {
        self.write_byte(Register::Command, COMMAND_STOP).await?;
        self.delay.delay_ms(50).await;

        let start = clock.now_ms();
        loop {
            self.write_byte(Register::Command, COMMAND_FACTORY_CALIBRATION)
                .await?;
            self.delay.delay_ms(10).await;

            let contents = self.read_byte(Register::RegisterContents).await?;
            if contents == CONTENT_CALIBRATION {
                self.delay.delay_ms(10).await;
                let mut data = [0u8; CALIBRATION_DATA_LENGTH];
                self.read_bytes(Register::FACTORY_CALIB_0, &mut data).await?;
                return Ok(data);
            }

            self.delay.delay_ms(50).await;
            if clock.now_ms().wrapping_sub(start) >= CALIBRATION_TIMEOUT_MS {
                error!("factory calibration did not become available");
                return Err(Error::FactoryCalibrationTimeout);
            }
        }
    }

    /// Refreshes the measurement snapshot from the 4-byte result block.
    ///
    /// The snapshot (result number, result info and peak distance) is
    /// overwritten as a group; the snapshot accessors never touch the bus.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the result block read failed
    pub async fn update_measurement(&mut self) -> Result<(), Error<E>> {
        let mut buffer = [0u8; 4];
        self.read_bytes(Register::ResultNumber, &mut buffer).await?;
        self.result_number = buffer[0];
        self.result_info = buffer[1];
        self.distance_peak = u16::from_le_bytes([buffer[2], buffer[3]]);
        Ok(())
    }

    /// Clears the interrupt flag, refreshes the measurement snapshot and
    /// returns the peak distance in raw counts.
    ///
    /// Clearing the flag first returns the interrupt line to its open-drain
    /// idle state.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use tmf8801::Tmf8801;
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = Tmf8801::new(i2c, delay);
    ///
    /// sensor.init().unwrap();
    /// let distance = sensor.get_distance().unwrap();
    /// println!(
    ///     "distance {} (reliability {})",
    ///     distance,
    ///     sensor.measurement_reliability()
    /// );
    /// ```
    pub async fn get_distance(&mut self) -> Result<u16, Error<E>> {
        self.clear_interrupt_flag().await?;
        self.update_measurement().await?;
        Ok(self.distance_peak)
    }

    /// Returns the status bits (7:6) of the stored result info byte. Zero
    /// means a valid measurement.
    #[must_use]
    pub fn measurement_status(&self) -> u8 {
        self.result_info >> 6
    }

    /// Returns the reliability bits (5:0) of the stored result info byte.
    /// Higher is better, 63 is the maximum.
    #[must_use]
    pub fn measurement_reliability(&self) -> u8 {
        self.result_info & 0x3F
    }

    /// Returns the result number of the stored measurement snapshot.
    #[must_use]
    pub fn measurement_number(&self) -> u8 {
        self.result_number
    }

    /// Returns the peak distance of the stored measurement snapshot, in raw
    /// counts.
    #[must_use]
    pub fn distance_peak(&self) -> u16 {
        self.distance_peak
    }

    /// Returns `true` if the status bits of the stored snapshot are both
    /// zero, i.e. a valid, non-error measurement is available.
    #[must_use]
    pub fn measurement_enabled(&self) -> bool {
        self.measurement_status() == 0
    }

    /// Returns `true` if the result registers currently hold a measurement.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the register read failed
    pub async fn data_available(&mut self) -> Result<bool, Error<E>> {
        Ok(self.read_byte(Register::RegisterContents).await? == CONTENT_RESULT)
    }

    /// Enables the measurement-ready interrupt, then refreshes the snapshot
    /// after a 10ms settle.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    pub async fn enable_interrupt(&mut self) -> Result<(), Error<E>> {
        let value = self.read_byte(Register::IntEnab).await?;
        self.write_byte(Register::IntEnab, value | INTERRUPT_MASK)
            .await?;
        self.delay.delay_ms(10).await;
        self.update_measurement().await
    }

    /// Disables the measurement-ready interrupt.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    pub async fn disable_interrupt(&mut self) -> Result<(), Error<E>> {
        let value = self.read_byte(Register::IntEnab).await?;
        self.write_byte(Register::IntEnab, value & !INTERRUPT_MASK)
            .await
    }

    /// Clears the interrupt status flag (write-1-to-clear), returning the
    /// interrupt line to its open-drain idle state.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    pub async fn clear_interrupt_flag(&mut self) -> Result<(), Error<E>> {
        let value = self.read_byte(Register::IntStatus).await?;
        self.write_byte(Register::IntStatus, value | INTERRUPT_MASK)
            .await
    }

    /// Sets the mode of GPIO0 (low nibble of CMD_DATA_0).
    ///
    /// **Known quirk, kept for compatibility**: raw mode values above 5
    /// ([`GpioMode::Unknown`]) are silently ignored - the call returns `Ok`,
    /// no register traffic happens and the configuration block is unchanged.
    /// Callers must not assume absence of an error implies the mode was
    /// applied.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use tmf8801::{GpioMode, Tmf8801};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = Tmf8801::new(i2c, delay);
    ///
    /// sensor.init().unwrap();
    /// sensor.set_gpio0_mode(GpioMode::HighOutput).unwrap();
    /// ```
    pub async fn set_gpio0_mode(&mut self, mode: GpioMode) -> Result<(), Error<E>> {
        let raw = u8::from(mode);
        if raw > u8::from(GpioMode::HighOutput) {
            warn!("ignoring invalid gpio0 mode: {}", raw);
            return Ok(());
        }

        let current = self.read_byte(Register::CmdData0).await?;
        self.write_command_data0((current & 0xF0) | raw).await
    }

    /// Sets the mode of GPIO1 (high nibble of CMD_DATA_0).
    ///
    /// Carries the same silent-ignore quirk as
    /// [`set_gpio0_mode`](Self::set_gpio0_mode).
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    pub async fn set_gpio1_mode(&mut self, mode: GpioMode) -> Result<(), Error<E>> {
        let raw = u8::from(mode);
        if raw > u8::from(GpioMode::HighOutput) {
            warn!("ignoring invalid gpio1 mode: {}", raw);
            return Ok(());
        }

        let current = self.read_byte(Register::CmdData0).await?;
        self.write_command_data0((current & 0x0F) | (raw << 4)).await
    }

    // Persists the merged CMD_DATA_0 byte into the configuration block and
    // sends it to the device together with the fixed 0x0F companion byte in
    // a single two-byte transaction.
    async fn write_command_data0(&mut self, value: u8) -> Result<(), Error<E>> {
        self.command_data[COMMAND_DATA_LENGTH - 1] = value;
        self.write_bytes(Register::CmdData0, &[value, 0x0F]).await
    }

    /// Reads the current GPIO0 mode from the device.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the register read failed
    pub async fn gpio0_mode(&mut self) -> Result<GpioMode, Error<E>> {
        let value = self.read_byte(Register::CmdData0).await?;
        Ok(GpioMode::from(value & 0x0F))
    }

    /// Reads the current GPIO1 mode from the device.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the register read failed
    pub async fn gpio1_mode(&mut self) -> Result<GpioMode, Error<E>> {
        let value = self.read_byte(Register::CmdData0).await?;
        Ok(GpioMode::from(value >> 4))
    }

    /// Returns the in-memory CMD_DATA_7..CMD_DATA_0 configuration block.
    #[must_use]
    pub fn command_data(&self) -> &[u8; COMMAND_DATA_LENGTH] {
        &self.command_data
    }

    /// Returns the in-memory factory calibration payload.
    #[must_use]
    pub fn calibration_data(&self) -> &[u8; CALIBRATION_DATA_LENGTH] {
        &self.calibration_data
    }

    /// Reads the major version of the running application.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the register read failed
    pub async fn application_version_major(&mut self) -> Result<u8, Error<E>> {
        self.read_byte(Register::AppRevMajor).await
    }

    /// Reads the minor version of the running application.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the register read failed
    pub async fn application_version_minor(&mut self) -> Result<u8, Error<E>> {
        self.read_byte(Register::AppRevMinor).await
    }

    /// Reads the hardware revision.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the register read failed
    pub async fn hardware_version(&mut self) -> Result<u8, Error<E>> {
        self.read_byte(Register::RevId).await
    }

    /// Reads the device serial number.
    ///
    /// Issues the serial command and polls the register contents until the
    /// serial sentinel appears. Like the vendor protocol this loop has no
    /// ceiling.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    pub async fn serial_number(&mut self) -> Result<u16, Error<E>> {
        loop {
            self.write_byte(Register::Command, COMMAND_SERIAL).await?;
            self.delay.delay_ms(50).await;
            let contents = self.read_byte(Register::RegisterContents).await?;
            self.delay.delay_ms(10).await;
            if contents == CONTENT_SERIAL {
                break;
            }
        }

        let mut value = [0u8; 2];
        self.read_bytes(Register::StateData0, &mut value).await?;
        Ok(u16::from_le_bytes(value))
    }

    /// Reads the status register of the running application.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the register read failed
    pub async fn status(&mut self) -> Result<u8, Error<E>> {
        self.read_byte(Register::Status).await
    }

    /// Returns `true` if the bus probe succeeds and the chip ID register
    /// reads [`CHIP_ID`].
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the chip ID read failed after a successful probe
    pub async fn is_connected(&mut self) -> Result<bool, Error<E>> {
        if self.probe().await.is_err() {
            return Ok(false);
        }
        Ok(self.read_byte(Register::Id).await? == CHIP_ID)
    }

    /// Wakes the device from standby by writing the enable register until it
    /// reads back as ready (`0x41`), on a 100ms cadence.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a register transaction failed
    pub async fn wake_up(&mut self) -> Result<(), Error<E>> {
        loop {
            self.write_byte(Register::Enable, 0x01).await?;
            let value = self.read_byte(Register::Enable).await?;
            self.delay.delay_ms(POLL_INTERVAL_MS).await;
            if value == 0x41 {
                return Ok(());
            }
        }
    }

    /// Probes the bus with a zero-length transaction.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the device did not acknowledge its address
    pub async fn probe(&mut self) -> Result<(), Error<E>> {
        self.i2c.write(self.address, &[]).await?;
        Ok(())
    }

    /// Reads a single byte from a register.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the bus transaction failed
    pub async fn read_byte<R>(&mut self, register: R) -> Result<u8, Error<E>>
    where
        R: Into<u8>,
    {
        let mut buffer = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register.into()], &mut buffer)
            .await?;
        Ok(buffer[0])
    }

    /// Reads `buffer.len()` bytes starting at a register.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the bus transaction failed
    pub async fn read_bytes<R>(&mut self, register: R, buffer: &mut [u8]) -> Result<(), Error<E>>
    where
        R: Into<u8>,
    {
        self.i2c
            .write_read(self.address, &[register.into()], buffer)
            .await?;
        Ok(())
    }

    /// Writes a single byte to a register.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the bus transaction failed
    pub async fn write_byte<R>(&mut self, register: R, value: u8) -> Result<(), Error<E>>
    where
        R: Into<u8>,
    {
        self.i2c
            .write(self.address, &[register.into(), value])
            .await?;
        Ok(())
    }

    /// Writes `data` starting at a register, in a single transaction.
    ///
    /// The payload is capped at the largest register window of the protocol
    /// ([`CALIBRATION_DATA_LENGTH`] bytes).
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] - `data` exceeds the payload cap
    /// * [`Error::I2c`] - the bus transaction failed
    pub async fn write_bytes<R>(&mut self, register: R, data: &[u8]) -> Result<(), Error<E>>
    where
        R: Into<u8>,
    {
        if data.len() > CALIBRATION_DATA_LENGTH {
            error!("oversize register write: {} bytes", data.len());
            return Err(Error::InvalidArgument);
        }
        let mut buffer = [0u8; CALIBRATION_DATA_LENGTH + 1];
        buffer[0] = register.into();
        buffer[1..=data.len()].copy_from_slice(data);
        self.i2c.write(self.address, &buffer[..=data.len()]).await?;
        Ok(())
    }

    /// Sets a single bit in a register (read-modify-write).
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a bus transaction failed
    pub async fn set_register_bit<R>(&mut self, register: R, bit: Bit) -> Result<(), Error<E>>
    where
        R: Into<u8>,
    {
        let register = register.into();
        let value = self.read_byte(register).await?;
        self.write_byte(register, value | bit.mask()).await
    }

    /// Clears a single bit in a register (read-modify-write).
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - a bus transaction failed
    pub async fn clear_register_bit<R>(&mut self, register: R, bit: Bit) -> Result<(), Error<E>>
    where
        R: Into<u8>,
    {
        let register = register.into();
        let value = self.read_byte(register).await?;
        self.write_byte(register, value & !bit.mask()).await
    }

    /// Returns `true` if a bit is set in a register.
    ///
    /// # Errors
    ///
    /// * [`Error::I2c`] - the register read failed
    pub async fn is_bit_set<R>(&mut self, register: R, bit: Bit) -> Result<bool, Error<E>>
    where
        R: Into<u8>,
    {
        Ok(self.read_byte(register.into()).await? & bit.mask() != 0)
    }
}

/// Error type for TMF8801 sensor operations.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E: core::fmt::Debug> {
    /// I2C communication error from the underlying hardware
    I2c(E),
    /// The CPU ready bit never came up within the poll ceiling
    CpuResetTimeout,
    /// The chip ID register read the contained value instead of [`CHIP_ID`]
    WrongChipId(u8),
    /// The measurement application never reported ready
    ApplicationLoad,
    /// The factory calibration read-back exceeded its 30 second ceiling
    FactoryCalibrationTimeout,
    /// Invalid parameter value provided
    InvalidArgument,
}

impl<E: core::fmt::Debug> Error<E> {
    fn driver_error(&self) -> DriverError {
        match self {
            Error::I2c(_) | Error::InvalidArgument => DriverError::I2cComm,
            Error::CpuResetTimeout => DriverError::CpuResetTimeout,
            Error::WrongChipId(_) => DriverError::WrongChipId,
            Error::ApplicationLoad => DriverError::AppLoad,
            Error::FactoryCalibrationTimeout => DriverError::FactoryCalibration,
        }
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl<E: core::fmt::Debug> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::I2c(error)
    }
}
