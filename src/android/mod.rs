//! Android device module
//!
//! Drives the emulator over adb and turns calibrated UI elements into
//! pixel taps.

pub mod adb;
pub mod input;

pub use adb::{AdbDevice, Device, DeviceError, DeviceSession};
pub use input::{Axis, CoordinateMap, InputGenerator, Point, UiElement};
