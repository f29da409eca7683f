//! A Heymac link-layer radio networking stack for the Semtech SX127x
//! LoRa transceiver: register-field settings, frame/command/IE codecs,
//! HONR hierarchical addressing, and the PHY/LNK state machines that
//! turn "send this frame" into register writes and back.

#![no_std]

pub mod error;
pub mod frame;
pub mod honr;
pub mod hsm;
pub mod lnk;
pub mod phy;
pub mod radio;
