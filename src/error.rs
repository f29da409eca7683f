//! Crate-wide error taxonomy.
//!
//! One enum per failure domain, matching the error taxonomy in the
//! specification: hardware/driver failures, bad setting values, frame
//! structure violations, command structure violations, and ill-formed
//! HONR addresses. Every fallible operation in this crate returns one
//! of these through a `Result`; nothing panics on untrusted input.

/// Failures from the SX127x driver and its SPI/GPIO transport.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum RadioError {
    /// The chip version register did not read back 0x12.
    ChipVersionMismatch,
    /// An SPI transaction failed at the transport level.
    Spi,
    /// A `set_field`/`set_fields` value was outside the field's bounds.
    InvalidSetting,
    /// An unknown field name was used.
    UnknownField,
    /// `write_sleep_settings` was called while the modem was not asleep
    /// but a changed field demands sleep mode to apply.
    NotAsleep,
}

/// Failures building or parsing a Heymac frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum FrameError {
    /// PID upper nibble is not the Heymac identifier.
    NotHeymac,
    /// PID lower nibble is not a supported sub-protocol.
    UnsupportedSubProtocol,
    /// An address field's length did not match 2 or 8 bytes as Fctl.L demands.
    AddressLengthMismatch,
    /// A Fctl bit is set without its field present, or vice versa.
    FctlFieldMismatch,
    /// Fctl.L is set but no address field is present.
    LongAddrWithoutAddress,
    /// Fctl.X is set together with a structured field.
    ExtendedWithStructuredField,
    /// Serialized frame would exceed 256 bytes.
    FrameTooLarge,
    /// Parse did not consume exactly the input length.
    TrailingOrMissingBytes,
    /// An IE sequence was malformed (missing terminator, truncated payload).
    MalformedIeSequence,
}

/// Failures parsing a Heymac command payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum CommandError {
    /// Payload was empty where a command prefix byte was required.
    Empty,
    /// A command with a declared sub-id was too short to hold it.
    MissingSubId,
    /// A fixed-format command's body did not match the required length.
    WrongLength,
    /// A variable-length command declared more entries than remained.
    TruncatedEntries,
}

/// Failures validating or operating on a HONR address.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum AddressError {
    /// Address length was not 2 or 8 bytes.
    WrongLength,
    /// A nibble right of the leftmost zero nibble was non-zero.
    IllFormed,
    /// Operation requires a node address but a broadcast address was given.
    NotANodeAddress,
    /// `get_parent` was called on the root address.
    NoParent,
}
