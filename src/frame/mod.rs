// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus frame values: cells, function codes and PDUs.

pub(crate) mod tcp;

use std::fmt;

use crate::{
    error::{Error, ErrorCode, Result},
    slave::SlaveId,
};

/// A zero-based coil or register address within a PDU.
///
/// Device documentation frequently numbers data items starting at 1 (or
/// with a 30001/40001 offset); subtract accordingly before building a
/// request.
pub type Address = u16;

/// The state of a single-bit data item.
///
/// `true` means ON and serializes as the `0xFF00` pattern in single-coil
/// writes, `false` as `0x0000`.
pub type Coil = bool;

/// A 16-bit register value, transmitted big-endian.
pub type Word = u16;

/// The count of coils or registers covered by one operation.
pub type Quantity = u16;

/// All standard Modbus function codes supported by this library, plus
/// [`Undefined`](Self::Undefined) for anything else.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// 0x01
    ReadCoils = 0x01,
    /// 0x02
    ReadDiscreteInputs = 0x02,
    /// 0x03
    ReadHoldingRegisters = 0x03,
    /// 0x04
    ReadInputRegisters = 0x04,
    /// 0x05
    WriteSingleCoil = 0x05,
    /// 0x06
    WriteSingleRegister = 0x06,
    /// 0x0F
    WriteMultipleCoils = 0x0F,
    /// 0x10
    WriteMultipleRegisters = 0x10,
    /// Any unsupported function code.
    #[default]
    Undefined = 0x00,
}

/// The operation class of a function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Read coils, contacts or registers.
    Read,
    /// Write a single coil or register.
    WriteSingle,
    /// Write multiple coils or registers.
    WriteMultiple,
}

/// The register class a function code operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// Single-bit read/write outputs (coils).
    OutputCoils,
    /// Single-bit read-only inputs (discrete inputs).
    InputContacts,
    /// 16-bit read/write registers.
    HoldingRegisters,
    /// 16-bit read-only registers.
    InputRegisters,
}

impl RegisterClass {
    /// Checks if cells of this class are single bits.
    #[must_use]
    pub const fn is_bit(self) -> bool {
        matches!(self, Self::OutputCoils | Self::InputContacts)
    }
}

impl FunctionCode {
    /// Maps a raw function code byte to the matching code.
    ///
    /// Unsupported bytes map to [`Undefined`](Self::Undefined).
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            _ => Self::Undefined,
        }
    }

    /// Returns the numeric value of the code.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// The operation class, `None` for [`Undefined`](Self::Undefined).
    #[must_use]
    pub const fn kind(self) -> Option<FunctionKind> {
        let kind = match self {
            Self::ReadCoils
            | Self::ReadDiscreteInputs
            | Self::ReadHoldingRegisters
            | Self::ReadInputRegisters => FunctionKind::Read,
            Self::WriteSingleCoil | Self::WriteSingleRegister => FunctionKind::WriteSingle,
            Self::WriteMultipleCoils | Self::WriteMultipleRegisters => FunctionKind::WriteMultiple,
            Self::Undefined => return None,
        };
        Some(kind)
    }

    /// The register class, `None` for [`Undefined`](Self::Undefined).
    #[must_use]
    pub const fn register_class(self) -> Option<RegisterClass> {
        let class = match self {
            Self::ReadCoils | Self::WriteSingleCoil | Self::WriteMultipleCoils => {
                RegisterClass::OutputCoils
            }
            Self::ReadDiscreteInputs => RegisterClass::InputContacts,
            Self::ReadHoldingRegisters
            | Self::WriteSingleRegister
            | Self::WriteMultipleRegisters => RegisterClass::HoldingRegisters,
            Self::ReadInputRegisters => RegisterClass::InputRegisters,
            Self::Undefined => return None,
        };
        Some(class)
    }

    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read from output coils",
            Self::ReadDiscreteInputs => "Read from input contacts",
            Self::ReadHoldingRegisters => "Read from output registers",
            Self::ReadInputRegisters => "Read from input registers",
            Self::WriteSingleCoil => "Write to single coil",
            Self::WriteSingleRegister => "Write to single analog register",
            Self::WriteMultipleCoils => "Write to multiple output coils",
            Self::WriteMultipleRegisters => "Write to multiple holding registers",
            Self::Undefined => "Undefined",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single Modbus data item: either a coil (bit) or a register (16-bit word).
///
/// The value containers of [`Request`] and [`Response`] hold cells of the
/// variant matching the register class of their function code; the
/// constructors take care of the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// A single-bit value.
    Coil(Coil),
    /// A 16-bit word value.
    Register(Word),
}

impl Cell {
    /// Creates a coil cell.
    #[must_use]
    pub const fn coil(value: Coil) -> Self {
        Self::Coil(value)
    }

    /// Creates a register cell.
    #[must_use]
    pub const fn register(value: Word) -> Self {
        Self::Register(value)
    }

    /// Checks if the cell holds a coil.
    #[must_use]
    pub const fn is_coil(&self) -> bool {
        matches!(self, Self::Coil(_))
    }

    /// Checks if the cell holds a register.
    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self, Self::Register(_))
    }

    /// Returns the coil value, converting the cell if necessary.
    ///
    /// A register cell is replaced by a coil that is `true` iff the stored
    /// word is nonzero. This silent coercion matches the on-wire semantics
    /// of write requests; use [`as_coil`](Self::as_coil) to observe the
    /// stored variant instead.
    pub fn coil_mut(&mut self) -> &mut Coil {
        if let Self::Register(word) = *self {
            *self = Self::Coil(word != 0);
        }
        match self {
            Self::Coil(coil) => coil,
            Self::Register(_) => unreachable!(),
        }
    }

    /// Returns the register value, converting the cell if necessary.
    ///
    /// A coil cell is replaced by a register holding `1` or `0`. See
    /// [`coil_mut`](Self::coil_mut).
    pub fn register_mut(&mut self) -> &mut Word {
        if let Self::Coil(coil) = *self {
            *self = Self::Register(Word::from(coil));
        }
        match self {
            Self::Register(word) => word,
            Self::Coil(_) => unreachable!(),
        }
    }

    /// Returns the stored coil value.
    ///
    /// Fails with [`ErrorCode::WrongCellVariant`] if the cell holds a register.
    pub const fn as_coil(&self) -> Result<Coil> {
        match self {
            Self::Coil(coil) => Ok(*coil),
            Self::Register(_) => Err(Error::new(ErrorCode::WrongCellVariant)),
        }
    }

    /// Returns the stored register value.
    ///
    /// Fails with [`ErrorCode::WrongCellVariant`] if the cell holds a coil.
    pub const fn as_register(&self) -> Result<Word> {
        match self {
            Self::Register(word) => Ok(*word),
            Self::Coil(_) => Err(Error::new(ErrorCode::WrongCellVariant)),
        }
    }

    /// Converts the cell value to a coil: a register is `true` iff nonzero.
    #[must_use]
    pub const fn to_coil(self) -> Coil {
        match self {
            Self::Coil(coil) => coil,
            Self::Register(word) => word != 0,
        }
    }

    /// Converts the cell value to a register: a coil becomes `1` or `0`.
    #[must_use]
    pub const fn to_register(self) -> Word {
        match self {
            Self::Coil(coil) => coil as Word,
            Self::Register(word) => word,
        }
    }

    pub(crate) fn coerce(&mut self, class: RegisterClass) {
        if class.is_bit() {
            self.coil_mut();
        } else {
            self.register_mut();
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::Register(0)
    }
}

impl From<Coil> for Cell {
    fn from(coil: Coil) -> Self {
        Self::Coil(coil)
    }
}

impl From<Word> for Cell {
    fn from(word: Word) -> Self {
        Self::Register(word)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coil(coil) => f.write_str(if *coil { "true" } else { "false" }),
            Self::Register(word) => write!(f, "{word}"),
        }
    }
}

/// A request represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    slave_id: SlaveId,
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
    values: Vec<Cell>,
}

/// The data of a successful request.
///
/// For bit reads the decoded value container covers all bits of the received
/// payload bytes, i.e. its length is a multiple of 8 and may exceed the
/// requested quantity; [`apply_request`](Self::apply_request) truncates it
/// back to the quantity of the originating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    slave_id: SlaveId,
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
    values: Vec<Cell>,
}

fn normalize_cells(function: FunctionCode, values: &mut [Cell]) {
    if let Some(class) = function.register_class() {
        for cell in values {
            cell.coerce(class);
        }
    }
}

fn fmt_pdu(
    f: &mut fmt::Formatter<'_>,
    function: FunctionCode,
    slave_id: SlaveId,
    address: Address,
    quantity: Quantity,
    values: &[Cell],
) -> fmt::Result {
    write!(f, "{function}, from slave {slave_id}")?;
    if function.kind() == Some(FunctionKind::WriteSingle) {
        write!(f, ", starting from address {address}")?;
        if let Some(value) = values.first() {
            write!(f, "\nvalue = {value}")?;
        }
        return Ok(());
    }
    write!(f, ", starting from address {address}, on {quantity} registers")?;
    if function.kind() == Some(FunctionKind::WriteMultiple) {
        f.write_str("\n values = { ")?;
        for (idx, value) in values.iter().enumerate() {
            write!(f, "{value} , ")?;
            if idx >= 3 {
                f.write_str("... ")?;
                break;
            }
        }
        f.write_str("}")?;
    }
    Ok(())
}

macro_rules! impl_pdu_accessors {
    ($pdu:ty) => {
        impl $pdu {
            /// The addressed slave device.
            #[must_use]
            pub const fn slave_id(&self) -> SlaveId {
                self.slave_id
            }

            /// The function code.
            #[must_use]
            pub const fn function(&self) -> FunctionCode {
                self.function
            }

            /// The starting protocol address.
            #[must_use]
            pub const fn address(&self) -> Address {
                self.address
            }

            /// The number of addressed coils or registers.
            #[must_use]
            pub const fn quantity(&self) -> Quantity {
                self.quantity
            }

            /// The cell values.
            #[must_use]
            pub fn values(&self) -> &[Cell] {
                &self.values
            }

            /// Changes the addressed slave device.
            pub fn set_slave_id(&mut self, slave_id: SlaveId) {
                self.slave_id = slave_id;
            }

            /// Changes the function code and re-normalizes the cell variants
            /// to its register class.
            pub fn set_function(&mut self, function: FunctionCode) {
                self.function = function;
                normalize_cells(self.function, &mut self.values);
            }

            /// Changes the starting protocol address.
            pub fn set_address(&mut self, address: Address) {
                self.address = address;
            }

            /// Changes the quantity of addressed coils or registers.
            pub fn set_quantity(&mut self, quantity: Quantity) {
                self.quantity = quantity;
            }

            /// Replaces the cell values, normalizing their variants to the
            /// register class of the function code.
            pub fn set_values(&mut self, values: Vec<Cell>) {
                self.values = values;
                normalize_cells(self.function, &mut self.values);
            }
        }

        impl fmt::Display for $pdu {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt_pdu(
                    f,
                    self.function,
                    self.slave_id,
                    self.address,
                    self.quantity,
                    &self.values,
                )
            }
        }
    };
}

impl_pdu_accessors!(Request);
impl_pdu_accessors!(Response);

impl Request {
    /// Creates a request.
    ///
    /// The cell variants of `values` are normalized to the register class of
    /// `function`. For read requests `values` stays empty.
    #[must_use]
    pub fn new(
        slave_id: SlaveId,
        function: FunctionCode,
        address: Address,
        quantity: Quantity,
        values: Vec<Cell>,
    ) -> Self {
        let mut values = values;
        normalize_cells(function, &mut values);
        Self {
            slave_id,
            function,
            address,
            quantity,
            values,
        }
    }
}

impl Response {
    /// Creates a response.
    ///
    /// The cell variants of `values` are normalized to the register class of
    /// `function`.
    #[must_use]
    pub fn new(
        slave_id: SlaveId,
        function: FunctionCode,
        address: Address,
        quantity: Quantity,
        values: Vec<Cell>,
    ) -> Self {
        let mut values = values;
        normalize_cells(function, &mut values);
        Self {
            slave_id,
            function,
            address,
            quantity,
            values,
        }
    }

    /// Reconciles this response with the request that elicited it.
    ///
    /// For reads, adopts the request's starting address and truncates the
    /// value container to the requested quantity (bit reads decode whole
    /// payload bytes and may carry excess bits). For multi-writes, adopts
    /// the request's values.
    pub fn apply_request(&mut self, request: &Request) {
        match self.function.kind() {
            Some(FunctionKind::Read) => {
                self.address = request.address();
                if self.quantity > request.quantity() {
                    self.quantity = request.quantity();
                    self.values.truncate(usize::from(self.quantity));
                }
            }
            Some(FunctionKind::WriteMultiple) => {
                self.values = request.values().to_vec();
                self.values
                    .resize(usize::from(self.quantity), Cell::default());
                normalize_cells(self.function, &mut self.values);
            }
            _ => (),
        }
    }
}

impl From<&Request> for Response {
    /// Builds the response skeleton for a request: same slave, function,
    /// address and quantity; the values are echoed for writes and stay
    /// empty for reads (to be filled by the server).
    fn from(request: &Request) -> Self {
        Self::new(
            request.slave_id(),
            request.function(),
            request.address(),
            request.quantity(),
            request.values().to_vec(),
        )
    }
}

/// A Modbus exception frame.
///
/// Carries a standard error code received from (or destined for) the wire.
/// An exception built from a locally detected failure may not have a slave
/// id yet; [`slave_id_known`](Self::slave_id_known) tells the two cases
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionFrame {
    slave_id: SlaveId,
    function: FunctionCode,
    error: ErrorCode,
    slave_id_known: bool,
}

impl ExceptionFrame {
    /// Creates an exception frame addressed to a known slave device.
    #[must_use]
    pub const fn new(error: ErrorCode, slave_id: SlaveId, function: FunctionCode) -> Self {
        Self {
            slave_id,
            function,
            error,
            slave_id_known: true,
        }
    }

    /// Creates an exception frame before a slave id has been assigned.
    #[must_use]
    pub const fn unaddressed(error: ErrorCode) -> Self {
        Self {
            slave_id: 0xFF,
            function: FunctionCode::Undefined,
            error,
            slave_id_known: false,
        }
    }

    /// Checks if `data` starts like an exception PDU (high bit of the
    /// function byte set).
    ///
    /// This only inspects the flag bit; a malformed byte layout is reported
    /// by the decoder.
    #[must_use]
    pub fn exist(data: &[u8]) -> bool {
        data.get(1).is_some_and(|function| function & 0x80 != 0)
    }

    /// The slave id; only meaningful if [`slave_id_known`](Self::slave_id_known).
    #[must_use]
    pub const fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    /// Checks if a slave id has been assigned.
    #[must_use]
    pub const fn slave_id_known(&self) -> bool {
        self.slave_id_known
    }

    /// The function code the exception refers to.
    #[must_use]
    pub const fn function(&self) -> FunctionCode {
        self.function
    }

    /// The error code.
    #[must_use]
    pub const fn error(&self) -> ErrorCode {
        self.error
    }

    /// Assigns the slave id.
    pub fn set_slave_id(&mut self, slave_id: SlaveId) {
        self.slave_id = slave_id;
        self.slave_id_known = true;
    }

    /// Assigns the function code.
    pub fn set_function(&mut self, function: FunctionCode) {
        self.function = function;
    }
}

impl From<ExceptionFrame> for Error {
    fn from(frame: ExceptionFrame) -> Self {
        let err = Error::new(frame.error).with_function(frame.function);
        if frame.slave_id_known {
            err.with_slave(frame.slave_id)
        } else {
            err
        }
    }
}

impl fmt::Display for ExceptionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Error::from(*self).fmt(f)
    }
}
