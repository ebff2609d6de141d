//=====================================================
// File: bytecode/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript bytecode instruction set and wire format
// Objective: Define instructions, datatype tags and runtime values along
//            with their big-endian, terminator-delimited byte encoding
//=====================================================

use std::fmt;
use std::io::{Cursor, Read, Write};

use thiserror::Error;

use crate::types::{Datatype, Primitive};

pub const MAGIC: &[u8; 3] = b"MIB";
pub const VERSION: u16 = 1;
/// Closes every encoded instruction.
pub const TERMINATOR: u8 = 0xFF;

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("invalid bytecode magic")]
    InvalidMagic,
    #[error("unsupported bytecode version {0}")]
    UnsupportedVersion(u16),
    #[error("program does not start with a magic header")]
    MissingHeader,
    #[error("unexpected end of bytecode at byte {0}")]
    UnexpectedEof(u64),
    #[error("unknown opcode 0x{opcode:02X} at byte {offset}")]
    UnknownOpcode { opcode: u8, offset: u64 },
    #[error("missing terminator after {name} at byte {offset}")]
    MissingTerminator { name: &'static str, offset: u64 },
    #[error("unknown datatype tag {0}")]
    UnknownDatatype(u8),
    #[error("unknown storage class {0}")]
    UnknownStorage(u8),
    #[error("invalid character code point {0:#x}")]
    InvalidChar(u32),
    #[error("invalid utf-8 in string operand")]
    InvalidUtf8,
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BytecodeError {
    fn from(err: std::io::Error) -> Self {
        BytecodeError::Io(err.to_string())
    }
}

//=====================================================
// Section 1.0 - Datatype Tags & Storage
//=====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteDatatype {
    Bool,
    Char,
    Int,
    Long,
    Float,
    Double,
    String,
    Enum,
}

impl ByteDatatype {
    pub fn tag(self) -> u8 {
        match self {
            ByteDatatype::Bool => 1,
            ByteDatatype::Char => 2,
            ByteDatatype::Int => 3,
            ByteDatatype::Long => 4,
            ByteDatatype::Float => 5,
            ByteDatatype::Double => 6,
            ByteDatatype::String => 7,
            ByteDatatype::Enum => 8,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, BytecodeError> {
        let datatype = match tag {
            1 => ByteDatatype::Bool,
            2 => ByteDatatype::Char,
            3 => ByteDatatype::Int,
            4 => ByteDatatype::Long,
            5 => ByteDatatype::Float,
            6 => ByteDatatype::Double,
            7 => ByteDatatype::String,
            8 => ByteDatatype::Enum,
            other => return Err(BytecodeError::UnknownDatatype(other)),
        };
        Ok(datatype)
    }

    /// Tag for a storable script type; `None` for void, null and structs.
    pub fn from_datatype(datatype: &Datatype) -> Option<Self> {
        let tag = match datatype {
            Datatype::Primitive(Primitive::Bool) => ByteDatatype::Bool,
            Datatype::Primitive(Primitive::Char) => ByteDatatype::Char,
            Datatype::Primitive(Primitive::Int) => ByteDatatype::Int,
            Datatype::Primitive(Primitive::Long) => ByteDatatype::Long,
            Datatype::Primitive(Primitive::Float) => ByteDatatype::Float,
            Datatype::Primitive(Primitive::Double) => ByteDatatype::Double,
            Datatype::Primitive(Primitive::String) => ByteDatatype::String,
            Datatype::Enum(_) => ByteDatatype::Enum,
            _ => return None,
        };
        Some(tag)
    }

    /// Tag for a type name as written in signatures. Qualified names that
    /// are not primitives are enums.
    pub fn from_name(name: &str) -> Option<Self> {
        match Primitive::from_name(name) {
            Some(primitive) => Self::from_datatype(&Datatype::Primitive(primitive)),
            None if !name.is_empty() => Some(ByteDatatype::Enum),
            None => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ByteDatatype::Bool => "bool",
            ByteDatatype::Char => "char",
            ByteDatatype::Int => "int",
            ByteDatatype::Long => "long",
            ByteDatatype::Float => "float",
            ByteDatatype::Double => "double",
            ByteDatatype::String => "string",
            ByteDatatype::Enum => "enum",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ByteDatatype::Int | ByteDatatype::Long | ByteDatatype::Float | ByteDatatype::Double
        )
    }
}

impl fmt::Display for ByteDatatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Global,
    Local,
}

impl Storage {
    fn tag(self) -> u8 {
        match self {
            Storage::Global => 0,
            Storage::Local => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, BytecodeError> {
        match tag {
            0 => Ok(Storage::Global),
            1 => Ok(Storage::Local),
            other => Err(BytecodeError::UnknownStorage(other)),
        }
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Global => f.write_str("global"),
            Storage::Local => f.write_str("local"),
        }
    }
}

//=====================================================
// Section 2.0 - Runtime Values
//=====================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ByteCodeValue {
    Bool(bool),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Enum(u32),
}

impl ByteCodeValue {
    pub fn datatype(&self) -> ByteDatatype {
        match self {
            ByteCodeValue::Bool(_) => ByteDatatype::Bool,
            ByteCodeValue::Char(_) => ByteDatatype::Char,
            ByteCodeValue::Int(_) => ByteDatatype::Int,
            ByteCodeValue::Long(_) => ByteDatatype::Long,
            ByteCodeValue::Float(_) => ByteDatatype::Float,
            ByteCodeValue::Double(_) => ByteDatatype::Double,
            ByteCodeValue::String(_) => ByteDatatype::String,
            ByteCodeValue::Enum(_) => ByteDatatype::Enum,
        }
    }

    /// Zero of a type, used to lower unary minus as `0 - x`.
    pub fn zero(datatype: ByteDatatype) -> Option<Self> {
        let value = match datatype {
            ByteDatatype::Int => ByteCodeValue::Int(0),
            ByteDatatype::Long => ByteCodeValue::Long(0),
            ByteDatatype::Float => ByteCodeValue::Float(0.0),
            ByteDatatype::Double => ByteCodeValue::Double(0.0),
            _ => return None,
        };
        Some(value)
    }

    pub fn encode_payload<W: Write>(&self, writer: &mut W) -> Result<(), BytecodeError> {
        match self {
            ByteCodeValue::Bool(value) => writer.write_all(&[u8::from(*value)])?,
            ByteCodeValue::Char(value) => writer.write_all(&u32::from(*value).to_be_bytes())?,
            ByteCodeValue::Int(value) => writer.write_all(&value.to_be_bytes())?,
            ByteCodeValue::Long(value) => writer.write_all(&value.to_be_bytes())?,
            ByteCodeValue::Float(value) => writer.write_all(&value.to_bits().to_be_bytes())?,
            ByteCodeValue::Double(value) => writer.write_all(&value.to_bits().to_be_bytes())?,
            ByteCodeValue::String(value) => write_string(writer, value)?,
            ByteCodeValue::Enum(value) => writer.write_all(&value.to_be_bytes())?,
        }
        Ok(())
    }

    pub fn decode_payload(
        datatype: ByteDatatype,
        reader: &mut Cursor<&[u8]>,
    ) -> Result<Self, BytecodeError> {
        let value = match datatype {
            ByteDatatype::Bool => ByteCodeValue::Bool(read_u8(reader)? != 0),
            ByteDatatype::Char => {
                let code = read_u32(reader)?;
                ByteCodeValue::Char(char::from_u32(code).ok_or(BytecodeError::InvalidChar(code))?)
            }
            ByteDatatype::Int => ByteCodeValue::Int(i32::from_be_bytes(read_array(reader)?)),
            ByteDatatype::Long => ByteCodeValue::Long(i64::from_be_bytes(read_array(reader)?)),
            ByteDatatype::Float => {
                ByteCodeValue::Float(f32::from_bits(u32::from_be_bytes(read_array(reader)?)))
            }
            ByteDatatype::Double => {
                ByteCodeValue::Double(f64::from_bits(u64::from_be_bytes(read_array(reader)?)))
            }
            ByteDatatype::String => ByteCodeValue::String(read_string(reader)?),
            ByteDatatype::Enum => ByteCodeValue::Enum(read_u32(reader)?),
        };
        Ok(value)
    }
}

impl fmt::Display for ByteCodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteCodeValue::Bool(value) => write!(f, "{value}"),
            ByteCodeValue::Char(value) => write!(f, "{value}"),
            ByteCodeValue::Int(value) => write!(f, "{value}"),
            ByteCodeValue::Long(value) => write!(f, "{value}"),
            ByteCodeValue::Float(value) => write!(f, "{value}"),
            ByteCodeValue::Double(value) => write!(f, "{value}"),
            ByteCodeValue::String(value) => f.write_str(value),
            ByteCodeValue::Enum(value) => write!(f, "{value}"),
        }
    }
}

//=====================================================
// Section 3.0 - Instructions
//=====================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ByteCode {
    MagicHeader { version: u16 },
    LineNumber(u32),
    Push(ByteCodeValue),
    Pop,
    DeclareVariable {
        storage: Storage,
        address: u32,
        datatype: ByteDatatype,
    },
    DefineVariable { storage: Storage, address: u32 },
    LoadVariable { storage: Storage, address: u32 },
    StoreVariable { storage: Storage, address: u32 },
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
    Not,
    Equal,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Cast(ByteDatatype),
    Jump(u32),
    JumpIfFalse(u32),
    Call(u32),
    Return { has_value: bool },
    FunctionDefinitionBegin { signature: String },
    NativeFunctionDefinitionBegin { signature: String, linkage: String },
    FunctionDefinitionEnd,
    EnumDefinition { name: String, members: Vec<String> },
    StructDefinition { name: String, fields: Vec<(String, String)> },
}

/// Operand-free opcodes in the 0x10 block, in opcode order.
const SIMPLE_OPERATIONS: [(u8, ByteCode); 18] = [
    (0x10, ByteCode::Add),
    (0x11, ByteCode::Subtract),
    (0x12, ByteCode::Multiply),
    (0x13, ByteCode::Divide),
    (0x14, ByteCode::Modulo),
    (0x15, ByteCode::ShiftLeft),
    (0x16, ByteCode::ShiftRight),
    (0x17, ByteCode::BitAnd),
    (0x18, ByteCode::BitXor),
    (0x19, ByteCode::BitOr),
    (0x1A, ByteCode::LogicalAnd),
    (0x1B, ByteCode::LogicalOr),
    (0x1C, ByteCode::Not),
    (0x1D, ByteCode::Equal),
    (0x1E, ByteCode::Less),
    (0x1F, ByteCode::Greater),
    (0x20, ByteCode::LessEqual),
    (0x21, ByteCode::GreaterEqual),
];

impl ByteCode {
    pub fn opcode(&self) -> u8 {
        match self {
            ByteCode::MagicHeader { .. } => 0x00,
            ByteCode::LineNumber(_) => 0x01,
            ByteCode::Push(_) => 0x02,
            ByteCode::Pop => 0x03,
            ByteCode::DeclareVariable { .. } => 0x04,
            ByteCode::DefineVariable { .. } => 0x05,
            ByteCode::LoadVariable { .. } => 0x06,
            ByteCode::StoreVariable { .. } => 0x07,
            ByteCode::Cast(_) => 0x22,
            ByteCode::Jump(_) => 0x30,
            ByteCode::JumpIfFalse(_) => 0x31,
            ByteCode::Call(_) => 0x32,
            ByteCode::Return { .. } => 0x33,
            ByteCode::FunctionDefinitionBegin { .. } => 0x40,
            ByteCode::NativeFunctionDefinitionBegin { .. } => 0x41,
            ByteCode::FunctionDefinitionEnd => 0x42,
            ByteCode::EnumDefinition { .. } => 0x43,
            ByteCode::StructDefinition { .. } => 0x44,
            simple => SIMPLE_OPERATIONS
                .iter()
                .find(|(_, op)| op == simple)
                .map(|(code, _)| *code)
                .unwrap_or(0xFE),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ByteCode::MagicHeader { .. } => "MAGIC_HEADER",
            ByteCode::LineNumber(_) => "LINE_NUMBER",
            ByteCode::Push(_) => "PUSH",
            ByteCode::Pop => "POP",
            ByteCode::DeclareVariable { .. } => "DECLARE_VARIABLE",
            ByteCode::DefineVariable { .. } => "DEFINE_VARIABLE",
            ByteCode::LoadVariable { .. } => "LOAD_VARIABLE",
            ByteCode::StoreVariable { .. } => "STORE_VARIABLE",
            ByteCode::Add => "ADD",
            ByteCode::Subtract => "SUBTRACT",
            ByteCode::Multiply => "MULTIPLY",
            ByteCode::Divide => "DIVIDE",
            ByteCode::Modulo => "MODULO",
            ByteCode::ShiftLeft => "SHIFT_LEFT",
            ByteCode::ShiftRight => "SHIFT_RIGHT",
            ByteCode::BitAnd => "BIT_AND",
            ByteCode::BitXor => "BIT_XOR",
            ByteCode::BitOr => "BIT_OR",
            ByteCode::LogicalAnd => "LOGICAL_AND",
            ByteCode::LogicalOr => "LOGICAL_OR",
            ByteCode::Not => "NOT",
            ByteCode::Equal => "EQUAL",
            ByteCode::Less => "LESS",
            ByteCode::Greater => "GREATER",
            ByteCode::LessEqual => "LESS_EQUAL",
            ByteCode::GreaterEqual => "GREATER_EQUAL",
            ByteCode::Cast(_) => "CAST",
            ByteCode::Jump(_) => "JUMP",
            ByteCode::JumpIfFalse(_) => "JUMP_IF_FALSE",
            ByteCode::Call(_) => "CALL",
            ByteCode::Return { .. } => "RETURN",
            ByteCode::FunctionDefinitionBegin { .. } => "FUNCTION_DEFINITION_BEGIN",
            ByteCode::NativeFunctionDefinitionBegin { .. } => "NATIVE_FUNCTION_DEFINITION_BEGIN",
            ByteCode::FunctionDefinitionEnd => "FUNCTION_DEFINITION_END",
            ByteCode::EnumDefinition { .. } => "ENUM_DEFINITION",
            ByteCode::StructDefinition { .. } => "STRUCT_DEFINITION",
        }
    }

    //Function: encode
    //Purpose: Write opcode, operands and the terminator byte
    //Inputs: writer: any io::Write sink
    //Returns: Result<(), BytecodeError>
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), BytecodeError> {
        writer.write_all(&[self.opcode()])?;
        match self {
            ByteCode::MagicHeader { version } => {
                writer.write_all(MAGIC)?;
                writer.write_all(&version.to_be_bytes())?;
            }
            ByteCode::LineNumber(line) => writer.write_all(&line.to_be_bytes())?,
            ByteCode::Push(value) => {
                writer.write_all(&[value.datatype().tag()])?;
                value.encode_payload(writer)?;
            }
            ByteCode::DeclareVariable {
                storage,
                address,
                datatype,
            } => {
                writer.write_all(&[storage.tag()])?;
                writer.write_all(&address.to_be_bytes())?;
                writer.write_all(&[datatype.tag()])?;
            }
            ByteCode::DefineVariable { storage, address }
            | ByteCode::LoadVariable { storage, address }
            | ByteCode::StoreVariable { storage, address } => {
                writer.write_all(&[storage.tag()])?;
                writer.write_all(&address.to_be_bytes())?;
            }
            ByteCode::Cast(datatype) => writer.write_all(&[datatype.tag()])?,
            ByteCode::Jump(target) | ByteCode::JumpIfFalse(target) | ByteCode::Call(target) => {
                writer.write_all(&target.to_be_bytes())?
            }
            ByteCode::Return { has_value } => writer.write_all(&[u8::from(*has_value)])?,
            ByteCode::FunctionDefinitionBegin { signature } => write_string(writer, signature)?,
            ByteCode::NativeFunctionDefinitionBegin { signature, linkage } => {
                write_string(writer, signature)?;
                write_string(writer, linkage)?;
            }
            ByteCode::EnumDefinition { name, members } => {
                write_string(writer, name)?;
                writer.write_all(&(members.len() as u32).to_be_bytes())?;
                for member in members {
                    write_string(writer, member)?;
                }
            }
            ByteCode::StructDefinition { name, fields } => {
                write_string(writer, name)?;
                writer.write_all(&(fields.len() as u32).to_be_bytes())?;
                for (field, datatype) in fields {
                    write_string(writer, field)?;
                    write_string(writer, datatype)?;
                }
            }
            _ => {}
        }
        writer.write_all(&[TERMINATOR])?;
        Ok(())
    }

    //Function: decode
    //Purpose: Read one instruction, validating its terminator byte
    //Inputs: reader: cursor positioned at an opcode
    //Returns: Result<ByteCode, BytecodeError>
    pub fn decode(reader: &mut Cursor<&[u8]>) -> Result<Self, BytecodeError> {
        let offset = reader.position();
        let opcode = read_u8(reader)?;
        let instruction = match opcode {
            0x00 => {
                let magic: [u8; 3] = read_array(reader)?;
                if &magic != MAGIC {
                    return Err(BytecodeError::InvalidMagic);
                }
                ByteCode::MagicHeader {
                    version: u16::from_be_bytes(read_array(reader)?),
                }
            }
            0x01 => ByteCode::LineNumber(read_u32(reader)?),
            0x02 => {
                let datatype = ByteDatatype::from_tag(read_u8(reader)?)?;
                ByteCode::Push(ByteCodeValue::decode_payload(datatype, reader)?)
            }
            0x03 => ByteCode::Pop,
            0x04 => ByteCode::DeclareVariable {
                storage: Storage::from_tag(read_u8(reader)?)?,
                address: read_u32(reader)?,
                datatype: ByteDatatype::from_tag(read_u8(reader)?)?,
            },
            0x05 => {
                let (storage, address) = read_slot(reader)?;
                ByteCode::DefineVariable { storage, address }
            }
            0x06 => {
                let (storage, address) = read_slot(reader)?;
                ByteCode::LoadVariable { storage, address }
            }
            0x07 => {
                let (storage, address) = read_slot(reader)?;
                ByteCode::StoreVariable { storage, address }
            }
            0x22 => ByteCode::Cast(ByteDatatype::from_tag(read_u8(reader)?)?),
            0x30 => ByteCode::Jump(read_u32(reader)?),
            0x31 => ByteCode::JumpIfFalse(read_u32(reader)?),
            0x32 => ByteCode::Call(read_u32(reader)?),
            0x33 => ByteCode::Return {
                has_value: read_u8(reader)? != 0,
            },
            0x40 => ByteCode::FunctionDefinitionBegin {
                signature: read_string(reader)?,
            },
            0x41 => ByteCode::NativeFunctionDefinitionBegin {
                signature: read_string(reader)?,
                linkage: read_string(reader)?,
            },
            0x42 => ByteCode::FunctionDefinitionEnd,
            0x43 => {
                let name = read_string(reader)?;
                let count = read_u32(reader)?;
                let members = (0..count)
                    .map(|_| read_string(reader))
                    .collect::<Result<Vec<_>, _>>()?;
                ByteCode::EnumDefinition { name, members }
            }
            0x44 => {
                let name = read_string(reader)?;
                let count = read_u32(reader)?;
                let fields = (0..count)
                    .map(|_| Ok((read_string(reader)?, read_string(reader)?)))
                    .collect::<Result<Vec<_>, BytecodeError>>()?;
                ByteCode::StructDefinition { name, fields }
            }
            other => SIMPLE_OPERATIONS
                .iter()
                .find(|(code, _)| *code == other)
                .map(|(_, op)| op.clone())
                .ok_or(BytecodeError::UnknownOpcode {
                    opcode: other,
                    offset,
                })?,
        };
        let terminator_at = reader.position();
        if read_u8(reader)? != TERMINATOR {
            return Err(BytecodeError::MissingTerminator {
                name: instruction.name(),
                offset: terminator_at,
            });
        }
        Ok(instruction)
    }
}

impl fmt::Display for ByteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            ByteCode::MagicHeader { version } => write!(f, " MIB v{version}"),
            ByteCode::LineNumber(line) => write!(f, " {line}"),
            ByteCode::Push(ByteCodeValue::String(value)) => {
                write!(f, " string {:?}", value)
            }
            ByteCode::Push(value) => write!(f, " {} {value}", value.datatype()),
            ByteCode::DeclareVariable {
                storage,
                address,
                datatype,
            } => write!(f, " {storage} #{address} {datatype}"),
            ByteCode::DefineVariable { storage, address }
            | ByteCode::LoadVariable { storage, address }
            | ByteCode::StoreVariable { storage, address } => write!(f, " {storage} #{address}"),
            ByteCode::Cast(datatype) => write!(f, " {datatype}"),
            ByteCode::Jump(target) | ByteCode::JumpIfFalse(target) => write!(f, " @{target}"),
            ByteCode::Call(id) => write!(f, " fn#{id}"),
            ByteCode::Return { has_value } => write!(f, " {}", u8::from(*has_value)),
            ByteCode::FunctionDefinitionBegin { signature } => write!(f, " {signature}"),
            ByteCode::NativeFunctionDefinitionBegin { signature, linkage } => {
                write!(f, " {signature} -> {linkage}")
            }
            ByteCode::EnumDefinition { name, members } => {
                write!(f, " {name} {{{}}}", members.join(", "))
            }
            ByteCode::StructDefinition { name, fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(field, datatype)| format!("{datatype} {field}"))
                    .collect();
                write!(f, " {name} {{{}}}", fields.join("; "))
            }
            _ => Ok(()),
        }
    }
}

//=====================================================
// Section 4.0 - Programs
//=====================================================

pub fn encode_program(instructions: &[ByteCode]) -> Result<Vec<u8>, BytecodeError> {
    let mut bytes = Vec::new();
    for instruction in instructions {
        instruction.encode(&mut bytes)?;
    }
    Ok(bytes)
}

/// Decode a whole program, requiring a leading supported magic header.
pub fn decode_program(bytes: &[u8]) -> Result<Vec<ByteCode>, BytecodeError> {
    let mut reader = Cursor::new(bytes);
    let mut instructions = Vec::new();
    while (reader.position() as usize) < bytes.len() {
        instructions.push(ByteCode::decode(&mut reader)?);
    }
    match instructions.first() {
        Some(ByteCode::MagicHeader { version }) if *version == VERSION => Ok(instructions),
        Some(ByteCode::MagicHeader { version }) => {
            Err(BytecodeError::UnsupportedVersion(*version))
        }
        _ => Err(BytecodeError::MissingHeader),
    }
}

//=====================================================
// Section 5.0 - Primitive Readers & Writers
//=====================================================

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), BytecodeError> {
    writer.write_all(&(value.len() as u32).to_be_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_array<const N: usize>(reader: &mut Cursor<&[u8]>) -> Result<[u8; N], BytecodeError> {
    let mut buf = [0u8; N];
    let offset = reader.position();
    reader
        .read_exact(&mut buf)
        .map_err(|_| BytecodeError::UnexpectedEof(offset))?;
    Ok(buf)
}

fn read_u8(reader: &mut Cursor<&[u8]>) -> Result<u8, BytecodeError> {
    let [byte] = read_array::<1>(reader)?;
    Ok(byte)
}

fn read_u32(reader: &mut Cursor<&[u8]>) -> Result<u32, BytecodeError> {
    Ok(u32::from_be_bytes(read_array(reader)?))
}

fn read_slot(reader: &mut Cursor<&[u8]>) -> Result<(Storage, u32), BytecodeError> {
    Ok((Storage::from_tag(read_u8(reader)?)?, read_u32(reader)?))
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Result<String, BytecodeError> {
    let length = read_u32(reader)? as usize;
    let offset = reader.position();
    let remaining = reader.get_ref().len().saturating_sub(offset as usize);
    if length > remaining {
        return Err(BytecodeError::UnexpectedEof(offset));
    }
    let mut buf = vec![0u8; length];
    reader
        .read_exact(&mut buf)
        .map_err(|_| BytecodeError::UnexpectedEof(offset))?;
    String::from_utf8(buf).map_err(|_| BytecodeError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_instruction_ends_with_terminator() {
        let program = vec![
            ByteCode::MagicHeader { version: VERSION },
            ByteCode::Push(ByteCodeValue::String("hi".into())),
            ByteCode::Add,
            ByteCode::Jump(7),
        ];
        let bytes = encode_program(&program).expect("encode");
        assert_eq!(bytes[0], 0x00);
        assert_eq!(&bytes[1..4], b"MIB");
        assert_eq!(bytes[6], TERMINATOR);
        assert_eq!(*bytes.last().expect("bytes"), TERMINATOR);
        assert_eq!(decode_program(&bytes).expect("decode"), program);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut bytes = encode_program(&[ByteCode::MagicHeader { version: VERSION }]).expect("encode");
        bytes.extend_from_slice(&[0x7A, TERMINATOR]);
        assert!(matches!(
            decode_program(&bytes),
            Err(BytecodeError::UnknownOpcode { opcode: 0x7A, .. })
        ));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let mut bytes = encode_program(&[ByteCode::MagicHeader { version: VERSION }]).expect("encode");
        bytes.extend_from_slice(&[0x03, 0x00]);
        assert!(matches!(
            decode_program(&bytes),
            Err(BytecodeError::MissingTerminator { name: "POP", .. })
        ));
    }

    #[test]
    fn numeric_payloads_are_big_endian() {
        let mut bytes = Vec::new();
        ByteCode::Push(ByteCodeValue::Int(258)).encode(&mut bytes).expect("encode");
        assert_eq!(bytes, vec![0x02, 3, 0, 0, 1, 2, TERMINATOR]);
    }
}

//=====================================================
// End of file
//=====================================================
