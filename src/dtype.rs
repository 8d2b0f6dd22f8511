use std::io::{Read, Seek};
use bevy_reflect::{Reflect, Struct};
use byteorder::{ReadBytesExt, LittleEndian};
use serde::Serialize;
use thiserror::Error;

use crate::sfbk::SfString;

macro_rules! read_n_bytes {
    ($file:ident, $n:literal) => {{
        let mut buf: [u8; $n] = [0; $n];
        $file.read_exact(&mut buf).map(|_| buf)
    }};
}

/// Everything that can go wrong while loading a bank. Fatal variants abort the
/// parse; recoverable conditions are printed as warnings instead and never
/// show up here.
#[derive(Debug, Error)]
pub enum SfbkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Not a RIFF file!")]
    NotRiff,
    #[error("Not a SoundFont file!")]
    NotSfbk,
    #[error("SoundFont file size mismatch! (header says {0}, file is {1})")]
    FileSizeMismatch(u32, u64),
    #[error("Invalid chunk id in level 0 parse!")]
    InvalidListChunk,
    #[error("Invalid ID found when expecting {0} chunk!")]
    UnexpectedListChunk(&'static str),
    #[error("SoundFont version is {0}.{1} which is not supported, convert to version 2.0x!")]
    VersionTooOld(u16, u16),
    #[error("SoundFont version is {0}.{1} but this build has no SoundFont 3 support!")]
    Sf3Unsupported(u16, u16),
    #[error("SoundFont version is {0}.{1} which is newer than what this loader was designed for (v2.0x)!")]
    VersionTooNew(u16, u16),
    #[error("SoundFont version info chunk has invalid size!")]
    BadVersionChunkSize,
    #[error("ROM version info chunk has invalid size!")]
    BadRomVersionChunkSize,
    #[error("INFO sub chunk {0} has invalid chunk size of {1} bytes!")]
    BadInfoStringSize(String, u32),
    #[error("Invalid chunk id in INFO chunk!")]
    UnknownInfoChunk,
    #[error("INFO chunk size mismatch!")]
    InfoSizeMismatch,
    #[error("Expected smpl chunk, found invalid id instead!")]
    MissingSampleChunk,
    #[error("sdta chunk size mismatch!")]
    SdtaSizeMismatch,
    #[error("Expected pdta sub-chunk \"{0}\", found invalid id instead!")]
    UnexpectedHydraChunk(&'static str),
    #[error("\"{0}\" chunk size is not a multiple of {1} bytes!")]
    HydraSizeNotMultiple(&'static str, u32),
    #[error("\"{0}\" chunk needs to have at least {1} record(s)!")]
    HydraTooFewRecords(&'static str, u32),
    #[error("\"{0}\" chunk size exceeds remaining pdta chunk size!")]
    HydraSizeExceeded(&'static str),
    #[error("{0} indices not monotonic!")]
    IndicesNotMonotonic(&'static str),
    #[error("Preset zone of \"{0}\" refers to nonexistent instrument {1}!")]
    InvalidInstrumentRef(String, u16),
    #[error("Instrument zone of \"{0}\" refers to nonexistent sample {1}!")]
    InvalidSampleRef(String, u16),
    #[error("Voice allocation failed!")]
    VoiceAllocFailed,
    #[error("Name string \"{0}\" contains non-ASCII characters!")]
    StringConversionNonAscii(String),
    #[error("Name string \"{0}\" is too long! ({1} bytes)")]
    StringConversionLength(String, usize),
    #[error("Invalid input: {0}")]
    Invalid(String),
}

pub trait AutoReadFrom: Reflect + Struct + Default {  }
pub trait ReadFrom {
    fn read_from_file<R: Read + Seek>(&mut self, reader: &mut R) -> Result<(), SfbkError>;
}
impl<T: Reflect + Struct + Default + AutoReadFrom> ReadFrom for T {
    fn read_from_file<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        for field_i in 0..self.field_len() {
            let field = self.field_at_mut(field_i).ok_or(SfbkError::Invalid("Failed to get field!".to_string()))?;
            let type_info = field.get_represented_type_info().ok_or(SfbkError::Invalid("Failed to get type info of field!".to_string()))?;
            match type_info {
                bevy_reflect::TypeInfo::Array(array_info) => {
                    let capacity = array_info.capacity();
                    if array_info.item_type_name() == "u8" {
                        if capacity == 2 {
                            *field.as_any_mut().downcast_mut::<[u8; 2]>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = read_n_bytes!(file, 2)?;
                        } else if capacity == 4 {
                            *field.as_any_mut().downcast_mut::<[u8; 4]>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = read_n_bytes!(file, 4)?;
                        } else if capacity == 8 {
                            *field.as_any_mut().downcast_mut::<[u8; 8]>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = read_n_bytes!(file, 8)?;
                        } else if capacity == 16 {
                            *field.as_any_mut().downcast_mut::<[u8; 16]>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = read_n_bytes!(file, 16)?;
                        } else if capacity == 20 {
                            *field.as_any_mut().downcast_mut::<[u8; 20]>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = read_n_bytes!(file, 20)?;
                        } else {
                            panic!("Unsupported auto type!");
                        }
                    } else {
                        panic!("Unsupported auto type!");
                    }
                },
                bevy_reflect::TypeInfo::Value(value_info) => {
                    if value_info.type_name() == "bool" {
                        *field.as_any_mut().downcast_mut::<bool>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = file.read_u8()? != 0;
                    } else if value_info.type_name() == "u8" {
                        *field.as_any_mut().downcast_mut::<u8>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = file.read_u8()?;
                    } else if value_info.type_name() == "u16" {
                        *field.as_any_mut().downcast_mut::<u16>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = file.read_u16::<LittleEndian>()?;
                    } else if value_info.type_name() == "u32" {
                        *field.as_any_mut().downcast_mut::<u32>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = file.read_u32::<LittleEndian>()?;
                    } else if value_info.type_name() == "i8" {
                        *field.as_any_mut().downcast_mut::<i8>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = file.read_i8()?;
                    } else if value_info.type_name() == "i16" {
                        *field.as_any_mut().downcast_mut::<i16>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = file.read_i16::<LittleEndian>()?;
                    } else if value_info.type_name() == "i32" {
                        *field.as_any_mut().downcast_mut::<i32>().ok_or(SfbkError::Invalid("Error in bevy_reflect!".to_string()))? = file.read_i32::<LittleEndian>()?;
                    } else {
                        panic!("Unsupported auto type!");
                    }
                },
                bevy_reflect::TypeInfo::Struct(_) => {
                    if let Some(name) = field.as_any_mut().downcast_mut::<SfString>() {
                        name.read_from_file(file)?;
                    } else {
                        panic!("Unsupported auto type!");
                    }
                },
                _ => panic!("Unsupported auto type!")
            }
        }
        Ok(())
    }
}

/// A run of fixed-layout records read back to back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Table<T: ReadFrom + Default + Serialize> {
    /// ONLY USE AS THE NUMBER OF OBJECTS TO READ!!! USE objects.len() INSTEAD OUTSIDE OF read_from_file!!!
    #[serde(skip_serializing)]
    _read_n: usize,
    #[serde(rename = "o")]
    pub objects: Vec<T>
}
impl<T: ReadFrom + Default + Serialize> Table<T> {
    pub fn table_is_empty(table: &Table<T>) -> bool {
        table.len() == 0
    }
    pub fn new(n: usize) -> Table<T> {
        Table { _read_n: n, objects: Vec::with_capacity(n) }
    }
    pub fn set_read_params(&mut self, n: usize) {
        self._read_n = n;
    }
    pub fn len(&self) -> usize {
        self.objects.len()
    }
}
impl<T: ReadFrom + Default + Serialize> ReadFrom for Table<T> {
    fn read_from_file<R: Read + Seek>(&mut self, reader: &mut R) -> Result<(), SfbkError> {
        for _ in 0..self._read_n {
            let mut object = T::default();
            object.read_from_file(reader)?;
            self.objects.push(object);
        }
        Ok(())
    }
}
