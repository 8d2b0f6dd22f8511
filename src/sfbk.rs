use std::fmt::Display;
use std::io::{Read, Seek, SeekFrom};
use bevy_reflect::Reflect;
use bitflags::bitflags;
use byteorder::{ReadBytesExt, LittleEndian};
use colored::Colorize;
use serde::Serialize;
use strum::FromRepr;

use crate::dtype::{*};

//// NOTE: Struct fields starting with an _ are read markers. They hold file
//// layout information (record spans, chunk positions) that only matters while
//// the bank is being read and is dropped from the XML serialization.

/// The fixed record sizes of the nine HYDRA sub-chunks.
const PHDR_SIZE: u32 = 38;
const BAG_SIZE: u32 = 4;
const MOD_SIZE: u32 = 10;
const GEN_SIZE: u32 = 4;
const IHDR_SIZE: u32 = 22;
const SHDR_SIZE: u32 = 46;

/// Number of generator slots on a runtime zone. Indices 0..GEN_LAST are the
/// SF2.01 table 8.1.2 generators; 59 itself is the end marker and never valid.
pub const GEN_LAST: usize = 59;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkId {
    Unkn,
    Riff,
    List,
    Sfbk,
    Info,
    Sdta,
    Pdta,
    Ifil,
    Isng,
    Inam,
    Irom,
    Iver,
    Icrd,
    Ieng,
    Iprd,
    Icop,
    Icmt,
    Isft,
    Snam,
    Smpl,
    Phdr,
    Pbag,
    Pmod,
    Pgen,
    Ihdr,
    Ibag,
    Imod,
    Igen,
    Shdr,
    Sm24
}
/// The 28 four-character codes a SoundFont bank may legally contain. Codes are
/// matched byte-for-byte; anything else maps to `ChunkId::Unkn`.
static CHUNK_IDS: phf::Map<&'static [u8], ChunkId> = phf::phf_map! {
    b"RIFF" => ChunkId::Riff,
    b"LIST" => ChunkId::List,
    b"sfbk" => ChunkId::Sfbk,
    b"INFO" => ChunkId::Info,
    b"sdta" => ChunkId::Sdta,
    b"pdta" => ChunkId::Pdta,
    b"ifil" => ChunkId::Ifil,
    b"isng" => ChunkId::Isng,
    b"INAM" => ChunkId::Inam,
    b"irom" => ChunkId::Irom,
    b"iver" => ChunkId::Iver,
    b"ICRD" => ChunkId::Icrd,
    b"IENG" => ChunkId::Ieng,
    b"IPRD" => ChunkId::Iprd,
    b"ICOP" => ChunkId::Icop,
    b"ICMT" => ChunkId::Icmt,
    b"ISFT" => ChunkId::Isft,
    b"snam" => ChunkId::Snam,
    b"smpl" => ChunkId::Smpl,
    b"phdr" => ChunkId::Phdr,
    b"pbag" => ChunkId::Pbag,
    b"pmod" => ChunkId::Pmod,
    b"pgen" => ChunkId::Pgen,
    b"inst" => ChunkId::Ihdr,
    b"ibag" => ChunkId::Ibag,
    b"imod" => ChunkId::Imod,
    b"igen" => ChunkId::Igen,
    b"shdr" => ChunkId::Shdr,
    b"sm24" => ChunkId::Sm24,
};
impl ChunkId {
    pub fn from_fourcc(fourcc: &[u8; 4]) -> ChunkId {
        CHUNK_IDS.get(&fourcc[..]).copied().unwrap_or(ChunkId::Unkn)
    }
}

/// An 8-byte RIFF chunk header: four ASCII id bytes and a little-endian size.
#[derive(Debug, Clone, Default, Reflect, Serialize)]
pub struct ChunkHeader {
    #[serde(skip_serializing)]
    pub label: [u8; 4],
    #[serde(skip_serializing)]
    pub chunklen: u32
}
impl ChunkHeader {
    pub fn id(&self) -> ChunkId {
        ChunkId::from_fourcc(&self.label)
    }
    fn fourcc_string(&self) -> String {
        String::from_utf8_lossy(&self.label).into_owned()
    }
}
impl AutoReadFrom for ChunkHeader {  }

/// Fixed 20-byte zero-padded name string used by the PHDR, IHDR and SHDR
/// records. The padding is not guaranteed by files in the wild; display stops
/// at the first NUL and tolerates all 20 bytes being used.
#[derive(Debug, Clone, Reflect)]
pub struct SfString {
    inner: [u8; 20]
}
impl Default for SfString {
    fn default() -> SfString {
        SfString { inner: [0; 20] }
    }
}
impl TryFrom<String> for SfString {
    type Error = SfbkError;

    fn try_from(value: String) -> Result<SfString, Self::Error> {
        if !value.is_ascii() {
            return Err(SfbkError::StringConversionNonAscii(value));
        }
        if value.as_bytes().len() > 20 {
            return Err(SfbkError::StringConversionLength(value.clone(), value.as_bytes().len()));
        }
        let mut buf: [u8; 20] = [0; 20];
        for (i, &c) in value.as_bytes().iter().enumerate() {
            buf[i] = c;
        }
        Ok(SfString { inner: buf })
    }
}
impl Display for SfString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let end = self.inner.iter().position(|&x| x == 0).unwrap_or(self.inner.len());
        write!(f, "{}", String::from_utf8_lossy(&self.inner[..end]))
    }
}
impl SfString {
    pub fn is_empty(&self) -> bool {
        self.inner[0] == 0
    }
}
impl AutoReadFrom for SfString {  }
impl Serialize for SfString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer {
        self.to_string().serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Reflect, Serialize)]
pub struct SfVersion {
    #[serde(rename = "@major")]
    pub major: u16,
    #[serde(rename = "@minor")]
    pub minor: u16
}
impl AutoReadFrom for SfVersion {  }

/// One free-form INFO string (isng/INAM/irom/ICRD/IENG/IPRD/ICOP/ICMT/ISFT).
#[derive(Debug, Clone, Serialize)]
pub struct InfoEntry {
    #[serde(rename = "@id")]
    pub id: ChunkId,
    #[serde(rename = "$text")]
    pub text: String
}

/// SF2.01 section 8.1.2 generator types, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, FromRepr, strum::Display)]
#[repr(u16)]
pub enum GenType {
    StartAddrOfs,
    EndAddrOfs,
    StartLoopAddrOfs,
    EndLoopAddrOfs,
    StartAddrCoarseOfs,
    ModLfoToPitch,
    VibLfoToPitch,
    ModEnvToPitch,
    FilterFc,
    FilterQ,
    ModLfoToFilterFc,
    ModEnvToFilterFc,
    EndAddrCoarseOfs,
    ModLfoToVol,
    Unused1,
    ChorusSend,
    ReverbSend,
    Pan,
    Unused2,
    Unused3,
    Unused4,
    ModLfoDelay,
    ModLfoFreq,
    VibLfoDelay,
    VibLfoFreq,
    ModEnvDelay,
    ModEnvAttack,
    ModEnvHold,
    ModEnvDecay,
    ModEnvSustain,
    ModEnvRelease,
    KeyToModEnvHold,
    KeyToModEnvDecay,
    VolEnvDelay,
    VolEnvAttack,
    VolEnvHold,
    VolEnvDecay,
    VolEnvSustain,
    VolEnvRelease,
    KeyToVolEnvHold,
    KeyToVolEnvDecay,
    Instrument,
    Reserved1,
    KeyRange,
    VelRange,
    StartLoopAddrCoarseOfs,
    Keynum,
    Velocity,
    Attenuation,
    Reserved2,
    EndLoopAddrCoarseOfs,
    CoarseTune,
    FineTune,
    SampleId,
    SampleModes,
    Reserved3,
    ScaleTune,
    ExclusiveClass,
    OverrideRootKey,
    Dummy
}

const INVALID_INST_GENS: &[GenType] = &[
    GenType::Unused1,
    GenType::Unused2,
    GenType::Unused3,
    GenType::Unused4,
    GenType::Reserved1,
    GenType::Reserved2,
    GenType::Reserved3,
];

const INVALID_PRESET_GENS: &[GenType] = &[
    GenType::StartAddrOfs,
    GenType::EndAddrOfs,
    GenType::StartLoopAddrOfs,
    GenType::EndLoopAddrOfs,
    GenType::StartAddrCoarseOfs,
    GenType::EndAddrCoarseOfs,
    GenType::StartLoopAddrCoarseOfs,
    GenType::Keynum,
    GenType::Velocity,
    GenType::EndLoopAddrCoarseOfs,
    GenType::SampleModes,
    GenType::ExclusiveClass,
    GenType::OverrideRootKey,
];

pub fn valid_inst_genid(genid: u16) -> bool {
    match GenType::from_repr(genid) {
        Some(GenType::Dummy) | None => false,
        Some(gen) => !INVALID_INST_GENS.contains(&gen)
    }
}
pub fn valid_preset_genid(genid: u16) -> bool {
    match GenType::from_repr(genid) {
        Some(GenType::Dummy) | None => false,
        Some(gen) => !INVALID_INST_GENS.contains(&gen) && !INVALID_PRESET_GENS.contains(&gen)
    }
}
/// Generators that may not appear at preset level in the note-on composition
/// (SF 2.01 section 8.5 page 58).
pub fn gen_excluded_at_preset_level(gen: usize) -> bool {
    GenType::from_repr(gen as u16).map_or(true, |g| INVALID_PRESET_GENS.contains(&g))
}

/// A generator amount. The wire encoding is two bytes whose meaning depends on
/// the generator id: byte ranges for KeyRange/VelRange, unsigned words for the
/// terminal Instrument/SampleId references, signed words for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenAmount {
    Sword(i16),
    Uword(u16),
    Range { lo: u8, hi: u8 }
}
impl GenAmount {
    pub fn as_sword(&self) -> Option<i16> {
        match self {
            GenAmount::Sword(v) => Some(*v),
            _ => None
        }
    }
    pub fn as_uword(&self) -> Option<u16> {
        match self {
            GenAmount::Uword(v) => Some(*v),
            _ => None
        }
    }
    pub fn as_range(&self) -> Option<(u8, u8)> {
        match self {
            GenAmount::Range { lo, hi } => Some((*lo, *hi)),
            _ => None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SfGen {
    #[serde(rename = "@id")]
    pub id: GenType,
    pub amount: GenAmount
}

/// A raw 10-byte modulator record. Translation into runtime form happens at
/// import; no validation at all happens here.
#[derive(Debug, Clone, Copy, Default, Reflect, Serialize)]
pub struct SfMod {
    #[serde(rename = "@src")]
    pub src: u16,
    #[serde(rename = "@dest")]
    pub dest: u16,
    #[serde(rename = "@amount")]
    pub amount: i16,
    #[serde(rename = "@amtsrc")]
    pub amtsrc: u16,
    #[serde(rename = "@trans")]
    pub trans: u16
}
impl AutoReadFrom for SfMod {  }

/// A 4-byte PBAG/IBAG record: indices of the zone's first generator and first
/// modulator. The record after it bounds both spans.
#[derive(Debug, Clone, Copy, Default, Reflect, Serialize)]
pub struct BagRecord {
    pub gen_idx: u16,
    pub mod_idx: u16
}
impl AutoReadFrom for BagRecord {  }

/// 38-byte PHDR record. library/genre/morphology are reserved by SF2.01 but
/// present in every record; they are carried through to the XML dump.
#[derive(Debug, Clone, Default, Reflect, Serialize)]
pub struct PresetHeader {
    #[serde(rename = "@name")]
    pub name: SfString,
    #[serde(rename = "@prenum")]
    pub prenum: u16,
    #[serde(rename = "@bank")]
    pub bank: u16,
    #[serde(skip_serializing)]
    pub pbag_idx: u16,
    pub library: u32,
    pub genre: u32,
    pub morphology: u32
}
impl AutoReadFrom for PresetHeader {  }

/// 22-byte IHDR record ("inst" fourcc).
#[derive(Debug, Clone, Default, Reflect, Serialize)]
pub struct InstHeader {
    #[serde(rename = "@name")]
    pub name: SfString,
    #[serde(skip_serializing)]
    pub ibag_idx: u16
}
impl AutoReadFrom for InstHeader {  }

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
    pub struct SampleType: u16 {
        const MONO = 1;
        const RIGHT = 2;
        const LEFT = 4;
        const LINKED = 8;
        const OGG_VORBIS = 0x10;
        const ROM = 0x8000;
    }
}

/// 46-byte SHDR record.
///
/// On the wire start/end/loop_start/loop_end are absolute word indices into
/// the smpl chunk (byte indices for Ogg-compressed banks). After the fixup
/// pass they are rebased: `end` becomes the offset of the LAST valid frame
/// relative to `start` (one less than the frame count, deliberately diverging
/// from the SF2 spec's one-past-the-end convention) and the loop points become
/// offsets from `start`. Downstream code must index accordingly.
#[derive(Debug, Clone, Default, Reflect, Serialize)]
pub struct SampleHeader {
    #[serde(rename = "@name")]
    pub name: SfString,
    #[serde(rename = "@start")]
    pub start: u32,
    #[serde(rename = "@end")]
    pub end: u32,
    #[serde(rename = "@loop_start")]
    pub loop_start: u32,
    #[serde(rename = "@loop_end")]
    pub loop_end: u32,
    #[serde(rename = "@sample_rate")]
    pub sample_rate: u32,
    #[serde(rename = "@orig_pitch")]
    pub orig_pitch: u8,
    #[serde(rename = "@pitch_adj")]
    pub pitch_adj: i8,
    pub sample_link: u16,
    #[serde(rename = "@sample_type")]
    pub sample_type: u16
}
impl SampleHeader {
    pub fn sample_type(&self) -> SampleType {
        SampleType::from_bits_retain(self.sample_type)
    }
    fn zero_out(&mut self) {
        self.start = 0;
        self.end = 0;
        self.loop_start = 0;
        self.loop_end = 0;
    }
}
impl AutoReadFrom for SampleHeader {  }

/// A preset or instrument zone of the intermediate tree. After the fixup pass
/// `link` holds the resolved instrument index (preset zones) or sample index
/// (instrument zones); `None` marks a global zone, which fixup keeps at the
/// front of its parent's zone list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SfZone {
    #[serde(skip_serializing)]
    _gen_idx: u16,
    #[serde(skip_serializing)]
    _mod_idx: u16,
    #[serde(skip_serializing)]
    _gen_count: usize,
    #[serde(skip_serializing)]
    _mod_count: usize,
    pub gens: Vec<SfGen>,
    pub mods: Vec<SfMod>,
    #[serde(rename = "@link")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<usize>
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SfPreset {
    #[serde(flatten)]
    pub header: PresetHeader,
    #[serde(skip_serializing)]
    _pbag_count: usize,
    pub zones: Vec<SfZone>
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SfInst {
    #[serde(flatten)]
    pub header: InstHeader,
    #[serde(skip_serializing)]
    _ibag_count: usize,
    pub zones: Vec<SfZone>
}

/// File position and record count of one HYDRA sub-chunk.
#[derive(Debug, Clone, Copy, Default, Serialize)]
struct ChunkSpan {
    pos: u64,
    count: u32
}

/// The parsed intermediate tree of a SoundFont bank: everything the file says,
/// index-linked and validated, but not yet in runtime form. Sample data is
/// located (position + size) but never read here.
#[derive(Debug, Default, Serialize)]
pub struct SfFile {
    pub version: SfVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rom_version: Option<SfVersion>,
    pub info: Vec<InfoEntry>,
    #[serde(skip_serializing)]
    pub sample_pos: u64,
    #[serde(rename = "@sample_size")]
    pub sample_size: u32,
    #[serde(skip_serializing)]
    pub sample24_pos: u64,
    #[serde(rename = "@sample24_size")]
    pub sample24_size: u32,
    #[serde(skip_serializing)]
    _phdr: ChunkSpan,
    #[serde(skip_serializing)]
    _pbag: ChunkSpan,
    #[serde(skip_serializing)]
    _pmod: ChunkSpan,
    #[serde(skip_serializing)]
    _pgen: ChunkSpan,
    #[serde(skip_serializing)]
    _ihdr: ChunkSpan,
    #[serde(skip_serializing)]
    _ibag: ChunkSpan,
    #[serde(skip_serializing)]
    _imod: ChunkSpan,
    #[serde(skip_serializing)]
    _igen: ChunkSpan,
    #[serde(skip_serializing)]
    _shdr: ChunkSpan,
    pub presets: Vec<SfPreset>,
    pub insts: Vec<SfInst>,
    pub samples: Vec<SampleHeader>
}

impl ReadFrom for SfFile {
    /// Parse a whole bank. The reader must carry exactly the bank (the outer
    /// RIFF size is checked against the stream length).
    fn read_from_file<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        let file_size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        self.load_body(file, file_size)
    }
}

impl SfFile {
    /// Look up one of the free-form INFO strings.
    pub fn info_text(&self, id: ChunkId) -> Option<&str> {
        self.info.iter().find(|entry| entry.id == id).map(|entry| entry.text.as_str())
    }

    fn load_body<R: Read + Seek>(&mut self, file: &mut R, file_size: u64) -> Result<(), SfbkError> {
        let mut chunk = ChunkHeader::default();
        chunk.read_from_file(file)?;
        if chunk.id() != ChunkId::Riff {
            return Err(SfbkError::NotRiff);
        }
        if chunk.chunklen as u64 != file_size - 8 {
            return Err(SfbkError::FileSizeMismatch(chunk.chunklen, file_size));
        }

        let form = read_n_fourcc(file)?;
        if ChunkId::from_fourcc(&form) != ChunkId::Sfbk {
            return Err(SfbkError::NotSfbk);
        }

        let (id, size) = read_list_chunk(file)?;
        if id != ChunkId::Info {
            return Err(SfbkError::UnexpectedListChunk("INFO"));
        }
        self.read_info_subchunks(file, size)?;

        let (id, size) = read_list_chunk(file)?;
        if id != ChunkId::Sdta {
            return Err(SfbkError::UnexpectedListChunk("SAMPLE"));
        }
        self.process_sdta(file, size)?;

        let (id, size) = read_list_chunk(file)?;
        if id != ChunkId::Pdta {
            return Err(SfbkError::UnexpectedListChunk("HYDRA"));
        }
        self.process_pdta(file, size)?;

        self.load_preset_headers(file)?;
        self.load_preset_zones(file)?;
        self.load_preset_modulators(file)?;
        self.load_preset_generators(file)?;

        self.load_inst_headers(file)?;
        self.load_inst_zones(file)?;
        self.load_inst_modulators(file)?;
        self.load_inst_generators(file)?;

        self.load_sample_headers(file)?;

        self.fixup_preset_zones()?;
        self.fixup_inst_zones()?;
        self.fixup_samples();

        Ok(())
    }

    fn read_info_subchunks<R: Read + Seek>(&mut self, file: &mut R, size: u32) -> Result<(), SfbkError> {
        let mut remaining = size as i64;

        while remaining > 0 {
            let mut chunk = ChunkHeader::default();
            chunk.read_from_file(file)?;
            remaining -= 8;

            match chunk.id() {
                ChunkId::Ifil => {
                    if chunk.chunklen != 4 {
                        return Err(SfbkError::BadVersionChunkSize);
                    }
                    self.version.read_from_file(file)?;

                    if self.version.major < 2 {
                        return Err(SfbkError::VersionTooOld(self.version.major, self.version.minor));
                    }
                    if self.version.major == 3 {
                        if !cfg!(feature = "sf3") {
                            return Err(SfbkError::Sf3Unsupported(self.version.major, self.version.minor));
                        }
                    } else if self.version.major > 2 {
                        return Err(SfbkError::VersionTooNew(self.version.major, self.version.minor));
                    }
                },
                ChunkId::Iver => {
                    if chunk.chunklen != 4 {
                        return Err(SfbkError::BadRomVersionChunkSize);
                    }
                    let mut rom_version = SfVersion::default();
                    rom_version.read_from_file(file)?;
                    self.rom_version = Some(rom_version);
                },
                ChunkId::Unkn => {
                    return Err(SfbkError::UnknownInfoChunk);
                },
                id => {
                    if (id != ChunkId::Icmt && chunk.chunklen > 256) || chunk.chunklen > 65536 || chunk.chunklen % 2 == 1 {
                        return Err(SfbkError::BadInfoStringSize(chunk.fourcc_string(), chunk.chunklen));
                    }
                    let mut raw = vec![0; chunk.chunklen as usize];
                    file.read_exact(&mut raw)?;
                    let end = raw.iter().position(|&x| x == 0).unwrap_or(raw.len());
                    self.info.push(InfoEntry {
                        id,
                        text: String::from_utf8_lossy(&raw[..end]).into_owned()
                    });
                }
            }
            remaining -= chunk.chunklen as i64;
        }

        if remaining < 0 {
            return Err(SfbkError::InfoSizeMismatch);
        }
        Ok(())
    }

    /// Record the position and size of the 16-bit sample data and, on 2.4+
    /// banks, of the optional sm24 low-byte chunk. No sample bytes are read.
    fn process_sdta<R: Read + Seek>(&mut self, file: &mut R, size: u32) -> Result<(), SfbkError> {
        if size == 0 {
            return Ok(()); // no sample data?
        }
        let mut remaining = size as i64;

        let mut chunk = ChunkHeader::default();
        chunk.read_from_file(file)?;
        remaining -= 8;

        if chunk.id() != ChunkId::Smpl {
            return Err(SfbkError::MissingSampleChunk);
        }
        if chunk.chunklen as i64 > remaining {
            return Err(SfbkError::SdtaSizeMismatch);
        }

        self.sample_pos = file.seek(SeekFrom::Current(0))?;
        self.sample_size = chunk.chunklen;

        file.seek(SeekFrom::Current(chunk.chunklen as i64))?;
        remaining -= chunk.chunklen as i64;

        if self.version.major >= 2 && self.version.minor >= 4 {
            // any chance to find another chunk here?
            if remaining > 8 {
                chunk.read_from_file(file)?;
                remaining -= 8;

                if chunk.id() == ChunkId::Sm24 {
                    if chunk.chunklen as i64 > remaining {
                        println!("{}sm24 exceeds sdta chunk, ignoring sm24!", "Warning: ".yellow());
                    } else {
                        // + 1 byte in the case that half the size of the smpl chunk is odd
                        let mut half = self.sample_size / 2;
                        half += half % 2;
                        if half != chunk.chunklen {
                            println!("{}sm24 not equal to half the size of the smpl chunk (0x{:X} != 0x{:X}), ignoring sm24!",
                                "Warning: ".yellow(), chunk.chunklen, half);
                        } else {
                            self.sample24_pos = file.seek(SeekFrom::Current(0))?;
                            self.sample24_size = chunk.chunklen;
                        }
                    }
                }
            }
        }

        file.seek(SeekFrom::Current(remaining))?;
        Ok(())
    }

    /// Record positions of all HYDRA sub-chunks and do basic sanity checks on
    /// the sub-chunk sizes.
    fn process_pdta<R: Read + Seek>(&mut self, file: &mut R, size: u32) -> Result<(), SfbkError> {
        let mut remaining = size as i64;

        self._phdr = pdta_helper(file, ChunkId::Phdr, "phdr", PHDR_SIZE, 1, &mut remaining)?;
        self._pbag = pdta_helper(file, ChunkId::Pbag, "pbag", BAG_SIZE, 1, &mut remaining)?;
        self._pmod = pdta_helper(file, ChunkId::Pmod, "pmod", MOD_SIZE, 0, &mut remaining)?;
        self._pgen = pdta_helper(file, ChunkId::Pgen, "pgen", GEN_SIZE, 0, &mut remaining)?;

        self._ihdr = pdta_helper(file, ChunkId::Ihdr, "inst", IHDR_SIZE, 1, &mut remaining)?;
        self._ibag = pdta_helper(file, ChunkId::Ibag, "ibag", BAG_SIZE, 1, &mut remaining)?;
        self._imod = pdta_helper(file, ChunkId::Imod, "imod", MOD_SIZE, 0, &mut remaining)?;
        self._igen = pdta_helper(file, ChunkId::Igen, "igen", GEN_SIZE, 0, &mut remaining)?;

        self._shdr = pdta_helper(file, ChunkId::Shdr, "shdr", SHDR_SIZE, 1, &mut remaining)?;

        Ok(())
    }

    /// Read all PHDR records. Every record names the index of its first bag;
    /// the next record's index closes the span, with the final span closed by
    /// the terminal record, which is then discarded.
    fn load_preset_headers<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        file.seek(SeekFrom::Start(self._phdr.pos))?;
        let mut records: Table<PresetHeader> = Table::new(self._phdr.count as usize);
        records.read_from_file(file)?;

        for pair in records.objects.windows(2) {
            let pbag_count = pair[1].pbag_idx as i64 - pair[0].pbag_idx as i64;
            if pbag_count < 0 {
                return Err(SfbkError::IndicesNotMonotonic("Preset header"));
            }
            self.presets.push(SfPreset {
                header: pair[0].clone(),
                _pbag_count: pbag_count as usize,
                zones: Vec::new()
            });
        }
        Ok(())
    }

    fn load_inst_headers<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        file.seek(SeekFrom::Start(self._ihdr.pos))?;
        let mut records: Table<InstHeader> = Table::new(self._ihdr.count as usize);
        records.read_from_file(file)?;

        for pair in records.objects.windows(2) {
            let ibag_count = pair[1].ibag_idx as i64 - pair[0].ibag_idx as i64;
            if ibag_count < 0 {
                return Err(SfbkError::IndicesNotMonotonic("Instrument header"));
            }
            self.insts.push(SfInst {
                header: pair[0].clone(),
                _ibag_count: ibag_count as usize,
                zones: Vec::new()
            });
        }
        Ok(())
    }

    /// Read all SHDR records except the terminal one, which carries no data.
    fn load_sample_headers<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        file.seek(SeekFrom::Start(self._shdr.pos))?;
        let mut records: Table<SampleHeader> = Table::new(self._shdr.count as usize - 1);
        records.read_from_file(file)?;
        self.samples = records.objects;
        Ok(())
    }

    fn load_preset_zones<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        let zones = load_zone_records(
            file,
            self._pbag,
            self.presets.iter().map(|p| (p.header.pbag_idx, p._pbag_count)).collect(),
            "Preset zone"
        )?;
        distribute_zones(zones, self.presets.iter_mut().map(|p| (p._pbag_count, &mut p.zones)));
        Ok(())
    }

    fn load_inst_zones<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        let zones = load_zone_records(
            file,
            self._ibag,
            self.insts.iter().map(|i| (i.header.ibag_idx, i._ibag_count)).collect(),
            "Instrument zone"
        )?;
        distribute_zones(zones, self.insts.iter_mut().map(|i| (i._ibag_count, &mut i.zones)));
        Ok(())
    }

    fn load_preset_modulators<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        let pos = self._pmod.pos;
        load_zone_modulators(file, pos, self.presets.iter_mut().flat_map(|p| p.zones.iter_mut()))
    }

    fn load_inst_modulators<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        let pos = self._imod.pos;
        load_zone_modulators(file, pos, self.insts.iter_mut().flat_map(|i| i.zones.iter_mut()))
    }

    fn load_preset_generators<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        let pos = self._pgen.pos;
        let mut seeked = false;
        for preset in self.presets.iter_mut() {
            for zone in preset.zones.iter_mut() {
                load_zone_generators(file, pos, zone, &mut seeked, GenType::Instrument, valid_preset_genid)?;
            }
        }
        Ok(())
    }

    fn load_inst_generators<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        let pos = self._igen.pos;
        let mut seeked = false;
        for inst in self.insts.iter_mut() {
            for zone in inst.zones.iter_mut() {
                load_zone_generators(file, pos, zone, &mut seeked, GenType::SampleId, valid_inst_genid)?;
            }
        }
        Ok(())
    }

    fn fixup_preset_zones(&mut self) -> Result<(), SfbkError> {
        let inst_count = self.insts.len();
        for preset in self.presets.iter_mut() {
            fixup_zones(&mut preset.zones, GenType::Instrument, inst_count, "preset")
                .map_err(|idx| SfbkError::InvalidInstrumentRef(preset.header.name.to_string(), idx))?;
        }
        Ok(())
    }

    fn fixup_inst_zones(&mut self) -> Result<(), SfbkError> {
        let sample_count = self.samples.len();
        for inst in self.insts.iter_mut() {
            fixup_zones(&mut inst.zones, GenType::SampleId, sample_count, "instrument")
                .map_err(|idx| SfbkError::InvalidSampleRef(inst.header.name.to_string(), idx))?;
        }
        Ok(())
    }

    /// Validate each sample's window against the located sample data and
    /// convert end/loop_start/loop_end into offsets (see [`SampleHeader`]).
    fn fixup_samples(&mut self) {
        let total_bytes = self.sample_size;
        let total_samples = total_bytes / 2;
        let mut invalid_loops = false;

        for sam in self.samples.iter_mut() {
            let sample_type = sam.sample_type();

            // SF2 denominates start/end in sample words, SF3 (Ogg Vorbis) in bytes.
            let max_end = if sample_type.contains(SampleType::OGG_VORBIS) { total_bytes } else { total_samples };

            // ROM samples are unusable for us by definition, so simply ignore them.
            if sample_type.contains(SampleType::ROM) {
                sam.zero_out();
                continue;
            }

            if sam.end > max_end || sam.start.saturating_add(4) > sam.end {
                println!("{}Sample '{}' start/end file positions are invalid, disabling and will not be saved!",
                    "Warning: ".yellow(), sam.name);
                sam.zero_out();
                continue;
            }

            let invalid_loop_start = sam.loop_start < sam.start || sam.loop_start >= sam.loop_end;
            let invalid_loop_end = sam.loop_end > max_end || sam.loop_start >= sam.loop_end;
            let loop_end_mismatch = sam.loop_end > sam.end;

            if sample_type.contains(SampleType::OGG_VORBIS) {
                // compressed samples get their loops fixed up after decompression
            } else if invalid_loop_start || invalid_loop_end || loop_end_mismatch {
                // though illegal, loop_end may equal loop_start to disable the loop
                invalid_loops |= sam.loop_end != sam.loop_start;

                if invalid_loop_start {
                    println!("Sample '{}' has unusable loop start '{}', setting to sample start at '{}'",
                        sam.name, sam.loop_start, sam.start);
                    sam.loop_start = sam.start;
                }
                if invalid_loop_end {
                    println!("Sample '{}' has unusable loop stop '{}', setting to sample stop at '{}'",
                        sam.name, sam.loop_end, sam.end);
                    // end still points one past the valid data here; the loop should
                    // never reach that frame, the last valid one plays instead
                    sam.loop_end = sam.end;
                } else if loop_end_mismatch {
                    println!("Sample '{}' has invalid loop stop '{}', sample stop at '{}', using it anyway",
                        sam.name, sam.loop_end, sam.end);
                }
            }

            // convert sample end, loop_start, loop_end to offsets from start
            sam.end -= sam.start + 1; // marks the last frame, contrary to the SF2 spec
            sam.loop_start -= sam.start;
            sam.loop_end -= sam.start;
        }

        if invalid_loops {
            println!("{}Found samples with invalid loops, audible glitches possible!", "Warning: ".yellow());
        }
    }
}

fn read_n_fourcc<R: Read + Seek>(file: &mut R) -> Result<[u8; 4], SfbkError> {
    let mut fourcc = [0; 4];
    file.read_exact(&mut fourcc)?;
    Ok(fourcc)
}

/// Read a LIST wrapper and return the list type with the size of its body.
fn read_list_chunk<R: Read + Seek>(file: &mut R) -> Result<(ChunkId, u32), SfbkError> {
    let mut chunk = ChunkHeader::default();
    chunk.read_from_file(file)?;
    if chunk.id() != ChunkId::List {
        return Err(SfbkError::InvalidListChunk);
    }
    // the list body starts with its own four-character type
    let body_size = chunk.chunklen.checked_sub(4).ok_or(SfbkError::InvalidListChunk)?;
    let fourcc = read_n_fourcc(file)?;
    Ok((ChunkId::from_fourcc(&fourcc), body_size))
}

fn pdta_helper<R: Read + Seek>(file: &mut R, expected: ChunkId, name: &'static str, record_size: u32, min_records: u32, remaining: &mut i64) -> Result<ChunkSpan, SfbkError> {
    let mut chunk = ChunkHeader::default();
    chunk.read_from_file(file)?;
    *remaining -= 8;

    if chunk.id() != expected {
        return Err(SfbkError::UnexpectedHydraChunk(name));
    }
    if chunk.chunklen % record_size != 0 {
        return Err(SfbkError::HydraSizeNotMultiple(name, record_size));
    }
    let count = chunk.chunklen / record_size;
    if count < min_records {
        return Err(SfbkError::HydraTooFewRecords(name, min_records));
    }

    *remaining -= chunk.chunklen as i64;
    if *remaining < 0 {
        return Err(SfbkError::HydraSizeExceeded(name));
    }

    let pos = file.seek(SeekFrom::Current(0))?;
    file.seek(SeekFrom::Current(chunk.chunklen as i64))?;

    Ok(ChunkSpan { pos, count })
}

/// Read the bag records of all zones in one contiguous run, starting at the
/// first parent's bag index, plus one terminal record to close the last span.
/// Returns one prototype zone per bag record.
fn load_zone_records<R: Read + Seek>(file: &mut R, span: ChunkSpan, parents: Vec<(u16, usize)>, what: &'static str) -> Result<Vec<SfZone>, SfbkError> {
    let total: usize = parents.iter().map(|&(_, count)| count).sum();
    if total == 0 {
        return Ok(Vec::new());
    }
    let first_idx = parents.iter().find(|&&(_, count)| count > 0).map(|&(idx, _)| idx).unwrap_or(0);

    file.seek(SeekFrom::Start(span.pos + first_idx as u64 * BAG_SIZE as u64))?;
    let mut bags: Table<BagRecord> = Table::new(total + 1);
    bags.read_from_file(file)?;

    let mut zones = Vec::with_capacity(total);
    for pair in bags.objects.windows(2) {
        let gen_count = pair[1].gen_idx as i64 - pair[0].gen_idx as i64;
        let mod_count = pair[1].mod_idx as i64 - pair[0].mod_idx as i64;
        if gen_count < 0 || mod_count < 0 {
            return Err(SfbkError::IndicesNotMonotonic(what));
        }
        zones.push(SfZone {
            _gen_idx: pair[0].gen_idx,
            _mod_idx: pair[0].mod_idx,
            _gen_count: gen_count as usize,
            _mod_count: mod_count as usize,
            ..Default::default()
        });
    }
    Ok(zones)
}

fn distribute_zones<'a>(mut zones: Vec<SfZone>, parents: impl Iterator<Item = (usize, &'a mut Vec<SfZone>)>) {
    let mut rest = zones.drain(..);
    for (count, target) in parents {
        target.extend(rest.by_ref().take(count));
    }
}

/// Stream each zone's modulator records. The pmod/imod chunk is seeked once,
/// at the span start of the first zone that has modulators; after that the
/// records of consecutive zones are contiguous by construction.
fn load_zone_modulators<'a, R: Read + Seek>(file: &mut R, pos: u64, zones: impl Iterator<Item = &'a mut SfZone>) -> Result<(), SfbkError> {
    let mut seeked = false;
    for zone in zones {
        if zone._mod_count == 0 {
            continue;
        }
        if !seeked {
            file.seek(SeekFrom::Start(pos + zone._mod_idx as u64 * MOD_SIZE as u64))?;
            seeked = true;
        }
        let mut mods: Table<SfMod> = Table::new(zone._mod_count);
        mods.read_from_file(file)?;
        zone.mods = mods.objects;
    }
    Ok(())
}

/* -------------------------------------------------------------------
 * generator loading rules, per zone, in order of decreasing precedence:
 * KeyRange is 1st in the list (if it exists), else discarded
 * a VelRange may only be preceded by a KeyRange, else discarded
 * a generator following the terminal Instrument/SampleId is discarded
 * a duplicate generator replaces the previous one
 * ------------------------------------------------------------------- */
fn load_zone_generators<R: Read + Seek>(file: &mut R, pos: u64, zone: &mut SfZone, seeked: &mut bool, terminal: GenType, valid: fn(u16) -> bool) -> Result<(), SfbkError> {
    let mut level = 0;

    for _ in 0..zone._gen_count {
        if !*seeked {
            file.seek(SeekFrom::Start(pos + zone._gen_idx as u64 * GEN_SIZE as u64))?;
            *seeked = true;
        }

        let genid = file.read_u16::<LittleEndian>()?;

        if (level == 0 && genid == GenType::KeyRange as u16)
            || (level <= 1 && genid == GenType::VelRange as u16) {
            level += 1;
            let lo = file.read_u8()?;
            let hi = file.read_u8()?;
            zone.gens.push(SfGen {
                id: if genid == GenType::KeyRange as u16 { GenType::KeyRange } else { GenType::VelRange },
                amount: GenAmount::Range { lo, hi }
            });
        } else if level < 3 && genid == terminal as u16 {
            level = 3;
            let amount = GenAmount::Uword(file.read_u16::<LittleEndian>()?);
            zone.gens.push(SfGen { id: terminal, amount });
        } else if level <= 2 && valid(genid) {
            level = 2;
            let raw = file.read_i16::<LittleEndian>()?;
            let id = GenType::from_repr(genid).ok_or(SfbkError::Invalid("Generator id vanished!".to_string()))?;
            // A KeyRange/VelRange showing up out of order is still accepted as
            // an ordinary parameter; its amount keeps the range byte layout.
            let amount = match id {
                GenType::KeyRange | GenType::VelRange => {
                    let [lo, hi] = raw.to_le_bytes();
                    GenAmount::Range { lo, hi }
                },
                _ => GenAmount::Sword(raw)
            };
            match zone.gens.iter_mut().find(|gen| gen.id == id) {
                Some(duplicate) => duplicate.amount = amount,
                None => zone.gens.push(SfGen { id, amount })
            }
        } else {
            file.seek(SeekFrom::Current(2))?;
            println!("{}Ignoring generator {}!", "Warning: ".yellow(), genid);
        }
    }
    Ok(())
}

/// Post-parse zone pass, shared between presets and instruments:
/// * zones without modulators or generators are dropped
/// * a trailing terminal generator resolves to the target index (returned as
///   `Err` when out of range) and is removed from the generator list
/// * a zone without terminal generator is a global zone; it is kept at (or
///   moved to) the front, and any further global zone is discarded
fn fixup_zones(zones: &mut Vec<SfZone>, terminal: GenType, target_count: usize, what: &'static str) -> Result<(), u16> {
    let mut fixed: Vec<SfZone> = Vec::with_capacity(zones.len());

    for mut zone in zones.drain(..) {
        if zone.gens.is_empty() && zone.mods.is_empty() {
            continue;
        }

        let is_linked = zone.gens.last().map_or(false, |gen| gen.id == terminal);
        if is_linked {
            let idx = match zone.gens.pop().and_then(|gen| gen.amount.as_uword()) {
                Some(idx) => idx,
                None => continue // terminal amount was not an index record; cannot happen after parse
            };
            if idx as usize >= target_count {
                return Err(idx);
            }
            zone.link = Some(idx as usize);
            fixed.push(zone);
        } else if fixed.first().map_or(false, |front| front.link.is_none()) {
            println!("{}Discarding additional global {} zone!", "Warning: ".yellow(), what);
        } else {
            fixed.insert(0, zone);
        }
    }

    *zones = fixed;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders assembling well-formed (and deliberately malformed) SoundFont
    //! images in memory so the parser can be driven without fixture files.

    use byteorder::{WriteBytesExt, LittleEndian};
    use std::io::Write;

    pub fn chunk(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(fourcc);
        out.write_u32::<LittleEndian>(body.len() as u32).unwrap();
        out.extend_from_slice(body);
        out
    }

    pub fn list_chunk(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut inner = Vec::with_capacity(4 + body.len());
        inner.extend_from_slice(fourcc);
        inner.extend_from_slice(body);
        chunk(b"LIST", &inner)
    }

    pub fn name20(name: &str) -> [u8; 20] {
        let mut buf = [0; 20];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        buf
    }

    pub fn gen_range(id: u16, lo: u8, hi: u8) -> [u8; 4] {
        let mut rec = [0; 4];
        rec[..2].copy_from_slice(&id.to_le_bytes());
        rec[2] = lo;
        rec[3] = hi;
        rec
    }
    pub fn gen_word(id: u16, amount: i16) -> [u8; 4] {
        let mut rec = [0; 4];
        rec[..2].copy_from_slice(&id.to_le_bytes());
        rec[2..].copy_from_slice(&amount.to_le_bytes());
        rec
    }
    pub fn gen_uword(id: u16, amount: u16) -> [u8; 4] {
        let mut rec = [0; 4];
        rec[..2].copy_from_slice(&id.to_le_bytes());
        rec[2..].copy_from_slice(&amount.to_le_bytes());
        rec
    }

    #[derive(Clone)]
    pub struct ShdrSpec {
        pub name: &'static str,
        pub start: u32,
        pub end: u32,
        pub loop_start: u32,
        pub loop_end: u32,
        pub sample_rate: u32,
        pub orig_pitch: u8,
        pub pitch_adj: i8,
        pub sample_type: u16
    }
    impl Default for ShdrSpec {
        fn default() -> ShdrSpec {
            ShdrSpec {
                name: "sample",
                start: 0,
                end: 1024,
                loop_start: 0,
                loop_end: 1024,
                sample_rate: 44100,
                orig_pitch: 60,
                pitch_adj: 0,
                sample_type: 1
            }
        }
    }

    /// Record lists are explicit, terminators included, so tests control every
    /// byte of the HYDRA.
    #[derive(Clone, Default)]
    pub struct BankBuilder {
        pub version: (u16, u16),
        pub extra_info: Vec<(&'static [u8; 4], Vec<u8>)>,
        pub smpl: Vec<i16>,
        pub sm24: Option<Vec<u8>>,
        /// (name, prenum, bank, pbag_idx)
        pub phdr: Vec<(&'static str, u16, u16, u16)>,
        /// (gen_idx, mod_idx)
        pub pbag: Vec<(u16, u16)>,
        /// (src, dest, amount, amtsrc, trans)
        pub pmod: Vec<(u16, u16, i16, u16, u16)>,
        pub pgen: Vec<[u8; 4]>,
        /// (name, ibag_idx)
        pub ihdr: Vec<(&'static str, u16)>,
        pub ibag: Vec<(u16, u16)>,
        pub imod: Vec<(u16, u16, i16, u16, u16)>,
        pub igen: Vec<[u8; 4]>,
        pub shdr: Vec<ShdrSpec>
    }

    impl BankBuilder {
        pub fn new() -> BankBuilder {
            BankBuilder { version: (2, 1), ..Default::default() }
        }

        /// The smallest playable bank: one preset (bank 0, program 0) with one
        /// zone linked to instrument 0, one instrument with one zone linked to
        /// sample 0, one 1024-frame looped sample.
        pub fn minimal() -> BankBuilder {
            let mut bank = BankBuilder::new();
            bank.smpl = (0..1024).map(|i| ((i as f32 * 0.1).sin() * 8192.0) as i16).collect();
            bank.phdr = vec![("Piano", 0, 0, 0), ("EOP", 0, 0, 1)];
            bank.pbag = vec![(0, 0), (1, 0)];
            bank.pgen = vec![gen_uword(41, 0)];
            bank.ihdr = vec![("Piano Inst", 0), ("EOI", 1)];
            bank.ibag = vec![(0, 0), (1, 0)];
            bank.igen = vec![gen_uword(53, 0)];
            bank.shdr = vec![ShdrSpec::default()];
            bank
        }

        pub fn build(&self) -> Vec<u8> {
            // INFO
            let mut info = Vec::new();
            let mut ifil = Vec::new();
            ifil.write_u16::<LittleEndian>(self.version.0).unwrap();
            ifil.write_u16::<LittleEndian>(self.version.1).unwrap();
            info.extend(chunk(b"ifil", &ifil));
            info.extend(chunk(b"INAM", b"Test Bank\0\0\0"));
            for (fourcc, body) in &self.extra_info {
                info.extend(chunk(fourcc, body));
            }

            // sdta
            let mut smpl = Vec::with_capacity(self.smpl.len() * 2);
            for &frame in &self.smpl {
                smpl.write_i16::<LittleEndian>(frame).unwrap();
            }
            let mut sdta = chunk(b"smpl", &smpl);
            if let Some(sm24) = &self.sm24 {
                sdta.extend(chunk(b"sm24", sm24));
            }

            // pdta
            let mut phdr = Vec::new();
            for &(name, prenum, bank, pbag_idx) in &self.phdr {
                phdr.write_all(&name20(name)).unwrap();
                phdr.write_u16::<LittleEndian>(prenum).unwrap();
                phdr.write_u16::<LittleEndian>(bank).unwrap();
                phdr.write_u16::<LittleEndian>(pbag_idx).unwrap();
                phdr.write_u32::<LittleEndian>(0).unwrap();
                phdr.write_u32::<LittleEndian>(0).unwrap();
                phdr.write_u32::<LittleEndian>(0).unwrap();
            }
            let mut ihdr = Vec::new();
            for &(name, ibag_idx) in &self.ihdr {
                ihdr.write_all(&name20(name)).unwrap();
                ihdr.write_u16::<LittleEndian>(ibag_idx).unwrap();
            }
            let mut shdr = Vec::new();
            for spec in self.shdr.iter().cloned().chain(std::iter::once(ShdrSpec { name: "EOS", start: 0, end: 0, loop_start: 0, loop_end: 0, sample_rate: 0, orig_pitch: 0, pitch_adj: 0, sample_type: 0 })) {
                shdr.write_all(&name20(spec.name)).unwrap();
                shdr.write_u32::<LittleEndian>(spec.start).unwrap();
                shdr.write_u32::<LittleEndian>(spec.end).unwrap();
                shdr.write_u32::<LittleEndian>(spec.loop_start).unwrap();
                shdr.write_u32::<LittleEndian>(spec.loop_end).unwrap();
                shdr.write_u32::<LittleEndian>(spec.sample_rate).unwrap();
                shdr.write_u8(spec.orig_pitch).unwrap();
                shdr.write_i8(spec.pitch_adj).unwrap();
                shdr.write_u16::<LittleEndian>(0).unwrap();
                shdr.write_u16::<LittleEndian>(spec.sample_type).unwrap();
            }

            let bag_bytes = |bags: &[(u16, u16)]| {
                let mut out = Vec::new();
                for &(gen_idx, mod_idx) in bags {
                    out.write_u16::<LittleEndian>(gen_idx).unwrap();
                    out.write_u16::<LittleEndian>(mod_idx).unwrap();
                }
                out
            };
            let mod_bytes = |mods: &[(u16, u16, i16, u16, u16)]| {
                let mut out = Vec::new();
                for &(src, dest, amount, amtsrc, trans) in mods {
                    out.write_u16::<LittleEndian>(src).unwrap();
                    out.write_u16::<LittleEndian>(dest).unwrap();
                    out.write_i16::<LittleEndian>(amount).unwrap();
                    out.write_u16::<LittleEndian>(amtsrc).unwrap();
                    out.write_u16::<LittleEndian>(trans).unwrap();
                }
                out
            };
            let gen_bytes = |gens: &[[u8; 4]]| {
                let mut out = Vec::new();
                for gen in gens {
                    out.extend_from_slice(gen);
                }
                // terminal gen record
                out.extend_from_slice(&[0; 4]);
                out
            };

            let mut pdta = Vec::new();
            pdta.extend(chunk(b"phdr", &phdr));
            pdta.extend(chunk(b"pbag", &bag_bytes(&self.pbag)));
            pdta.extend(chunk(b"pmod", &mod_bytes(&self.pmod)));
            pdta.extend(chunk(b"pgen", &gen_bytes(&self.pgen)));
            pdta.extend(chunk(b"inst", &ihdr));
            pdta.extend(chunk(b"ibag", &bag_bytes(&self.ibag)));
            pdta.extend(chunk(b"imod", &mod_bytes(&self.imod)));
            pdta.extend(chunk(b"igen", &gen_bytes(&self.igen)));
            pdta.extend(chunk(b"shdr", &shdr));

            let mut body = Vec::new();
            body.extend_from_slice(b"sfbk");
            body.extend(list_chunk(b"INFO", &info));
            body.extend(list_chunk(b"sdta", &sdta));
            body.extend(list_chunk(b"pdta", &pdta));

            chunk(b"RIFF", &body)
        }
    }
}
