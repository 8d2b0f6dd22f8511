use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use bitflags::bitflags;
use byteorder::{ReadBytesExt, LittleEndian};
use colored::Colorize;

use crate::dtype::{ReadFrom, SfbkError};
use crate::sfbk::{SfFile, SfPreset as SfPresetData, SfInst, SfMod, SfZone, SampleHeader, SampleType, GenType, GEN_LAST, gen_excluded_at_preset_level};

/* EMU8k/10k hardware applies this factor to initial attenuation generator
 * values set at preset and instrument level in a soundfont. We apply this
 * factor when loading the generator values to stay compatible as most
 * existing soundfonts expect exactly this (strange, non-standard) behaviour. */
const EMU_ATTENUATION_FACTOR: f64 = 0.4;

/// Loader options. Both are advisory: `lock_memory` is recorded for the
/// embedder to act on, `midi_channels` is accepted for compatibility with
/// hosts that size per-channel resources from it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub lock_memory: bool,
    pub midi_channels: u16
}
impl Default for Settings {
    fn default() -> Settings {
        Settings { lock_memory: true, midi_channels: 16 }
    }
}

bitflags! {
    /// Decoded modulator source descriptor bits (SF 2.01 section 8.2). The
    /// zero states are meaningful: positive, unipolar, general controller,
    /// linear curve.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ModFlags: u8 {
        const NEGATIVE = 1;
        const BIPOLAR = 2;
        const CONCAVE = 4;
        const CONVEX = 8;
        const SWITCH = 4 | 8;
        const CC = 16;
    }
}

/// How a modulator joins the ones already on a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModMode {
    /// Instrument modulators supersede identical default modulators.
    Overwrite,
    /// Preset modulators add to the instrument/default ones.
    Add
}

/// A runtime modulator, translated from the 10-byte wire record. Only the
/// linear transform survives translation; records with an unknown source
/// curve or a non-linear transform are kept but disabled (amount 0), since
/// a disabled instrument modulator must still shadow its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modulator {
    pub src1: u8,
    pub flags1: ModFlags,
    pub dest: u16,
    pub src2: u8,
    pub flags2: ModFlags,
    pub amount: i16
}
impl Modulator {
    fn from_record(record: &SfMod) -> Modulator {
        let (src1, flags1, curve1_ok) = decode_mod_source(record.src);
        let (src2, flags2, curve2_ok) = decode_mod_source(record.amtsrc);

        let mut amount = record.amount;
        if !curve1_ok || !curve2_ok {
            amount = 0;
        }
        // SF2.01 only uses the 'linear' transform (0)
        if record.trans != 0 {
            amount = 0;
        }

        Modulator { src1, flags1, dest: record.dest, src2, flags2, amount }
    }

    /// SF2.01 section 9.5.1: modulators compare equal on everything except
    /// their amount.
    pub fn test_identity(&self, other: &Modulator) -> bool {
        self.src1 == other.src1
            && self.flags1 == other.flags1
            && self.src2 == other.src2
            && self.flags2 == other.flags2
            && self.dest == other.dest
    }
}

/// Split a raw modulator source word into (index, flags, curve-known).
fn decode_mod_source(src: u16) -> (u8, ModFlags, bool) {
    // index of the source, seven-bit value, SF2.01 section 8.2, page 50
    let index = (src & 127) as u8;
    let mut flags = ModFlags::empty();

    // Bit 7: CC flag, bit 8: direction, bit 9: polarity
    if src & (1 << 7) != 0 {
        flags |= ModFlags::CC;
    }
    if src & (1 << 8) != 0 {
        flags |= ModFlags::NEGATIVE;
    }
    if src & (1 << 9) != 0 {
        flags |= ModFlags::BIPOLAR;
    }

    // source curve type is a 6-bit value, SF2.01 section 8.2.1 page 52
    let curve_ok = match (src >> 10) & 63 {
        0 => true,
        1 => { flags |= ModFlags::CONCAVE; true },
        2 => { flags |= ModFlags::CONVEX; true },
        3 => { flags |= ModFlags::SWITCH; true },
        _ => false // unknown curve type, the modulator has to be deactivated
    };

    (index, flags, curve_ok)
}

/// One of the 59 generator slots of a zone: a value plus a flag telling
/// whether the file actually set it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generator {
    pub val: f64,
    pub set: bool
}
pub type GenArray = [Generator; GEN_LAST];

/// The key/velocity rectangle a zone answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneRange {
    pub keylo: u8,
    pub keyhi: u8,
    pub vello: u8,
    pub velhi: u8
}
impl Default for ZoneRange {
    fn default() -> ZoneRange {
        ZoneRange { keylo: 0, keyhi: 127, vello: 0, velhi: 127 }
    }
}
impl ZoneRange {
    pub fn inside(&self, key: u8, vel: u8) -> bool {
        self.keylo <= key && key <= self.keyhi && self.vello <= vel && vel <= self.velhi
    }
    /// Narrow to the overlap with `other`. The result may be empty (lo > hi),
    /// in which case `inside` never matches.
    fn intersect(&mut self, other: &ZoneRange) {
        self.keylo = self.keylo.max(other.keylo);
        self.keyhi = self.keyhi.min(other.keyhi);
        self.vello = self.vello.max(other.vello);
        self.velhi = self.velhi.min(other.velhi);
    }
}

/// A runtime sample. `start` is the absolute word offset (byte offset for
/// Ogg-compressed banks) of the first frame inside the bank's sample data;
/// `end` is the offset of the LAST valid frame relative to `start`, and the
/// loop points are offsets from `start` as well - see the fixup pass notes on
/// [`SampleHeader`]. Voices hold samples through [`SampleRef`] clones; a
/// strong count above one therefore means the sample is in use.
#[derive(Debug)]
pub struct Sample {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub sample_rate: u32,
    pub orig_pitch: u8,
    pub pitch_adj: i8,
    pub sample_type: SampleType,
    pub idx: usize
}
impl Sample {
    fn import(header: &SampleHeader, idx: usize) -> Sample {
        Sample {
            name: header.name.to_string(),
            start: header.start,
            end: header.end,
            loop_start: header.loop_start,
            loop_end: header.loop_end,
            sample_rate: header.sample_rate,
            orig_pitch: header.orig_pitch,
            pitch_adj: header.pitch_adj,
            sample_type: header.sample_type(),
            idx
        }
    }
    pub fn in_rom(&self) -> bool {
        self.sample_type.contains(SampleType::ROM)
    }
}
pub type SampleRef = Arc<Sample>;

#[derive(Debug)]
pub struct InstZone {
    pub name: String,
    pub range: ZoneRange,
    pub gens: GenArray,
    pub mods: Vec<Modulator>,
    /// `None` only on a global zone.
    pub sample: Option<SampleRef>
}
impl InstZone {
    fn import(name: String, sfzone: &SfZone, preset_zone_range: &ZoneRange, samples: &[SampleRef]) -> InstZone {
        let mut zone = InstZone {
            name,
            range: ZoneRange::default(),
            gens: [Generator::default(); GEN_LAST],
            mods: Vec::with_capacity(sfzone.mods.len()),
            sample: None
        };
        import_zone_gens(&mut zone.gens, &mut zone.range, sfzone);

        // the instrument zone only ever answers inside its preset zone, so the
        // ranges can be intersected once here instead of on every note-on
        zone.range.intersect(preset_zone_range);

        if let Some(sample_idx) = sfzone.link {
            zone.sample = samples.get(sample_idx).cloned();
        }

        for record in &sfzone.mods {
            zone.mods.push(Modulator::from_record(record));
        }
        zone
    }
}

#[derive(Debug)]
pub struct Instrument {
    pub name: String,
    pub global_zone: Option<InstZone>,
    pub zones: Vec<InstZone>
}
impl Instrument {
    fn import(sfinst: &SfInst, preset_zone_range: &ZoneRange, samples: &[SampleRef]) -> Instrument {
        let name = if !sfinst.header.name.is_empty() {
            sfinst.header.name.to_string()
        } else {
            "<untitled>".to_string()
        };

        let mut inst = Instrument {
            name: name.clone(),
            global_zone: None,
            zones: Vec::with_capacity(sfinst.zones.len())
        };

        for (count, sfzone) in sfinst.zones.iter().enumerate() {
            let zone = InstZone::import(format!("{}/{}", name, count), sfzone, preset_zone_range, samples);
            if count == 0 && zone.sample.is_none() {
                inst.global_zone = Some(zone);
            } else {
                inst.zones.push(zone);
            }
        }
        inst
    }
}

#[derive(Debug)]
pub struct PresetZone {
    pub name: String,
    pub range: ZoneRange,
    pub gens: GenArray,
    pub mods: Vec<Modulator>,
    /// `None` only on a global zone. Each referencing preset zone gets its own
    /// instrument instance because the instrument zone ranges are narrowed to
    /// this zone at import time.
    pub inst: Option<Instrument>
}
impl PresetZone {
    fn import(name: String, sfzone: &SfZone, sfdata: &SfFile, samples: &[SampleRef]) -> PresetZone {
        let mut zone = PresetZone {
            name,
            range: ZoneRange::default(),
            gens: [Generator::default(); GEN_LAST],
            mods: Vec::with_capacity(sfzone.mods.len()),
            inst: None
        };
        import_zone_gens(&mut zone.gens, &mut zone.range, sfzone);

        if let Some(inst_idx) = sfzone.link {
            // index validity was checked by the fixup pass
            if let Some(sfinst) = sfdata.insts.get(inst_idx) {
                zone.inst = Some(Instrument::import(sfinst, &zone.range, samples));
            }
        }

        for record in &sfzone.mods {
            zone.mods.push(Modulator::from_record(record));
        }
        zone
    }
}

/// Convert the parsed generator list of a zone into the typed slot array and
/// key/velocity ranges shared by preset and instrument zones.
fn import_zone_gens(gens: &mut GenArray, range: &mut ZoneRange, sfzone: &SfZone) {
    for gen in &sfzone.gens {
        match gen.id {
            GenType::KeyRange => {
                if let Some((lo, hi)) = gen.amount.as_range() {
                    range.keylo = lo;
                    range.keyhi = hi;
                }
            },
            GenType::VelRange => {
                if let Some((lo, hi)) = gen.amount.as_range() {
                    range.vello = lo;
                    range.velhi = hi;
                }
            },
            GenType::Attenuation => {
                gens[gen.id as usize].val = gen.amount.as_sword().unwrap_or(0) as f64 * EMU_ATTENUATION_FACTOR;
                gens[gen.id as usize].set = true;
            },
            id => {
                // some generators are documented with unsigned word amounts
                // but every known one behaves as a signed word
                gens[id as usize].val = gen.amount.as_sword().unwrap_or(0) as f64;
                gens[id as usize].set = true;
            }
        }
    }
}

#[derive(Debug)]
pub struct Preset {
    name: String,
    bank: u16,
    num: u16,
    pub global_zone: Option<PresetZone>,
    pub zones: Vec<PresetZone>
}
impl Preset {
    fn import(sfpreset: &SfPresetData, sfdata: &SfFile, samples: &[SampleRef]) -> Preset {
        let name = if !sfpreset.header.name.is_empty() {
            sfpreset.header.name.to_string()
        } else {
            format!("Bank{},Pre{}", sfpreset.header.bank, sfpreset.header.prenum)
        };

        let mut preset = Preset {
            name: name.clone(),
            bank: sfpreset.header.bank,
            num: sfpreset.header.prenum,
            global_zone: None,
            zones: Vec::with_capacity(sfpreset.zones.len())
        };

        for (count, sfzone) in sfpreset.zones.iter().enumerate() {
            let zone = PresetZone::import(format!("{}/{}", name, count), sfzone, sfdata, samples);
            if count == 0 && zone.inst.is_none() {
                preset.global_zone = Some(zone);
            } else {
                preset.zones.push(zone);
            }
        }
        preset
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn bank(&self) -> u16 {
        self.bank
    }
    pub fn program(&self) -> u16 {
        self.num
    }

    /// Enumerate and start one voice per instrument zone matching (key, vel),
    /// composing generators and modulators with SF 2.01 precedence: instrument
    /// level supersedes defaults, preset level adds on top.
    pub fn note_on<S: Synthesizer>(&self, synth: &mut S, chan: u8, key: u8, vel: u8) -> Result<(), SfbkError> {
        let global_preset_zone = self.global_zone.as_ref();

        for preset_zone in &self.zones {
            if !preset_zone.range.inside(key, vel) {
                continue;
            }
            let inst = match &preset_zone.inst {
                Some(inst) => inst,
                None => continue
            };
            let global_inst_zone = inst.global_zone.as_ref();

            for inst_zone in &inst.zones {
                // make sure this instrument zone has a valid, playable sample
                let sample = match &inst_zone.sample {
                    Some(sample) if !sample.in_rom() => sample,
                    _ => continue
                };
                // preset and instrument ranges were intersected at import, so
                // one test covers both
                if !inst_zone.range.inside(key, vel) {
                    continue;
                }

                let mut voice = synth.alloc_voice(sample, chan, key, vel).ok_or(SfbkError::VoiceAllocFailed)?;

                /* Instrument level, generators: a generator in a local
                 * instrument zone supersedes a global instrument zone
                 * generator, both supersede the default (SF 2.01 section 9.4
                 * 'bullet' 4). */
                for i in 0..GEN_LAST {
                    if inst_zone.gens[i].set {
                        voice.gen_set(i, inst_zone.gens[i].val);
                    } else if let Some(global) = global_inst_zone {
                        if global.gens[i].set {
                            voice.gen_set(i, global.gens[i].val);
                        }
                    }
                    // not defined by this instrument, leave the default alone
                }

                /* Instrument level, modulators: global list first, then local
                 * ones, where a local modulator knocks out an identical global
                 * one (SF 2.01 page 69, 'bullet' 8). */
                let mut mod_list: Vec<Option<&Modulator>> = Vec::new();
                if let Some(global) = global_inst_zone {
                    mod_list.extend(global.mods.iter().map(Some));
                }
                merge_mods(&mut mod_list, &inst_zone.mods);
                for m in mod_list.into_iter().flatten() {
                    // disabled modulators CANNOT be skipped: they still
                    // supersede an identical default modulator
                    voice.add_mod(m, ModMode::Overwrite);
                }

                /* Preset level, generators: the excluded set (SF 2.01 section
                 * 8.5 page 58) never applies at preset level, the others are
                 * added to the summing node. */
                for i in 0..GEN_LAST {
                    if gen_excluded_at_preset_level(i) {
                        continue;
                    }
                    if preset_zone.gens[i].set {
                        voice.gen_incr(i, preset_zone.gens[i].val);
                    } else if let Some(global) = global_preset_zone {
                        if global.gens[i].set {
                            voice.gen_incr(i, global.gens[i].val);
                        }
                    }
                }

                /* Preset level, modulators: same merge, but disabled
                 * modulators can simply be skipped here (SF 2.01 page 70,
                 * first bullet). */
                let mut mod_list: Vec<Option<&Modulator>> = Vec::new();
                if let Some(global) = global_preset_zone {
                    mod_list.extend(global.mods.iter().map(Some));
                }
                merge_mods(&mut mod_list, &preset_zone.mods);
                for m in mod_list.into_iter().flatten() {
                    if m.amount != 0 {
                        voice.add_mod(m, ModMode::Add);
                    }
                }

                synth.start_voice(voice);
            }
        }
        Ok(())
    }
}

/// Append `local` modulators to the list, knocking out entries they are
/// identical to (SF2.01 section 9.5.1).
fn merge_mods<'a>(mod_list: &mut Vec<Option<&'a Modulator>>, local: &'a [Modulator]) {
    for m in local {
        for entry in mod_list.iter_mut() {
            if entry.map_or(false, |existing| existing.test_identity(m)) {
                *entry = None;
            }
        }
        mod_list.push(Some(m));
    }
}

/// What the loader needs from the synthesizer on a note-on: allocate a voice
/// for a sample, feed it parameters, start it. The enumerator holds no state
/// of its own, so the synthesizer may serialize calls however it likes.
pub trait Voice {
    fn gen_set(&mut self, gen: usize, val: f64);
    fn gen_incr(&mut self, gen: usize, val: f64);
    fn add_mod(&mut self, m: &Modulator, mode: ModMode);
}
pub trait Synthesizer {
    type Voice: Voice;
    /// `None` means the voice pool is exhausted; note-on fails as a whole.
    fn alloc_voice(&mut self, sample: &SampleRef, chan: u8, key: u8, vel: u8) -> Option<Self::Voice>;
    fn start_voice(&mut self, voice: Self::Voice);
}

/// A fully imported SoundFont: presets ordered by (bank, program), shared
/// sample handles, and the sample data loaded in one block. The intermediate
/// parse tree is gone by the time this exists.
#[derive(Debug)]
pub struct SoundFont {
    filename: String,
    mlock: bool,
    pub sample_pos: u64,
    pub sample_size: u32,
    pub sample24_pos: u64,
    pub sample24_size: u32,
    /// 16-bit sample data. For Ogg-compressed banks these are the raw
    /// compressed bytes, pairwise; offsets into them are byte-denominated.
    pub sample_data: Vec<i16>,
    /// Least significant bytes extending `sample_data` to 24 bit, if the bank
    /// carries an sm24 chunk.
    pub sample_data24: Option<Vec<u8>>,
    pub samples: Vec<SampleRef>,
    presets: Vec<Preset>
}

impl SoundFont {
    pub fn load<P: AsRef<Path>>(path: P, settings: &Settings) -> Result<SoundFont, SfbkError> {
        let mut file = std::fs::File::open(&path)?;
        SoundFont::import(&mut file, path.as_ref().display().to_string(), settings)
    }

    /// Parse, fix up and import a bank from any seekable source. The reader
    /// is needed a second time after parsing, to pull in the sample data.
    pub fn import<R: Read + Seek>(file: &mut R, filename: String, settings: &Settings) -> Result<SoundFont, SfbkError> {
        let mut sfdata = SfFile::default();
        sfdata.read_from_file(file)?;

        let mut sfont = SoundFont {
            filename,
            mlock: settings.lock_memory,
            sample_pos: sfdata.sample_pos,
            sample_size: sfdata.sample_size,
            sample24_pos: sfdata.sample24_pos,
            sample24_size: sfdata.sample24_size,
            sample_data: Vec::new(),
            sample_data24: None,
            samples: Vec::with_capacity(sfdata.samples.len()),
            presets: Vec::with_capacity(sfdata.presets.len())
        };

        sfont.load_sampledata(file)?;

        for (idx, header) in sfdata.samples.iter().enumerate() {
            sfont.samples.push(Arc::new(Sample::import(header, idx)));
        }

        for sfpreset in &sfdata.presets {
            let preset = Preset::import(sfpreset, &sfdata, &sfont.samples);
            sfont.add_preset(preset);
        }

        // sfdata is dropped here; the runtime graph keeps nothing of it
        Ok(sfont)
    }

    /// Load the sample data in one block.
    fn load_sampledata<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfbkError> {
        if self.sample_size % 2 == 1 {
            println!("{}smpl chunk has an odd byte size, dropping the trailing byte!", "Warning: ".yellow());
        }
        file.seek(SeekFrom::Start(self.sample_pos))?;
        let mut data = vec![0_i16; self.sample_size as usize / 2];
        file.read_i16_into::<LittleEndian>(&mut data)?;
        self.sample_data = data;

        if self.sample24_size > 0 {
            file.seek(SeekFrom::Start(self.sample24_pos))?;
            let mut data24 = vec![0_u8; self.sample24_size as usize];
            file.read_exact(&mut data24)?;
            self.sample_data24 = Some(data24);
        }
        Ok(())
    }

    /// Keep the preset list sorted by bank, then program. A preset with the
    /// same (bank, program) as an existing one lands behind it, so the first
    /// one loaded keeps winning lookups.
    fn add_preset(&mut self, preset: Preset) {
        let pos = self.presets.iter()
            .position(|cur| (preset.bank, preset.num) < (cur.bank, cur.num))
            .unwrap_or(self.presets.len());
        self.presets.insert(pos, preset);
    }

    pub fn name(&self) -> &str {
        &self.filename
    }

    /// Whether the embedder asked for the sample buffers to be pinned in RAM.
    pub fn lock_memory(&self) -> bool {
        self.mlock
    }

    /// First preset matching (bank, program) exactly.
    pub fn get_preset(&self, bank: u32, program: u32) -> Option<&Preset> {
        self.presets.iter().find(|p| p.bank as u32 == bank && p.num as u32 == program)
    }

    pub fn presets(&self) -> std::slice::Iter<'_, Preset> {
        self.presets.iter()
    }

    /// True while any voice still holds one of this font's samples. The font
    /// must not be dropped while this returns true; the caller has to stop
    /// all voices first.
    pub fn samples_in_use(&self) -> bool {
        self.samples.iter().any(|sample| Arc::strong_count(sample) > 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfbk::test_support::*;
    use std::io::Cursor;

    struct MockVoice {
        sample: SampleRef,
        chan: u8,
        key: u8,
        vel: u8,
        set: Vec<(usize, f64)>,
        incr: Vec<(usize, f64)>,
        mods: Vec<(Modulator, ModMode)>
    }
    impl Voice for MockVoice {
        fn gen_set(&mut self, gen: usize, val: f64) {
            self.set.push((gen, val));
        }
        fn gen_incr(&mut self, gen: usize, val: f64) {
            self.incr.push((gen, val));
        }
        fn add_mod(&mut self, m: &Modulator, mode: ModMode) {
            self.mods.push((*m, mode));
        }
    }

    #[derive(Default)]
    struct MockSynth {
        started: Vec<MockVoice>,
        exhausted: bool
    }
    impl Synthesizer for MockSynth {
        type Voice = MockVoice;
        fn alloc_voice(&mut self, sample: &SampleRef, chan: u8, key: u8, vel: u8) -> Option<MockVoice> {
            if self.exhausted {
                return None;
            }
            Some(MockVoice {
                sample: Arc::clone(sample),
                chan,
                key,
                vel,
                set: Vec::new(),
                incr: Vec::new(),
                mods: Vec::new()
            })
        }
        fn start_voice(&mut self, voice: MockVoice) {
            self.started.push(voice);
        }
    }

    fn load(bank: &BankBuilder) -> SoundFont {
        SoundFont::import(&mut Cursor::new(bank.build()), "test.sf2".to_string(), &Settings::default()).unwrap()
    }

    #[test]
    fn minimal_bank_plays_one_voice() {
        let sfont = load(&BankBuilder::minimal());
        assert_eq!(sfont.name(), "test.sf2");
        assert_eq!(sfont.sample_data.len(), 1024);

        let preset = sfont.get_preset(0, 0).unwrap();
        assert_eq!(preset.bank(), 0);
        assert_eq!(preset.program(), 0);
        assert_eq!(preset.name(), "Piano");

        let mut synth = MockSynth::default();
        preset.note_on(&mut synth, 0, 60, 100).unwrap();
        assert_eq!(synth.started.len(), 1);
        let voice = &synth.started[0];
        assert_eq!(voice.sample.idx, 0);
        assert_eq!((voice.chan, voice.key, voice.vel), (0, 60, 100));
        assert_eq!(voice.sample.end, 1023);
    }

    #[test]
    fn note_on_is_deterministic() {
        let sfont = load(&BankBuilder::minimal());
        let preset = sfont.get_preset(0, 0).unwrap();

        let mut synth = MockSynth::default();
        preset.note_on(&mut synth, 0, 60, 100).unwrap();
        preset.note_on(&mut synth, 0, 60, 100).unwrap();
        assert_eq!(synth.started.len(), 2);

        let (a, b) = (&synth.started[0], &synth.started[1]);
        assert_eq!(a.sample.idx, b.sample.idx);
        assert_eq!(a.set, b.set);
        assert_eq!(a.incr, b.incr);
        assert_eq!(a.mods, b.mods);
    }

    #[test]
    fn get_preset_misses_return_none() {
        let sfont = load(&BankBuilder::minimal());
        assert!(sfont.get_preset(0, 1).is_none());
        assert!(sfont.get_preset(5, 0).is_none());
    }

    #[test]
    fn voice_exhaustion_fails_note_on() {
        let sfont = load(&BankBuilder::minimal());
        let mut synth = MockSynth { exhausted: true, ..Default::default() };
        let result = sfont.get_preset(0, 0).unwrap().note_on(&mut synth, 0, 60, 100);
        assert!(matches!(result, Err(SfbkError::VoiceAllocFailed)));
        assert!(synth.started.is_empty());
    }

    #[test]
    fn global_preset_zone_carries_scaled_attenuation() {
        let mut bank = BankBuilder::minimal();
        bank.phdr = vec![("Layered", 0, 0, 0), ("EOP", 0, 0, 2)];
        bank.pbag = vec![(0, 0), (1, 0), (2, 0)];
        bank.pgen = vec![
            gen_word(GenType::Attenuation as u16, 100),
            gen_uword(GenType::Instrument as u16, 0),
        ];
        let sfont = load(&bank);
        let preset = sfont.get_preset(0, 0).unwrap();

        let global = preset.global_zone.as_ref().unwrap();
        assert!(global.inst.is_none());
        assert!(global.gens[GenType::Attenuation as usize].set);
        assert_eq!(global.gens[GenType::Attenuation as usize].val, 40.0); // 100 * 0.4
        assert_eq!(preset.zones.len(), 1);
        assert!(preset.zones[0].inst.is_some());

        // the global attenuation reaches the voice as a preset-level increment
        let mut synth = MockSynth::default();
        preset.note_on(&mut synth, 0, 60, 100).unwrap();
        assert!(synth.started[0].incr.contains(&(GenType::Attenuation as usize, 40.0)));
    }

    #[test]
    fn ranges_intersect_at_import() {
        let mut bank = BankBuilder::minimal();
        bank.pbag = vec![(0, 0), (2, 0)];
        bank.pgen = vec![
            gen_range(GenType::KeyRange as u16, 36, 72),
            gen_uword(GenType::Instrument as u16, 0),
        ];
        bank.ibag = vec![(0, 0), (2, 0)];
        bank.igen = vec![
            gen_range(GenType::KeyRange as u16, 48, 96),
            gen_uword(GenType::SampleId as u16, 0),
        ];
        let sfont = load(&bank);
        let preset = sfont.get_preset(0, 0).unwrap();

        let inst_zone = &preset.zones[0].inst.as_ref().unwrap().zones[0];
        assert_eq!((inst_zone.range.keylo, inst_zone.range.keyhi), (48, 72));

        // key 40 matches the preset zone but not the intersected instrument zone
        let mut synth = MockSynth::default();
        preset.note_on(&mut synth, 0, 40, 100).unwrap();
        assert!(synth.started.is_empty());

        preset.note_on(&mut synth, 0, 60, 100).unwrap();
        assert_eq!(synth.started.len(), 1);

        // and key 100 is outside both
        let mut synth = MockSynth::default();
        preset.note_on(&mut synth, 0, 100, 100).unwrap();
        assert!(synth.started.is_empty());
    }

    #[test]
    fn local_inst_modulator_replaces_identical_global() {
        let mut bank = BankBuilder::minimal();
        // instrument zone 0 is global (modulator only), zone 1 plays sample 0
        bank.ihdr = vec![("Piano Inst", 0), ("EOI", 2)];
        bank.ibag = vec![(0, 0), (0, 1), (1, 2)];
        bank.igen = vec![gen_uword(GenType::SampleId as u16, 0)];
        bank.imod = vec![
            (2, 48, 100, 0, 0), // global: vel -> attenuation, amount 100
            (2, 48, 50, 0, 0),  // local: identical source/dest, amount 50
        ];
        let sfont = load(&bank);
        let preset = sfont.get_preset(0, 0).unwrap();

        let mut synth = MockSynth::default();
        preset.note_on(&mut synth, 0, 60, 100).unwrap();
        let voice = &synth.started[0];
        let inst_mods: Vec<_> = voice.mods.iter().filter(|(_, mode)| *mode == ModMode::Overwrite).collect();
        assert_eq!(inst_mods.len(), 1);
        assert_eq!(inst_mods[0].0.amount, 50);
    }

    #[test]
    fn disabled_inst_modulator_is_still_added() {
        let mut bank = BankBuilder::minimal();
        bank.ibag = vec![(0, 0), (1, 1)];
        bank.igen = vec![gen_uword(GenType::SampleId as u16, 0)];
        bank.imod = vec![(2, 48, 0, 0, 0)]; // amount 0
        let sfont = load(&bank);

        let mut synth = MockSynth::default();
        sfont.get_preset(0, 0).unwrap().note_on(&mut synth, 0, 60, 100).unwrap();
        assert_eq!(synth.started[0].mods.len(), 1);
        assert_eq!(synth.started[0].mods[0].1, ModMode::Overwrite);
    }

    #[test]
    fn zero_amount_preset_modulator_is_dropped() {
        let mut bank = BankBuilder::minimal();
        bank.pbag = vec![(0, 0), (1, 2)];
        bank.pmod = vec![
            (2, 48, 0, 0, 0),   // amount 0, dropped
            (2, 51, 960, 0, 0), // amount != 0, added
        ];
        let sfont = load(&bank);

        let mut synth = MockSynth::default();
        sfont.get_preset(0, 0).unwrap().note_on(&mut synth, 0, 60, 100).unwrap();
        let preset_mods: Vec<_> = synth.started[0].mods.iter().filter(|(_, mode)| *mode == ModMode::Add).collect();
        assert_eq!(preset_mods.len(), 1);
        assert_eq!(preset_mods[0].0.dest, 51);
    }

    #[test]
    fn rom_sample_zone_is_skipped() {
        let mut bank = BankBuilder::minimal();
        bank.shdr[0].sample_type = 0x8001;
        let sfont = load(&bank);

        let mut synth = MockSynth::default();
        sfont.get_preset(0, 0).unwrap().note_on(&mut synth, 0, 60, 100).unwrap();
        assert!(synth.started.is_empty());
    }

    #[test]
    fn global_inst_zone_generator_is_inherited() {
        let mut bank = BankBuilder::minimal();
        // global zone sets Pan, playing zone leaves it alone
        bank.ihdr = vec![("Piano Inst", 0), ("EOI", 2)];
        bank.ibag = vec![(0, 0), (1, 0), (2, 0)];
        bank.igen = vec![
            gen_word(GenType::Pan as u16, 250),
            gen_uword(GenType::SampleId as u16, 0),
        ];
        let sfont = load(&bank);

        let mut synth = MockSynth::default();
        sfont.get_preset(0, 0).unwrap().note_on(&mut synth, 0, 60, 100).unwrap();
        assert!(synth.started[0].set.contains(&(GenType::Pan as usize, 250.0)));
    }

    #[test]
    fn presets_are_sorted_by_bank_and_program() {
        let mut bank = BankBuilder::minimal();
        bank.phdr = vec![
            ("C", 0, 1, 0),
            ("B", 5, 0, 1),
            ("A", 3, 0, 2),
            ("EOP", 0, 0, 3),
        ];
        bank.pbag = vec![(0, 0), (1, 0), (2, 0), (3, 0)];
        bank.pgen = vec![
            gen_uword(GenType::Instrument as u16, 0),
            gen_uword(GenType::Instrument as u16, 0),
            gen_uword(GenType::Instrument as u16, 0),
        ];
        let sfont = load(&bank);
        let order: Vec<(u16, u16)> = sfont.presets().map(|p| (p.bank(), p.program())).collect();
        assert_eq!(order, vec![(0, 3), (0, 5), (1, 0)]);
        assert_eq!(sfont.get_preset(0, 5).unwrap().name(), "B");
    }

    #[test]
    fn unnamed_preset_gets_fallback_name() {
        let mut bank = BankBuilder::minimal();
        bank.phdr = vec![("", 2, 1, 0), ("EOP", 0, 0, 1)];
        let sfont = load(&bank);
        assert_eq!(sfont.get_preset(1, 2).unwrap().name(), "Bank1,Pre2");
    }

    #[test]
    fn samples_in_use_follows_voice_handles() {
        let sfont = load(&BankBuilder::minimal());
        assert!(!sfont.samples_in_use());

        let mut synth = MockSynth::default();
        sfont.get_preset(0, 0).unwrap().note_on(&mut synth, 0, 60, 100).unwrap();
        assert!(sfont.samples_in_use());

        synth.started.clear(); // voices released
        assert!(!sfont.samples_in_use());
    }

    #[test]
    fn sample24_data_is_loaded() {
        let mut bank = BankBuilder::minimal();
        bank.version = (2, 4);
        bank.sm24 = Some((0..1024_u16).map(|i| i as u8).collect());
        let sfont = load(&bank);
        let data24 = sfont.sample_data24.as_ref().unwrap();
        assert_eq!(data24.len(), 1024);
        assert_eq!(data24[1], 1);
    }

    #[test]
    fn modulator_translation_decodes_source_bits() {
        // bit7 CC, bit8 negative, bit9 bipolar, curve 1 (concave), index 2
        let record = SfMod { src: 0x0782, dest: 48, amount: 960, amtsrc: 0, trans: 0 };
        let m = Modulator::from_record(&record);
        assert_eq!(m.src1, 2);
        assert!(m.flags1.contains(ModFlags::CC));
        assert!(m.flags1.contains(ModFlags::NEGATIVE));
        assert!(m.flags1.contains(ModFlags::BIPOLAR));
        assert!(m.flags1.contains(ModFlags::CONCAVE));
        assert_eq!(m.dest, 48);
        assert_eq!(m.amount, 960);
        assert_eq!(m.flags2, ModFlags::empty());
    }

    #[test]
    fn modulator_curve_types_map_to_flags() {
        for (curve, flags) in [
            (0_u16, ModFlags::empty()),
            (1, ModFlags::CONCAVE),
            (2, ModFlags::CONVEX),
            (3, ModFlags::SWITCH),
        ] {
            let m = Modulator::from_record(&SfMod { src: curve << 10, dest: 0, amount: 7, amtsrc: 0, trans: 0 });
            assert_eq!(m.flags1 & (ModFlags::CONCAVE | ModFlags::CONVEX), flags & (ModFlags::CONCAVE | ModFlags::CONVEX));
            assert_eq!(m.amount, 7);
        }
    }

    #[test]
    fn unknown_curve_disables_modulator() {
        let m = Modulator::from_record(&SfMod { src: 5 << 10, dest: 48, amount: 960, amtsrc: 0, trans: 0 });
        assert_eq!(m.amount, 0);
    }

    #[test]
    fn nonlinear_transform_disables_modulator() {
        let m = Modulator::from_record(&SfMod { src: 2, dest: 48, amount: 960, amtsrc: 0, trans: 2 });
        assert_eq!(m.amount, 0);
    }

    #[test]
    fn modulator_identity_ignores_amount() {
        let a = Modulator::from_record(&SfMod { src: 2, dest: 48, amount: 100, amtsrc: 0, trans: 0 });
        let b = Modulator::from_record(&SfMod { src: 2, dest: 48, amount: -3, amtsrc: 0, trans: 0 });
        let c = Modulator::from_record(&SfMod { src: 2, dest: 51, amount: 100, amtsrc: 0, trans: 0 });
        assert!(a.test_identity(&b));
        assert!(!a.test_identity(&c));
    }

    #[test]
    fn zone_range_edges() {
        let range = ZoneRange { keylo: 36, keyhi: 72, vello: 10, velhi: 100 };
        assert!(range.inside(36, 10));
        assert!(range.inside(72, 100));
        assert!(!range.inside(35, 50));
        assert!(!range.inside(73, 50));
        assert!(!range.inside(50, 9));
        assert!(!range.inside(50, 101));

        // an empty intersection never matches
        let mut empty = ZoneRange { keylo: 60, keyhi: 70, ..ZoneRange::default() };
        empty.intersect(&ZoneRange { keylo: 80, keyhi: 90, ..ZoneRange::default() });
        assert!(empty.keylo > empty.keyhi);
        for key in 0..=127 {
            assert!(!empty.inside(key, 64));
        }
    }
}
