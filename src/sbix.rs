//! impl subset() for sbix

use font_types::GlyphId;

use crate::face::{Face, FontBuilder};
use crate::sanitize::{FontData, ReadError};
use crate::serialize::{ObjIdx, OffsetWhence, SerializeErrorFlags, Serializer};
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    SBIX,
};

pub(crate) struct Sbix<'a> {
    pub data: FontData<'a>,
}

// reference: subset() for sbix in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/4df11621cecf6cf855e9e13f6f5c9432748f9b3a/src/OT/Color/sbix/sbix.hh#L420
impl Subset for Sbix<'_> {
    fn subset(
        &self,
        plan: &Plan,
        _face: &Face,
        s: &mut Serializer,
        _builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        subset_sbix(self.data, plan, s).map_err(|_| SubsetTableError(SBIX))
    }
}

fn read_err(_: ReadError) -> SerializeErrorFlags {
    SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR
}

fn subset_sbix(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<(), SerializeErrorFlags> {
    let version: u16 = data.read_at(0).map_err(read_err)?;
    let flags: u16 = data.read_at(2).map_err(read_err)?;
    let num_strikes: u32 = data.read_at(4).map_err(read_err)?;

    s.embed(version)?;
    s.embed(flags)?;
    let num_strikes_pos = s.embed(0u32)?;

    let mut offset_positions = Vec::with_capacity(num_strikes as usize);
    for _ in 0..num_strikes {
        offset_positions.push(s.embed(0u32)?);
    }

    let mut packed = 0usize;
    for i in 0..num_strikes as usize {
        let strike_offset: u32 = data.read_at(8 + i * 4).map_err(read_err)?;
        let Some(strike) = data.resolve_offset(strike_offset) else {
            continue;
        };
        let snap = s.snapshot();
        match subset_strike(strike, plan, s) {
            Ok(obj) => {
                let pos = offset_positions[packed];
                s.add_link(pos..pos + 4, obj, OffsetWhence::Head, 0, false)?;
                packed += 1;
            }
            Err(_) => s.revert_snapshot(snap),
        }
    }
    if packed == 0 {
        return Err(s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY));
    }
    // unused strike offset slots stay allocated only in the count
    s.check_assign::<u32>(
        num_strikes_pos,
        packed,
        SerializeErrorFlags::SERIALIZE_ERROR_INT_OVERFLOW,
    )
}

/// A strike keeps the glyph data of retained glyphs; a strike with no data
/// left is dropped.
fn subset_strike(
    strike: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let ppem: u16 = strike.read_at(0).map_err(read_err)?;
    let ppi: u16 = strike.read_at(2).map_err(read_err)?;

    s.push()?;
    s.embed(ppem)?;
    s.embed(ppi)?;

    let offsets_len = 4 * (plan.num_output_glyphs + 1);
    let mut pos = s.allocate_size(offsets_len, true)?;

    let mut offset = (4 + offsets_len) as u32;
    s.check_assign::<u32>(pos, offset as usize, SerializeErrorFlags::SERIALIZE_ERROR_INT_OVERFLOW)?;
    pos += 4;

    let mut has_glyphs = false;
    for new_gid in 0..plan.num_output_glyphs as u32 {
        let glyph_data = plan
            .reverse_glyph_map
            .get(&GlyphId::new(new_gid))
            .and_then(|old_gid| strike_glyph_data(strike, old_gid.to_u32(), plan.font_num_glyphs));
        if let Some(bytes) = glyph_data {
            s.embed_bytes(bytes)?;
            offset += bytes.len() as u32;
            has_glyphs = true;
        }
        s.check_assign::<u32>(
            pos,
            offset as usize,
            SerializeErrorFlags::SERIALIZE_ERROR_INT_OVERFLOW,
        )?;
        pos += 4;
    }

    if !has_glyphs {
        s.pop_discard();
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    s.pop_pack(false).ok_or(s.error())
}

fn strike_glyph_data<'a>(
    strike: FontData<'a>,
    old_gid: u32,
    num_glyphs: usize,
) -> Option<&'a [u8]> {
    if old_gid as usize >= num_glyphs {
        return None;
    }
    let start: u32 = strike.read_at(4 + old_gid as usize * 4).ok()?;
    let end: u32 = strike.read_at(4 + old_gid as usize * 4 + 4).ok()?;
    if end <= start {
        return None;
    }
    strike
        .slice(start as usize..end as usize)
        .map(|d| d.as_bytes())
}
