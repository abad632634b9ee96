//! impl subset() for GPOS

use font_types::GlyphId;

use crate::face::{Face, FontBuilder};
use crate::layout::{self, coverage_glyphs, serialize_class_def, serialize_coverage};
use crate::sanitize::{FontData, ReadError};
use crate::serialize::{ObjIdx, OffsetWhence, SerializeErrorFlags, Serializer};
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    GPOS,
};

const EXTENSION_TYPE: u16 = 9;

// value record device-offset bits: XPlaDevice..YAdvDevice
const DEVICE_BITS: u16 = 0x00F0;

pub(crate) struct Gpos<'a> {
    pub data: FontData<'a>,
}

impl Subset for Gpos<'_> {
    fn subset(
        &self,
        plan: &Plan,
        _face: &Face,
        s: &mut Serializer,
        _builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        layout::subset_gsubgpos(self.data, plan, s, subset_gpos_subtable, EXTENSION_TYPE)
            .map_err(|_| SubsetTableError(GPOS))
    }
}

fn subset_gpos_subtable(
    sub_type: u16,
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    match sub_type {
        1 => subset_single_pos(data, plan, s),
        2 => subset_pair_pos(data, plan, s),
        3 => subset_cursive_pos(data, plan, s),
        _ => Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY),
    }
}

fn read_err(_: ReadError) -> SerializeErrorFlags {
    SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR
}

fn value_record_len(format: u16) -> usize {
    format.count_ones() as usize * 2
}

/// Copy one value record, zeroing the device/variation-index offsets; the
/// device tables themselves are not carried over.
fn embed_value_record(
    data: FontData,
    pos: usize,
    format: u16,
    s: &mut Serializer,
) -> Result<(), SerializeErrorFlags> {
    let mut field_pos = pos;
    for bit in 0..16u16 {
        let mask = 1 << bit;
        if format & mask == 0 {
            continue;
        }
        if mask & DEVICE_BITS != 0 {
            s.embed(0u16)?;
        } else {
            let value: i16 = data.read_at(field_pos).map_err(read_err)?;
            s.embed(value)?;
        }
        field_pos += 2;
    }
    Ok(())
}

fn subtable_coverage(data: FontData) -> Result<Vec<GlyphId>, ReadError> {
    let coverage_offset: u16 = data.read_at(2)?;
    let coverage = data
        .resolve_offset(coverage_offset as u32)
        .ok_or(ReadError::OutOfBounds)?;
    coverage_glyphs(coverage)
}

fn subset_single_pos(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let format: u16 = data.read_at(0).map_err(read_err)?;
    let value_format: u16 = data.read_at(4).map_err(read_err)?;
    let glyphs = subtable_coverage(data).map_err(read_err)?;
    let record_len = value_record_len(value_format);

    // (new gid, position of its value record in the source)
    let mut retained: Vec<(u16, usize)> = Vec::new();
    for (i, gid) in glyphs.iter().enumerate() {
        let Some(new_gid) = plan.glyph_map.get(gid) else {
            continue;
        };
        let record_pos = match format {
            1 => 6,
            2 => 8 + i * record_len,
            _ => return Err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR),
        };
        retained.push((new_gid.to_u32() as u16, record_pos));
    }
    if retained.is_empty() {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    retained.sort_unstable();

    s.push()?;
    if format == 1 {
        s.embed(1u16)?;
        let coverage_pos = s.embed(0u16)?;
        s.embed(value_format)?;
        embed_value_record(data, 6, value_format, s)?;
        let covered: Vec<u16> = retained.iter().map(|(g, _)| *g).collect();
        let coverage = serialize_coverage(s, &covered)?;
        s.add_link(
            coverage_pos..coverage_pos + 2,
            coverage,
            OffsetWhence::Head,
            0,
            false,
        )?;
    } else {
        s.embed(2u16)?;
        let coverage_pos = s.embed(0u16)?;
        s.embed(value_format)?;
        s.embed(retained.len() as u16)?;
        for (_, record_pos) in &retained {
            embed_value_record(data, *record_pos, value_format, s)?;
        }
        let covered: Vec<u16> = retained.iter().map(|(g, _)| *g).collect();
        let coverage = serialize_coverage(s, &covered)?;
        s.add_link(
            coverage_pos..coverage_pos + 2,
            coverage,
            OffsetWhence::Head,
            0,
            false,
        )?;
    }
    s.pop_pack(true).ok_or(s.error())
}

fn subset_pair_pos(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let format: u16 = data.read_at(0).map_err(read_err)?;
    match format {
        1 => subset_pair_pos_format1(data, plan, s),
        2 => subset_pair_pos_format2(data, plan, s),
        _ => Err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR),
    }
}

fn subset_pair_pos_format1(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let value_format1: u16 = data.read_at(4).map_err(read_err)?;
    let value_format2: u16 = data.read_at(6).map_err(read_err)?;
    let glyphs = subtable_coverage(data).map_err(read_err)?;
    let record_len = 2 + value_record_len(value_format1) + value_record_len(value_format2);

    // retained pair sets: (new first gid, retained (new second gid, record pos))
    let mut retained: Vec<(u16, Vec<(u16, usize, FontData)>)> = Vec::new();
    for (i, first) in glyphs.iter().enumerate() {
        let Some(new_first) = plan.glyph_map.get(first) else {
            continue;
        };
        let set_offset: u16 = data.read_at(10 + i * 2).map_err(read_err)?;
        let Some(set) = data.resolve_offset(set_offset as u32) else {
            continue;
        };
        let pair_count: u16 = set.read_at(0).map_err(read_err)?;
        let mut pairs = Vec::new();
        for j in 0..pair_count as usize {
            let record_pos = 2 + j * record_len;
            let second: u16 = set.read_at(record_pos).map_err(read_err)?;
            let Some(new_second) = plan.glyph_map.get(&GlyphId::new(second as u32)) else {
                continue;
            };
            pairs.push((new_second.to_u32() as u16, record_pos, set));
        }
        if pairs.is_empty() {
            continue;
        }
        pairs.sort_unstable_by_key(|(gid, _, _)| *gid);
        retained.push((new_first.to_u32() as u16, pairs));
    }
    if retained.is_empty() {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    retained.sort_unstable_by_key(|(gid, _)| *gid);

    let mut set_objs = Vec::with_capacity(retained.len());
    for (_, pairs) in &retained {
        s.push()?;
        s.embed(pairs.len() as u16)?;
        for (new_second, record_pos, set) in pairs {
            s.embed(*new_second)?;
            embed_value_record(*set, record_pos + 2, value_format1, s)?;
            embed_value_record(
                *set,
                record_pos + 2 + value_record_len(value_format1),
                value_format2,
                s,
            )?;
        }
        set_objs.push(s.pop_pack(true).ok_or(s.error())?);
    }

    s.push()?;
    s.embed(1u16)?;
    let coverage_pos = s.embed(0u16)?;
    s.embed(value_format1)?;
    s.embed(value_format2)?;
    s.embed(set_objs.len() as u16)?;
    let mut positions = Vec::with_capacity(set_objs.len());
    for _ in &set_objs {
        positions.push(s.embed(0u16)?);
    }
    for (pos, obj) in positions.iter().zip(&set_objs) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    let covered: Vec<u16> = retained.iter().map(|(g, _)| *g).collect();
    let coverage = serialize_coverage(s, &covered)?;
    s.add_link(
        coverage_pos..coverage_pos + 2,
        coverage,
        OffsetWhence::Head,
        0,
        false,
    )?;
    s.pop_pack(true).ok_or(s.error())
}

/// Class-based kerning: the class matrix is kept as-is (device offsets
/// nulled); coverage and the class definitions are filtered to retained
/// glyphs.
fn subset_pair_pos_format2(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let value_format1: u16 = data.read_at(4).map_err(read_err)?;
    let value_format2: u16 = data.read_at(6).map_err(read_err)?;
    let class_def1_offset: u16 = data.read_at(8).map_err(read_err)?;
    let class_def2_offset: u16 = data.read_at(10).map_err(read_err)?;
    let class1_count: u16 = data.read_at(12).map_err(read_err)?;
    let class2_count: u16 = data.read_at(14).map_err(read_err)?;

    let glyphs = subtable_coverage(data).map_err(read_err)?;
    let mut covered: Vec<u16> = glyphs
        .iter()
        .filter_map(|gid| plan.glyph_map.get(gid))
        .map(|gid| gid.to_u32() as u16)
        .collect();
    if covered.is_empty() {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    covered.sort_unstable();
    covered.dedup();

    let remap_class_def = |offset: u16| -> Vec<(u16, u16)> {
        let Some(class_data) = data.resolve_offset(offset as u32) else {
            return Vec::new();
        };
        let Ok(entries) = layout::class_def_entries(class_data) else {
            return Vec::new();
        };
        let mut out: Vec<(u16, u16)> = entries
            .iter()
            .filter_map(|(gid, class)| {
                plan.glyph_map
                    .get(gid)
                    .map(|new_gid| (new_gid.to_u32() as u16, *class))
            })
            .collect();
        out.sort_unstable();
        out
    };
    let class1_entries = remap_class_def(class_def1_offset);
    let class2_entries = remap_class_def(class_def2_offset);

    let record_len = value_record_len(value_format1) + value_record_len(value_format2);
    let matrix_pos = 16usize;

    s.push()?;
    s.embed(2u16)?;
    let coverage_pos = s.embed(0u16)?;
    s.embed(value_format1)?;
    s.embed(value_format2)?;
    let class_def1_pos = s.embed(0u16)?;
    let class_def2_pos = s.embed(0u16)?;
    s.embed(class1_count)?;
    s.embed(class2_count)?;
    for i in 0..class1_count as usize * class2_count as usize {
        let record_pos = matrix_pos + i * record_len;
        embed_value_record(data, record_pos, value_format1, s)?;
        embed_value_record(
            data,
            record_pos + value_record_len(value_format1),
            value_format2,
            s,
        )?;
    }

    let coverage = serialize_coverage(s, &covered)?;
    s.add_link(
        coverage_pos..coverage_pos + 2,
        coverage,
        OffsetWhence::Head,
        0,
        false,
    )?;
    let class_def1 = serialize_class_def(s, &class1_entries)?;
    s.add_link(
        class_def1_pos..class_def1_pos + 2,
        class_def1,
        OffsetWhence::Head,
        0,
        false,
    )?;
    let class_def2 = serialize_class_def(s, &class2_entries)?;
    s.add_link(
        class_def2_pos..class_def2_pos + 2,
        class_def2,
        OffsetWhence::Head,
        0,
        false,
    )?;
    s.pop_pack(true).ok_or(s.error())
}

/// Anchor tables are copied; a format 3 anchor loses its device references
/// and comes out as format 1.
fn embed_anchor(
    parent: FontData,
    offset: u16,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let Some(anchor) = parent.resolve_offset(offset as u32) else {
        return Ok(0);
    };
    let format: u16 = anchor.read_at(0).map_err(read_err)?;
    let x: i16 = anchor.read_at(2).map_err(read_err)?;
    let y: i16 = anchor.read_at(4).map_err(read_err)?;

    s.push()?;
    match format {
        2 => {
            let anchor_point: u16 = anchor.read_at(6).map_err(read_err)?;
            s.embed(2u16)?;
            s.embed(x)?;
            s.embed(y)?;
            s.embed(anchor_point)?;
        }
        _ => {
            s.embed(1u16)?;
            s.embed(x)?;
            s.embed(y)?;
        }
    }
    s.pop_pack(true).ok_or(s.error())
}

// the ordering of cursive entry/exit records is kept exactly as found;
// see the corresponding harfbuzz note on attachment order
fn subset_cursive_pos(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let glyphs = subtable_coverage(data).map_err(read_err)?;

    let mut retained: Vec<(u16, u16, u16)> = Vec::new();
    for (i, gid) in glyphs.iter().enumerate() {
        let Some(new_gid) = plan.glyph_map.get(gid) else {
            continue;
        };
        let entry_offset: u16 = data.read_at(6 + i * 4).map_err(read_err)?;
        let exit_offset: u16 = data.read_at(6 + i * 4 + 2).map_err(read_err)?;
        retained.push((new_gid.to_u32() as u16, entry_offset, exit_offset));
    }
    if retained.is_empty() {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    retained.sort_unstable_by_key(|(gid, _, _)| *gid);

    s.push()?;
    s.embed(1u16)?;
    let coverage_pos = s.embed(0u16)?;
    s.embed(retained.len() as u16)?;
    let mut anchor_positions = Vec::with_capacity(retained.len());
    for _ in &retained {
        let entry_pos = s.embed(0u16)?;
        let exit_pos = s.embed(0u16)?;
        anchor_positions.push((entry_pos, exit_pos));
    }
    for ((_, entry_offset, exit_offset), (entry_pos, exit_pos)) in
        retained.iter().zip(&anchor_positions)
    {
        let entry_obj = embed_anchor(data, *entry_offset, s)?;
        s.add_link(*entry_pos..*entry_pos + 2, entry_obj, OffsetWhence::Head, 0, false)?;
        let exit_obj = embed_anchor(data, *exit_offset, s)?;
        s.add_link(*exit_pos..*exit_pos + 2, exit_obj, OffsetWhence::Head, 0, false)?;
    }
    let covered: Vec<u16> = retained.iter().map(|(g, _, _)| *g).collect();
    let coverage = serialize_coverage(s, &covered)?;
    s.add_link(
        coverage_pos..coverage_pos + 2,
        coverage,
        OffsetWhence::Head,
        0,
        false,
    )?;
    s.pop_pack(true).ok_or(s.error())
}
