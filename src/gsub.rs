//! impl subset() and glyph closure for GSUB

use std::collections::BTreeSet;

use font_types::GlyphId;

use crate::face::{Face, FontBuilder};
use crate::layout::{
    self, coverage_glyphs, parse_lookup_list, retained_feature_lookups, serialize_coverage,
};
use crate::sanitize::{FontData, ReadError};
use crate::serialize::{ObjIdx, OffsetWhence, SerializeErrorFlags, Serializer};
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    GSUB,
};

const EXTENSION_TYPE: u16 = 7;
// chained substitutions converge quickly; bound the fixpoint loop anyway
const CLOSURE_MAX_ROUNDS: usize = 16;

pub(crate) struct Gsub<'a> {
    pub data: FontData<'a>,
}

// reference: closure_glyphs for GSUB in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/a070f9ebbe88dc71b248af9731dd49ec93f4e6e6/src/hb-ot-layout.cc#L1310
impl Gsub<'_> {
    /// Close `glyphset` under the substitutions reachable from the plan's
    /// retained layout features.
    pub(crate) fn closure_glyphs(&self, plan: &Plan, glyphset: &mut BTreeSet<GlyphId>) {
        let Ok(lookup_indices) = retained_feature_lookups(self.data, plan) else {
            return;
        };
        let Ok(lookup_list_offset) = self.data.read_at::<u16>(8) else {
            return;
        };
        let Ok(lookups) = parse_lookup_list(self.data, lookup_list_offset) else {
            return;
        };

        for _ in 0..CLOSURE_MAX_ROUNDS {
            let before = glyphset.len();
            for idx in &lookup_indices {
                let Some(lookup) = lookups.get(*idx as usize) else {
                    continue;
                };
                for subtable in &lookup.subtables {
                    let (sub_type, data) = resolve_extension(lookup.lookup_type, *subtable);
                    let _ = closure_subtable(sub_type, data, glyphset);
                }
            }
            if glyphset.len() == before {
                break;
            }
        }
    }
}

fn resolve_extension<'a>(lookup_type: u16, data: FontData<'a>) -> (u16, FontData<'a>) {
    if lookup_type != EXTENSION_TYPE {
        return (lookup_type, data);
    }
    let inner_type: u16 = data.read_at(2).unwrap_or(0);
    let offset: u32 = data.read_at(4).unwrap_or(0);
    match data.resolve_offset(offset) {
        Some(inner) => (inner_type, inner),
        None => (0, data),
    }
}

fn closure_subtable(
    sub_type: u16,
    data: FontData,
    glyphset: &mut BTreeSet<GlyphId>,
) -> Result<(), ReadError> {
    match sub_type {
        1 => {
            let format: u16 = data.read_at(0)?;
            let coverage_offset: u16 = data.read_at(2)?;
            let coverage = data
                .resolve_offset(coverage_offset as u32)
                .ok_or(ReadError::OutOfBounds)?;
            let glyphs = coverage_glyphs(coverage)?;
            match format {
                1 => {
                    let delta: i16 = data.read_at(4)?;
                    for gid in glyphs {
                        if glyphset.contains(&gid) {
                            let out = (gid.to_u32() as i32 + delta as i32) as u16;
                            glyphset.insert(GlyphId::new(out as u32));
                        }
                    }
                }
                2 => {
                    for (i, gid) in glyphs.iter().enumerate() {
                        if glyphset.contains(gid) {
                            let out: u16 = data.read_at(6 + i * 2)?;
                            glyphset.insert(GlyphId::new(out as u32));
                        }
                    }
                }
                other => return Err(ReadError::InvalidFormat(other)),
            }
        }
        2 | 3 => {
            // multiple / alternate: sequence or alternate-set offsets
            let coverage_offset: u16 = data.read_at(2)?;
            let coverage = data
                .resolve_offset(coverage_offset as u32)
                .ok_or(ReadError::OutOfBounds)?;
            let glyphs = coverage_glyphs(coverage)?;
            for (i, gid) in glyphs.iter().enumerate() {
                if !glyphset.contains(gid) {
                    continue;
                }
                let set_offset: u16 = data.read_at(6 + i * 2)?;
                let Some(set) = data.resolve_offset(set_offset as u32) else {
                    continue;
                };
                let count: u16 = set.read_at(0)?;
                for j in 0..count as usize {
                    let out: u16 = set.read_at(2 + j * 2)?;
                    glyphset.insert(GlyphId::new(out as u32));
                }
            }
        }
        4 => {
            let coverage_offset: u16 = data.read_at(2)?;
            let coverage = data
                .resolve_offset(coverage_offset as u32)
                .ok_or(ReadError::OutOfBounds)?;
            let glyphs = coverage_glyphs(coverage)?;
            for (i, first) in glyphs.iter().enumerate() {
                if !glyphset.contains(first) {
                    continue;
                }
                let set_offset: u16 = data.read_at(6 + i * 2)?;
                let Some(set) = data.resolve_offset(set_offset as u32) else {
                    continue;
                };
                let lig_count: u16 = set.read_at(0)?;
                for j in 0..lig_count as usize {
                    let lig_offset: u16 = set.read_at(2 + j * 2)?;
                    let Some(lig) = set.resolve_offset(lig_offset as u32) else {
                        continue;
                    };
                    let lig_glyph: u16 = lig.read_at(0)?;
                    let comp_count: u16 = lig.read_at(2)?;
                    let mut all_retained = true;
                    for k in 0..comp_count.saturating_sub(1) as usize {
                        let comp: u16 = lig.read_at(4 + k * 2)?;
                        if !glyphset.contains(&GlyphId::new(comp as u32)) {
                            all_retained = false;
                            break;
                        }
                    }
                    if all_retained {
                        glyphset.insert(GlyphId::new(lig_glyph as u32));
                    }
                }
            }
        }
        // contextual rules are not chased
        _ => {}
    }
    Ok(())
}

// reference: subset() for GSUB lookup subtables in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/a070f9ebbe88dc71b248af9731dd49ec93f4e6e6/src/hb-ot-layout-gsub-private.hh
impl Subset for Gsub<'_> {
    fn subset(
        &self,
        plan: &Plan,
        _face: &Face,
        s: &mut Serializer,
        _builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        layout::subset_gsubgpos(self.data, plan, s, subset_gsub_subtable, EXTENSION_TYPE)
            .map_err(|_| SubsetTableError(GSUB))
    }
}

fn subset_gsub_subtable(
    sub_type: u16,
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    match sub_type {
        1 => subset_single_subst(data, plan, s),
        2 | 3 => subset_sequence_like(sub_type, data, plan, s),
        4 => subset_ligature_subst(data, plan, s),
        _ => Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY),
    }
}

fn read_err(_: ReadError) -> SerializeErrorFlags {
    SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR
}

fn subtable_coverage(data: FontData) -> Result<Vec<GlyphId>, ReadError> {
    let coverage_offset: u16 = data.read_at(2)?;
    let coverage = data
        .resolve_offset(coverage_offset as u32)
        .ok_or(ReadError::OutOfBounds)?;
    coverage_glyphs(coverage)
}

fn subset_single_subst(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let format: u16 = data.read_at(0).map_err(read_err)?;
    let glyphs = subtable_coverage(data).map_err(read_err)?;

    // (new covered gid, new substitute gid)
    let mut pairs: Vec<(u16, u16)> = Vec::new();
    for (i, gid) in glyphs.iter().enumerate() {
        let Some(new_gid) = plan.glyph_map.get(gid) else {
            continue;
        };
        let substitute: u16 = match format {
            1 => {
                let delta: i16 = data.read_at(4).map_err(read_err)?;
                (gid.to_u32() as i32 + delta as i32) as u16
            }
            2 => data.read_at(6 + i * 2).map_err(read_err)?,
            _ => return Err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR),
        };
        let Some(new_substitute) = plan.glyph_map.get(&GlyphId::new(substitute as u32)) else {
            continue;
        };
        pairs.push((new_gid.to_u32() as u16, new_substitute.to_u32() as u16));
    }
    if pairs.is_empty() {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    pairs.sort_unstable();

    let delta = pairs[0].1.wrapping_sub(pairs[0].0);
    let uniform = pairs.iter().all(|(g, sub)| sub.wrapping_sub(*g) == delta);
    let covered: Vec<u16> = pairs.iter().map(|(g, _)| *g).collect();

    s.push()?;
    if uniform {
        s.embed(1u16)?;
        let coverage_pos = s.embed(0u16)?;
        s.embed(delta)?;
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
        s.embed(pairs.len() as u16)?;
        for (_, substitute) in &pairs {
            s.embed(*substitute)?;
        }
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

/// Multiple (type 2) and alternate (type 3) substitutions share their shape:
/// a coverage plus per-glyph sets of glyphs.
fn subset_sequence_like(
    sub_type: u16,
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let glyphs = subtable_coverage(data).map_err(read_err)?;

    let mut covered: Vec<u16> = Vec::new();
    let mut sets: Vec<Vec<u16>> = Vec::new();
    for (i, gid) in glyphs.iter().enumerate() {
        let Some(new_gid) = plan.glyph_map.get(gid) else {
            continue;
        };
        let set_offset: u16 = data.read_at(6 + i * 2).map_err(read_err)?;
        let Some(set) = data.resolve_offset(set_offset as u32) else {
            continue;
        };
        let count: u16 = set.read_at(0).map_err(read_err)?;
        let mut out_glyphs = Vec::with_capacity(count as usize);
        let mut dropped = false;
        for j in 0..count as usize {
            let out: u16 = set.read_at(2 + j * 2).map_err(read_err)?;
            match plan.glyph_map.get(&GlyphId::new(out as u32)) {
                Some(new_out) => out_glyphs.push(new_out.to_u32() as u16),
                // a multiple substitution is all-or-nothing, alternates
                // filter independently
                None if sub_type == 2 => {
                    dropped = true;
                    break;
                }
                None => {}
            }
        }
        if dropped || out_glyphs.is_empty() {
            continue;
        }
        covered.push(new_gid.to_u32() as u16);
        sets.push(out_glyphs);
    }
    if covered.is_empty() {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    let mut order: Vec<usize> = (0..covered.len()).collect();
    order.sort_unstable_by_key(|i| covered[*i]);

    let mut set_objs = Vec::with_capacity(order.len());
    for i in &order {
        s.push()?;
        s.embed(sets[*i].len() as u16)?;
        for gid in &sets[*i] {
            s.embed(*gid)?;
        }
        set_objs.push(s.pop_pack(true).ok_or(s.error())?);
    }

    s.push()?;
    s.embed(1u16)?;
    let coverage_pos = s.embed(0u16)?;
    s.embed(set_objs.len() as u16)?;
    let mut positions = Vec::with_capacity(set_objs.len());
    for _ in &set_objs {
        positions.push(s.embed(0u16)?);
    }
    for (pos, obj) in positions.iter().zip(&set_objs) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    let sorted_covered: Vec<u16> = order.iter().map(|i| covered[*i]).collect();
    let coverage = serialize_coverage(s, &sorted_covered)?;
    s.add_link(
        coverage_pos..coverage_pos + 2,
        coverage,
        OffsetWhence::Head,
        0,
        false,
    )?;
    s.pop_pack(true).ok_or(s.error())
}

fn subset_ligature_subst(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let glyphs = subtable_coverage(data).map_err(read_err)?;

    // per retained first glyph: the ligatures whose output and components
    // all survive
    let mut covered: Vec<u16> = Vec::new();
    let mut lig_sets: Vec<Vec<(u16, Vec<u16>)>> = Vec::new();
    for (i, first) in glyphs.iter().enumerate() {
        let Some(new_first) = plan.glyph_map.get(first) else {
            continue;
        };
        let set_offset: u16 = data.read_at(6 + i * 2).map_err(read_err)?;
        let Some(set) = data.resolve_offset(set_offset as u32) else {
            continue;
        };
        let lig_count: u16 = set.read_at(0).map_err(read_err)?;
        let mut ligatures = Vec::new();
        for j in 0..lig_count as usize {
            let lig_offset: u16 = set.read_at(2 + j * 2).map_err(read_err)?;
            let Some(lig) = set.resolve_offset(lig_offset as u32) else {
                continue;
            };
            let lig_glyph: u16 = lig.read_at(0).map_err(read_err)?;
            let comp_count: u16 = lig.read_at(2).map_err(read_err)?;
            let Some(new_lig_glyph) = plan.glyph_map.get(&GlyphId::new(lig_glyph as u32)) else {
                continue;
            };
            let mut components = Vec::with_capacity(comp_count.saturating_sub(1) as usize);
            let mut all_retained = true;
            for k in 0..comp_count.saturating_sub(1) as usize {
                let comp: u16 = lig.read_at(4 + k * 2).map_err(read_err)?;
                match plan.glyph_map.get(&GlyphId::new(comp as u32)) {
                    Some(new_comp) => components.push(new_comp.to_u32() as u16),
                    None => {
                        all_retained = false;
                        break;
                    }
                }
            }
            if all_retained {
                ligatures.push((new_lig_glyph.to_u32() as u16, components));
            }
        }
        if ligatures.is_empty() {
            continue;
        }
        covered.push(new_first.to_u32() as u16);
        lig_sets.push(ligatures);
    }
    if covered.is_empty() {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    let mut order: Vec<usize> = (0..covered.len()).collect();
    order.sort_unstable_by_key(|i| covered[*i]);

    let mut set_objs = Vec::with_capacity(order.len());
    for i in &order {
        // ligature tables first, then their set
        let mut lig_objs = Vec::with_capacity(lig_sets[*i].len());
        for (lig_glyph, components) in &lig_sets[*i] {
            s.push()?;
            s.embed(*lig_glyph)?;
            s.embed(components.len() as u16 + 1)?;
            for comp in components {
                s.embed(*comp)?;
            }
            lig_objs.push(s.pop_pack(true).ok_or(s.error())?);
        }
        s.push()?;
        s.embed(lig_objs.len() as u16)?;
        let mut positions = Vec::with_capacity(lig_objs.len());
        for _ in &lig_objs {
            positions.push(s.embed(0u16)?);
        }
        for (pos, obj) in positions.iter().zip(&lig_objs) {
            s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
        }
        set_objs.push(s.pop_pack(true).ok_or(s.error())?);
    }

    s.push()?;
    s.embed(1u16)?;
    let coverage_pos = s.embed(0u16)?;
    s.embed(set_objs.len() as u16)?;
    let mut positions = Vec::with_capacity(set_objs.len());
    for _ in &set_objs {
        positions.push(s.embed(0u16)?);
    }
    for (pos, obj) in positions.iter().zip(&set_objs) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    let sorted_covered: Vec<u16> = order.iter().map(|i| covered[*i]).collect();
    let coverage = serialize_coverage(s, &sorted_covered)?;
    s.add_link(
        coverage_pos..coverage_pos + 2,
        coverage,
        OffsetWhence::Head,
        0,
        false,
    )?;
    s.pop_pack(true).ok_or(s.error())
}
