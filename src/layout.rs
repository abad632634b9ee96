//! layout common tables: Coverage, ClassDef, and the script/feature/lookup
//! plumbing shared by GSUB and GPOS
//!
//! Subsetting walks the table's object graph bottom-up: subtables are
//! emitted speculatively and reverted when they come out empty, lookups
//! whose subtable lists empty out are dropped, features with empty lookup
//! lists are dropped, and scripts with empty feature lists are dropped.
//! Surviving lookup and feature indices are remapped densely.

use fnv::FnvHashMap;
use font_types::{GlyphId, Tag};

use crate::sanitize::{FontData, ReadError};
use crate::serialize::{ObjIdx, OffsetWhence, SerializeErrorFlags, Serializer};
use crate::Plan;

// --- Coverage ---

/// Glyphs of a coverage table, in coverage-index order.
pub(crate) fn coverage_glyphs(data: FontData) -> Result<Vec<GlyphId>, ReadError> {
    let format: u16 = data.read_at(0)?;
    let mut glyphs = Vec::new();
    match format {
        1 => {
            let count: u16 = data.read_at(2)?;
            for i in 0..count as usize {
                let gid: u16 = data.read_at(4 + i * 2)?;
                glyphs.push(GlyphId::new(gid as u32));
            }
        }
        2 => {
            let range_count: u16 = data.read_at(2)?;
            for i in 0..range_count as usize {
                let start: u16 = data.read_at(4 + i * 6)?;
                let end: u16 = data.read_at(4 + i * 6 + 2)?;
                if start > end {
                    return Err(ReadError::MalformedData("coverage range inverted"));
                }
                for gid in start..=end {
                    glyphs.push(GlyphId::new(gid as u32));
                }
            }
        }
        other => return Err(ReadError::InvalidFormat(other)),
    }
    Ok(glyphs)
}

/// Emit a coverage table over already-remapped gids, choosing the smaller
/// of format 1 and format 2.
pub(crate) fn serialize_coverage(
    s: &mut Serializer,
    glyphs: &[u16],
) -> Result<ObjIdx, SerializeErrorFlags> {
    let mut ranges: Vec<(u16, u16)> = Vec::new();
    for gid in glyphs {
        match ranges.last_mut() {
            Some((_, end)) if (*end as u32) + 1 == *gid as u32 => *end = *gid,
            _ => ranges.push((*gid, *gid)),
        }
    }
    let format1_size = 4 + glyphs.len() * 2;
    let format2_size = 4 + ranges.len() * 6;

    s.push()?;
    if format1_size <= format2_size {
        s.embed(1u16)?;
        s.embed(glyphs.len() as u16)?;
        for gid in glyphs {
            s.embed(*gid)?;
        }
    } else {
        s.embed(2u16)?;
        s.embed(ranges.len() as u16)?;
        let mut coverage_index = 0u16;
        for (start, end) in &ranges {
            s.embed(*start)?;
            s.embed(*end)?;
            s.embed(coverage_index)?;
            coverage_index += end - start + 1;
        }
    }
    s.pop_pack(true).ok_or(s.error())
}

// --- ClassDef ---

/// (glyph, class) pairs of a class-def table; class 0 entries are implicit
/// and not returned.
pub(crate) fn class_def_entries(data: FontData) -> Result<Vec<(GlyphId, u16)>, ReadError> {
    let format: u16 = data.read_at(0)?;
    let mut out = Vec::new();
    match format {
        1 => {
            let start: u16 = data.read_at(2)?;
            let count: u16 = data.read_at(4)?;
            for i in 0..count {
                let class: u16 = data.read_at(6 + i as usize * 2)?;
                if class != 0 {
                    out.push((GlyphId::new((start + i) as u32), class));
                }
            }
        }
        2 => {
            let range_count: u16 = data.read_at(2)?;
            for i in 0..range_count as usize {
                let start: u16 = data.read_at(4 + i * 6)?;
                let end: u16 = data.read_at(4 + i * 6 + 2)?;
                let class: u16 = data.read_at(4 + i * 6 + 4)?;
                if start > end {
                    return Err(ReadError::MalformedData("classdef range inverted"));
                }
                if class != 0 {
                    for gid in start..=end {
                        out.push((GlyphId::new(gid as u32), class));
                    }
                }
            }
        }
        other => return Err(ReadError::InvalidFormat(other)),
    }
    Ok(out)
}

/// Emit a class-def over already-remapped (gid, class) pairs sorted by gid.
pub(crate) fn serialize_class_def(
    s: &mut Serializer,
    entries: &[(u16, u16)],
) -> Result<ObjIdx, SerializeErrorFlags> {
    let mut ranges: Vec<(u16, u16, u16)> = Vec::new();
    for (gid, class) in entries {
        match ranges.last_mut() {
            Some((_, end, cls)) if (*end as u32) + 1 == *gid as u32 && *cls == *class => {
                *end = *gid
            }
            _ => ranges.push((*gid, *gid, *class)),
        }
    }
    // format 1 needs a dense glyph run from the first to the last gid
    let format1_size = match (entries.first(), entries.last()) {
        (Some((first, _)), Some((last, _))) => 6 + (*last as usize - *first as usize + 1) * 2,
        _ => 6,
    };
    let format2_size = 4 + ranges.len() * 6;

    s.push()?;
    if format1_size <= format2_size {
        let first = entries.first().map(|(gid, _)| *gid).unwrap_or(0);
        let last = entries.last().map(|(gid, _)| *gid).unwrap_or(0);
        let count = if entries.is_empty() { 0 } else { last - first + 1 };
        s.embed(1u16)?;
        s.embed(first)?;
        s.embed(count)?;
        let classes_pos = s.allocate_size(count as usize * 2, true)?;
        for (gid, class) in entries {
            s.copy_assign(classes_pos + (gid - first) as usize * 2, *class);
        }
    } else {
        s.embed(2u16)?;
        s.embed(ranges.len() as u16)?;
        for (start, end, class) in &ranges {
            s.embed(*start)?;
            s.embed(*end)?;
            s.embed(*class)?;
        }
    }
    s.pop_pack(true).ok_or(s.error())
}

// --- script / feature / lookup lists ---

pub(crate) struct Lookup<'a> {
    pub lookup_type: u16,
    pub lookup_flag: u16,
    pub mark_filtering_set: Option<u16>,
    pub subtables: Vec<FontData<'a>>,
}

const USE_MARK_FILTERING_SET: u16 = 0x0010;

pub(crate) fn parse_lookup_list<'a>(
    table: FontData<'a>,
    lookup_list_offset: u16,
) -> Result<Vec<Lookup<'a>>, ReadError> {
    let Some(list) = table.resolve_offset(lookup_list_offset as u32) else {
        return Ok(Vec::new());
    };
    let count: u16 = list.read_at(0)?;
    let mut lookups = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let offset: u16 = list.read_at(2 + i * 2)?;
        let data = list
            .resolve_offset(offset as u32)
            .ok_or(ReadError::OutOfBounds)?;
        let lookup_type: u16 = data.read_at(0)?;
        let lookup_flag: u16 = data.read_at(2)?;
        let subtable_count: u16 = data.read_at(4)?;
        let mut subtables = Vec::with_capacity(subtable_count as usize);
        for j in 0..subtable_count as usize {
            let sub_offset: u16 = data.read_at(6 + j * 2)?;
            if let Some(sub) = data.resolve_offset(sub_offset as u32) {
                subtables.push(sub);
            }
        }
        let mark_filtering_set = if lookup_flag & USE_MARK_FILTERING_SET != 0 {
            Some(data.read_at(6 + subtable_count as usize * 2)?)
        } else {
            None
        };
        lookups.push(Lookup {
            lookup_type,
            lookup_flag,
            mark_filtering_set,
            subtables,
        });
    }
    Ok(lookups)
}

#[derive(Clone, Copy)]
pub(crate) struct FeatureRecord<'a> {
    pub tag: Tag,
    pub data: FontData<'a>,
}

pub(crate) fn parse_feature_list<'a>(
    table: FontData<'a>,
    feature_list_offset: u16,
) -> Result<Vec<FeatureRecord<'a>>, ReadError> {
    let Some(list) = table.resolve_offset(feature_list_offset as u32) else {
        return Ok(Vec::new());
    };
    let count: u16 = list.read_at(0)?;
    let mut features = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let tag: Tag = list.read_at(2 + i * 6)?;
        let offset: u16 = list.read_at(2 + i * 6 + 4)?;
        let data = list
            .resolve_offset(offset as u32)
            .ok_or(ReadError::OutOfBounds)?;
        features.push(FeatureRecord { tag, data });
    }
    Ok(features)
}

pub(crate) fn feature_lookup_indices(feature: &FontData) -> Result<Vec<u16>, ReadError> {
    let count: u16 = feature.read_at(2)?;
    let mut indices = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        indices.push(feature.read_at(4 + i * 2)?);
    }
    Ok(indices)
}

/// Lookup indices reachable from the plan's retained features.
pub(crate) fn retained_feature_lookups(
    table: FontData,
    plan: &Plan,
) -> Result<Vec<u16>, ReadError> {
    let feature_list_offset: u16 = table.read_at(6)?;
    let features = parse_feature_list(table, feature_list_offset)?;
    let mut lookup_indices = Vec::new();
    for feature in &features {
        if !plan.keep_layout_feature(feature.tag) {
            continue;
        }
        lookup_indices.extend(feature_lookup_indices(&feature.data)?);
    }
    lookup_indices.sort_unstable();
    lookup_indices.dedup();
    Ok(lookup_indices)
}

/// The per-subtable subset hook: emits one subtable as a packed object, or
/// fails with SERIALIZE_ERROR_EMPTY when nothing survives.
pub(crate) type SubsetSubtableFn =
    fn(u16, FontData, &Plan, &mut Serializer) -> Result<ObjIdx, SerializeErrorFlags>;

struct ExtensionInfo<'a> {
    inner_type: u16,
    data: FontData<'a>,
}

fn unwrap_extension<'a>(data: FontData<'a>) -> Result<ExtensionInfo<'a>, ReadError> {
    // ExtensionFormat1: format, extensionLookupType, extensionOffset
    let format: u16 = data.read_at(0)?;
    if format != 1 {
        return Err(ReadError::InvalidFormat(format));
    }
    let inner_type: u16 = data.read_at(2)?;
    let offset: u32 = data.read_at(4)?;
    let inner = data
        .resolve_offset(offset)
        .ok_or(ReadError::OutOfBounds)?;
    Ok(ExtensionInfo {
        inner_type,
        data: inner,
    })
}

/// Subset a GSUB- or GPOS-shaped table into the serializer.
///
/// `extension_type` names the extension lookup type for this table (7 for
/// GSUB, 9 for GPOS); extension subtables are unwrapped and serialized as
/// their inner type.
pub(crate) fn subset_gsubgpos(
    table: FontData,
    plan: &Plan,
    s: &mut Serializer,
    subset_subtable: SubsetSubtableFn,
    extension_type: u16,
) -> Result<(), SerializeErrorFlags> {
    let script_list_offset: u16 = table
        .read_at(4)
        .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;
    let feature_list_offset: u16 = table
        .read_at(6)
        .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;
    let lookup_list_offset: u16 = table
        .read_at(8)
        .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;

    // root header: fixed version 1.0 plus three list offsets
    s.embed(0x0001_0000u32)?;
    let script_list_pos = s.embed(0u16)?;
    let feature_list_pos = s.embed(0u16)?;
    let lookup_list_pos = s.embed(0u16)?;

    // lookups, bottom-up
    let lookups = parse_lookup_list(table, lookup_list_offset)
        .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;
    let mut lookup_map: FnvHashMap<u16, u16> = FnvHashMap::default();
    let mut packed_lookups: Vec<ObjIdx> = Vec::new();
    for (old_idx, lookup) in lookups.iter().enumerate() {
        let mut subtable_objs = Vec::new();
        let mut out_type = lookup.lookup_type;
        for subtable in &lookup.subtables {
            let (sub_type, sub_data) = if lookup.lookup_type == extension_type {
                match unwrap_extension(*subtable) {
                    Ok(ext) => (ext.inner_type, ext.data),
                    Err(_) => continue,
                }
            } else {
                (lookup.lookup_type, *subtable)
            };
            out_type = sub_type;
            let snap = s.snapshot();
            match subset_subtable(sub_type, sub_data, plan, s) {
                Ok(obj_idx) => subtable_objs.push(obj_idx),
                Err(_) => s.revert_snapshot(snap),
            }
        }
        if subtable_objs.is_empty() {
            continue;
        }

        s.push()?;
        s.embed(out_type)?;
        let mut flag = lookup.lookup_flag & !USE_MARK_FILTERING_SET;
        if lookup.mark_filtering_set.is_some() {
            flag |= USE_MARK_FILTERING_SET;
        }
        s.embed(flag)?;
        s.embed(subtable_objs.len() as u16)?;
        let mut positions = Vec::with_capacity(subtable_objs.len());
        for _ in &subtable_objs {
            positions.push(s.embed(0u16)?);
        }
        if let Some(set) = lookup.mark_filtering_set {
            s.embed(set)?;
        }
        for (pos, obj) in positions.iter().zip(&subtable_objs) {
            s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
        }
        let Some(lookup_obj) = s.pop_pack(false) else {
            return Err(s.error());
        };
        lookup_map.insert(old_idx as u16, lookup_map.len() as u16);
        packed_lookups.push(lookup_obj);
    }

    // lookup list
    s.push()?;
    s.embed(packed_lookups.len() as u16)?;
    let mut positions = Vec::with_capacity(packed_lookups.len());
    for _ in &packed_lookups {
        positions.push(s.embed(0u16)?);
    }
    for (pos, obj) in positions.iter().zip(&packed_lookups) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    let Some(lookup_list_obj) = s.pop_pack(false) else {
        return Err(s.error());
    };

    // features
    let features = parse_feature_list(table, feature_list_offset)
        .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;
    let mut feature_map: FnvHashMap<u16, u16> = FnvHashMap::default();
    let mut packed_features: Vec<(Tag, ObjIdx)> = Vec::new();
    for (old_idx, feature) in features.iter().enumerate() {
        if !plan.keep_layout_feature(feature.tag) {
            continue;
        }
        let indices = match feature_lookup_indices(&feature.data) {
            Ok(indices) => indices,
            Err(_) => continue,
        };
        let new_indices: Vec<u16> = indices
            .iter()
            .filter_map(|idx| lookup_map.get(idx).copied())
            .collect();
        if new_indices.is_empty() {
            continue;
        }
        s.push()?;
        s.embed(0u16)?; // featureParams
        s.embed(new_indices.len() as u16)?;
        for idx in &new_indices {
            s.embed(*idx)?;
        }
        let Some(obj) = s.pop_pack(true) else {
            return Err(s.error());
        };
        feature_map.insert(old_idx as u16, feature_map.len() as u16);
        packed_features.push((feature.tag, obj));
    }

    // feature list
    s.push()?;
    s.embed(packed_features.len() as u16)?;
    let mut record_positions = Vec::with_capacity(packed_features.len());
    for (tag, _) in &packed_features {
        s.embed(*tag)?;
        record_positions.push(s.embed(0u16)?);
    }
    for (pos, (_, obj)) in record_positions.iter().zip(&packed_features) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    let Some(feature_list_obj) = s.pop_pack(false) else {
        return Err(s.error());
    };

    // scripts
    let script_list_obj =
        subset_script_list(table, script_list_offset, plan, s, &feature_map)?;

    if packed_features.is_empty() && packed_lookups.is_empty() {
        return Err(s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY));
    }

    s.add_link(
        script_list_pos..script_list_pos + 2,
        script_list_obj,
        OffsetWhence::Head,
        0,
        false,
    )?;
    s.add_link(
        feature_list_pos..feature_list_pos + 2,
        feature_list_obj,
        OffsetWhence::Head,
        0,
        false,
    )?;
    s.add_link(
        lookup_list_pos..lookup_list_pos + 2,
        lookup_list_obj,
        OffsetWhence::Head,
        0,
        false,
    )
}

fn subset_langsys(
    langsys: FontData,
    s: &mut Serializer,
    feature_map: &FnvHashMap<u16, u16>,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let required: u16 = langsys
        .read_at(2)
        .map_err(|_| SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR)?;
    let count: u16 = langsys
        .read_at(4)
        .map_err(|_| SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR)?;
    let mut indices = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let idx: u16 = langsys
            .read_at(6 + i * 2)
            .map_err(|_| SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR)?;
        if let Some(new_idx) = feature_map.get(&idx) {
            indices.push(*new_idx);
        }
    }
    let new_required = if required == 0xFFFF {
        0xFFFF
    } else {
        feature_map.get(&required).copied().unwrap_or(0xFFFF)
    };
    if indices.is_empty() && new_required == 0xFFFF {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }

    s.push()?;
    s.embed(0u16)?; // lookupOrderOffset
    s.embed(new_required)?;
    s.embed(indices.len() as u16)?;
    for idx in &indices {
        s.embed(*idx)?;
    }
    s.pop_pack(true).ok_or(s.error())
}

fn subset_script_list(
    table: FontData,
    script_list_offset: u16,
    plan: &Plan,
    s: &mut Serializer,
    feature_map: &FnvHashMap<u16, u16>,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let mut packed_scripts: Vec<(Tag, ObjIdx)> = Vec::new();
    if let Some(list) = table.resolve_offset(script_list_offset as u32) {
        let count: u16 = list
            .read_at(0)
            .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;
        for i in 0..count as usize {
            let tag: Tag = list
                .read_at(2 + i * 6)
                .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;
            let offset: u16 = list
                .read_at(2 + i * 6 + 4)
                .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;
            if !plan.keep_layout_script(tag) {
                continue;
            }
            let Some(script) = list.resolve_offset(offset as u32) else {
                continue;
            };
            if let Some(obj) = subset_script(script, s, feature_map)? {
                packed_scripts.push((tag, obj));
            }
        }
    }

    s.push()?;
    s.embed(packed_scripts.len() as u16)?;
    let mut positions = Vec::with_capacity(packed_scripts.len());
    for (tag, _) in &packed_scripts {
        s.embed(*tag)?;
        positions.push(s.embed(0u16)?);
    }
    for (pos, (_, obj)) in positions.iter().zip(&packed_scripts) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    s.pop_pack(false).ok_or(s.error())
}

fn subset_script(
    script: FontData,
    s: &mut Serializer,
    feature_map: &FnvHashMap<u16, u16>,
) -> Result<Option<ObjIdx>, SerializeErrorFlags> {
    let default_langsys_offset: u16 = script
        .read_at(0)
        .map_err(|_| SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR)?;
    let langsys_count: u16 = script
        .read_at(2)
        .map_err(|_| SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR)?;

    let default_obj = match script.resolve_offset(default_langsys_offset as u32) {
        Some(langsys) => {
            let snap = s.snapshot();
            match subset_langsys(langsys, s, feature_map) {
                Ok(obj) => Some(obj),
                Err(_) => {
                    s.revert_snapshot(snap);
                    None
                }
            }
        }
        None => None,
    };

    let mut packed_langsys: Vec<(Tag, ObjIdx)> = Vec::new();
    for i in 0..langsys_count as usize {
        let tag: Tag = script
            .read_at(4 + i * 6)
            .map_err(|_| SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR)?;
        let offset: u16 = script
            .read_at(4 + i * 6 + 4)
            .map_err(|_| SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR)?;
        let Some(langsys) = script.resolve_offset(offset as u32) else {
            continue;
        };
        let snap = s.snapshot();
        match subset_langsys(langsys, s, feature_map) {
            Ok(obj) => packed_langsys.push((tag, obj)),
            Err(_) => s.revert_snapshot(snap),
        }
    }

    if default_obj.is_none() && packed_langsys.is_empty() {
        return Ok(None);
    }

    s.push()?;
    let default_pos = s.embed(0u16)?;
    s.embed(packed_langsys.len() as u16)?;
    let mut positions = Vec::with_capacity(packed_langsys.len());
    for (tag, _) in &packed_langsys {
        s.embed(*tag)?;
        positions.push(s.embed(0u16)?);
    }
    if let Some(obj) = default_obj {
        s.add_link(default_pos..default_pos + 2, obj, OffsetWhence::Head, 0, false)?;
    }
    for (pos, (_, obj)) in positions.iter().zip(&packed_langsys) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    s.pop_pack(false).map(Some).ok_or(s.error())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coverage_format1_roundtrip() {
        let mut s = Serializer::new(256);
        s.start_serialize().unwrap();
        let obj = serialize_coverage(&mut s, &[2, 5, 9]).unwrap();
        assert_ne!(obj, 0);
        let pos = s.embed(0u16).unwrap();
        s.add_link(pos..pos + 2, obj, OffsetWhence::Head, 0, false)
            .unwrap();
        s.end_serialize();
        let out = s.copy_bytes().unwrap();
        let off = u16::from_be_bytes([out[0], out[1]]) as usize;
        let glyphs = coverage_glyphs(FontData::new(&out[off..])).unwrap();
        assert_eq!(
            glyphs,
            vec![GlyphId::new(2), GlyphId::new(5), GlyphId::new(9)]
        );
    }

    #[test]
    fn coverage_contiguous_run_uses_format2() {
        let mut s = Serializer::new(256);
        s.start_serialize().unwrap();
        let glyphs: Vec<u16> = (10..30).collect();
        let obj = serialize_coverage(&mut s, &glyphs).unwrap();
        let pos = s.embed(0u16).unwrap();
        s.add_link(pos..pos + 2, obj, OffsetWhence::Head, 0, false)
            .unwrap();
        s.end_serialize();
        let out = s.copy_bytes().unwrap();
        let off = u16::from_be_bytes([out[0], out[1]]) as usize;
        assert_eq!(u16::from_be_bytes([out[off], out[off + 1]]), 2);
        let parsed = coverage_glyphs(FontData::new(&out[off..])).unwrap();
        assert_eq!(parsed.len(), 20);
    }

    #[test]
    fn class_def_entries_skip_class_zero() {
        // format 1, startGlyph 4, classes [0, 2, 2]
        let data: Vec<u8> = [1u16, 4, 3, 0, 2, 2]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let entries = class_def_entries(FontData::new(&data)).unwrap();
        assert_eq!(
            entries,
            vec![(GlyphId::new(5), 2), (GlyphId::new(6), 2)]
        );
    }
}
