//! impl subset() for cmap
//!
//! The retained mappings are re-emitted as a format 4 subtable (BMP) and,
//! when supplementary codepoints survive, a format 12 subtable, behind
//! Unicode and Windows encoding records that share subtables through
//! serializer dedupe. A format 14 variation-selector subtable is filtered
//! and rebuilt.

use fnv::FnvHashMap;
use font_types::{GlyphId, Scalar, Uint24};

use crate::face::{Face, FontBuilder};
use crate::sanitize::{FontData, ReadError};
use crate::serialize::{OffsetWhence, Serializer};
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    CMAP,
};

const UNICODE_BMP: (u16, u16) = (0, 3);
const UNICODE_FULL: (u16, u16) = (0, 4);
const UNICODE_VARIATION: (u16, u16) = (0, 5);
const WINDOWS_BMP: (u16, u16) = (3, 1);
const WINDOWS_FULL: (u16, u16) = (3, 10);

pub(crate) struct Cmap<'a> {
    data: FontData<'a>,
    records: Vec<EncodingRecord>,
}

#[derive(Clone, Copy, Debug)]
struct EncodingRecord {
    platform_id: u16,
    encoding_id: u16,
    offset: u32,
}

impl<'a> Cmap<'a> {
    pub(crate) fn new(data: FontData<'a>) -> Result<Self, ReadError> {
        let num_tables: u16 = data.read_at(2)?;
        let mut records = Vec::with_capacity(num_tables as usize);
        for i in 0..num_tables as usize {
            let start = 4 + i * 8;
            records.push(EncodingRecord {
                platform_id: data.read_at(start)?,
                encoding_id: data.read_at(start + 2)?,
                offset: data.read_at(start + 4)?,
            });
        }
        Ok(Cmap { data, records })
    }

    fn subtable_data(&self, record: &EncodingRecord) -> Option<FontData<'a>> {
        self.data.resolve_offset(record.offset)
    }

    fn find(&self, key: (u16, u16)) -> Option<FontData<'a>> {
        self.records
            .iter()
            .find(|r| (r.platform_id, r.encoding_id) == key)
            .and_then(|r| self.subtable_data(r))
    }

    /// Collect the full codepoint -> gid mapping from the best unicode
    /// subtable.
    pub(crate) fn collect_mapping(&self) -> FnvHashMap<u32, GlyphId> {
        let mut mapping = FnvHashMap::default();
        let preference = [WINDOWS_FULL, UNICODE_FULL, WINDOWS_BMP, UNICODE_BMP, (3, 0)];
        for key in preference {
            if let Some(data) = self.find(key) {
                mapping.clear();
                if collect_subtable_mapping(&data, &mut mapping).is_some() && !mapping.is_empty() {
                    return mapping;
                }
            }
        }
        // fall back to whatever record parses
        for record in &self.records {
            if let Some(data) = self.subtable_data(record) {
                mapping.clear();
                if collect_subtable_mapping(&data, &mut mapping).is_some() && !mapping.is_empty() {
                    break;
                }
            }
        }
        mapping
    }

    fn format14(&self) -> Option<Format14<'a>> {
        let data = self.find(UNICODE_VARIATION)?;
        let format: u16 = data.read_at(0).ok()?;
        (format == 14).then_some(Format14 { data })
    }

    /// Variation selectors present in the font.
    pub(crate) fn collect_variation_selectors(&self, out: &mut Vec<u32>) {
        if let Some(fmt14) = self.format14() {
            for record in fmt14.records() {
                out.push(record.var_selector);
            }
        }
    }

    /// Add glyphs reachable from retained variation sequences.
    pub(crate) fn closure_glyphs(
        &self,
        unicodes: &std::collections::BTreeSet<u32>,
        glyphset: &mut std::collections::BTreeSet<GlyphId>,
    ) {
        let Some(fmt14) = self.format14() else {
            return;
        };
        for record in fmt14.records() {
            if !unicodes.contains(&record.var_selector) {
                continue;
            }
            for (unicode, gid) in fmt14.non_default_mappings(&record) {
                if unicodes.contains(&unicode) {
                    glyphset.insert(gid);
                }
            }
        }
    }
}

fn collect_subtable_mapping(
    data: &FontData,
    mapping: &mut FnvHashMap<u32, GlyphId>,
) -> Option<()> {
    let format: u16 = data.read_at(0).ok()?;
    match format {
        0 => {
            for cp in 0u32..256 {
                let gid: u8 = data.read_at(6 + cp as usize).ok()?;
                if gid != 0 {
                    mapping.insert(cp, GlyphId::new(gid as u32));
                }
            }
        }
        4 => {
            let seg_count_x2: u16 = data.read_at(6).ok()?;
            let seg_count = (seg_count_x2 / 2) as usize;
            let end_codes = 14usize;
            let start_codes = end_codes + seg_count * 2 + 2;
            let id_deltas = start_codes + seg_count * 2;
            let id_range_offsets = id_deltas + seg_count * 2;
            for seg in 0..seg_count {
                let end: u16 = data.read_at(end_codes + seg * 2).ok()?;
                let start: u16 = data.read_at(start_codes + seg * 2).ok()?;
                let delta: i16 = data.read_at(id_deltas + seg * 2).ok()?;
                let range_offset: u16 = data.read_at(id_range_offsets + seg * 2).ok()?;
                if start > end {
                    return None;
                }
                for cp in start..=end {
                    if cp == 0xFFFF {
                        continue;
                    }
                    let gid = if range_offset == 0 {
                        (cp as i32 + delta as i32) as u16
                    } else {
                        let pos = id_range_offsets
                            + seg * 2
                            + range_offset as usize
                            + (cp - start) as usize * 2;
                        let gid: u16 = data.read_at(pos).ok()?;
                        if gid == 0 {
                            continue;
                        }
                        (gid as i32 + delta as i32) as u16
                    };
                    if gid != 0 {
                        mapping.insert(cp as u32, GlyphId::new(gid as u32));
                    }
                }
            }
        }
        6 => {
            let first: u16 = data.read_at(6).ok()?;
            let count: u16 = data.read_at(8).ok()?;
            for i in 0..count {
                let gid: u16 = data.read_at(10 + i as usize * 2).ok()?;
                if gid != 0 {
                    mapping.insert(first as u32 + i as u32, GlyphId::new(gid as u32));
                }
            }
        }
        12 | 13 => {
            let num_groups: u32 = data.read_at(12).ok()?;
            for i in 0..num_groups as usize {
                let start: u32 = data.read_at(16 + i * 12).ok()?;
                let end: u32 = data.read_at(16 + i * 12 + 4).ok()?;
                let start_gid: u32 = data.read_at(16 + i * 12 + 8).ok()?;
                if start > end || end > 0x10FFFF {
                    return None;
                }
                for cp in start..=end {
                    let gid = if format == 12 {
                        start_gid + (cp - start)
                    } else {
                        start_gid
                    };
                    if gid != 0 {
                        mapping.insert(cp, GlyphId::new(gid));
                    }
                }
            }
        }
        _ => return None,
    }
    Some(())
}

struct Format14<'a> {
    data: FontData<'a>,
}

struct VarSelectorRecord {
    var_selector: u32,
    default_uvs_offset: u32,
    non_default_uvs_offset: u32,
}

impl<'a> Format14<'a> {
    fn records(&self) -> Vec<VarSelectorRecord> {
        let Ok(count) = self.data.read_at::<u32>(6) else {
            return Vec::new();
        };
        let mut records = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let start = 10 + i * 11;
            let (Ok(selector), Ok(default), Ok(non_default)) = (
                self.data.read_at::<Uint24>(start),
                self.data.read_at::<u32>(start + 3),
                self.data.read_at::<u32>(start + 7),
            ) else {
                break;
            };
            records.push(VarSelectorRecord {
                var_selector: selector.to_u32(),
                default_uvs_offset: default,
                non_default_uvs_offset: non_default,
            });
        }
        records
    }

    fn default_ranges(&self, record: &VarSelectorRecord) -> Vec<(u32, u8)> {
        let mut out = Vec::new();
        let Some(data) = self.data.resolve_offset(record.default_uvs_offset) else {
            return out;
        };
        let Ok(count) = data.read_at::<u32>(0) else {
            return out;
        };
        for i in 0..count as usize {
            let start = 4 + i * 4;
            let (Ok(unicode), Ok(additional)) = (
                data.read_at::<Uint24>(start),
                data.read_at::<u8>(start + 3),
            ) else {
                break;
            };
            out.push((unicode.to_u32(), additional));
        }
        out
    }

    fn non_default_mappings(&self, record: &VarSelectorRecord) -> Vec<(u32, GlyphId)> {
        let mut out = Vec::new();
        let Some(data) = self.data.resolve_offset(record.non_default_uvs_offset) else {
            return out;
        };
        let Ok(count) = data.read_at::<u32>(0) else {
            return out;
        };
        for i in 0..count as usize {
            let start = 4 + i * 5;
            let (Ok(unicode), Ok(gid)) = (
                data.read_at::<Uint24>(start),
                data.read_at::<u16>(start + 3),
            ) else {
                break;
            };
            out.push((unicode.to_u32(), GlyphId::new(gid as u32)));
        }
        out
    }
}

// reference: subset() for cmap in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/a070f9ebbe88dc71b248af9731dd49ec93f4e6e6/src/hb-ot-cmap-table.hh#L548
impl Subset for Cmap<'_> {
    fn subset(
        &self,
        plan: &Plan,
        _face: &Face,
        s: &mut Serializer,
        _builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        let pairs: Vec<(u32, u16)> = plan
            .unicode_to_new_gid_list
            .iter()
            .map(|(cp, gid)| (*cp, gid.to_u32() as u16))
            .collect();
        let has_supplementary = pairs.iter().any(|(cp, _)| *cp > 0xFFFF);

        let format14 = self.format14().map(|fmt14| subset_format14(&fmt14, plan));
        let format14 = match format14 {
            Some(bytes) if !bytes.is_empty() => Some(bytes),
            _ => None,
        };
        // the BMP subtable is skipped when its 16-bit length field cannot
        // hold it; the format 12 subtable takes over
        let format4 = serialize_format4(&pairs);
        let need_format12 = has_supplementary || format4.is_none();

        let mut records: Vec<((u16, u16), SubtableKind)> = Vec::new();
        if format4.is_some() {
            records.push((UNICODE_BMP, SubtableKind::Format4));
        }
        if need_format12 {
            records.push((UNICODE_FULL, SubtableKind::Format12));
        }
        if format14.is_some() {
            records.push((UNICODE_VARIATION, SubtableKind::Format14));
        }
        if format4.is_some() {
            records.push((WINDOWS_BMP, SubtableKind::Format4));
        }
        if need_format12 {
            records.push((WINDOWS_FULL, SubtableKind::Format12));
        }

        let err = |_| SubsetTableError(CMAP);

        // header
        s.embed(0u16).map_err(err)?;
        s.embed(records.len() as u16).map_err(err)?;
        let mut link_positions = Vec::with_capacity(records.len());
        for ((platform_id, encoding_id), _) in &records {
            s.embed(*platform_id).map_err(err)?;
            s.embed(*encoding_id).map_err(err)?;
            link_positions.push(s.embed(0u32).map_err(err)?);
        }

        // identical subtables merge through dedupe, so emitting a format
        // twice links both records to one object
        for (((_, _), kind), link_pos) in records.iter().zip(link_positions) {
            s.push().map_err(err)?;
            let bytes = match kind {
                SubtableKind::Format4 => format4.clone().unwrap_or_default(),
                SubtableKind::Format12 => serialize_format12(&pairs),
                SubtableKind::Format14 => format14.clone().unwrap_or_default(),
            };
            s.embed_bytes(&bytes).map_err(err)?;
            let Some(obj_idx) = s.pop_pack(true) else {
                return Err(SubsetTableError(CMAP));
            };
            s.add_link(link_pos..link_pos + 4, obj_idx, OffsetWhence::Head, 0, false)
                .map_err(err)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum SubtableKind {
    Format4,
    Format12,
    Format14,
}

/// Build a format 4 subtable over the BMP mappings, or `None` when the
/// result would not fit its 16-bit length field.
fn serialize_format4(pairs: &[(u32, u16)]) -> Option<Vec<u8>> {
    struct Segment {
        start: u16,
        end: u16,
        gids: Vec<u16>,
    }

    let mut segments: Vec<Segment> = Vec::new();
    for (cp, gid) in pairs.iter().filter(|(cp, _)| *cp <= 0xFFFE) {
        let cp = *cp as u16;
        match segments.last_mut() {
            Some(seg) if seg.end + 1 == cp => {
                seg.end = cp;
                seg.gids.push(*gid);
            }
            _ => segments.push(Segment {
                start: cp,
                end: cp,
                gids: vec![*gid],
            }),
        }
    }
    // the required final segment
    segments.push(Segment {
        start: 0xFFFF,
        end: 0xFFFF,
        gids: Vec::new(),
    });

    let seg_count = segments.len() as u16;
    // a segment encodes as a delta when gids progress with the codepoints
    let uses_delta: Vec<bool> = segments
        .iter()
        .map(|seg| {
            seg.gids.is_empty()
                || seg
                    .gids
                    .iter()
                    .enumerate()
                    .all(|(i, gid)| *gid as u32 == seg.gids[0] as u32 + i as u32)
        })
        .collect();
    let glyph_id_array_len: usize = segments
        .iter()
        .zip(&uses_delta)
        .filter(|(_, delta)| !**delta)
        .map(|(seg, _)| seg.gids.len())
        .sum();

    let length = 16 + seg_count as usize * 8 + glyph_id_array_len * 2;
    if length > 0xFFFF {
        return None;
    }
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&(length as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // language

    let entry_selector = 15 - seg_count.leading_zeros() as u16;
    let search_range = 2 * (1u16 << entry_selector);
    out.extend_from_slice(&(seg_count * 2).to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&(seg_count * 2 - search_range).to_be_bytes());

    for seg in &segments {
        out.extend_from_slice(&seg.end.to_be_bytes());
    }
    out.extend_from_slice(&0u16.to_be_bytes()); // reservedPad
    for seg in &segments {
        out.extend_from_slice(&seg.start.to_be_bytes());
    }
    for (i, seg) in segments.iter().enumerate() {
        let delta: u16 = if uses_delta[i] {
            if seg.gids.is_empty() {
                1 // final 0xFFFF segment
            } else {
                seg.gids[0].wrapping_sub(seg.start)
            }
        } else {
            0
        };
        out.extend_from_slice(&delta.to_be_bytes());
    }
    let mut array_offset = 0usize;
    for (i, seg) in segments.iter().enumerate() {
        let range_offset: u16 = if uses_delta[i] {
            0
        } else {
            let v = 2 * (seg_count as usize - i + array_offset);
            array_offset += seg.gids.len();
            v as u16
        };
        out.extend_from_slice(&range_offset.to_be_bytes());
    }
    for (seg, delta) in segments.iter().zip(&uses_delta) {
        if !*delta {
            for gid in &seg.gids {
                out.extend_from_slice(&gid.to_be_bytes());
            }
        }
    }
    Some(out)
}

/// Build a format 12 subtable over all mappings.
fn serialize_format12(pairs: &[(u32, u16)]) -> Vec<u8> {
    // a group covers consecutive codepoints mapping to consecutive gids
    let mut groups: Vec<(u32, u32, u32)> = Vec::new();
    for (cp, gid) in pairs {
        match groups.last_mut() {
            Some((start, end, start_gid))
                if *end + 1 == *cp && *gid as u32 == *start_gid + (*cp - *start) =>
            {
                *end = *cp;
            }
            _ => groups.push((*cp, *cp, *gid as u32)),
        }
    }

    let length = 16 + groups.len() * 12;
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&12u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(length as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // language
    out.extend_from_slice(&(groups.len() as u32).to_be_bytes());
    for (start, end, gid) in &groups {
        out.extend_from_slice(&start.to_be_bytes());
        out.extend_from_slice(&end.to_be_bytes());
        out.extend_from_slice(&gid.to_be_bytes());
    }
    out
}

/// Filter a format 14 subtable to retained selectors and sequences.
fn subset_format14(fmt14: &Format14, plan: &Plan) -> Vec<u8> {
    struct RetainedRecord {
        selector: u32,
        default_ranges: Vec<(u32, u8)>,
        non_default: Vec<(u32, u16)>,
    }

    let mut retained: Vec<RetainedRecord> = Vec::new();
    for record in fmt14.records() {
        if !plan.unicodes.contains(&record.var_selector) {
            continue;
        }

        // re-segment the default ranges over retained base characters
        let mut default_unicodes: Vec<u32> = Vec::new();
        for (start, additional) in fmt14.default_ranges(&record) {
            for cp in start..=start + additional as u32 {
                if plan.unicodes.contains(&cp) {
                    default_unicodes.push(cp);
                }
            }
        }
        let mut default_ranges: Vec<(u32, u8)> = Vec::new();
        for cp in default_unicodes {
            match default_ranges.last_mut() {
                Some((start, count)) if *start + *count as u32 + 1 == cp && *count < 0xFF => {
                    *count += 1;
                }
                _ => default_ranges.push((cp, 0)),
            }
        }

        let non_default: Vec<(u32, u16)> = fmt14
            .non_default_mappings(&record)
            .into_iter()
            .filter(|(unicode, _)| plan.unicodes.contains(unicode))
            .filter_map(|(unicode, gid)| {
                plan.glyph_map
                    .get(&gid)
                    .map(|new_gid| (unicode, new_gid.to_u32() as u16))
            })
            .collect();

        if default_ranges.is_empty() && non_default.is_empty() {
            continue;
        }
        retained.push(RetainedRecord {
            selector: record.var_selector,
            default_ranges,
            non_default,
        });
    }

    if retained.is_empty() {
        return Vec::new();
    }

    let header_len = 10 + retained.len() * 11;
    let total_len = header_len
        + retained
            .iter()
            .map(|r| {
                let mut len = 0;
                if !r.default_ranges.is_empty() {
                    len += 4 + r.default_ranges.len() * 4;
                }
                if !r.non_default.is_empty() {
                    len += 4 + r.non_default.len() * 5;
                }
                len
            })
            .sum::<usize>();

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&14u16.to_be_bytes());
    out.extend_from_slice(&(total_len as u32).to_be_bytes());
    out.extend_from_slice(&(retained.len() as u32).to_be_bytes());

    let mut offset = header_len as u32;
    for record in &retained {
        out.extend_from_slice(Uint24::new(record.selector).to_raw().as_ref());
        if record.default_ranges.is_empty() {
            out.extend_from_slice(&0u32.to_be_bytes());
        } else {
            out.extend_from_slice(&offset.to_be_bytes());
            offset += 4 + record.default_ranges.len() as u32 * 4;
        }
        if record.non_default.is_empty() {
            out.extend_from_slice(&0u32.to_be_bytes());
        } else {
            out.extend_from_slice(&offset.to_be_bytes());
            offset += 4 + record.non_default.len() as u32 * 5;
        }
    }
    for record in &retained {
        if !record.default_ranges.is_empty() {
            out.extend_from_slice(&(record.default_ranges.len() as u32).to_be_bytes());
            for (start, additional) in &record.default_ranges {
                out.extend_from_slice(Uint24::new(*start).to_raw().as_ref());
                out.push(*additional);
            }
        }
        if !record.non_default.is_empty() {
            out.extend_from_slice(&(record.non_default.len() as u32).to_be_bytes());
            for (unicode, gid) in &record.non_default {
                out.extend_from_slice(Uint24::new(*unicode).to_raw().as_ref());
                out.extend_from_slice(&gid.to_be_bytes());
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn format4_roundtrip() {
        // A, B, C map to 1, 2, 5: two segments
        let pairs = vec![(0x41u32, 1u16), (0x42, 2), (0x43, 5)];
        let bytes = serialize_format4(&pairs).unwrap();
        let mut mapping = FnvHashMap::default();
        collect_subtable_mapping(&FontData::new(&bytes), &mut mapping).unwrap();
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.get(&0x41), Some(&GlyphId::new(1)));
        assert_eq!(mapping.get(&0x42), Some(&GlyphId::new(2)));
        assert_eq!(mapping.get(&0x43), Some(&GlyphId::new(5)));
    }

    #[test]
    fn format4_non_contiguous_gids_use_glyph_array() {
        let pairs = vec![(0x41u32, 9u16), (0x42, 3), (0x43, 7)];
        let bytes = serialize_format4(&pairs).unwrap();
        let mut mapping = FnvHashMap::default();
        collect_subtable_mapping(&FontData::new(&bytes), &mut mapping).unwrap();
        assert_eq!(mapping.get(&0x41), Some(&GlyphId::new(9)));
        assert_eq!(mapping.get(&0x42), Some(&GlyphId::new(3)));
        assert_eq!(mapping.get(&0x43), Some(&GlyphId::new(7)));
    }

    #[test]
    fn format12_groups_consecutive_runs() {
        let pairs = vec![(0x1F600u32, 1u16), (0x1F601, 2), (0x1F603, 3)];
        let bytes = serialize_format12(&pairs);
        let num_groups = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
        assert_eq!(num_groups, 2);
        let mut mapping = FnvHashMap::default();
        collect_subtable_mapping(&FontData::new(&bytes), &mut mapping).unwrap();
        assert_eq!(mapping.get(&0x1F600), Some(&GlyphId::new(1)));
        assert_eq!(mapping.get(&0x1F603), Some(&GlyphId::new(3)));
    }
}
