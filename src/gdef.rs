//! impl subset() for GDEF

use font_types::GlyphId;

use crate::face::{Face, FontBuilder};
use crate::layout::{class_def_entries, coverage_glyphs, serialize_class_def, serialize_coverage};
use crate::sanitize::{FontData, ReadError};
use crate::serialize::{ObjIdx, OffsetWhence, SerializeErrorFlags, Serializer};
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    GDEF,
};

pub(crate) struct Gdef<'a> {
    pub data: FontData<'a>,
}

impl Subset for Gdef<'_> {
    fn subset(
        &self,
        plan: &Plan,
        _face: &Face,
        s: &mut Serializer,
        _builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        subset_gdef(self.data, plan, s).map_err(|_| SubsetTableError(GDEF))
    }
}

fn read_err(_: ReadError) -> SerializeErrorFlags {
    SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR
}

fn subset_gdef(
    data: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<(), SerializeErrorFlags> {
    let minor_version: u16 = data.read_at(2).map_err(read_err)?;
    let glyph_class_def_offset: u16 = data.read_at(4).map_err(read_err)?;
    let attach_list_offset: u16 = data.read_at(6).map_err(read_err)?;
    let lig_caret_list_offset: u16 = data.read_at(8).map_err(read_err)?;
    let mark_attach_class_def_offset: u16 = data.read_at(10).map_err(read_err)?;
    let mark_glyph_sets_offset: u16 = if minor_version >= 2 {
        data.read_at(12).map_err(read_err)?
    } else {
        0
    };

    let remap_classes = |offset: u16| -> Vec<(u16, u16)> {
        let Some(class_data) = data.resolve_offset(offset as u32) else {
            return Vec::new();
        };
        let Ok(entries) = class_def_entries(class_data) else {
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

    let glyph_classes = remap_classes(glyph_class_def_offset);
    let mark_attach_classes = remap_classes(mark_attach_class_def_offset);
    let has_mark_glyph_sets = mark_glyph_sets_offset != 0;

    // the table earns its keep only if something survives
    if glyph_classes.is_empty()
        && mark_attach_classes.is_empty()
        && attach_list_offset == 0
        && lig_caret_list_offset == 0
        && !has_mark_glyph_sets
    {
        return Err(s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY));
    }

    let out_minor: u16 = if has_mark_glyph_sets { 2 } else { 0 };
    s.embed(1u16)?;
    s.embed(out_minor)?;
    let glyph_class_pos = s.embed(0u16)?;
    let attach_list_pos = s.embed(0u16)?;
    let lig_caret_pos = s.embed(0u16)?;
    let mark_attach_pos = s.embed(0u16)?;
    let mark_sets_pos = if out_minor >= 2 {
        Some(s.embed(0u16)?)
    } else {
        None
    };

    if !glyph_classes.is_empty() {
        let obj = serialize_class_def(s, &glyph_classes)?;
        s.add_link(glyph_class_pos..glyph_class_pos + 2, obj, OffsetWhence::Head, 0, false)?;
    }
    if let Some(attach_list) = data.resolve_offset(attach_list_offset as u32) {
        let snap = s.snapshot();
        match subset_point_list(attach_list, plan, s, false) {
            Ok(obj) => {
                s.add_link(attach_list_pos..attach_list_pos + 2, obj, OffsetWhence::Head, 0, false)?
            }
            Err(_) => s.revert_snapshot(snap),
        }
    }
    if let Some(lig_caret_list) = data.resolve_offset(lig_caret_list_offset as u32) {
        let snap = s.snapshot();
        match subset_point_list(lig_caret_list, plan, s, true) {
            Ok(obj) => {
                s.add_link(lig_caret_pos..lig_caret_pos + 2, obj, OffsetWhence::Head, 0, false)?
            }
            Err(_) => s.revert_snapshot(snap),
        }
    }
    if !mark_attach_classes.is_empty() {
        let obj = serialize_class_def(s, &mark_attach_classes)?;
        s.add_link(mark_attach_pos..mark_attach_pos + 2, obj, OffsetWhence::Head, 0, false)?;
    }
    if let (Some(pos), Some(mark_sets)) = (
        mark_sets_pos,
        data.resolve_offset(mark_glyph_sets_offset as u32),
    ) {
        let obj = subset_mark_glyph_sets(mark_sets, plan, s)?;
        s.add_link(pos..pos + 2, obj, OffsetWhence::Head, 0, false)?;
    }
    Ok(())
}

/// AttachList and LigCaretList share their shape: a coverage plus one
/// per-glyph child table whose bytes ride along unchanged.
///
/// For the caret list (`nested`) each child holds offsets to caret values
/// which are rewritten; attach points are flat index arrays and are copied.
fn subset_point_list(
    list: FontData,
    plan: &Plan,
    s: &mut Serializer,
    nested: bool,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let coverage_offset: u16 = list.read_at(0).map_err(read_err)?;
    let coverage = list
        .resolve_offset(coverage_offset as u32)
        .ok_or(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR)?;
    let glyphs = coverage_glyphs(coverage).map_err(read_err)?;

    let mut retained: Vec<(u16, FontData)> = Vec::new();
    for (i, gid) in glyphs.iter().enumerate() {
        let Some(new_gid) = plan.glyph_map.get(gid) else {
            continue;
        };
        let child_offset: u16 = list.read_at(4 + i * 2).map_err(read_err)?;
        let Some(child) = list.resolve_offset(child_offset as u32) else {
            continue;
        };
        retained.push((new_gid.to_u32() as u16, child));
    }
    if retained.is_empty() {
        return Err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY);
    }
    retained.sort_unstable_by_key(|(gid, _)| *gid);

    let mut child_objs = Vec::with_capacity(retained.len());
    for (_, child) in &retained {
        let obj = if nested {
            subset_lig_glyph(*child, s)?
        } else {
            let count: u16 = child.read_at(0).map_err(read_err)?;
            s.push()?;
            s.embed(count)?;
            for i in 0..count as usize {
                let point: u16 = child.read_at(2 + i * 2).map_err(read_err)?;
                s.embed(point)?;
            }
            s.pop_pack(true).ok_or(s.error())?
        };
        child_objs.push(obj);
    }

    s.push()?;
    let coverage_pos = s.embed(0u16)?;
    s.embed(child_objs.len() as u16)?;
    let mut positions = Vec::with_capacity(child_objs.len());
    for _ in &child_objs {
        positions.push(s.embed(0u16)?);
    }
    for (pos, obj) in positions.iter().zip(&child_objs) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    let covered: Vec<u16> = retained.iter().map(|(g, _)| *g).collect();
    let coverage_obj = serialize_coverage(s, &covered)?;
    s.add_link(
        coverage_pos..coverage_pos + 2,
        coverage_obj,
        OffsetWhence::Head,
        0,
        false,
    )?;
    s.pop_pack(true).ok_or(s.error())
}

fn subset_lig_glyph(
    lig_glyph: FontData,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let caret_count: u16 = lig_glyph.read_at(0).map_err(read_err)?;
    let mut caret_objs = Vec::with_capacity(caret_count as usize);
    for i in 0..caret_count as usize {
        let offset: u16 = lig_glyph.read_at(2 + i * 2).map_err(read_err)?;
        let Some(caret) = lig_glyph.resolve_offset(offset as u32) else {
            continue;
        };
        let format: u16 = caret.read_at(0).map_err(read_err)?;
        let value: i16 = caret.read_at(2).map_err(read_err)?;
        s.push()?;
        // a format 3 caret drops its device reference and becomes format 1
        let out_format = if format == 2 { 2 } else { 1 };
        s.embed(out_format)?;
        s.embed(value)?;
        caret_objs.push(s.pop_pack(true).ok_or(s.error())?);
    }
    s.push()?;
    s.embed(caret_objs.len() as u16)?;
    let mut positions = Vec::with_capacity(caret_objs.len());
    for _ in &caret_objs {
        positions.push(s.embed(0u16)?);
    }
    for (pos, obj) in positions.iter().zip(&caret_objs) {
        s.add_link(*pos..*pos + 2, *obj, OffsetWhence::Head, 0, false)?;
    }
    s.pop_pack(true).ok_or(s.error())
}

/// Every mark glyph set is kept (lookup flags index into the array); each
/// coverage is filtered, possibly to empty.
fn subset_mark_glyph_sets(
    mark_sets: FontData,
    plan: &Plan,
    s: &mut Serializer,
) -> Result<ObjIdx, SerializeErrorFlags> {
    let count: u16 = mark_sets.read_at(2).map_err(read_err)?;
    let mut coverage_objs = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let offset: u32 = mark_sets.read_at(4 + i * 4).map_err(read_err)?;
        let glyphs: Vec<u16> = match mark_sets.resolve_offset(offset) {
            Some(coverage) => {
                let glyphs = coverage_glyphs(coverage).map_err(read_err)?;
                let mut out: Vec<u16> = glyphs
                    .iter()
                    .filter_map(|gid| plan.glyph_map.get(gid))
                    .map(|gid| gid.to_u32() as u16)
                    .collect();
                out.sort_unstable();
                out
            }
            None => Vec::new(),
        };
        coverage_objs.push(serialize_coverage(s, &glyphs)?);
    }

    s.push()?;
    s.embed(1u16)?;
    s.embed(coverage_objs.len() as u16)?;
    let mut positions = Vec::with_capacity(coverage_objs.len());
    for _ in &coverage_objs {
        positions.push(s.embed(0u32)?);
    }
    for (pos, obj) in positions.iter().zip(&coverage_objs) {
        s.add_link(*pos..*pos + 4, *obj, OffsetWhence::Head, 0, false)?;
    }
    s.pop_pack(true).ok_or(s.error())
}
