//! impl subset() for COLR (version 0)

use std::collections::BTreeSet;

use font_types::GlyphId;

use crate::face::{Face, FontBuilder};
use crate::sanitize::{FontData, ReadError};
use crate::serialize::{OffsetWhence, SerializeErrorFlags, Serializer};
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    COLR,
};

pub(crate) struct Colr<'a> {
    pub data: FontData<'a>,
}

#[derive(Clone, Copy)]
struct BaseGlyphRecord {
    gid: u16,
    first_layer: u16,
    num_layers: u16,
}

impl Colr<'_> {
    fn base_glyph_records(&self) -> Result<Vec<BaseGlyphRecord>, ReadError> {
        let count: u16 = self.data.read_at(2)?;
        let offset: u32 = self.data.read_at(4)?;
        let Some(records) = self.data.resolve_offset(offset) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            out.push(BaseGlyphRecord {
                gid: records.read_at(i * 6)?,
                first_layer: records.read_at(i * 6 + 2)?,
                num_layers: records.read_at(i * 6 + 4)?,
            });
        }
        Ok(out)
    }

    fn layer_record(&self, index: u16) -> Result<(u16, u16), ReadError> {
        let offset: u32 = self.data.read_at(8)?;
        let records = self
            .data
            .resolve_offset(offset)
            .ok_or(ReadError::OutOfBounds)?;
        Ok((
            records.read_at(index as usize * 4)?,
            records.read_at(index as usize * 4 + 2)?,
        ))
    }

    /// Add the layer glyphs of every retained base glyph.
    pub(crate) fn closure_glyphs(&self, glyphset: &mut BTreeSet<GlyphId>) {
        let Ok(records) = self.base_glyph_records() else {
            return;
        };
        for record in records {
            if !glyphset.contains(&GlyphId::new(record.gid as u32)) {
                continue;
            }
            for i in 0..record.num_layers {
                if let Ok((layer_gid, _)) = self.layer_record(record.first_layer + i) {
                    glyphset.insert(GlyphId::new(layer_gid as u32));
                }
            }
        }
    }
}

// reference: subset() for COLR in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/main/src/OT/Color/COLR/COLR.hh
impl Subset for Colr<'_> {
    fn subset(
        &self,
        plan: &Plan,
        _face: &Face,
        s: &mut Serializer,
        _builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        subset_colr(self, plan, s).map_err(|_| SubsetTableError(COLR))
    }
}

fn subset_colr(colr: &Colr, plan: &Plan, s: &mut Serializer) -> Result<(), SerializeErrorFlags> {
    let records = colr
        .base_glyph_records()
        .map_err(|_| s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_READ_ERROR))?;

    // rebuild the layer array densely over retained base glyphs
    let mut retained_bases: Vec<(u16, u16, u16)> = Vec::new();
    let mut layers: Vec<(u16, u16)> = Vec::new();
    for record in &records {
        let Some(new_base) = plan.glyph_map.get(&GlyphId::new(record.gid as u32)) else {
            continue;
        };
        let first = layers.len() as u16;
        let mut kept = 0u16;
        for i in 0..record.num_layers {
            let Ok((layer_gid, palette_index)) = colr.layer_record(record.first_layer + i) else {
                continue;
            };
            let Some(new_layer) = plan.glyph_map.get(&GlyphId::new(layer_gid as u32)) else {
                continue;
            };
            layers.push((new_layer.to_u32() as u16, palette_index));
            kept += 1;
        }
        if kept == 0 {
            continue;
        }
        retained_bases.push((new_base.to_u32() as u16, first, kept));
    }
    if retained_bases.is_empty() {
        return Err(s.set_err(SerializeErrorFlags::SERIALIZE_ERROR_EMPTY));
    }
    retained_bases.sort_unstable_by_key(|(gid, _, _)| *gid);

    s.embed(0u16)?; // version
    s.embed(retained_bases.len() as u16)?;
    let base_records_pos = s.embed(0u32)?;
    let layer_records_pos = s.embed(0u32)?;
    s.embed(layers.len() as u16)?;

    s.push()?;
    for (gid, first, count) in &retained_bases {
        s.embed(*gid)?;
        s.embed(*first)?;
        s.embed(*count)?;
    }
    let base_obj = s
        .pop_pack(true)
        .ok_or(SerializeErrorFlags::SERIALIZE_ERROR_OTHER)?;
    s.add_link(
        base_records_pos..base_records_pos + 4,
        base_obj,
        OffsetWhence::Head,
        0,
        false,
    )?;

    s.push()?;
    for (gid, palette_index) in &layers {
        s.embed(*gid)?;
        s.embed(*palette_index)?;
    }
    let layer_obj = s
        .pop_pack(true)
        .ok_or(SerializeErrorFlags::SERIALIZE_ERROR_OTHER)?;
    s.add_link(
        layer_records_pos..layer_records_pos + 4,
        layer_obj,
        OffsetWhence::Head,
        0,
        false,
    )
}
