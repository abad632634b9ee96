//! impl subset() for glyf and loca

use font_types::{F2Dot14, GlyphId, Scalar};

use crate::face::{Face, FontBuilder};
use crate::glyph::{
    self, compile_composite_glyph, compile_simple_glyph, Anchor, CompositeOutput, Glyph,
    PHANTOM_POINT_COUNT,
};
use crate::loca::Loca;
use crate::sanitize::FontData;
use crate::serialize::Serializer;
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    SubsetFlags, GLYF, HEAD, LOCA,
};

// reference: subset() for glyf/loca/head in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/a070f9ebbe88dc71b248af9731dd49ec93f4e6e6/src/OT/glyf/glyf.hh#L77
pub(crate) struct GlyfSubset<'a> {
    pub glyf: FontData<'a>,
    pub loca: Loca<'a>,
}

impl Subset for GlyfSubset<'_> {
    fn subset(
        &self,
        plan: &Plan,
        face: &Face,
        s: &mut Serializer,
        builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        let head = face.table_data(HEAD).ok_or(SubsetTableError(HEAD))?;

        let num_output_glyphs = plan.num_output_glyphs;
        let mut subset_glyphs = Vec::with_capacity(num_output_glyphs);
        let mut max_offset: u32 = 0;
        let instancing = !plan.normalized_coords.is_empty();

        for (new_gid, old_gid) in &plan.new_to_old_gid_list {
            if *old_gid == GlyphId::NOTDEF
                && *new_gid == GlyphId::NOTDEF
                && !plan
                    .subset_flags
                    .contains(SubsetFlags::SUBSET_FLAGS_NOTDEF_OUTLINE)
            {
                subset_glyphs.push(Vec::new());
                continue;
            }

            let Ok(range) = self.loca.glyph_range(old_gid.to_u32()) else {
                return Err(SubsetTableError(GLYF));
            };
            let data = self.glyf.slice(range).ok_or(SubsetTableError(GLYF))?;
            let Ok(glyph) = Glyph::read(data) else {
                subset_glyphs.push(Vec::new());
                continue;
            };

            let subset_glyph = if instancing {
                instantiate_glyph(&glyph, plan, *new_gid)
            } else {
                subset_glyph_fast(&glyph, plan)
            };
            max_offset += padded_size(subset_glyph.len()) as u32;
            subset_glyphs.push(subset_glyph);
        }

        let loca_long = max_offset > 0x1FFFE;
        let loca_out = write_glyf_loca(plan, s, loca_long, &subset_glyphs)?;

        let mut head_out = head.as_bytes().to_owned();
        if let Some(field) = head_out.get_mut(50..52) {
            field.copy_from_slice(&[0, loca_long as u8]);
        }

        builder.add_raw(LOCA, loca_out);
        builder.add_raw(HEAD, head_out);
        Ok(())
    }
}

fn padded_size(len: usize) -> usize {
    len + len % 2
}

// glyf data is written into the serializer, returning loca data to be added
// by the builder
fn write_glyf_loca(
    plan: &Plan,
    s: &mut Serializer,
    loca_long: bool,
    subset_glyphs: &[Vec<u8>],
) -> Result<Vec<u8>, SubsetError> {
    let entry_len = if loca_long { 4 } else { 2 };
    let mut loca_out: Vec<u8> = Vec::with_capacity((plan.num_output_glyphs + 1) * entry_len);

    let write_entry = |out: &mut Vec<u8>, offset: u32| {
        if loca_long {
            out.extend_from_slice(&offset.to_be_bytes());
        } else {
            out.extend_from_slice(&((offset >> 1) as u16).to_be_bytes());
        }
    };
    write_entry(&mut loca_out, 0);

    let init_len = s.length();
    let mut offset: u32 = 0;
    let mut last: u32 = 0;
    for ((new_gid, _), glyph) in plan.new_to_old_gid_list.iter().zip(subset_glyphs) {
        let gid = new_gid.to_u32();
        // retain-gids holes are zero-length entries
        while last < gid {
            write_entry(&mut loca_out, offset);
            last += 1;
        }

        s.embed_bytes(glyph)
            .map_err(|_| SubsetTableError(GLYF))?;
        let padded = padded_size(glyph.len());
        if padded > glyph.len() {
            s.embed_bytes(&[0]).map_err(|_| SubsetTableError(GLYF))?;
        }
        offset += padded as u32;
        write_entry(&mut loca_out, offset);
        last += 1;
    }
    while last < plan.num_output_glyphs as u32 {
        write_entry(&mut loca_out, offset);
        last += 1;
    }

    // As a special case when all glyphs in the font are empty, add a zero
    // byte to the table, so that OTS doesn't reject it, and to make the table
    // work on Windows as well.
    // See https://github.com/khaledhosny/ots/issues/52
    if init_len == s.length() {
        s.embed_bytes(&[0]).map_err(|_| SubsetTableError(GLYF))?;
    }
    Ok(loca_out)
}

fn subset_glyph_fast(glyph: &Glyph, plan: &Plan) -> Vec<u8> {
    match glyph {
        Glyph::Empty => Vec::new(),
        Glyph::Simple(_) => subset_simple_glyph(glyph, plan),
        Glyph::Composite(_) => subset_composite_glyph(glyph, plan),
    }
}

fn subset_simple_glyph(glyph: &Glyph, plan: &Plan) -> Vec<u8> {
    let Glyph::Simple(g) = glyph else {
        return Vec::new();
    };
    let trimmed = g.trimmed_len();
    if trimmed == 0 {
        return Vec::new();
    }
    let glyph_bytes = g.data().as_bytes();
    let header_len = 10 + 2 * (g.number_of_contours() as usize) + 2;
    let Some(header_slice) = glyph_bytes.get(0..header_len) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(trimmed);
    out.extend_from_slice(header_slice);

    if plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_NO_HINTING)
    {
        // drop hints: zero the instructionLength field
        out[header_len - 2] = 0;
        out[header_len - 1] = 0;
    } else {
        let instruction_end = header_len + g.instruction_length() as usize;
        let Some(instruction_slice) = glyph_bytes.get(header_len..instruction_end) else {
            return Vec::new();
        };
        out.extend_from_slice(instruction_slice);
    }

    let stream_start = header_len + g.instruction_length() as usize;
    let Some(stream) = glyph_bytes.get(stream_start..trimmed) else {
        return Vec::new();
    };
    let first_flag_index = out.len();
    out.extend_from_slice(stream);
    if plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_SET_OVERLAPS_FLAG)
        && first_flag_index < out.len()
    {
        out[first_flag_index] |= glyph::OVERLAP_SIMPLE;
    }
    out
}

fn subset_composite_glyph(glyph: &Glyph, plan: &Plan) -> Vec<u8> {
    let Glyph::Composite(g) = glyph else {
        return Vec::new();
    };
    let trimmed = g.trimmed_len();
    if trimmed == 0 {
        return Vec::new();
    }
    let mut out = g.data().as_bytes()[..trimmed].to_owned();

    let no_hinting = plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_NO_HINTING);

    let mut more = true;
    let mut i: usize = 10;
    let len = out.len();
    while more {
        if i + 3 >= len {
            return Vec::new();
        }
        let mut flags = u16::from_be_bytes([out[i], out[i + 1]]);

        if flags & glyph::WE_HAVE_INSTRUCTIONS != 0 && no_hinting {
            flags &= !glyph::WE_HAVE_INSTRUCTIONS;
            out[i..i + 2].copy_from_slice(&flags.to_be_bytes());
        }

        // only set the overlaps flag on the first component
        if plan
            .subset_flags
            .contains(SubsetFlags::SUBSET_FLAGS_SET_OVERLAPS_FLAG)
            && i == 10
        {
            flags |= glyph::OVERLAP_COMPOUND;
            out[i..i + 2].copy_from_slice(&flags.to_be_bytes());
        }

        let old_gid = u16::from_be_bytes([out[i + 2], out[i + 3]]);
        let Some(new_gid) = plan.glyph_map.get(&GlyphId::new(old_gid as u32)) else {
            return Vec::new();
        };
        out[i + 2..i + 4].copy_from_slice(&(new_gid.to_u32() as u16).to_be_bytes());

        i += 4;
        i += if flags & glyph::ARG_1_AND_2_ARE_WORDS != 0 {
            4
        } else {
            2
        };
        if flags & glyph::WE_HAVE_A_SCALE != 0 {
            i += 2;
        } else if flags & glyph::WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            i += 4;
        } else if flags & glyph::WE_HAVE_A_TWO_BY_TWO != 0 {
            i += 8;
        }

        more = flags & glyph::MORE_COMPONENTS != 0;
    }

    if no_hinting {
        out.truncate(i);
    }
    out
}

/// Rebuild a glyph from its delta-applied point set.
fn instantiate_glyph(glyph: &Glyph, plan: &Plan, new_gid: GlyphId) -> Vec<u8> {
    let Some(all_points) = plan.instance_points_map.get(&new_gid) else {
        return Vec::new();
    };
    let no_hinting = plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_NO_HINTING);
    let set_overlaps = plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_SET_OVERLAPS_FLAG);
    let Some(bbox) = glyph::bbox_of(all_points) else {
        return Vec::new();
    };

    match glyph {
        Glyph::Empty => Vec::new(),
        Glyph::Simple(g) => {
            let contour_points = &all_points[..all_points.len() - PHANTOM_POINT_COUNT];
            let instructions = if no_hinting { &[] } else { g.instructions() };
            compile_simple_glyph(contour_points, bbox, instructions, set_overlaps)
        }
        Glyph::Composite(g) => {
            let deltas = plan.instance_deltas_map.get(&new_gid);
            let mut components = Vec::new();
            for (i, component) in g.components().enumerate() {
                let Some(new_child) = plan.glyph_map.get(&GlyphId::new(component.glyph as u32))
                else {
                    return Vec::new();
                };
                let anchor = match component.anchor {
                    Anchor::Offset { x, y } => {
                        let (dx, dy) = deltas
                            .and_then(|d| d.get(i))
                            .copied()
                            .unwrap_or((0.0, 0.0));
                        Anchor::Offset {
                            x: (x as f32 + dx).round() as i16,
                            y: (y as f32 + dy).round() as i16,
                        }
                    }
                    anchored => anchored,
                };
                components.push(CompositeOutput {
                    flags: component.flags,
                    glyph: new_child.to_u32() as u16,
                    anchor,
                    transform_bytes: transform_bytes(&component),
                });
            }
            if components.is_empty() {
                return Vec::new();
            }
            let instructions = if no_hinting { &[] } else { g.instructions() };
            compile_composite_glyph(&components, bbox, instructions, set_overlaps)
        }
    }
}

fn transform_bytes(component: &glyph::Component) -> Vec<u8> {
    let f = component.flags;
    let [xx, yx, xy, yy] = component.transform;
    let mut out = Vec::new();
    let push = |out: &mut Vec<u8>, v: f32| {
        out.extend_from_slice(F2Dot14::from_f32(v).to_raw().as_ref());
    };
    if f & glyph::WE_HAVE_A_SCALE != 0 {
        push(&mut out, xx);
    } else if f & glyph::WE_HAVE_AN_X_AND_Y_SCALE != 0 {
        push(&mut out, xx);
        push(&mut out, yy);
    } else if f & glyph::WE_HAVE_A_TWO_BY_TWO != 0 {
        push(&mut out, xx);
        push(&mut out, yx);
        push(&mut out, xy);
        push(&mut out, yy);
    }
    out
}
