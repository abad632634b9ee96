//! impl subset() for post

use fnv::FnvHashMap;
use font_types::GlyphId;

use crate::face::{Face, FontBuilder};
use crate::sanitize::FontData;
use crate::{
    Plan,
    SubsetError::{self, SubsetTableError},
    SubsetFlags, POST,
};

// reference: subset() for post in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/a070f9ebbe88dc71b248af9731dd49ec93f4e6e6/src/hb-ot-post-table.hh#L96
pub(crate) fn subset_post(
    face: &Face,
    plan: &Plan,
    builder: &mut FontBuilder,
) -> Result<(), SubsetError> {
    let post = face.table_data(POST).ok_or(SubsetTableError(POST))?;
    let mut out = post
        .as_bytes()
        .get(0..32)
        .ok_or(SubsetTableError(POST))?
        .to_owned();

    let glyph_names = plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_GLYPH_NAMES);
    let version: u32 = post.read_at(0).unwrap_or_default();

    if !glyph_names {
        // version 3 has no glyph names
        out[0..4].copy_from_slice(&0x0003_0000u32.to_be_bytes());
    } else if version == 0x0002_0000 {
        subset_post_v2_tail(&post, plan, &mut out);
    }

    builder.add_raw(POST, out);
    Ok(())
}

fn subset_post_v2_tail(post: &FontData, plan: &Plan, out: &mut Vec<u8>) {
    let Ok(old_num_glyphs) = post.read_at::<u16>(32) else {
        return;
    };
    out.extend_from_slice(&(plan.num_output_glyphs as u16).to_be_bytes());

    let idx_start = out.len();
    out.resize(out.len() + plan.num_output_glyphs * 2, 0);

    // locate the string pool and index it up front
    let pool_start = 34 + old_num_glyphs as usize * 2;
    let mut strings: Vec<&[u8]> = Vec::new();
    let mut pos = pool_start;
    while let Ok(len) = post.read_at::<u8>(pos) {
        let Some(data) = post.slice(pos + 1..pos + 1 + len as usize) else {
            break;
        };
        strings.push(data.as_bytes());
        pos += 1 + len as usize;
    }

    let mut visited: FnvHashMap<&[u8], u16> = FnvHashMap::default();
    let mut next_custom: u16 = 258;
    for old_gid in 0..old_num_glyphs {
        let Some(new_gid) = plan.glyph_map.get(&GlyphId::new(old_gid as u32)) else {
            continue;
        };
        let new_gid = new_gid.to_u32() as usize;
        if new_gid >= plan.num_output_glyphs {
            continue;
        }
        let Ok(old_index) = post.read_at::<u16>(34 + old_gid as usize * 2) else {
            continue;
        };
        let new_index = if old_index < 258 {
            old_index
        } else {
            let Some(name) = strings.get(old_index as usize - 258) else {
                continue;
            };
            match visited.get(name) {
                Some(idx) => *idx,
                None => {
                    let idx = next_custom;
                    visited.insert(name, idx);
                    next_custom += 1;
                    out.push(name.len() as u8);
                    out.extend_from_slice(name);
                    idx
                }
            }
        };
        let field = idx_start + new_gid * 2;
        out[field..field + 2].copy_from_slice(&new_index.to_be_bytes());
    }
}
