//! impl subset() for hmtx/hhea

use font_types::GlyphId;

use crate::face::{Face, FontBuilder};
use crate::sanitize::FontData;
use crate::serialize::Serializer;
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    HHEA, HMTX,
};

/// A view over an hmtx- or vmtx-shaped table: `numLongMetrics` pairs of
/// (advance, side bearing), then bare side bearings with the last advance
/// repeated.
#[derive(Clone, Copy)]
pub(crate) struct LongMetrics<'a> {
    data: FontData<'a>,
    num_long: u16,
}

impl<'a> LongMetrics<'a> {
    pub(crate) fn new(data: FontData<'a>, num_long: u16) -> Self {
        LongMetrics { data, num_long }
    }

    pub(crate) fn advance(&self, gid: u32) -> u16 {
        let idx = (gid as usize).min((self.num_long as usize).saturating_sub(1));
        self.data.read_at(idx * 4).unwrap_or_default()
    }

    pub(crate) fn side_bearing(&self, gid: u32) -> i16 {
        let gid = gid as usize;
        let num_long = self.num_long as usize;
        let pos = if gid < num_long {
            gid * 4 + 2
        } else {
            num_long * 4 + (gid - num_long) * 2
        };
        self.data.read_at(pos).unwrap_or_default()
    }
}

// reference: subset() for hmtx/hhea in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/a070f9ebbe88dc71b248af9731dd49ec93f4e6e6/src/hb-ot-hmtx-table.hh#L214
pub(crate) struct HmtxSubset<'a> {
    pub metrics: LongMetrics<'a>,
}

impl Subset for HmtxSubset<'_> {
    fn subset(
        &self,
        plan: &Plan,
        face: &Face,
        s: &mut Serializer,
        builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        let get_metrics = |old_gid: GlyphId, new_gid: GlyphId| -> (u16, i16) {
            match plan.hmtx_map.get(&new_gid) {
                Some(pair) => *pair,
                None => (
                    self.metrics.advance(old_gid.to_u32()),
                    self.metrics.side_bearing(old_gid.to_u32()),
                ),
            }
        };

        let num_long = compute_num_long_metrics(plan, |new_gid| {
            plan.reverse_glyph_map
                .get(&new_gid)
                .map(|old_gid| get_metrics(*old_gid, new_gid).0)
                .unwrap_or(0)
        });

        let hmtx_len = num_long * 4 + (plan.num_output_glyphs - num_long) * 2;
        s.allocate_size(hmtx_len, true)
            .map_err(|_| SubsetTableError(HMTX))?;

        for (new_gid, old_gid) in &plan.new_to_old_gid_list {
            let (advance, lsb) = get_metrics(*old_gid, *new_gid);
            let new_gid = new_gid.to_u32() as usize;
            if new_gid < num_long {
                let idx = 4 * new_gid;
                s.copy_assign(idx, advance);
                s.copy_assign(idx + 2, lsb);
            } else {
                let idx = 4 * num_long + (new_gid - num_long) * 2;
                s.copy_assign(idx, lsb);
            }
        }

        let Some(hhea) = face.table_data(HHEA) else {
            return Ok(());
        };
        let mut hhea_out = hhea.as_bytes().to_owned();
        if let Some(field) = hhea_out.get_mut(34..36) {
            field.copy_from_slice(&(num_long as u16).to_be_bytes());
        }
        builder.add_raw(HHEA, hhea_out);
        Ok(())
    }
}

/// Shrink the long-metric count: trailing glyphs sharing the last advance
/// only need a side bearing.
pub(crate) fn compute_num_long_metrics(
    plan: &Plan,
    advance_of: impl Fn(GlyphId) -> u16,
) -> usize {
    if plan.num_output_glyphs == 0 {
        return 0;
    }
    let mut num_long = plan.num_output_glyphs.min(0xFFFF) as u32;
    let last_advance = advance_of(GlyphId::new(num_long - 1));
    while num_long > 1 {
        let advance = advance_of(GlyphId::new(num_long - 2));
        if advance != last_advance {
            break;
        }
        num_long -= 1;
    }
    num_long as usize
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn long_metrics_fallback_advance() {
        // 2 long metrics, 1 trailing side bearing
        let raw: &[u8] = &[
            0x02, 0x00, 0x00, 0x10, // advance 512, lsb 16
            0x01, 0x00, 0xFF, 0xF0, // advance 256, lsb -16
            0x00, 0x20, // bare lsb 32
        ];
        let metrics = LongMetrics::new(FontData::new(raw), 2);
        assert_eq!(metrics.advance(0), 512);
        assert_eq!(metrics.side_bearing(0), 16);
        assert_eq!(metrics.advance(1), 256);
        assert_eq!(metrics.side_bearing(1), -16);
        // past the long array the last advance repeats
        assert_eq!(metrics.advance(2), 256);
        assert_eq!(metrics.side_bearing(2), 32);
    }
}
