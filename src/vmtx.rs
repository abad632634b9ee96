//! impl subset() for vmtx/vhea

use font_types::GlyphId;

use crate::face::{Face, FontBuilder};
use crate::hmtx::{compute_num_long_metrics, LongMetrics};
use crate::serialize::Serializer;
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    VHEA, VMTX,
};

pub(crate) struct VmtxSubset<'a> {
    pub metrics: LongMetrics<'a>,
}

impl Subset for VmtxSubset<'_> {
    fn subset(
        &self,
        plan: &Plan,
        face: &Face,
        s: &mut Serializer,
        builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        let get_metrics = |old_gid: GlyphId, new_gid: GlyphId| -> (u16, i16) {
            match plan.vmtx_map.get(&new_gid) {
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

        let vmtx_len = num_long * 4 + (plan.num_output_glyphs - num_long) * 2;
        s.allocate_size(vmtx_len, true)
            .map_err(|_| SubsetTableError(VMTX))?;

        for (new_gid, old_gid) in &plan.new_to_old_gid_list {
            let (advance, tsb) = get_metrics(*old_gid, *new_gid);
            let new_gid = new_gid.to_u32() as usize;
            if new_gid < num_long {
                let idx = 4 * new_gid;
                s.copy_assign(idx, advance);
                s.copy_assign(idx + 2, tsb);
            } else {
                let idx = 4 * num_long + (new_gid - num_long) * 2;
                s.copy_assign(idx, tsb);
            }
        }

        let Some(vhea) = face.table_data(VHEA) else {
            return Ok(());
        };
        let mut vhea_out = vhea.as_bytes().to_owned();
        if let Some(field) = vhea_out.get_mut(34..36) {
            field.copy_from_slice(&(num_long as u16).to_be_bytes());
        }
        builder.add_raw(VHEA, vhea_out);
        Ok(())
    }
}
