//! impl subset() for hdmx

use crate::face::{Face, FontBuilder};
use crate::serialize::Serializer;
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    HDMX,
};

fn ceil_to_4(v: u32) -> u32 {
    ((v - 1) | 3) + 1
}

// reference: subset() for hdmx in harfbuzz
// <https://github.com/harfbuzz/harfbuzz/blob/e451e91ec3608a2ebfec34d0c4f0b3d880e00e33/src/hb-ot-hdmx-table.hh#L116>
pub(crate) struct Hdmx<'a> {
    pub data: crate::FontData<'a>,
}

impl Subset for Hdmx<'_> {
    fn subset(
        &self,
        plan: &Plan,
        _face: &Face,
        s: &mut Serializer,
        _builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        let err_read = |_| SubsetTableError(HDMX);
        let err_write = |_| SubsetTableError(HDMX);
        let version: u16 = self.data.read_at(0).map_err(err_read)?;
        let num_records: u16 = self.data.read_at(2).map_err(err_read)?;
        let size_device_record: u32 = self.data.read_at(4).map_err(err_read)?;

        // each device record is long-aligned
        let new_record_size = ceil_to_4(2 + plan.num_output_glyphs as u32);

        s.embed(version).map_err(err_write)?;
        s.embed(num_records).map_err(err_write)?;
        s.embed(new_record_size).map_err(err_write)?;

        for i in 0..num_records as usize {
            let record_start = 8 + i * size_device_record as usize;
            let pixel_size: u8 = self.data.read_at(record_start).map_err(err_read)?;
            s.embed(pixel_size).map_err(err_write)?;
            let max_width_pos = s.embed(0u8).map_err(err_write)?;

            let widths_pos = s
                .allocate_size(new_record_size as usize - 2, true)
                .map_err(err_write)?;
            let mut max_width = 0u8;
            for (new_gid, old_gid) in plan.new_to_old_gid_list.iter() {
                let width: u8 = self
                    .data
                    .read_at(record_start + 2 + old_gid.to_u32() as usize)
                    .map_err(err_read)?;
                s.copy_assign(widths_pos + new_gid.to_u32() as usize, width);
                max_width = max_width.max(width);
            }
            // the widest retained glyph, not the source record's
            s.copy_assign(max_width_pos, max_width);
        }
        Ok(())
    }
}
