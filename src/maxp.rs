//! impl subset() for maxp

use crate::face::{Face, FontBuilder};
use crate::{
    Plan,
    SubsetError::{self, SubsetTableError},
    SubsetFlags, MAXP,
};

pub(crate) fn subset_maxp(
    face: &Face,
    plan: &Plan,
    builder: &mut FontBuilder,
) -> Result<(), SubsetError> {
    let maxp = face.table_data(MAXP).ok_or(SubsetTableError(MAXP))?;

    let num_glyphs = plan.num_output_glyphs.min(0xFFFF) as u16;
    let mut out = maxp.as_bytes().to_owned();
    out.get_mut(4..6)
        .ok_or(SubsetTableError(MAXP))?
        .copy_from_slice(&num_glyphs.to_be_bytes());

    // drop hints
    let version: u32 = maxp.read_at(0).unwrap_or_default();
    if version == 0x0001_0000
        && plan
            .subset_flags
            .contains(SubsetFlags::SUBSET_FLAGS_NO_HINTING)
    {
        // maxZones
        if let Some(field) = out.get_mut(14..16) {
            field.copy_from_slice(&[0, 1]);
        }
        // maxTwilightPoints..maxSizeOfInstructions
        if let Some(field) = out.get_mut(16..28) {
            field.fill(0);
        }
    }
    builder.add_raw(MAXP, out);
    Ok(())
}
