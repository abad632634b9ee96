//! gvar parsing, delta application and subsetting
//!
//! When the plan pins axis coordinates the tuple-variation deltas are applied
//! to glyph points by the glyph engine and the table is dropped; otherwise
//! the table is rewritten with per-glyph variation data byte-copied for
//! retained glyphs.

use font_types::F2Dot14;

use crate::face::{Face, FontBuilder};
use crate::glyph::ContourPoint;
use crate::sanitize::{FontData, ReadError};
use crate::serialize::Serializer;
use crate::{
    Plan, Subset,
    SubsetError::{self, SubsetTableError},
    SubsetFlags, GVAR,
};

const FIXED_HEADER_SIZE: u32 = 20;

// tupleVariationCount flags
const SHARED_POINT_NUMBERS: u16 = 0x8000;
const TUPLE_COUNT_MASK: u16 = 0x0FFF;
// tupleIndex flags
const EMBEDDED_PEAK_TUPLE: u16 = 0x8000;
const INTERMEDIATE_REGION: u16 = 0x4000;
const PRIVATE_POINT_NUMBERS: u16 = 0x2000;
const TUPLE_INDEX_MASK: u16 = 0x0FFF;

pub(crate) struct Gvar<'a> {
    data: FontData<'a>,
    axis_count: u16,
    shared_tuple_count: u16,
    shared_tuples_offset: u32,
    glyph_count: u16,
    long_offsets: bool,
    array_offset: u32,
}

impl<'a> Gvar<'a> {
    pub(crate) fn new(data: FontData<'a>) -> Result<Self, ReadError> {
        Ok(Gvar {
            data,
            axis_count: data.read_at(4)?,
            shared_tuple_count: data.read_at(6)?,
            shared_tuples_offset: data.read_at(8)?,
            glyph_count: data.read_at(12)?,
            long_offsets: data.read_at::<u16>(14)? & 1 != 0,
            array_offset: data.read_at(16)?,
        })
    }

    pub(crate) fn axis_count(&self) -> u16 {
        self.axis_count
    }

    fn glyph_data_offset(&self, idx: usize) -> Result<usize, ReadError> {
        if self.long_offsets {
            self.data
                .read_at::<u32>(FIXED_HEADER_SIZE as usize + idx * 4)
                .map(|v| v as usize)
        } else {
            self.data
                .read_at::<u16>(FIXED_HEADER_SIZE as usize + idx * 2)
                .map(|v| v as usize * 2)
        }
    }

    /// The raw GlyphVariationData for one glyph, `None` when it has no
    /// variations.
    pub(crate) fn data_for_gid(&self, gid: u32) -> Result<Option<FontData<'a>>, ReadError> {
        if gid >= self.glyph_count as u32 {
            return Ok(None);
        }
        let start = self.glyph_data_offset(gid as usize)?;
        let end = self.glyph_data_offset(gid as usize + 1)?;
        if end <= start {
            return Ok(None);
        }
        let base = self.array_offset as usize;
        self.data
            .slice(base + start..base + end)
            .map(Some)
            .ok_or(ReadError::OutOfBounds)
    }

    fn shared_peak(&self, index: u16) -> Option<Vec<F2Dot14>> {
        if index >= self.shared_tuple_count {
            return None;
        }
        let start =
            self.shared_tuples_offset as usize + index as usize * self.axis_count as usize * 2;
        let mut peak = Vec::with_capacity(self.axis_count as usize);
        for i in 0..self.axis_count as usize {
            peak.push(self.data.read_at::<F2Dot14>(start + i * 2).ok()?);
        }
        Some(peak)
    }

    /// Apply this glyph's deltas at the given normalized coordinates to all
    /// points, phantoms included. Malformed variation data leaves the points
    /// unchanged.
    pub(crate) fn apply_deltas_to_points(
        &self,
        gid: u32,
        coords: &[F2Dot14],
        points: &mut [ContourPoint],
    ) {
        let Ok(Some(var_data)) = self.data_for_gid(gid) else {
            return;
        };
        let orig: Vec<ContourPoint> = points.to_vec();
        if self.apply_inner(var_data, coords, &orig, points).is_none() {
            points.copy_from_slice(&orig);
            log::trace!("malformed variation data for glyph {gid}, deltas skipped");
        }
    }

    fn apply_inner(
        &self,
        var_data: FontData,
        coords: &[F2Dot14],
        orig: &[ContourPoint],
        points: &mut [ContourPoint],
    ) -> Option<()> {
        let tuple_count_raw: u16 = var_data.read_at(0).ok()?;
        let data_offset: u16 = var_data.read_at(2).ok()?;
        let tuple_count = (tuple_count_raw & TUPLE_COUNT_MASK) as usize;
        let serialized = var_data.slice(data_offset as usize..)?;

        let mut serialized_pos = 0usize;
        let shared_points = if tuple_count_raw & SHARED_POINT_NUMBERS != 0 {
            let (pts, used) = unpack_point_numbers(&serialized, 0, points.len())?;
            serialized_pos = used;
            Some(pts)
        } else {
            None
        };

        let axis_count = self.axis_count as usize;
        let mut header_pos = 4usize;
        let mut data_pos = serialized_pos;
        for _ in 0..tuple_count {
            let data_size: u16 = var_data.read_at(header_pos).ok()?;
            let tuple_index: u16 = var_data.read_at(header_pos + 2).ok()?;
            header_pos += 4;

            let peak: Vec<F2Dot14> = if tuple_index & EMBEDDED_PEAK_TUPLE != 0 {
                let mut peak = Vec::with_capacity(axis_count);
                for i in 0..axis_count {
                    peak.push(var_data.read_at(header_pos + i * 2).ok()?);
                }
                header_pos += axis_count * 2;
                peak
            } else {
                self.shared_peak(tuple_index & TUPLE_INDEX_MASK)?
            };

            let intermediate = if tuple_index & INTERMEDIATE_REGION != 0 {
                let mut start = Vec::with_capacity(axis_count);
                let mut end = Vec::with_capacity(axis_count);
                for i in 0..axis_count {
                    start.push(var_data.read_at(header_pos + i * 2).ok()?);
                }
                header_pos += axis_count * 2;
                for i in 0..axis_count {
                    end.push(var_data.read_at(header_pos + i * 2).ok()?);
                }
                header_pos += axis_count * 2;
                Some((start, end))
            } else {
                None
            };

            let tuple_data = serialized.slice(data_pos..data_pos + data_size as usize)?;
            data_pos += data_size as usize;

            let scalar = compute_tuple_scalar(coords, &peak, intermediate.as_ref());
            if scalar == 0.0 {
                continue;
            }

            let mut pos = 0usize;
            let point_numbers: Vec<usize>;
            let tuple_points: &[usize] = if tuple_index & PRIVATE_POINT_NUMBERS != 0 {
                let (pts, used) = unpack_point_numbers(&tuple_data, 0, points.len())?;
                pos = used;
                point_numbers = pts;
                &point_numbers
            } else if let Some(shared) = &shared_points {
                shared
            } else {
                &[]
            };

            let delta_count = if tuple_points.is_empty() {
                points.len()
            } else {
                tuple_points.len()
            };
            let (x_deltas, used) = unpack_deltas(&tuple_data, pos, delta_count)?;
            let (y_deltas, _) = unpack_deltas(&tuple_data, used, delta_count)?;

            if tuple_points.is_empty() {
                // deltas for every point
                for (point, (dx, dy)) in points
                    .iter_mut()
                    .zip(x_deltas.iter().zip(y_deltas.iter()))
                {
                    point.x += *dx as f32 * scalar;
                    point.y += *dy as f32 * scalar;
                }
            } else {
                let mut dx = vec![0.0f32; points.len()];
                let mut dy = vec![0.0f32; points.len()];
                let mut has_delta = vec![false; points.len()];
                for (i, point_idx) in tuple_points.iter().enumerate() {
                    if *point_idx >= points.len() {
                        continue;
                    }
                    dx[*point_idx] = x_deltas[i] as f32 * scalar;
                    dy[*point_idx] = y_deltas[i] as f32 * scalar;
                    has_delta[*point_idx] = true;
                }
                calc_inferred_deltas(&mut dx, &mut dy, &mut has_delta, orig);
                for ((point, dx), dy) in points.iter_mut().zip(&dx).zip(&dy) {
                    point.x += dx;
                    point.y += dy;
                }
            }
        }
        Some(())
    }
}

/// The tent function evaluated per axis, multiplied across axes.
fn compute_tuple_scalar(
    coords: &[F2Dot14],
    peak: &[F2Dot14],
    intermediate: Option<&(Vec<F2Dot14>, Vec<F2Dot14>)>,
) -> f32 {
    let mut scalar = 1.0f32;
    for (i, peak) in peak.iter().enumerate() {
        let peak = peak.to_f32();
        if peak == 0.0 {
            continue;
        }
        let coord = coords.get(i).map(|c| c.to_f32()).unwrap_or(0.0);
        let (start, end) = match intermediate {
            Some((starts, ends)) => (
                starts.get(i).map(|v| v.to_f32()).unwrap_or(0.0),
                ends.get(i).map(|v| v.to_f32()).unwrap_or(0.0),
            ),
            None => (peak.min(0.0), peak.max(0.0)),
        };
        if start > peak || peak > end || (start < 0.0 && end > 0.0) {
            continue;
        }
        if coord < start || coord > end {
            return 0.0;
        }
        if coord == peak {
            continue;
        }
        if coord < peak {
            if peak != start {
                scalar *= (coord - start) / (peak - start);
            }
        } else if peak != end {
            scalar *= (end - coord) / (end - peak);
        }
    }
    scalar
}

/// Decode a packed point-number list. Returns the point indices and the
/// number of bytes consumed; an empty list means "all points".
fn unpack_point_numbers(
    data: &FontData,
    mut pos: usize,
    num_points: usize,
) -> Option<(Vec<usize>, usize)> {
    const POINTS_ARE_WORDS: u8 = 0x80;
    const POINT_RUN_COUNT_MASK: u8 = 0x7F;

    let first: u8 = data.read_at(pos).ok()?;
    pos += 1;
    let count = if first & POINTS_ARE_WORDS != 0 {
        let second: u8 = data.read_at(pos).ok()?;
        pos += 1;
        (((first & POINT_RUN_COUNT_MASK) as usize) << 8) | second as usize
    } else {
        first as usize
    };
    if count == 0 {
        return Some((Vec::new(), pos));
    }
    if count > num_points {
        return None;
    }

    let mut numbers = Vec::with_capacity(count);
    let mut last = 0usize;
    while numbers.len() < count {
        let control: u8 = data.read_at(pos).ok()?;
        pos += 1;
        let run_count = (control & POINT_RUN_COUNT_MASK) as usize + 1;
        if control & POINTS_ARE_WORDS != 0 {
            for _ in 0..run_count {
                let v: u16 = data.read_at(pos).ok()?;
                pos += 2;
                last += v as usize;
                numbers.push(last);
                if numbers.len() == count {
                    break;
                }
            }
        } else {
            for _ in 0..run_count {
                let v: u8 = data.read_at(pos).ok()?;
                pos += 1;
                last += v as usize;
                numbers.push(last);
                if numbers.len() == count {
                    break;
                }
            }
        }
    }
    Some((numbers, pos))
}

/// Decode a packed delta stream of `count` values.
fn unpack_deltas(data: &FontData, mut pos: usize, count: usize) -> Option<(Vec<i32>, usize)> {
    const DELTAS_ARE_ZERO: u8 = 0x80;
    const DELTAS_ARE_WORDS: u8 = 0x40;
    const DELTA_RUN_COUNT_MASK: u8 = 0x3F;

    let mut deltas = Vec::with_capacity(count);
    while deltas.len() < count {
        let control: u8 = data.read_at(pos).ok()?;
        pos += 1;
        let run_count = (control & DELTA_RUN_COUNT_MASK) as usize + 1;
        if control & DELTAS_ARE_ZERO != 0 {
            for _ in 0..run_count {
                deltas.push(0);
                if deltas.len() == count {
                    break;
                }
            }
        } else if control & DELTAS_ARE_WORDS != 0 {
            for _ in 0..run_count {
                let v: i16 = data.read_at(pos).ok()?;
                pos += 2;
                deltas.push(v as i32);
                if deltas.len() == count {
                    break;
                }
            }
        } else {
            for _ in 0..run_count {
                let v: i8 = data.read_at(pos).ok()?;
                pos += 1;
                deltas.push(v as i32);
                if deltas.len() == count {
                    break;
                }
            }
        }
    }
    Some((deltas, pos))
}

/// Interpolate deltas for unreferenced points, per contour.
fn calc_inferred_deltas(
    deltas_x: &mut [f32],
    deltas_y: &mut [f32],
    has_delta: &mut [bool],
    all_points: &[ContourPoint],
) {
    let point_count = all_points.len();
    if point_count != deltas_x.len() {
        return;
    }
    let ref_count = has_delta.iter().filter(|&&x| x).count();
    if ref_count == point_count {
        return;
    }

    let end_points: Vec<usize> = all_points
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.is_end_point.then_some(i))
        .collect();

    let mut start_point = 0;
    for &end_point in &end_points {
        let mut unref_count = 0;
        for has in &has_delta[start_point..=end_point] {
            if !has {
                unref_count += 1;
            }
        }
        if unref_count == 0 || unref_count > end_point - start_point {
            start_point = end_point + 1;
            continue;
        }

        let mut j = start_point;
        loop {
            // find the last referenced point before a gap
            let mut i;
            let mut prev = 0;
            loop {
                i = j;
                j = next_index(i, start_point, end_point);
                if has_delta[i] && !has_delta[j] {
                    prev = i;
                    break;
                }
            }
            // and the first referenced point after it
            let mut next = 0;
            loop {
                i = j;
                j = next_index(i, start_point, end_point);
                if !has_delta[i] && has_delta[j] {
                    next = j;
                    break;
                }
            }

            i = prev;
            loop {
                i = next_index(i, start_point, end_point);
                if i == next {
                    break;
                }
                deltas_x[i] = infer_delta(
                    all_points[i].x,
                    all_points[prev].x,
                    all_points[next].x,
                    deltas_x[prev],
                    deltas_x[next],
                );
                deltas_y[i] = infer_delta(
                    all_points[i].y,
                    all_points[prev].y,
                    all_points[next].y,
                    deltas_y[prev],
                    deltas_y[next],
                );
                has_delta[i] = true;
                unref_count -= 1;
                if unref_count == 0 {
                    break;
                }
            }
            if unref_count == 0 {
                break;
            }
        }

        start_point = end_point + 1;
    }
}

fn infer_delta(
    target_val: f32,
    prev_val: f32,
    next_val: f32,
    prev_delta: f32,
    next_delta: f32,
) -> f32 {
    if prev_val == next_val {
        if prev_delta == next_delta {
            prev_delta
        } else {
            0.0
        }
    } else if target_val <= prev_val.min(next_val) {
        if prev_val < next_val {
            prev_delta
        } else {
            next_delta
        }
    } else if target_val >= prev_val.max(next_val) {
        if prev_val > next_val {
            prev_delta
        } else {
            next_delta
        }
    } else {
        let r = (target_val - prev_val) / (next_val - prev_val);
        prev_delta + r * (next_delta - prev_delta)
    }
}

fn next_index(i: usize, start: usize, end: usize) -> usize {
    if i >= end {
        start
    } else {
        i + 1
    }
}

// reference: subset() for gvar table in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/63d09dbefcf7ad9f794ca96445d37b6d8c3c9124/src/hb-ot-var-gvar-table.hh#L411
impl Subset for Gvar<'_> {
    fn subset(
        &self,
        plan: &Plan,
        _face: &Face,
        s: &mut Serializer,
        _builder: &mut FontBuilder,
    ) -> Result<(), SubsetError> {
        // table header: from version to sharedTuplesOffset
        let header = self
            .data
            .slice(0..12)
            .ok_or(SubsetTableError(GVAR))?;
        s.embed_bytes(header.as_bytes())
            .map_err(|_| SubsetTableError(GVAR))?;

        let num_glyphs = plan.num_output_glyphs.min(0xFFFF) as u16;
        s.embed(num_glyphs).map_err(|_| SubsetTableError(GVAR))?;

        let keep_notdef = plan
            .subset_flags
            .contains(SubsetFlags::SUBSET_FLAGS_NOTDEF_OUTLINE);
        let subset_data_size: usize = plan
            .new_to_old_gid_list
            .iter()
            .filter(|(new_gid, _)| new_gid.to_u32() != 0 || keep_notdef)
            .filter_map(|(_, old_gid)| {
                self.data_for_gid(old_gid.to_u32())
                    .ok()
                    .flatten()
                    .map(|data| data.len() + data.len() % 2)
            })
            .sum();

        // short offsets store the halved value, so the limit is 2 * 0xFFFF
        let long_offsets = subset_data_size > 0x1FFFE;
        s.embed(long_offsets as u16)
            .map_err(|_| SubsetTableError(GVAR))?;

        let off_size = if long_offsets { 4 } else { 2 };
        let offset_array_size = (num_glyphs as u32 + 1) * off_size;
        let shared_tuples_size = 2 * self.axis_count as u32 * self.shared_tuple_count as u32;
        let shared_tuples_offset = if self.shared_tuple_count == 0 || self.shared_tuples_offset == 0
        {
            0u32
        } else {
            FIXED_HEADER_SIZE + offset_array_size
        };
        // sharedTuplesOffset is at byte 8 of the header
        s.copy_assign(8, shared_tuples_offset);

        let glyph_var_data_offset = FIXED_HEADER_SIZE + offset_array_size + shared_tuples_size;
        s.embed(glyph_var_data_offset)
            .map_err(|_| SubsetTableError(GVAR))?;

        let mut pos = s
            .allocate_size(offset_array_size as usize, false)
            .map_err(|_| SubsetTableError(GVAR))?;

        if shared_tuples_offset > 0 {
            let start = self.shared_tuples_offset as usize;
            let shared = self
                .data
                .slice(start..start + shared_tuples_size as usize)
                .ok_or(SubsetTableError(GVAR))?;
            s.embed_bytes(shared.as_bytes())
                .map_err(|_| SubsetTableError(GVAR))?;
        }

        let write_offset = |s: &mut Serializer, pos: usize, offset: u32| {
            if long_offsets {
                s.copy_assign(pos, offset);
            } else {
                s.copy_assign(pos, (offset / 2) as u16);
            }
        };

        write_offset(s, pos, 0);
        pos += off_size as usize;

        let mut glyph_offset = 0u32;
        let mut last = 0u32;
        for (new_gid, old_gid) in plan
            .new_to_old_gid_list
            .iter()
            .filter(|(new_gid, _)| new_gid.to_u32() != 0 || keep_notdef)
        {
            for _ in last..new_gid.to_u32() {
                write_offset(s, pos, glyph_offset);
                pos += off_size as usize;
            }
            last = new_gid.to_u32();

            if let Ok(Some(var_data)) = self.data_for_gid(old_gid.to_u32()) {
                s.embed_bytes(var_data.as_bytes())
                    .map_err(|_| SubsetTableError(GVAR))?;
                let mut len = var_data.len() as u32;
                if !long_offsets && len % 2 != 0 {
                    s.embed(0u8).map_err(|_| SubsetTableError(GVAR))?;
                    len += 1;
                }
                glyph_offset += len;
            }
            write_offset(s, pos, glyph_offset);
            pos += off_size as usize;
            last += 1;
        }
        for _ in last..num_glyphs as u32 {
            write_offset(s, pos, glyph_offset);
            pos += off_size as usize;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tent_function() {
        let peak = [F2Dot14::from_f32(0.5)];
        let coords = [F2Dot14::from_f32(0.5)];
        assert_eq!(compute_tuple_scalar(&coords, &peak, None), 1.0);

        let coords = [F2Dot14::from_f32(0.25)];
        let scalar = compute_tuple_scalar(&coords, &peak, None);
        assert!((scalar - 0.5).abs() < 1e-3);

        let coords = [F2Dot14::from_f32(0.75)];
        let scalar = compute_tuple_scalar(&coords, &peak, None);
        assert!((scalar - 0.5).abs() < 1e-3);

        let coords = [F2Dot14::from_f32(-0.25)];
        assert_eq!(compute_tuple_scalar(&coords, &peak, None), 0.0);

        // zero peak contributes nothing on that axis
        let peak = [F2Dot14::from_f32(0.0), F2Dot14::from_f32(1.0)];
        let coords = [F2Dot14::from_f32(0.9), F2Dot14::from_f32(1.0)];
        assert_eq!(compute_tuple_scalar(&coords, &peak, None), 1.0);
    }

    #[test]
    fn tent_intermediate_region() {
        let peak = [F2Dot14::from_f32(0.5)];
        let inter = (
            vec![F2Dot14::from_f32(0.25)],
            vec![F2Dot14::from_f32(1.0)],
        );
        // below the start: no contribution
        let coords = [F2Dot14::from_f32(0.1)];
        assert_eq!(compute_tuple_scalar(&coords, &peak, Some(&inter)), 0.0);
        // between start and peak
        let coords = [F2Dot14::from_f32(0.375)];
        let scalar = compute_tuple_scalar(&coords, &peak, Some(&inter));
        assert!((scalar - 0.5).abs() < 1e-2);
    }

    #[test]
    fn unpack_small_point_numbers() {
        // count 3, one run of 3 byte values: 1, +2, +3 -> points 1, 3, 6
        let data = [3u8, 0x02, 1, 2, 3];
        let (points, used) = unpack_point_numbers(&FontData::new(&data), 0, 10).unwrap();
        assert_eq!(points, vec![1, 3, 6]);
        assert_eq!(used, 5);
    }

    #[test]
    fn unpack_all_points_marker() {
        let data = [0u8];
        let (points, used) = unpack_point_numbers(&FontData::new(&data), 0, 10).unwrap();
        assert!(points.is_empty());
        assert_eq!(used, 1);
    }

    #[test]
    fn unpack_delta_runs() {
        // 2 zeros, then 2 byte deltas (5, -3), then 1 word delta (300)
        let data = [
            0x81u8, // zeros, run count 2
            0x01, 5, 0xFD, // bytes, run count 2
            0x40, 0x01, 0x2C, // words, run count 1
        ];
        let (deltas, _) = unpack_deltas(&FontData::new(&data), 0, 5).unwrap();
        assert_eq!(deltas, vec![0, 0, 5, -3, 300]);
    }

    #[test]
    fn inferred_deltas_interpolate() {
        // a 4-point contour; deltas known at points 0 and 2
        let points = vec![
            ContourPoint::new(0.0, 0.0, true, false),
            ContourPoint::new(5.0, 0.0, true, false),
            ContourPoint::new(10.0, 0.0, true, false),
            ContourPoint::new(20.0, 0.0, true, true),
        ];
        let mut dx = vec![10.0, 0.0, 20.0, 0.0];
        let mut dy = vec![0.0; 4];
        let mut has = vec![true, false, true, false];
        calc_inferred_deltas(&mut dx, &mut dy, &mut has, &points);
        // point 1 lies halfway between 0 and 2: interpolated
        assert!((dx[1] - 15.0).abs() < 1e-6);
        // point 3 is outside the span: takes the nearer edge delta
        assert!((dx[3] - 20.0).abs() < 1e-6);
        assert!(has.iter().all(|h| *h));
    }
}
