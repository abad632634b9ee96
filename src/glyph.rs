//! glyf glyph reading and writing
//!
//! A glyph is read into a point vector carrying four trailing phantom points
//! (left, right, top, bottom) so that variation deltas can move the advance
//! and origin like any other point. Composite glyphs are resolved
//! recursively, depth-bounded.

use font_types::F2Dot14;

use crate::gvar::Gvar;
use crate::hmtx::LongMetrics;
use crate::loca::Loca;
use crate::sanitize::{FontData, ReadError, ScalarArray};

pub(crate) const PHANTOM_POINT_COUNT: usize = 4;
pub(crate) const PHANTOM_LEFT: usize = 0;
pub(crate) const PHANTOM_RIGHT: usize = 1;
pub(crate) const PHANTOM_TOP: usize = 2;
pub(crate) const PHANTOM_BOTTOM: usize = 3;

pub(crate) const MAX_NESTING_LEVEL: u8 = 64;

const GLYPH_HEADER_LEN: usize = 10;

// simple glyph flags
pub(crate) const ON_CURVE_POINT: u8 = 0x01;
pub(crate) const X_SHORT_VECTOR: u8 = 0x02;
pub(crate) const Y_SHORT_VECTOR: u8 = 0x04;
pub(crate) const REPEAT_FLAG: u8 = 0x08;
pub(crate) const X_IS_SAME_OR_POSITIVE_X_SHORT_VECTOR: u8 = 0x10;
pub(crate) const Y_IS_SAME_OR_POSITIVE_Y_SHORT_VECTOR: u8 = 0x20;
pub(crate) const OVERLAP_SIMPLE: u8 = 0x40;

// composite glyph flags
pub(crate) const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
pub(crate) const ARGS_ARE_XY_VALUES: u16 = 0x0002;
pub(crate) const WE_HAVE_A_SCALE: u16 = 0x0008;
pub(crate) const MORE_COMPONENTS: u16 = 0x0020;
pub(crate) const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
pub(crate) const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;
pub(crate) const WE_HAVE_INSTRUCTIONS: u16 = 0x0100;
pub(crate) const USE_MY_METRICS: u16 = 0x0200;
pub(crate) const OVERLAP_COMPOUND: u16 = 0x0400;

/// One decoded outline point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ContourPoint {
    pub x: f32,
    pub y: f32,
    pub on_curve: bool,
    pub is_end_point: bool,
}

impl ContourPoint {
    pub(crate) fn new(x: f32, y: f32, on_curve: bool, is_end_point: bool) -> Self {
        Self {
            x,
            y,
            on_curve,
            is_end_point,
        }
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
    }
}

/// A glyph as found in the source glyf table.
pub(crate) enum Glyph<'a> {
    Empty,
    Simple(SimpleGlyph<'a>),
    Composite(CompositeGlyph<'a>),
}

impl<'a> Glyph<'a> {
    pub(crate) fn read(data: FontData<'a>) -> Result<Self, ReadError> {
        if data.is_empty() {
            return Ok(Glyph::Empty);
        }
        let num_contours: i16 = data.read_at(0)?;
        if num_contours == 0 {
            Ok(Glyph::Empty)
        } else if num_contours > 0 {
            Ok(Glyph::Simple(SimpleGlyph { data, num_contours }))
        } else {
            Ok(Glyph::Composite(CompositeGlyph { data }))
        }
    }

    pub(crate) fn x_min(&self) -> i16 {
        self.header_field(2)
    }

    pub(crate) fn y_max(&self) -> i16 {
        self.header_field(8)
    }

    fn header_field(&self, pos: usize) -> i16 {
        let data = match self {
            Glyph::Empty => return 0,
            Glyph::Simple(g) => &g.data,
            Glyph::Composite(g) => &g.data,
        };
        data.read_at(pos).unwrap_or(0)
    }
}

pub(crate) struct SimpleGlyph<'a> {
    data: FontData<'a>,
    num_contours: i16,
}

impl<'a> SimpleGlyph<'a> {
    pub(crate) fn data(&self) -> FontData<'a> {
        self.data
    }

    pub(crate) fn number_of_contours(&self) -> i16 {
        self.num_contours
    }

    fn instruction_len_offset(&self) -> usize {
        GLYPH_HEADER_LEN + 2 * self.num_contours as usize
    }

    pub(crate) fn end_points(&self) -> Result<ScalarArray<'a, u16>, ReadError> {
        self.data
            .read_scalar_array(GLYPH_HEADER_LEN, self.num_contours as usize)
    }

    pub(crate) fn num_points(&self) -> Result<usize, ReadError> {
        let last = self
            .end_points()?
            .last()
            .ok_or(ReadError::MalformedData("simple glyph without contours"))?;
        Ok(last as usize + 1)
    }

    pub(crate) fn instruction_length(&self) -> u16 {
        let offset = self.instruction_len_offset();
        let Ok(len) = self.data.read_at::<u16>(offset) else {
            return 0;
        };
        // out of bounds of the current glyph
        if offset + 2 + len as usize > self.data.len() {
            return 0;
        }
        len
    }

    pub(crate) fn instructions(&self) -> &'a [u8] {
        let start = self.instruction_len_offset() + 2;
        let end = start + self.instruction_length() as usize;
        self.data
            .slice(start..end)
            .map(|d| d.as_bytes())
            .unwrap_or_default()
    }

    /// The flag/coordinate stream following the instructions.
    fn point_stream(&self) -> &'a [u8] {
        let start = self.instruction_len_offset() + 2 + self.instruction_length() as usize;
        self.data
            .split_off(start)
            .map(|d| d.as_bytes())
            .unwrap_or_default()
    }

    /// Length of this glyph with trailing point-stream padding removed, or
    /// zero if the stream is malformed.
    ///
    /// Source fonts often carry stale bytes past the true end of the
    /// coordinate arrays; the expected byte count is recomputed from the
    /// flags. Based on FontTools _g_l_y_f.py::trim.
    pub(crate) fn trimmed_len(&self) -> usize {
        let Ok(num_coords) = self.num_points() else {
            return 0;
        };
        let stream = self.point_stream();
        let mut coord_bytes = 0usize;
        let mut coords_with_flags = 0usize;
        let mut i = 0usize;
        while i < stream.len() {
            let flag = stream[i];
            i += 1;

            let mut repeat = 1usize;
            if flag & REPEAT_FLAG != 0 {
                if i >= stream.len() {
                    return 0;
                }
                repeat = stream[i] as usize + 1;
                i += 1;
            }

            let mut x_bytes = 0usize;
            let mut y_bytes = 0usize;
            if flag & X_SHORT_VECTOR != 0 {
                x_bytes = 1;
            } else if flag & X_IS_SAME_OR_POSITIVE_X_SHORT_VECTOR == 0 {
                x_bytes = 2;
            }
            if flag & Y_SHORT_VECTOR != 0 {
                y_bytes = 1;
            } else if flag & Y_IS_SAME_OR_POSITIVE_Y_SHORT_VECTOR == 0 {
                y_bytes = 2;
            }

            coord_bytes += (x_bytes + y_bytes) * repeat;
            coords_with_flags += repeat;
            if coords_with_flags >= num_coords {
                break;
            }
        }
        if coords_with_flags != num_coords {
            return 0;
        }
        let stream_used = i + coord_bytes;
        if stream_used > stream.len() {
            return 0;
        }
        self.data.len() - (stream.len() - stream_used)
    }

    /// Decode the contour points, without phantoms.
    pub(crate) fn contour_points(&self) -> Result<Vec<ContourPoint>, ReadError> {
        let num_points = self.num_points()?;
        let mut points = vec![ContourPoint::default(); num_points];
        for end in self.end_points()?.iter() {
            points
                .get_mut(end as usize)
                .ok_or(ReadError::MalformedData("contour end past point count"))?
                .is_end_point = true;
        }

        let stream = self.point_stream();
        let mut flags = vec![0u8; num_points];
        let mut pos = 0usize;
        let mut i = 0usize;
        while i < num_points {
            let flag = *stream.get(pos).ok_or(ReadError::OutOfBounds)?;
            pos += 1;
            flags[i] = flag;
            if flag & REPEAT_FLAG != 0 {
                let repeat = *stream.get(pos).ok_or(ReadError::OutOfBounds)?;
                pos += 1;
                for _ in 0..repeat {
                    i += 1;
                    if i >= num_points {
                        break;
                    }
                    flags[i] = flag;
                }
            }
            i += 1;
        }

        for (flag, point) in flags.iter().zip(points.iter_mut()) {
            point.on_curve = flag & ON_CURVE_POINT != 0;
        }
        pos = Self::read_coords(
            stream,
            pos,
            &flags,
            &mut points,
            X_SHORT_VECTOR,
            X_IS_SAME_OR_POSITIVE_X_SHORT_VECTOR,
            |p, v| p.x = v,
        )?;
        Self::read_coords(
            stream,
            pos,
            &flags,
            &mut points,
            Y_SHORT_VECTOR,
            Y_IS_SAME_OR_POSITIVE_Y_SHORT_VECTOR,
            |p, v| p.y = v,
        )?;
        Ok(points)
    }

    fn read_coords(
        stream: &[u8],
        mut pos: usize,
        flags: &[u8],
        points: &mut [ContourPoint],
        short_flag: u8,
        same_flag: u8,
        setter: impl Fn(&mut ContourPoint, f32),
    ) -> Result<usize, ReadError> {
        let mut v = 0i32;
        for (flag, point) in flags.iter().zip(points.iter_mut()) {
            if flag & short_flag != 0 {
                let b = *stream.get(pos).ok_or(ReadError::OutOfBounds)? as i32;
                pos += 1;
                if flag & same_flag != 0 {
                    v += b;
                } else {
                    v -= b;
                }
            } else if flag & same_flag == 0 {
                let hi = *stream.get(pos).ok_or(ReadError::OutOfBounds)?;
                let lo = *stream.get(pos + 1).ok_or(ReadError::OutOfBounds)?;
                pos += 2;
                v += i16::from_be_bytes([hi, lo]) as i32;
            }
            setter(point, v as f32);
        }
        Ok(pos)
    }
}

/// One component record of a composite glyph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Component {
    pub flags: u16,
    pub glyph: u16,
    pub anchor: Anchor,
    /// 2x2 transform (xx, yx, xy, yy)
    pub transform: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Anchor {
    Offset { x: i16, y: i16 },
    Point { base: u16, component: u16 },
}

impl Component {
    pub(crate) fn transform_point(&self, point: &mut ContourPoint) {
        let [xx, yx, xy, yy] = self.transform;
        let (x, y) = (point.x, point.y);
        point.x = x * xx + y * xy;
        point.y = x * yx + y * yy;
    }

    fn has_transform(&self) -> bool {
        self.transform != [1.0, 0.0, 0.0, 1.0]
    }
}

pub(crate) struct CompositeGlyph<'a> {
    data: FontData<'a>,
}

impl<'a> CompositeGlyph<'a> {
    pub(crate) fn data(&self) -> FontData<'a> {
        self.data
    }

    pub(crate) fn components(&self) -> ComponentIter<'a> {
        ComponentIter {
            data: self.data,
            pos: GLYPH_HEADER_LEN,
            done: false,
            seen_instructions: false,
            malformed: false,
        }
    }

    /// Instructions following the component chain, if any.
    pub(crate) fn instructions(&self) -> &'a [u8] {
        let mut iter = self.components();
        for _ in iter.by_ref() {}
        if !iter.have_instructions() {
            return &[];
        }
        let pos = iter.pos;
        let Ok(len) = self.data.read_at::<u16>(pos) else {
            return &[];
        };
        self.data
            .slice(pos + 2..pos + 2 + len as usize)
            .map(|d| d.as_bytes())
            .unwrap_or_default()
    }

    /// Length of the glyph with bytes past the component chain (and
    /// instructions) trimmed, or zero if malformed.
    pub(crate) fn trimmed_len(&self) -> usize {
        let mut iter = self.components();
        for _ in iter.by_ref() {}
        if iter.malformed {
            return 0;
        }
        let mut end = iter.pos;
        if iter.have_instructions() {
            let Ok(len) = self.data.read_at::<u16>(end) else {
                return 0;
            };
            end += 2 + len as usize;
            if end > self.data.len() {
                return 0;
            }
        }
        end
    }
}

pub(crate) struct ComponentIter<'a> {
    data: FontData<'a>,
    pos: usize,
    done: bool,
    // set while iterating
    seen_instructions: bool,
    malformed: bool,
}

impl<'a> ComponentIter<'a> {
    pub(crate) fn have_instructions(&self) -> bool {
        self.seen_instructions
    }
}

impl ComponentIter<'_> {
    fn read_next(&mut self) -> Result<Component, ReadError> {
        let flags: u16 = self.data.read_at(self.pos)?;
        let glyph: u16 = self.data.read_at(self.pos + 2)?;
        let mut pos = self.pos + 4;

        let anchor = if flags & ARGS_ARE_XY_VALUES != 0 {
            if flags & ARG_1_AND_2_ARE_WORDS != 0 {
                let x: i16 = self.data.read_at(pos)?;
                let y: i16 = self.data.read_at(pos + 2)?;
                pos += 4;
                Anchor::Offset { x, y }
            } else {
                let x: i8 = self.data.read_at(pos)?;
                let y: i8 = self.data.read_at(pos + 1)?;
                pos += 2;
                Anchor::Offset {
                    x: x as i16,
                    y: y as i16,
                }
            }
        } else if flags & ARG_1_AND_2_ARE_WORDS != 0 {
            let base: u16 = self.data.read_at(pos)?;
            let component: u16 = self.data.read_at(pos + 2)?;
            pos += 4;
            Anchor::Point { base, component }
        } else {
            let base: u8 = self.data.read_at(pos)?;
            let component: u8 = self.data.read_at(pos + 1)?;
            pos += 2;
            Anchor::Point {
                base: base as u16,
                component: component as u16,
            }
        };

        let mut transform = [1.0f32, 0.0, 0.0, 1.0];
        if flags & WE_HAVE_A_SCALE != 0 {
            let scale = f2dot14_at(&self.data, pos)?;
            pos += 2;
            transform = [scale, 0.0, 0.0, scale];
        } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            let x = f2dot14_at(&self.data, pos)?;
            let y = f2dot14_at(&self.data, pos + 2)?;
            pos += 4;
            transform = [x, 0.0, 0.0, y];
        } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
            transform = [
                f2dot14_at(&self.data, pos)?,
                f2dot14_at(&self.data, pos + 2)?,
                f2dot14_at(&self.data, pos + 4)?,
                f2dot14_at(&self.data, pos + 6)?,
            ];
            pos += 8;
        }

        self.pos = pos;
        self.seen_instructions |= flags & WE_HAVE_INSTRUCTIONS != 0;
        self.done = flags & MORE_COMPONENTS == 0;
        Ok(Component {
            flags,
            glyph,
            anchor,
            transform,
        })
    }
}

impl Iterator for ComponentIter<'_> {
    type Item = Component;

    fn next(&mut self) -> Option<Component> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(component) => Some(component),
            Err(_) => {
                self.malformed = true;
                self.done = true;
                None
            }
        }
    }
}

fn f2dot14_at(data: &FontData, pos: usize) -> Result<f32, ReadError> {
    data.read_at::<F2Dot14>(pos).map(|v| v.to_f32())
}

/// Everything the recursive point reader needs from the source face.
pub(crate) struct GlyphSource<'a> {
    pub glyf: FontData<'a>,
    pub loca: Loca<'a>,
    pub hmtx: LongMetrics<'a>,
    pub vmtx: Option<LongMetrics<'a>>,
    pub gvar: Option<Gvar<'a>>,
    pub coords: Vec<F2Dot14>,
    pub upem: u16,
}

impl<'a> GlyphSource<'a> {
    pub(crate) fn glyph(&self, gid: u32) -> Result<Glyph<'a>, ReadError> {
        let range = self.loca.glyph_range(gid)?;
        let data = self
            .glyf
            .slice(range)
            .ok_or(ReadError::OutOfBounds)?;
        Glyph::read(data)
    }

    /// Read a glyph into `all_points` (contour points plus the four
    /// phantoms), applying variation deltas when coordinates are set.
    ///
    /// For a top-level composite, `deltas` receives the shift applied to each
    /// component translation so the writer can move the offsets.
    pub(crate) fn get_points(
        &self,
        gid: u32,
        all_points: &mut Vec<ContourPoint>,
        mut deltas: Option<&mut Vec<(f32, f32)>>,
        depth: u8,
    ) -> Result<(), ReadError> {
        if depth > MAX_NESTING_LEVEL {
            return Err(ReadError::MalformedData("composite nesting too deep"));
        }
        let glyph = self.glyph(gid)?;

        let mut points: Vec<ContourPoint> = match &glyph {
            Glyph::Empty => Vec::new(),
            Glyph::Simple(simple) => simple.contour_points()?,
            Glyph::Composite(composite) => {
                // one pseudo-point per component, receiving the variation
                // delta for that component's translation
                composite
                    .components()
                    .map(|component| match component.anchor {
                        Anchor::Offset { x, y } => {
                            ContourPoint::new(x as f32, y as f32, false, true)
                        }
                        Anchor::Point { .. } => ContourPoint::new(0.0, 0.0, false, true),
                    })
                    .collect()
            }
        };

        // phantom points
        let lsb = self.hmtx.side_bearing(gid);
        let h_adv = self.hmtx.advance(gid);
        let h_delta = glyph.x_min() as f32 - lsb as f32;
        let (v_orig, v_adv) = match &self.vmtx {
            Some(vmtx) => (
                glyph.y_max() as f32 + vmtx.side_bearing(gid) as f32,
                vmtx.advance(gid) as f32,
            ),
            None => (glyph.y_max() as f32, self.upem as f32),
        };
        points.push(ContourPoint::new(h_delta, 0.0, true, true));
        points.push(ContourPoint::new(h_delta + h_adv as f32, 0.0, true, true));
        points.push(ContourPoint::new(0.0, v_orig, true, true));
        points.push(ContourPoint::new(0.0, v_orig - v_adv, true, true));

        let capture_deltas = depth == 0 && matches!(glyph, Glyph::Composite(_));
        let before: Vec<(f32, f32)> = if capture_deltas {
            points.iter().map(|p| (p.x, p.y)).collect()
        } else {
            Vec::new()
        };

        if let Some(gvar) = &self.gvar {
            if !self.coords.is_empty() {
                gvar.apply_deltas_to_points(gid, &self.coords, &mut points);
            }
        }

        if capture_deltas {
            if let Some(deltas) = deltas.as_mut() {
                deltas.clear();
                deltas.extend(
                    points
                        .iter()
                        .zip(&before)
                        .map(|(after, b)| (after.x - b.0, after.y - b.1)),
                );
            }
        }

        match glyph {
            Glyph::Empty | Glyph::Simple(_) => {
                all_points.extend_from_slice(&points);
            }
            Glyph::Composite(composite) => {
                let phantom_start = points.len() - PHANTOM_POINT_COUNT;
                let mut phantoms: [ContourPoint; PHANTOM_POINT_COUNT] =
                    points[phantom_start..].try_into().unwrap();
                let mut comp_points = Vec::new();
                for (comp_index, component) in composite.components().enumerate() {
                    comp_points.clear();
                    self.get_points(component.glyph as u32, &mut comp_points, None, depth + 1)?;

                    if component.flags & USE_MY_METRICS != 0 {
                        let child_phantoms = comp_points.len() - PHANTOM_POINT_COUNT;
                        phantoms.copy_from_slice(&comp_points[child_phantoms..]);
                    }

                    if component.has_transform() {
                        for point in comp_points.iter_mut() {
                            component.transform_point(point);
                        }
                    }
                    // translation from the pseudo-point, which carries the
                    // variation shift
                    let trans = points[comp_index];
                    for point in comp_points.iter_mut() {
                        point.translate(trans.x, trans.y);
                    }

                    if let Anchor::Point { base, component } = component.anchor {
                        let p1 = base as usize;
                        let p2 = component as usize;
                        if p1 < all_points.len() && p2 < comp_points.len() {
                            let dx = all_points[p1].x - comp_points[p2].x;
                            let dy = all_points[p1].y - comp_points[p2].y;
                            for point in comp_points.iter_mut() {
                                point.translate(dx, dy);
                            }
                        }
                    }

                    let keep = comp_points.len() - PHANTOM_POINT_COUNT;
                    all_points.extend_from_slice(&comp_points[..keep]);
                }
                all_points.extend_from_slice(&phantoms);
            }
        }

        if depth == 0 {
            // undocumented rasterizer behavior: shift points horizontally by
            // the updated left side bearing
            let shift = -all_points[all_points.len() - PHANTOM_POINT_COUNT + PHANTOM_LEFT].x;
            if shift != 0.0 {
                for point in all_points.iter_mut() {
                    point.x += shift;
                }
            }
        }
        Ok(())
    }
}

/// Horizontal and vertical metrics extracted from a processed point vector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct GlyphMetrics {
    pub h_advance: u16,
    pub lsb: i16,
    pub v_advance: u16,
    pub tsb: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Bbox {
    pub x_min: i16,
    pub y_min: i16,
    pub x_max: i16,
    pub y_max: i16,
}

/// Bbox over the rounded non-phantom points; `None` when only phantoms
/// remain.
pub(crate) fn bbox_of(all_points: &[ContourPoint]) -> Option<Bbox> {
    let contour_len = all_points.len().checked_sub(PHANTOM_POINT_COUNT)?;
    if contour_len == 0 {
        return None;
    }
    let mut x_min = all_points[0].x.round();
    let mut x_max = x_min;
    let mut y_min = all_points[0].y.round();
    let mut y_max = y_min;
    for point in &all_points[1..contour_len] {
        let x = point.x.round();
        let y = point.y.round();
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    Some(Bbox {
        x_min: x_min as i16,
        y_min: y_min as i16,
        x_max: x_max as i16,
        y_max: y_max as i16,
    })
}

/// Metrics from the phantom points.
pub(crate) fn metrics_of(all_points: &[ContourPoint], bbox: Option<Bbox>) -> GlyphMetrics {
    let phantoms = &all_points[all_points.len() - PHANTOM_POINT_COUNT..];
    let left = phantoms[PHANTOM_LEFT].x;
    let right = phantoms[PHANTOM_RIGHT].x;
    let top = phantoms[PHANTOM_TOP].y;
    let bottom = phantoms[PHANTOM_BOTTOM].y;
    let bbox = bbox.unwrap_or_default();
    GlyphMetrics {
        h_advance: (right - left).round().max(0.0) as u16,
        lsb: (bbox.x_min as f32 - left).round() as i16,
        v_advance: (top - bottom).round().max(0.0) as u16,
        tsb: (top - bbox.y_max as f32).round() as i16,
    }
}

/// Re-encode a simple glyph from processed points using the most compact
/// per-point encoding. `points` excludes phantoms.
pub(crate) fn compile_simple_glyph(
    points: &[ContourPoint],
    bbox: Bbox,
    instructions: &[u8],
    set_overlap: bool,
) -> Vec<u8> {
    let end_points: Vec<u16> = points
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.is_end_point.then_some(i as u16))
        .collect();
    let num_contours = end_points.len() as i16;

    let mut out = Vec::with_capacity(GLYPH_HEADER_LEN + points.len() * 5);
    out.extend_from_slice(&num_contours.to_be_bytes());
    out.extend_from_slice(&bbox.x_min.to_be_bytes());
    out.extend_from_slice(&bbox.y_min.to_be_bytes());
    out.extend_from_slice(&bbox.x_max.to_be_bytes());
    out.extend_from_slice(&bbox.y_max.to_be_bytes());
    for end in &end_points {
        out.extend_from_slice(&end.to_be_bytes());
    }
    out.extend_from_slice(&(instructions.len() as u16).to_be_bytes());
    out.extend_from_slice(instructions);

    // per point flags and deltas, short vs long vs same-as-previous
    let mut flags = Vec::with_capacity(points.len());
    let mut x_data: Vec<u8> = Vec::new();
    let mut y_data: Vec<u8> = Vec::new();
    let (mut last_x, mut last_y) = (0i32, 0i32);
    for point in points {
        let x = point.x.round() as i32;
        let y = point.y.round() as i32;
        let dx = x - last_x;
        let dy = y - last_y;
        last_x = x;
        last_y = y;

        let mut flag = if point.on_curve { ON_CURVE_POINT } else { 0 };
        flag |= encode_coord(
            dx,
            X_SHORT_VECTOR,
            X_IS_SAME_OR_POSITIVE_X_SHORT_VECTOR,
            &mut x_data,
        );
        flag |= encode_coord(
            dy,
            Y_SHORT_VECTOR,
            Y_IS_SAME_OR_POSITIVE_Y_SHORT_VECTOR,
            &mut y_data,
        );
        flags.push(flag);
    }
    if set_overlap {
        if let Some(first) = flags.first_mut() {
            *first |= OVERLAP_SIMPLE;
        }
    }

    // repeat-run compression of the flag stream
    let mut i = 0;
    while i < flags.len() {
        let flag = flags[i];
        let mut run = 1usize;
        while i + run < flags.len() && flags[i + run] == flag && run < 256 {
            run += 1;
        }
        if run > 2 {
            out.push(flag | REPEAT_FLAG);
            out.push((run - 1) as u8);
        } else {
            for _ in 0..run {
                out.push(flag);
            }
        }
        i += run;
    }
    out.extend_from_slice(&x_data);
    out.extend_from_slice(&y_data);
    out
}

fn encode_coord(delta: i32, short_flag: u8, same_flag: u8, data: &mut Vec<u8>) -> u8 {
    if delta == 0 {
        same_flag
    } else if (-255..=255).contains(&delta) {
        data.push(delta.unsigned_abs() as u8);
        if delta > 0 {
            short_flag | same_flag
        } else {
            short_flag
        }
    } else {
        data.extend_from_slice(&(delta as i16).to_be_bytes());
        0
    }
}

/// Re-emit a composite glyph: children remapped, translations shifted by the
/// captured variation deltas, overlap bit optionally set on the first
/// component.
pub(crate) struct CompositeOutput {
    pub flags: u16,
    pub glyph: u16,
    pub anchor: Anchor,
    pub transform_bytes: Vec<u8>,
}

pub(crate) fn compile_composite_glyph(
    components: &[CompositeOutput],
    bbox: Bbox,
    instructions: &[u8],
    set_overlap: bool,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(GLYPH_HEADER_LEN + components.len() * 8);
    out.extend_from_slice(&(-1i16).to_be_bytes());
    out.extend_from_slice(&bbox.x_min.to_be_bytes());
    out.extend_from_slice(&bbox.y_min.to_be_bytes());
    out.extend_from_slice(&bbox.x_max.to_be_bytes());
    out.extend_from_slice(&bbox.y_max.to_be_bytes());

    let last = components.len().saturating_sub(1);
    for (i, component) in components.iter().enumerate() {
        let mut flags = component.flags;
        if i == 0 && set_overlap {
            flags |= OVERLAP_COMPOUND;
        }
        if i == last {
            flags &= !MORE_COMPONENTS;
            if instructions.is_empty() {
                flags &= !WE_HAVE_INSTRUCTIONS;
            } else {
                flags |= WE_HAVE_INSTRUCTIONS;
            }
        } else {
            flags |= MORE_COMPONENTS;
            flags &= !WE_HAVE_INSTRUCTIONS;
        }

        // arg width depends on the (possibly shifted) values
        let (arg1, arg2) = match component.anchor {
            Anchor::Offset { x, y } => (x, y),
            Anchor::Point { base, component } => (base as i16, component as i16),
        };
        let words = match component.anchor {
            Anchor::Offset { x, y } => !(-128..=127).contains(&x) || !(-128..=127).contains(&y),
            Anchor::Point { base, component } => base > 255 || component > 255,
        };
        if words {
            flags |= ARG_1_AND_2_ARE_WORDS;
        } else {
            flags &= !ARG_1_AND_2_ARE_WORDS;
        }

        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&component.glyph.to_be_bytes());
        if words {
            out.extend_from_slice(&arg1.to_be_bytes());
            out.extend_from_slice(&arg2.to_be_bytes());
        } else {
            out.push(arg1 as i8 as u8);
            out.push(arg2 as i8 as u8);
        }
        out.extend_from_slice(&component.transform_bytes);
    }
    if !instructions.is_empty() {
        out.extend_from_slice(&(instructions.len() as u16).to_be_bytes());
        out.extend_from_slice(instructions);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    // one contour, 3 points: (10,0) on, (20,10) off, (10,20) on
    fn simple_glyph_bytes() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&1i16.to_be_bytes()); // numContours
        data.extend_from_slice(&10i16.to_be_bytes()); // xMin
        data.extend_from_slice(&0i16.to_be_bytes()); // yMin
        data.extend_from_slice(&20i16.to_be_bytes()); // xMax
        data.extend_from_slice(&20i16.to_be_bytes()); // yMax
        data.extend_from_slice(&2u16.to_be_bytes()); // endPts
        data.extend_from_slice(&0u16.to_be_bytes()); // instructionLength
        // flags: on|xshort|yshort-ish per point
        data.push(ON_CURVE_POINT | X_SHORT_VECTOR | X_IS_SAME_OR_POSITIVE_X_SHORT_VECTOR
            | Y_IS_SAME_OR_POSITIVE_Y_SHORT_VECTOR);
        data.push(X_SHORT_VECTOR | X_IS_SAME_OR_POSITIVE_X_SHORT_VECTOR | Y_SHORT_VECTOR
            | Y_IS_SAME_OR_POSITIVE_Y_SHORT_VECTOR);
        data.push(ON_CURVE_POINT | X_SHORT_VECTOR | Y_SHORT_VECTOR
            | Y_IS_SAME_OR_POSITIVE_Y_SHORT_VECTOR);
        // x deltas: +10, +10, -10
        data.extend_from_slice(&[10, 10, 10]);
        // y deltas: (same)0, +10, +10
        data.extend_from_slice(&[10, 10]);
        data
    }

    #[test]
    fn decode_simple_points() {
        let bytes = simple_glyph_bytes();
        let glyph = Glyph::read(FontData::new(&bytes)).unwrap();
        let Glyph::Simple(simple) = glyph else {
            panic!("expected simple glyph");
        };
        let points = simple.contour_points().unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!((points[0].x, points[0].y, points[0].on_curve), (10.0, 0.0, true));
        assert_eq!((points[1].x, points[1].y, points[1].on_curve), (20.0, 10.0, false));
        assert_eq!((points[2].x, points[2].y, points[2].on_curve), (10.0, 20.0, true));
        assert!(points[2].is_end_point);
        assert!(!points[1].is_end_point);
    }

    #[test]
    fn trim_detects_padding() {
        let mut bytes = simple_glyph_bytes();
        let true_len = bytes.len();
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let Glyph::Simple(simple) = Glyph::read(FontData::new(&bytes)).unwrap() else {
            panic!();
        };
        assert_eq!(simple.trimmed_len(), true_len);
    }

    #[test]
    fn trim_rejects_truncated_stream() {
        let mut bytes = simple_glyph_bytes();
        bytes.truncate(bytes.len() - 3);
        let Glyph::Simple(simple) = Glyph::read(FontData::new(&bytes)).unwrap() else {
            panic!();
        };
        assert_eq!(simple.trimmed_len(), 0);
    }

    #[test]
    fn roundtrip_compile_simple() {
        let bytes = simple_glyph_bytes();
        let Glyph::Simple(simple) = Glyph::read(FontData::new(&bytes)).unwrap() else {
            panic!();
        };
        let points = simple.contour_points().unwrap();
        let bbox = Bbox {
            x_min: 10,
            y_min: 0,
            x_max: 20,
            y_max: 20,
        };
        let out = compile_simple_glyph(&points, bbox, &[], false);
        let Glyph::Simple(reparsed) = Glyph::read(FontData::new(&out)).unwrap() else {
            panic!();
        };
        assert_eq!(reparsed.contour_points().unwrap(), points);
    }

    #[test]
    fn compile_uses_same_as_previous() {
        // two points sharing an x coordinate: second x costs no bytes
        let points = [
            ContourPoint::new(100.0, 0.0, true, false),
            ContourPoint::new(100.0, 50.0, true, true),
        ];
        let bbox = Bbox {
            x_min: 100,
            y_min: 0,
            x_max: 100,
            y_max: 50,
        };
        let out = compile_simple_glyph(&points, bbox, &[], false);
        // header 10 + endpts 2 + instrlen 2 + flags 2 + x(2 bytes: 100 long? no:
        // 100 is short) 1 + y 1
        let expected = GLYPH_HEADER_LEN + 2 + 2 + 2 + 1 + 1;
        assert_eq!(out.len(), expected);
    }

    #[test]
    fn composite_component_parsing() {
        let mut data = Vec::new();
        data.extend_from_slice(&(-1i16).to_be_bytes());
        data.extend_from_slice(&[0; 8]); // bbox
        let flags = ARGS_ARE_XY_VALUES | ARG_1_AND_2_ARE_WORDS | WE_HAVE_A_SCALE;
        data.extend_from_slice(&flags.to_be_bytes());
        data.extend_from_slice(&5u16.to_be_bytes()); // child gid
        data.extend_from_slice(&10i16.to_be_bytes()); // dx
        data.extend_from_slice(&20i16.to_be_bytes()); // dy
        data.extend_from_slice(&0x4000u16.to_be_bytes()); // scale 1.0

        let Glyph::Composite(composite) = Glyph::read(FontData::new(&data)).unwrap() else {
            panic!();
        };
        let components: Vec<_> = composite.components().collect();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].glyph, 5);
        assert_eq!(components[0].anchor, Anchor::Offset { x: 10, y: 20 });
        assert_eq!(components[0].transform, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(composite.trimmed_len(), data.len());
    }

    #[test]
    fn compile_composite_narrow_args() {
        let components = [CompositeOutput {
            flags: ARGS_ARE_XY_VALUES,
            glyph: 3,
            anchor: Anchor::Offset { x: 12, y: -7 },
            transform_bytes: Vec::new(),
        }];
        let out = compile_composite_glyph(&components, Bbox::default(), &[], true);
        let Glyph::Composite(composite) = Glyph::read(FontData::new(&out)).unwrap() else {
            panic!();
        };
        let parsed: Vec<_> = composite.components().collect();
        assert_eq!(parsed[0].anchor, Anchor::Offset { x: 12, y: -7 });
        assert_eq!(parsed[0].glyph, 3);
        assert!(parsed[0].flags & OVERLAP_COMPOUND != 0);
        assert!(parsed[0].flags & ARG_1_AND_2_ARE_WORDS == 0);
    }
}
