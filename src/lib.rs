//! Subset a font file according to provided input.
//!
//! A [`Plan`] is computed once per subset operation: which codepoints and
//! glyphs survive, how glyph ids are renumbered, and which tables are
//! dropped. [`subset_font`] then walks the source table directory and
//! rewrites each table through the serializer.

mod cmap;
mod colr;
mod face;
mod gdef;
mod glyf;
mod glyph;
mod gpos;
mod gsub;
mod gvar;
mod hdmx;
mod hmtx;
mod layout;
mod loca;
mod maxp;
mod name;
mod os2;
pub mod parsing_util;
mod post;
mod repack;
mod sanitize;
mod sbix;
pub mod serialize;
mod vmtx;

use std::collections::BTreeSet;

use fnv::FnvHashMap;
use font_types::{F2Dot14, Fixed, GlyphId, Tag};
use thiserror::Error;

pub use face::{Face, FontBuilder};
pub use sanitize::{FontData, ReadError};

use glyph::{ContourPoint, GlyphSource, MAX_NESTING_LEVEL};
use hmtx::LongMetrics;
use loca::Loca;
use serialize::Serializer;

const MAX_COMPOSITE_OPERATIONS_PER_GLYPH: u8 = 64;
// Support 24-bit gids, the glyf table itself can only reference 16 bits.
const MAX_GID: u32 = 0xFFFFFF;

pub const CMAP: Tag = Tag::new(b"cmap");
pub const COLR: Tag = Tag::new(b"COLR");
pub const CPAL: Tag = Tag::new(b"CPAL");
pub const CFF: Tag = Tag::new(b"CFF ");
pub const CFF2: Tag = Tag::new(b"CFF2");
pub const CVT: Tag = Tag::new(b"cvt ");
pub const CVAR: Tag = Tag::new(b"cvar");
pub const AVAR: Tag = Tag::new(b"avar");
pub const FVAR: Tag = Tag::new(b"fvar");
pub const GASP: Tag = Tag::new(b"gasp");
pub const GDEF: Tag = Tag::new(b"GDEF");
pub const GLYF: Tag = Tag::new(b"glyf");
pub const GPOS: Tag = Tag::new(b"GPOS");
pub const GSUB: Tag = Tag::new(b"GSUB");
pub const GVAR: Tag = Tag::new(b"gvar");
pub const HDMX: Tag = Tag::new(b"hdmx");
pub const HEAD: Tag = Tag::new(b"head");
pub const HHEA: Tag = Tag::new(b"hhea");
pub const HMTX: Tag = Tag::new(b"hmtx");
pub const HVAR: Tag = Tag::new(b"HVAR");
pub const LOCA: Tag = Tag::new(b"loca");
pub const MAXP: Tag = Tag::new(b"maxp");
pub const MVAR: Tag = Tag::new(b"MVAR");
pub const NAME: Tag = Tag::new(b"name");
pub const OS2: Tag = Tag::new(b"OS/2");
pub const POST: Tag = Tag::new(b"post");
pub const SBIX: Tag = Tag::new(b"sbix");
pub const STAT: Tag = Tag::new(b"STAT");
pub const VHEA: Tag = Tag::new(b"vhea");
pub const VMTX: Tag = Tag::new(b"vmtx");

const FPGM: Tag = Tag::new(b"fpgm");
const PREP: Tag = Tag::new(b"prep");
const DSIG: Tag = Tag::new(b"DSIG");
const VDMX: Tag = Tag::new(b"VDMX");

// tables dropped by default unless explicitly kept
// ref: <https://github.com/harfbuzz/harfbuzz/blob/main/src/hb-subset-input.cc>
pub static DEFAULT_DROP_TABLES: &[Tag] = &[
    Tag::new(b"morx"),
    Tag::new(b"mort"),
    Tag::new(b"kerx"),
    Tag::new(b"kern"),
    Tag::new(b"BASE"),
    Tag::new(b"JSTF"),
    Tag::new(b"DSIG"),
    Tag::new(b"EBDT"),
    Tag::new(b"EBLC"),
    Tag::new(b"EBSC"),
    Tag::new(b"SVG "),
    Tag::new(b"PCLT"),
    Tag::new(b"LTSH"),
    Tag::new(b"Feat"),
    Tag::new(b"Glat"),
    Tag::new(b"Gloc"),
    Tag::new(b"Silf"),
    Tag::new(b"Sill"),
];

// ref: <https://github.com/harfbuzz/harfbuzz/blob/021b44388667903d7bc9c92c924ad079f13b90ce/src/hb-subset-input.cc#L82>
pub static DEFAULT_LAYOUT_FEATURES: &[Tag] = &[
    // common
    Tag::new(b"rvrn"),
    Tag::new(b"ccmp"),
    Tag::new(b"liga"),
    Tag::new(b"locl"),
    Tag::new(b"mark"),
    Tag::new(b"mkmk"),
    Tag::new(b"rlig"),
    // fractions
    Tag::new(b"frac"),
    Tag::new(b"numr"),
    Tag::new(b"dnom"),
    // horizontal
    Tag::new(b"calt"),
    Tag::new(b"clig"),
    Tag::new(b"curs"),
    Tag::new(b"kern"),
    Tag::new(b"rclt"),
    // vertical
    Tag::new(b"valt"),
    Tag::new(b"vert"),
    Tag::new(b"vkrn"),
    Tag::new(b"vpal"),
    Tag::new(b"vrt2"),
    // ltr
    Tag::new(b"ltra"),
    Tag::new(b"ltrm"),
    // rtl
    Tag::new(b"rtla"),
    Tag::new(b"rtlm"),
    // random
    Tag::new(b"rand"),
    // justify
    Tag::new(b"jalt"),
    // east asian spacing
    Tag::new(b"chws"),
    Tag::new(b"vchw"),
    Tag::new(b"halt"),
    Tag::new(b"vhal"),
    // private
    Tag::new(b"Harf"),
    Tag::new(b"HARF"),
    Tag::new(b"Buzz"),
    Tag::new(b"BUZZ"),
    // arabic
    Tag::new(b"init"),
    Tag::new(b"medi"),
    Tag::new(b"fina"),
    Tag::new(b"isol"),
    Tag::new(b"med2"),
    Tag::new(b"fin2"),
    Tag::new(b"fin3"),
    Tag::new(b"cswh"),
    Tag::new(b"mset"),
    Tag::new(b"stch"),
    // hangul
    Tag::new(b"ljmo"),
    Tag::new(b"vjmo"),
    Tag::new(b"tjmo"),
    // tibetan
    Tag::new(b"abvs"),
    Tag::new(b"blws"),
    Tag::new(b"abvm"),
    Tag::new(b"blwm"),
    // indic
    Tag::new(b"nukt"),
    Tag::new(b"akhn"),
    Tag::new(b"rphf"),
    Tag::new(b"rkrf"),
    Tag::new(b"pref"),
    Tag::new(b"blwf"),
    Tag::new(b"half"),
    Tag::new(b"abvf"),
    Tag::new(b"pstf"),
    Tag::new(b"cfar"),
    Tag::new(b"vatu"),
    Tag::new(b"cjct"),
    Tag::new(b"pres"),
    Tag::new(b"psts"),
    Tag::new(b"haln"),
    Tag::new(b"dist"),
];

#[derive(Clone, Copy, Debug)]
pub struct SubsetFlags(u16);

impl SubsetFlags {
    /// all flags at their default value of false
    pub const SUBSET_FLAGS_DEFAULT: Self = Self(0x0000);

    /// If set hinting instructions will be dropped in the produced subset.
    pub const SUBSET_FLAGS_NO_HINTING: Self = Self(0x0001);

    /// If set glyph indices will not be modified in the produced subset.
    /// If glyphs are dropped their indices will be retained as an empty
    /// glyph.
    pub const SUBSET_FLAGS_RETAIN_GIDS: Self = Self(0x0002);

    /// If set and subsetting a CFF font the subsetter will attempt to
    /// remove subroutines from the CFF glyphs.
    pub const SUBSET_FLAGS_DESUBROUTINIZE: Self = Self(0x0004);

    /// If set non-unicode name records will be retained in the subset.
    pub const SUBSET_FLAGS_NAME_LEGACY: Self = Self(0x0008);

    /// If set the subsetter will set the OVERLAPS flag on the first
    /// contour or component of each retained glyph.
    pub const SUBSET_FLAGS_SET_OVERLAPS_FLAG: Self = Self(0x0010);

    /// If set the subsetter will not drop unrecognized tables and instead
    /// pass them through untouched.
    pub const SUBSET_FLAGS_PASSTHROUGH_UNRECOGNIZED: Self = Self(0x0020);

    /// If set the notdef glyph outline will be retained in the final
    /// subset.
    pub const SUBSET_FLAGS_NOTDEF_OUTLINE: Self = Self(0x0040);

    /// If set the PS glyph names will be retained in the final subset.
    pub const SUBSET_FLAGS_GLYPH_NAMES: Self = Self(0x0080);

    /// If set then the unicode ranges in OS/2 will not be recalculated.
    pub const SUBSET_FLAGS_NO_PRUNE_UNICODE_RANGES: Self = Self(0x0100);

    /// If set every layout feature tag is kept rather than the curated
    /// default list.
    pub const SUBSET_FLAGS_RETAIN_ALL_FEATURES: Self = Self(0x0200);

    /// If set don't perform glyph closure on layout substitution rules.
    pub const SUBSET_FLAGS_NO_LAYOUT_CLOSURE: Self = Self(0x0400);

    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl Default for SubsetFlags {
    fn default() -> Self {
        Self::SUBSET_FLAGS_DEFAULT
    }
}

impl PartialEq for SubsetFlags {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::ops::BitOr for SubsetFlags {
    type Output = Self;
    #[inline]
    fn bitor(self, other: SubsetFlags) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOrAssign for SubsetFlags {
    #[inline]
    fn bitor_assign(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl From<u16> for SubsetFlags {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error)]
pub enum SubsetError {
    #[error("Invalid input gid {0}")]
    InvalidGid(String),

    #[error("Invalid gid range {start}-{end}")]
    InvalidGidRange { start: u32, end: u32 },

    #[error("Invalid input unicode {0}")]
    InvalidUnicode(String),

    #[error("Invalid unicode range {start}-{end}")]
    InvalidUnicodeRange { start: u32, end: u32 },

    #[error("Invalid tag {0}")]
    InvalidTag(String),

    #[error("Invalid ID {0}")]
    InvalidId(String),

    #[error("Invalid axis position {0}")]
    InvalidAxisPosition(String),

    #[error("Error reading font data: {0}")]
    FontRead(#[from] ReadError),

    #[error("Subsetting table '{0}' failed")]
    SubsetTableError(Tag),

    #[error("Every table failed or was dropped, nothing to output")]
    EmptyOutput,
}

#[allow(dead_code)]
#[derive(Default)]
pub struct Plan {
    pub(crate) unicodes: BTreeSet<u32>,
    glyphs_requested: BTreeSet<GlyphId>,
    pub(crate) glyphset_gsub: BTreeSet<GlyphId>,
    pub(crate) glyphset: BTreeSet<GlyphId>,
    // old -> new glyph id mapping
    pub(crate) glyph_map: FnvHashMap<GlyphId, GlyphId>,
    pub(crate) reverse_glyph_map: FnvHashMap<GlyphId, GlyphId>,
    // ascending new gid: the stable output order
    pub(crate) new_to_old_gid_list: Vec<(GlyphId, GlyphId)>,

    pub(crate) num_output_glyphs: usize,
    pub(crate) font_num_glyphs: usize,
    pub(crate) unicode_to_new_gid_list: Vec<(u32, GlyphId)>,
    pub(crate) codepoint_to_glyph: FnvHashMap<u32, GlyphId>,

    pub(crate) subset_flags: SubsetFlags,
    pub(crate) no_subset_tables: BTreeSet<Tag>,
    pub(crate) drop_tables: BTreeSet<Tag>,
    // None means "keep all"
    pub(crate) name_ids: Option<BTreeSet<u16>>,
    pub(crate) name_languages: Option<BTreeSet<u16>>,
    pub(crate) layout_scripts: Option<BTreeSet<Tag>>,
    pub(crate) layout_features: Option<BTreeSet<Tag>>,

    // new gid -> (advance, side bearing), filled by the glyph engine
    pub(crate) hmtx_map: FnvHashMap<GlyphId, (u16, i16)>,
    pub(crate) vmtx_map: FnvHashMap<GlyphId, (u16, i16)>,
    // new gid -> processed points (with phantoms) when instancing
    pub(crate) instance_points_map: FnvHashMap<GlyphId, Vec<ContourPoint>>,
    // new gid -> per-component translation deltas when instancing
    pub(crate) instance_deltas_map: FnvHashMap<GlyphId, Vec<(f32, f32)>>,

    pub(crate) user_axis_coords: Vec<(Tag, f32)>,
    pub(crate) normalized_coords: Vec<F2Dot14>,
    pub(crate) all_axes_pinned: bool,
}

impl Plan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_gids: &BTreeSet<GlyphId>,
        input_unicodes: &BTreeSet<u32>,
        face: &Face,
        flags: SubsetFlags,
        drop_tables: &BTreeSet<Tag>,
        layout_scripts: Option<BTreeSet<Tag>>,
        layout_features: Option<BTreeSet<Tag>>,
        name_ids: Option<BTreeSet<u16>>,
        name_languages: Option<BTreeSet<u16>>,
        axis_coords: &[(Tag, f32)],
    ) -> Self {
        let mut this = Plan {
            glyphs_requested: input_gids.clone(),
            font_num_glyphs: get_font_num_glyphs(face),
            subset_flags: flags,
            drop_tables: drop_tables.clone(),
            layout_scripts,
            layout_features,
            name_ids,
            name_languages,
            user_axis_coords: axis_coords.to_vec(),
            ..Default::default()
        };

        // ref: <https://github.com/harfbuzz/harfbuzz/blob/b5a65e0f20c30a7f13b2f6619479a6d666e603e0/src/hb-subset-input.cc#L71>
        let default_no_subset_tables = [GASP, FPGM, PREP, VDMX, DSIG, CVT, CFF, CFF2, CPAL];
        this.no_subset_tables
            .extend(default_no_subset_tables.iter().copied());

        this.populate_unicodes_to_retain(input_gids, input_unicodes, face);
        this.normalize_axis_coords(face);
        this.populate_gids_to_retain(face);
        this.create_old_gid_to_new_gid_map();
        this.collect_glyph_metrics(face);
        this.nameid_closure(face);
        this
    }

    pub fn num_output_glyphs(&self) -> usize {
        self.num_output_glyphs
    }

    pub(crate) fn keep_layout_feature(&self, tag: Tag) -> bool {
        if self
            .subset_flags
            .contains(SubsetFlags::SUBSET_FLAGS_RETAIN_ALL_FEATURES)
        {
            return true;
        }
        match &self.layout_features {
            Some(tags) => tags.contains(&tag),
            None => true,
        }
    }

    pub(crate) fn keep_layout_script(&self, tag: Tag) -> bool {
        match &self.layout_scripts {
            Some(tags) => tags.contains(&tag),
            None => true,
        }
    }

    pub(crate) fn keep_name_id(&self, id: u16) -> bool {
        match &self.name_ids {
            Some(ids) => ids.contains(&id),
            None => true,
        }
    }

    pub(crate) fn keep_name_language(&self, lang: u16) -> bool {
        if lang == 0x409 || lang == 0 {
            return true;
        }
        match &self.name_languages {
            Some(langs) => langs.contains(&lang),
            None => true,
        }
    }

    fn populate_unicodes_to_retain(
        &mut self,
        input_gids: &BTreeSet<GlyphId>,
        input_unicodes: &BTreeSet<u32>,
        face: &Face,
    ) {
        // requested but unmapped gids are retained as glyphs
        for gid in input_gids {
            if gid.to_u32() < self.font_num_glyphs as u32 {
                self.glyphset_gsub.insert(*gid);
            }
        }

        let cmap = face
            .table_data(CMAP)
            .and_then(|data| cmap::Cmap::new(data).ok());
        let Some(cmap) = cmap else {
            return;
        };

        let mapping = cmap.collect_mapping();
        let mut pairs: Vec<(u32, GlyphId)> = mapping
            .iter()
            .filter(|(cp, gid)| input_unicodes.contains(cp) || input_gids.contains(gid))
            .map(|(cp, gid)| (*cp, *gid))
            .collect();
        pairs.sort_unstable();
        self.codepoint_to_glyph.extend(pairs.iter().copied());
        // holds old gids until the gid map exists
        self.unicode_to_new_gid_list = pairs;

        self.glyphset_gsub
            .extend(self.unicode_to_new_gid_list.iter().map(|(_, gid)| *gid));
        self.unicodes
            .extend(self.unicode_to_new_gid_list.iter().map(|(cp, _)| *cp));

        // variation selectors that were requested survive if the font
        // knows them
        let mut selectors = Vec::new();
        cmap.collect_variation_selectors(&mut selectors);
        self.unicodes
            .extend(selectors.iter().filter(|cp| input_unicodes.contains(cp)));
    }

    fn populate_gids_to_retain(&mut self, face: &Face) {
        self.glyphset_gsub.insert(GlyphId::NOTDEF);

        // glyph closure for cmap variation sequences
        if let Some(cmap) = face
            .table_data(CMAP)
            .and_then(|data| cmap::Cmap::new(data).ok())
        {
            let mut glyphset = std::mem::take(&mut self.glyphset_gsub);
            cmap.closure_glyphs(&self.unicodes, &mut glyphset);
            self.glyphset_gsub = glyphset;
        }
        remove_invalid_gids(&mut self.glyphset_gsub, self.font_num_glyphs);

        // glyph closure for GSUB substitutions
        if !self.drop_tables.contains(&GSUB)
            && !self
                .subset_flags
                .contains(SubsetFlags::SUBSET_FLAGS_NO_LAYOUT_CLOSURE)
        {
            if let Some(data) = face.table_data(GSUB) {
                let gsub = gsub::Gsub { data };
                let mut glyphset = std::mem::take(&mut self.glyphset_gsub);
                gsub.closure_glyphs(self, &mut glyphset);
                self.glyphset_gsub = glyphset;
            }
            remove_invalid_gids(&mut self.glyphset_gsub, self.font_num_glyphs);
        }

        // glyph closure for COLR layers
        let mut glyphset_colred = self.glyphset_gsub.clone();
        if !self.drop_tables.contains(&COLR) {
            if let Some(data) = face.table_data(COLR) {
                let colr = colr::Colr { data };
                colr.closure_glyphs(&mut glyphset_colred);
            }
            remove_invalid_gids(&mut glyphset_colred, self.font_num_glyphs);
        }

        // populate a full set of glyphs to retain by adding all referenced
        // composite glyphs
        self.glyphset = glyphset_colred.clone();
        if let Some(source) = glyf_source(face, Vec::new()) {
            let mut operation_count =
                glyphset_colred.len() as i64 * MAX_COMPOSITE_OPERATIONS_PER_GLYPH as i64;
            for gid in &glyphset_colred {
                operation_count = glyf_closure_glyphs(
                    &source,
                    gid.to_u32(),
                    &mut self.glyphset,
                    operation_count,
                    0,
                );
            }
            remove_invalid_gids(&mut self.glyphset, self.font_num_glyphs);
        }
    }

    fn create_old_gid_to_new_gid_map(&mut self) {
        let pop = self.glyphset.len();
        self.glyph_map.reserve(pop);
        self.reverse_glyph_map.reserve(pop);
        self.new_to_old_gid_list.reserve(pop);

        if !self
            .subset_flags
            .contains(SubsetFlags::SUBSET_FLAGS_RETAIN_GIDS)
        {
            self.new_to_old_gid_list.extend(
                self.glyphset
                    .iter()
                    .zip(0u32..)
                    .map(|(old, new)| (GlyphId::new(new), *old)),
            );
            self.num_output_glyphs = self.new_to_old_gid_list.len();
        } else {
            self.new_to_old_gid_list
                .extend(self.glyphset.iter().map(|gid| (*gid, *gid)));
            let Some(max_glyph) = self.glyphset.last() else {
                return;
            };
            self.num_output_glyphs = max_glyph.to_u32() as usize + 1;
        }
        self.glyph_map
            .extend(self.new_to_old_gid_list.iter().map(|(new, old)| (*old, *new)));
        self.reverse_glyph_map
            .extend(self.new_to_old_gid_list.iter().map(|(new, old)| (*new, *old)));

        // the codepoint list now speaks new gids; entries whose glyph did
        // not survive validation are dropped
        self.unicode_to_new_gid_list = std::mem::take(&mut self.unicode_to_new_gid_list)
            .into_iter()
            .filter_map(|(cp, old_gid)| {
                self.glyph_map.get(&old_gid).map(|new_gid| (cp, *new_gid))
            })
            .collect();
    }

    /// Map user axis positions onto normalized design-space coordinates.
    ///
    /// Unspecified axes are pinned at their default; partial ranges are not
    /// supported.
    fn normalize_axis_coords(&mut self, face: &Face) {
        if self.user_axis_coords.is_empty() {
            return;
        }
        let Some(fvar) = face.table_data(FVAR) else {
            return;
        };
        let Ok(axes_offset) = fvar.read_at::<u16>(4) else {
            return;
        };
        let Ok(axis_count) = fvar.read_at::<u16>(8) else {
            return;
        };
        let Ok(axis_size) = fvar.read_at::<u16>(10) else {
            return;
        };

        self.normalized_coords = vec![F2Dot14::from_f32(0.0); axis_count as usize];
        for i in 0..axis_count as usize {
            let record = axes_offset as usize + i * axis_size as usize;
            let (Ok(tag), Ok(min), Ok(default), Ok(max)) = (
                fvar.read_at::<Tag>(record),
                fvar.read_at::<Fixed>(record + 4),
                fvar.read_at::<Fixed>(record + 8),
                fvar.read_at::<Fixed>(record + 12),
            ) else {
                return;
            };
            let (min, default, max) = (min.to_f32(), default.to_f32(), max.to_f32());
            let Some((_, value)) = self.user_axis_coords.iter().find(|(t, _)| *t == tag) else {
                continue;
            };
            let value = value.clamp(min, max);
            let normalized = if value < default && default > min {
                (value - default) / (default - min)
            } else if value > default && max > default {
                (value - default) / (max - default)
            } else {
                0.0
            };
            self.normalized_coords[i] = F2Dot14::from_f32(normalized.clamp(-1.0, 1.0));
        }
        self.all_axes_pinned = true;
    }

    /// Run the glyph engine over every retained glyph: fills the metric maps
    /// from the phantom points and, when instancing, keeps the processed
    /// point vectors for the glyf writer.
    fn collect_glyph_metrics(&mut self, face: &Face) {
        let coords = if self.normalized_coords.iter().any(|c| *c != F2Dot14::from_f32(0.0)) {
            self.normalized_coords.clone()
        } else {
            Vec::new()
        };
        let instancing = !self.normalized_coords.is_empty();
        let Some(source) = glyf_source(face, coords) else {
            return;
        };

        let mut all_points: Vec<ContourPoint> = Vec::new();
        let mut deltas: Vec<(f32, f32)> = Vec::new();
        for (new_gid, old_gid) in &self.new_to_old_gid_list {
            all_points.clear();
            deltas.clear();
            if source
                .get_points(old_gid.to_u32(), &mut all_points, Some(&mut deltas), 0)
                .is_err()
            {
                // unreadable or over-deep composites drop to an empty glyph
                log::warn!("glyph {} not readable, emptied", old_gid.to_u32());
                if instancing {
                    self.instance_points_map.insert(*new_gid, Vec::new());
                }
                continue;
            }
            let bbox = glyph::bbox_of(&all_points);
            let metrics = glyph::metrics_of(&all_points, bbox);
            self.hmtx_map
                .insert(*new_gid, (metrics.h_advance, metrics.lsb));
            if face.has_table(VMTX) {
                self.vmtx_map
                    .insert(*new_gid, (metrics.v_advance, metrics.tsb));
            }
            if instancing {
                self.instance_points_map.insert(*new_gid, all_points.clone());
                if !deltas.is_empty() {
                    self.instance_deltas_map.insert(*new_gid, deltas.clone());
                }
            }
        }
    }
}

impl Plan {
    /// Keep the name records that surviving variation metadata points at.
    fn nameid_closure(&mut self, face: &Face) {
        if self.name_ids.is_none() {
            return;
        }
        let mut extra: Vec<u16> = Vec::new();
        if !self.all_axes_pinned && !self.drop_tables.contains(&FVAR) {
            if let Some(fvar) = face.table_data(FVAR) {
                collect_fvar_name_ids(&fvar, &mut extra);
            }
        }
        if !self.all_axes_pinned && !self.drop_tables.contains(&STAT) {
            if let Some(stat) = face.table_data(STAT) {
                collect_stat_name_ids(&stat, &mut extra);
            }
        }
        if let Some(name_ids) = self.name_ids.as_mut() {
            name_ids.extend(extra);
        }
    }
}

fn collect_fvar_name_ids(fvar: &FontData, out: &mut Vec<u16>) {
    let (Ok(axes_offset), Ok(axis_count), Ok(axis_size), Ok(instance_count), Ok(instance_size)) = (
        fvar.read_at::<u16>(4),
        fvar.read_at::<u16>(8),
        fvar.read_at::<u16>(10),
        fvar.read_at::<u16>(12),
        fvar.read_at::<u16>(14),
    ) else {
        return;
    };
    for i in 0..axis_count as usize {
        let record = axes_offset as usize + i * axis_size as usize;
        if let Ok(name_id) = fvar.read_at::<u16>(record + 18) {
            out.push(name_id);
        }
    }
    let instances_start = axes_offset as usize + axis_count as usize * axis_size as usize;
    let has_ps_name = instance_size as usize == 4 + 4 * axis_count as usize + 2;
    for i in 0..instance_count as usize {
        let record = instances_start + i * instance_size as usize;
        if let Ok(name_id) = fvar.read_at::<u16>(record) {
            out.push(name_id);
        }
        if has_ps_name {
            if let Ok(name_id) = fvar.read_at::<u16>(record + instance_size as usize - 2) {
                out.push(name_id);
            }
        }
    }
}

fn collect_stat_name_ids(stat: &FontData, out: &mut Vec<u16>) {
    let (Ok(axis_size), Ok(axis_count), Ok(axes_offset), Ok(value_count), Ok(values_offset)) = (
        stat.read_at::<u16>(4),
        stat.read_at::<u16>(6),
        stat.read_at::<u32>(8),
        stat.read_at::<u16>(12),
        stat.read_at::<u32>(14),
    ) else {
        return;
    };
    for i in 0..axis_count as usize {
        let record = axes_offset as usize + i * axis_size as usize;
        if let Ok(name_id) = stat.read_at::<u16>(record + 4) {
            out.push(name_id);
        }
    }
    // every axis-value format keeps its valueNameID at the same position
    for i in 0..value_count as usize {
        let Ok(value_offset) = stat.read_at::<u16>(values_offset as usize + i * 2) else {
            continue;
        };
        let value = values_offset as usize + value_offset as usize;
        if let Ok(name_id) = stat.read_at::<u16>(value + 6) {
            out.push(name_id);
        }
    }
    if let Ok(elided_fallback) = stat.read_at::<u16>(18) {
        out.push(elided_fallback);
    }
}

fn glyf_source<'a>(face: &Face<'a>, coords: Vec<F2Dot14>) -> Option<GlyphSource<'a>> {
    let glyf = face.table_data(GLYF)?;
    let head = face.table_data(HEAD)?;
    let loca_long = head.read_at::<i16>(50).ok()? == 1;
    let loca = Loca::new(face.table_data(LOCA)?, loca_long);
    let upem = head.read_at::<u16>(18).unwrap_or(1000);

    let hhea = face.table_data(HHEA)?;
    let num_h_metrics: u16 = hhea.read_at(34).ok()?;
    let hmtx = LongMetrics::new(face.table_data(HMTX)?, num_h_metrics);

    let vmtx = face.table_data(VHEA).and_then(|vhea| {
        let num_v_metrics: u16 = vhea.read_at(34).ok()?;
        Some(LongMetrics::new(face.table_data(VMTX)?, num_v_metrics))
    });

    let gvar = if coords.is_empty() {
        None
    } else {
        face.table_data(GVAR)
            .and_then(|data| gvar::Gvar::new(data).ok())
    };

    Some(GlyphSource {
        glyf,
        loca,
        hmtx,
        vmtx,
        gvar,
        coords,
        upem,
    })
}

/// glyph closure for composite glyphs in the glyf table;
/// the operation count bounds runaway component graphs
fn glyf_closure_glyphs(
    source: &GlyphSource,
    gid: u32,
    gids_to_retain: &mut BTreeSet<GlyphId>,
    operation_count: i64,
    depth: u8,
) -> i64 {
    if gids_to_retain.contains(&GlyphId::new(gid)) {
        return operation_count;
    }
    gids_to_retain.insert(GlyphId::new(gid));

    if depth > MAX_NESTING_LEVEL {
        return operation_count;
    }
    let depth = depth + 1;

    let mut operation_count = operation_count - 1;
    if operation_count < 0 {
        return operation_count;
    }

    if let Ok(glyph::Glyph::Composite(composite)) = source.glyph(gid) {
        for component in composite.components() {
            operation_count = glyf_closure_glyphs(
                source,
                component.glyph as u32,
                gids_to_retain,
                operation_count,
                depth,
            );
        }
    }
    operation_count
}

fn remove_invalid_gids(gids: &mut BTreeSet<GlyphId>, num_glyphs: usize) {
    gids.retain(|gid| gid.to_u32() < num_glyphs as u32 && gid.to_u32() <= MAX_GID);
}

fn get_font_num_glyphs(face: &Face) -> usize {
    let from_loca = glyf_source(face, Vec::new())
        .map(|source| source.loca.len())
        .unwrap_or_default();
    let from_maxp = face
        .table_data(MAXP)
        .and_then(|maxp| maxp.read_at::<u16>(4).ok())
        .unwrap_or_default() as usize;
    from_loca.max(from_maxp)
}

/// This trait is implemented for all subsettable top-level tables.
pub(crate) trait Subset {
    /// Subset this table; on success the table (or its replacements) lands
    /// in the serializer or the builder.
    fn subset(
        &self,
        plan: &Plan,
        face: &Face,
        s: &mut Serializer,
        builder: &mut FontBuilder,
    ) -> Result<(), SubsetError>;
}

pub fn subset_font(face: &Face, plan: &Plan) -> Result<Vec<u8>, SubsetError> {
    let mut builder = FontBuilder::default();

    for record in face.table_records() {
        let tag = record.tag;
        if builder.contains(tag) {
            continue;
        }
        if should_drop_table(tag, plan) {
            log::trace!("dropping table {tag}");
            continue;
        }
        subset(tag, face, plan, &mut builder, record.length)?;
    }
    if builder.is_empty() {
        return Err(SubsetError::EmptyOutput);
    }
    Ok(builder.build(face.sfnt_version))
}

fn should_drop_table(tag: Tag, plan: &Plan) -> bool {
    if plan.drop_tables.contains(&tag) {
        return true;
    }

    let no_hinting = plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_NO_HINTING);
    if no_hinting && matches!(tag, t if t == CVAR || t == CVT || t == FPGM || t == PREP || t == HDMX || t == VDMX)
    {
        return true;
    }

    // instancing at pinned axes bakes the deltas in, the variation tables
    // have nothing left to say
    if plan.all_axes_pinned
        && matches!(tag, t if t == GVAR || t == FVAR || t == AVAR || t == CVAR || t == STAT
            || t == MVAR || t == HVAR || t == Tag::new(b"VVAR"))
    {
        return true;
    }
    false
}

fn subset(
    table_tag: Tag,
    face: &Face,
    plan: &Plan,
    builder: &mut FontBuilder,
    table_len: u32,
) -> Result<(), SubsetError> {
    let buf_size = estimate_subset_table_size(face, table_tag, plan);
    let mut s = Serializer::new(buf_size as u32);
    let needed = try_subset(table_tag, face, plan, builder, &mut s, table_len);

    if let Err(err) = needed {
        // the table subsetted to empty, or its data was beyond repair
        log::warn!("table {table_tag} dropped: {err}");
        return Ok(());
    }

    if s.in_error() {
        if !s.only_offset_overflow() {
            log::warn!("table {table_tag} dropped: serialization failed");
            return Ok(());
        }
        // a 16-bit offset overflowed; re-sort the object graph and retry
        match repack::resolve_overflows(&s) {
            Ok(data) => {
                log::trace!("table {table_tag} repacked after offset overflow");
                builder.add_raw(table_tag, data);
                return Ok(());
            }
            Err(_) => {
                log::warn!("table {table_tag} dropped: offset overflow unresolved");
                return Ok(());
            }
        }
    }

    let subsetted_data = s.copy_bytes().unwrap_or_default();
    if !subsetted_data.is_empty() {
        builder.add_raw(table_tag, subsetted_data);
    }
    Ok(())
}

fn try_subset(
    table_tag: Tag,
    face: &Face,
    plan: &Plan,
    builder: &mut FontBuilder,
    s: &mut Serializer,
    table_len: u32,
) -> Result<(), SubsetError> {
    s.start_serialize()
        .map_err(|_| SubsetError::SubsetTableError(table_tag))?;

    let ret = subset_table(table_tag, face, plan, builder, s);
    if !s.ran_out_of_room() {
        s.end_serialize();
        return ret;
    }

    // ran out of room, reallocate more bytes
    let buf_size = s.allocated() * 2 + 16;
    if buf_size > (table_len as usize) * 256 {
        return ret;
    }
    s.reset_size(buf_size);
    try_subset(table_tag, face, plan, builder, s, table_len)
}

fn subset_table(
    tag: Tag,
    face: &Face,
    plan: &Plan,
    builder: &mut FontBuilder,
    s: &mut Serializer,
) -> Result<(), SubsetError> {
    use SubsetError::SubsetTableError;

    if plan.no_subset_tables.contains(&tag) {
        return passthrough_table(tag, face, s);
    }

    let data = face.table_data(tag).ok_or(SubsetTableError(tag))?;
    match tag {
        CMAP => cmap::Cmap::new(data)
            .map_err(|_| SubsetTableError(CMAP))?
            .subset(plan, face, s, builder),

        COLR => colr::Colr { data }.subset(plan, face, s, builder),

        GDEF => gdef::Gdef { data }.subset(plan, face, s, builder),

        GLYF => {
            let head = face.table_data(HEAD).ok_or(SubsetTableError(HEAD))?;
            let loca_long = head
                .read_at::<i16>(50)
                .map_err(|_| SubsetTableError(HEAD))?
                == 1;
            let loca = Loca::new(
                face.table_data(LOCA).ok_or(SubsetTableError(LOCA))?,
                loca_long,
            );
            glyf::GlyfSubset { glyf: data, loca }.subset(plan, face, s, builder)
        }

        GPOS => gpos::Gpos { data }.subset(plan, face, s, builder),

        GSUB => gsub::Gsub { data }.subset(plan, face, s, builder),

        GVAR => gvar::Gvar::new(data)
            .map_err(|_| SubsetTableError(GVAR))?
            .subset(plan, face, s, builder),

        HDMX => hdmx::Hdmx { data }.subset(plan, face, s, builder),

        // head and loca are written by the glyf subsetter
        HEAD => {
            if face.has_table(GLYF) {
                Ok(())
            } else {
                passthrough_table(tag, face, s)
            }
        }
        LOCA => Ok(()),

        // hhea/vhea ride along with their metrics
        HHEA => {
            if face.has_table(HMTX) {
                Ok(())
            } else {
                passthrough_table(tag, face, s)
            }
        }
        VHEA => {
            if face.has_table(VMTX) {
                Ok(())
            } else {
                passthrough_table(tag, face, s)
            }
        }

        HMTX => {
            let hhea = face.table_data(HHEA).ok_or(SubsetTableError(HHEA))?;
            let num_long: u16 = hhea.read_at(34).map_err(|_| SubsetTableError(HHEA))?;
            let metrics = LongMetrics::new(data, num_long);
            hmtx::HmtxSubset { metrics }.subset(plan, face, s, builder)
        }
        VMTX => {
            let vhea = face.table_data(VHEA).ok_or(SubsetTableError(VHEA))?;
            let num_long: u16 = vhea.read_at(34).map_err(|_| SubsetTableError(VHEA))?;
            let metrics = LongMetrics::new(data, num_long);
            vmtx::VmtxSubset { metrics }.subset(plan, face, s, builder)
        }

        MAXP => maxp::subset_maxp(face, plan, builder),
        NAME => name::subset_name(face, plan, builder),
        OS2 => os2::subset_os2(face, plan, builder),
        POST => post::subset_post(face, plan, builder),
        SBIX => sbix::Sbix { data }.subset(plan, face, s, builder),

        _ => passthrough_table(tag, face, s),
    }
}

fn passthrough_table(tag: Tag, face: &Face, s: &mut Serializer) -> Result<(), SubsetError> {
    if let Some(data) = face.table_data(tag) {
        s.embed_bytes(data.as_bytes())
            .map_err(|_| SubsetError::SubsetTableError(tag))?;
    }
    Ok(())
}

pub fn estimate_subset_table_size(face: &Face, table_tag: Tag, plan: &Plan) -> usize {
    let Some(table_data) = face.table_data(table_tag) else {
        return 0;
    };

    let table_len = table_data.len();
    let mut bulk: usize = 8192;
    let src_glyphs = plan.font_num_glyphs;
    let dst_glyphs = plan.num_output_glyphs;

    // Tables that we want to allocate the same space as the source table.
    // For GSUB/GPOS it's because those are expensive to subset, so giving
    // them more room is fine.
    let same_size = table_tag == GSUB || table_tag == GPOS || table_tag == NAME;

    if plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_RETAIN_GIDS)
    {
        if table_tag == CFF {
            // extra room for the CFF charset
            bulk += src_glyphs * 16;
        } else if table_tag == CFF2 {
            // just extra CharString offsets
            bulk += src_glyphs * 4;
        }
    }

    if src_glyphs == 0 || same_size {
        return bulk + table_len;
    }

    bulk + table_len * ((dst_glyphs as f32 / src_glyphs as f32).sqrt() as usize)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_layout_features_cover_the_major_shapers() {
        for tag in [b"liga", b"ccmp", b"init", b"ljmo", b"abvs", b"nukt"] {
            assert!(DEFAULT_LAYOUT_FEATURES.contains(&Tag::new(tag)));
        }
    }

    #[test]
    fn flags_compose() {
        let flags = SubsetFlags::SUBSET_FLAGS_NO_HINTING | SubsetFlags::SUBSET_FLAGS_RETAIN_GIDS;
        assert!(flags.contains(SubsetFlags::SUBSET_FLAGS_NO_HINTING));
        assert!(flags.contains(SubsetFlags::SUBSET_FLAGS_RETAIN_GIDS));
        assert!(!flags.contains(SubsetFlags::SUBSET_FLAGS_NOTDEF_OUTLINE));
        assert_eq!(SubsetFlags::from(0x0003), flags);
    }
}
