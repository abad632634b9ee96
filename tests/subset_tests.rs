//! end-to-end subsetting tests over in-memory fonts

use std::collections::BTreeSet;

use snida::{subset_font, Face, Plan, SubsetFlags};

// simple glyph flag bits used by the builders
const ON_CURVE: u8 = 0x01;
const X_SHORT: u8 = 0x02;
const REPEAT: u8 = 0x08;
const X_SAME_OR_POS: u8 = 0x10;
const Y_SAME_OR_POS: u8 = 0x20;
const Y_SHORT: u8 = 0x04;

// composite flags
const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
const ARGS_ARE_XY_VALUES: u16 = 0x0002;
const USE_MY_METRICS: u16 = 0x0200;

struct GlyphSpec {
    bytes: Vec<u8>,
    advance: u16,
    lsb: i16,
}

/// One closed triangle contour: (10,0) (20,10) (10,20).
fn triangle_glyph(instructions: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&1i16.to_be_bytes());
    data.extend_from_slice(&10i16.to_be_bytes()); // xMin
    data.extend_from_slice(&0i16.to_be_bytes()); // yMin
    data.extend_from_slice(&20i16.to_be_bytes()); // xMax
    data.extend_from_slice(&20i16.to_be_bytes()); // yMax
    data.extend_from_slice(&2u16.to_be_bytes()); // endPtsOfContours
    data.extend_from_slice(&(instructions.len() as u16).to_be_bytes());
    data.extend_from_slice(instructions);
    data.push(ON_CURVE | X_SHORT | X_SAME_OR_POS | Y_SAME_OR_POS);
    data.push(X_SHORT | X_SAME_OR_POS | Y_SHORT | Y_SAME_OR_POS);
    data.push(ON_CURVE | X_SHORT | Y_SHORT | Y_SAME_OR_POS);
    data.extend_from_slice(&[10, 10, 10]); // x deltas
    data.extend_from_slice(&[10, 10]); // y deltas
    data
}

fn composite_glyph(child: u16, dx: i16, dy: i16, flags: u16) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&(-1i16).to_be_bytes());
    data.extend_from_slice(&(10 + dx).to_be_bytes()); // xMin
    data.extend_from_slice(&dy.to_be_bytes()); // yMin
    data.extend_from_slice(&(20 + dx).to_be_bytes()); // xMax
    data.extend_from_slice(&(20 + dy).to_be_bytes()); // yMax
    let flags = flags | ARG_1_AND_2_ARE_WORDS | ARGS_ARE_XY_VALUES;
    data.extend_from_slice(&flags.to_be_bytes());
    data.extend_from_slice(&child.to_be_bytes());
    data.extend_from_slice(&dx.to_be_bytes());
    data.extend_from_slice(&dy.to_be_bytes());
    data
}

fn cmap_format12(mappings: &[(u32, u16)]) -> Vec<u8> {
    let mut subtable = Vec::new();
    subtable.extend_from_slice(&12u16.to_be_bytes());
    subtable.extend_from_slice(&0u16.to_be_bytes());
    subtable.extend_from_slice(&((16 + mappings.len() * 12) as u32).to_be_bytes());
    subtable.extend_from_slice(&0u32.to_be_bytes());
    subtable.extend_from_slice(&(mappings.len() as u32).to_be_bytes());
    for (cp, gid) in mappings {
        subtable.extend_from_slice(&cp.to_be_bytes());
        subtable.extend_from_slice(&cp.to_be_bytes());
        subtable.extend_from_slice(&(*gid as u32).to_be_bytes());
    }

    let mut cmap = Vec::new();
    cmap.extend_from_slice(&0u16.to_be_bytes());
    cmap.extend_from_slice(&1u16.to_be_bytes());
    cmap.extend_from_slice(&3u16.to_be_bytes());
    cmap.extend_from_slice(&10u16.to_be_bytes());
    cmap.extend_from_slice(&12u32.to_be_bytes());
    cmap.extend_from_slice(&subtable);
    cmap
}

struct FontSpec {
    glyphs: Vec<GlyphSpec>,
    mappings: Vec<(u32, u16)>,
    extra_tables: Vec<(&'static [u8; 4], Vec<u8>)>,
}

fn build_font(spec: &FontSpec) -> Vec<u8> {
    let num_glyphs = spec.glyphs.len() as u16;

    let mut glyf = Vec::new();
    let mut loca: Vec<u16> = vec![0];
    for glyph in &spec.glyphs {
        glyf.extend_from_slice(&glyph.bytes);
        if glyf.len() % 2 != 0 {
            glyf.push(0);
        }
        loca.push((glyf.len() / 2) as u16);
    }
    let loca_bytes: Vec<u8> = loca.iter().flat_map(|v| v.to_be_bytes()).collect();

    let mut head = vec![0u8; 54];
    head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
    head[18..20].copy_from_slice(&1000u16.to_be_bytes());
    // indexToLocFormat stays 0 (short)

    let mut maxp = vec![0u8; 32];
    maxp[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    maxp[4..6].copy_from_slice(&num_glyphs.to_be_bytes());

    let mut hhea = vec![0u8; 36];
    hhea[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    hhea[34..36].copy_from_slice(&num_glyphs.to_be_bytes());

    let mut hmtx = Vec::new();
    for glyph in &spec.glyphs {
        hmtx.extend_from_slice(&glyph.advance.to_be_bytes());
        hmtx.extend_from_slice(&glyph.lsb.to_be_bytes());
    }

    let mut builder = snida::FontBuilder::default();
    builder.add_raw(snida::HEAD, head);
    builder.add_raw(snida::MAXP, maxp);
    builder.add_raw(snida::HHEA, hhea);
    builder.add_raw(snida::HMTX, hmtx);
    builder.add_raw(snida::LOCA, loca_bytes);
    builder.add_raw(snida::GLYF, glyf);
    builder.add_raw(snida::CMAP, cmap_format12(&spec.mappings));
    for (tag, data) in &spec.extra_tables {
        builder.add_raw(font_types::Tag::new(tag), data.clone());
    }
    builder.build(0x0001_0000)
}

fn subset(font_bytes: &[u8], unicodes: &[u32], flags: SubsetFlags) -> Vec<u8> {
    let face = Face::new(font_bytes).unwrap();
    let unicodes: BTreeSet<u32> = unicodes.iter().copied().collect();
    let plan = Plan::new(
        &BTreeSet::new(),
        &unicodes,
        &face,
        flags,
        &snida::DEFAULT_DROP_TABLES.iter().copied().collect(),
        None,
        None,
        None,
        None,
        &[],
    );
    subset_font(&face, &plan).unwrap()
}

fn table<'a>(font: &'a [u8], tag: font_types::Tag) -> Option<&'a [u8]> {
    let face = Face::new(font).unwrap();
    face.table_data(tag).map(|d| d.as_bytes())
}

fn read_u16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([bytes[pos], bytes[pos + 1]])
}

fn two_glyph_font() -> Vec<u8> {
    build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: triangle_glyph(&[]),
                advance: 600,
                lsb: 10,
            },
        ],
        mappings: vec![(0x41, 1)],
        extra_tables: vec![],
    })
}

#[test]
fn retains_requested_glyphs() {
    let font = two_glyph_font();
    let out = subset(&font, &[0x41], SubsetFlags::default());

    let maxp = table(&out, snida::MAXP).unwrap();
    assert_eq!(read_u16(maxp, 4), 2);

    // notdef stays empty, glyph 1 carries its outline
    let loca = table(&out, snida::LOCA).unwrap();
    let entries: Vec<u16> = loca.chunks(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0], 0);
    assert_eq!(entries[1], 0);
    assert!(entries[2] > 0);

    // loca entries never decrease
    for pair in entries.windows(2) {
        assert!(pair[1] >= pair[0]);
    }

    let glyf = table(&out, snida::GLYF).unwrap();
    let glyph1 = &glyf[entries[1] as usize * 2..entries[2] as usize * 2];
    assert_eq!(read_u16(glyph1, 0), 1); // numberOfContours

    // hmtx keeps the advances computed from the phantom points
    let hmtx = table(&out, snida::HMTX).unwrap();
    assert_eq!(read_u16(hmtx, 0), 500);
    assert_eq!(read_u16(hmtx, 4), 600);
    assert_eq!(read_u16(hmtx, 6), 10); // lsb of glyph 1
}

#[test]
fn empty_subset_keeps_only_notdef() {
    let font = two_glyph_font();
    let out = subset(&font, &[], SubsetFlags::default());
    let maxp = table(&out, snida::MAXP).unwrap();
    assert_eq!(read_u16(maxp, 4), 1);
    // glyf is non-empty even when every glyph is
    assert!(!table(&out, snida::GLYF).unwrap().is_empty());
}

#[test]
fn composite_closure_pulls_in_children() {
    let font = build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: triangle_glyph(&[]),
                advance: 600,
                lsb: 10,
            },
            GlyphSpec {
                bytes: composite_glyph(1, 10, 20, 0),
                advance: 700,
                lsb: 20,
            },
        ],
        // only the composite is mapped
        mappings: vec![(0x42, 2)],
        extra_tables: vec![],
    });
    let out = subset(&font, &[0x42], SubsetFlags::default());

    let maxp = table(&out, snida::MAXP).unwrap();
    assert_eq!(read_u16(maxp, 4), 3, "child glyph must be closed over");

    // the composite still references its child, by the same dense gid
    let loca = table(&out, snida::LOCA).unwrap();
    let glyf = table(&out, snida::GLYF).unwrap();
    let start = read_u16(loca, 4) as usize * 2;
    let end = read_u16(loca, 6) as usize * 2;
    let composite = &glyf[start..end];
    assert_eq!(composite[0..2], (-1i16).to_be_bytes());
    let flags = read_u16(composite, 10);
    assert!(flags & ARGS_ARE_XY_VALUES != 0);
    assert_eq!(read_u16(composite, 12), 1); // child gid
    // the translation is preserved
    assert_eq!(read_u16(composite, 14) as i16, 10);
    assert_eq!(read_u16(composite, 16) as i16, 20);
}

#[test]
fn use_my_metrics_copies_component_metrics() {
    let font = build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: triangle_glyph(&[]),
                advance: 600,
                lsb: 10,
            },
            GlyphSpec {
                bytes: composite_glyph(1, 0, 0, USE_MY_METRICS),
                advance: 999,
                lsb: 77,
            },
        ],
        mappings: vec![(0x42, 2)],
        extra_tables: vec![],
    });
    let out = subset(&font, &[0x42], SubsetFlags::default());

    // the composite's emitted advance comes from its component's phantoms
    // (600), not its own hmtx entry (999); the equal trailing advances then
    // compress into the long-metric count
    let hhea = table(&out, snida::HHEA).unwrap();
    assert_eq!(read_u16(hhea, 34), 2);
    let hmtx = table(&out, snida::HMTX).unwrap();
    assert_eq!(hmtx.len(), 2 * 4 + 2);
    assert_eq!(read_u16(hmtx, 4), 600);
}

#[test]
fn trailing_padding_is_trimmed() {
    let padded = {
        let mut bytes = triangle_glyph(&[]);
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0xDE, 0xAD, 0xBE, 0xEF]);
        bytes
    };
    let clean_len = triangle_glyph(&[]).len();
    let font = build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: padded,
                advance: 600,
                lsb: 10,
            },
        ],
        mappings: vec![(0x41, 1)],
        extra_tables: vec![],
    });
    let out = subset(&font, &[0x41], SubsetFlags::default());

    let loca = table(&out, snida::LOCA).unwrap();
    let len = (read_u16(loca, 4) - read_u16(loca, 2)) as usize * 2;
    // trimmed to the true length, modulo the final pad byte
    assert_eq!(len, clean_len + clean_len % 2);
}

#[test]
fn no_hinting_strips_instructions_and_tables() {
    let font = build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: triangle_glyph(&[0xB0, 0x01]), // PUSHB[0] 1
                advance: 600,
                lsb: 10,
            },
        ],
        mappings: vec![(0x41, 1)],
        extra_tables: vec![
            (b"fpgm", vec![0xB0, 0x00]),
            (b"prep", vec![0xB0, 0x00]),
            (b"cvt ", vec![0, 10]),
        ],
    });
    let out = subset(&font, &[0x41], SubsetFlags::SUBSET_FLAGS_NO_HINTING);

    assert!(table(&out, font_types::Tag::new(b"fpgm")).is_none());
    assert!(table(&out, font_types::Tag::new(b"prep")).is_none());
    assert!(table(&out, font_types::Tag::new(b"cvt ")).is_none());

    let loca = table(&out, snida::LOCA).unwrap();
    let glyf = table(&out, snida::GLYF).unwrap();
    let start = read_u16(loca, 2) as usize * 2;
    let glyph = &glyf[start..];
    // instructionLength follows the single contour-end index
    assert_eq!(read_u16(glyph, 12), 0);
}

#[test]
fn retain_gids_leaves_holes() {
    let font = build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: triangle_glyph(&[]),
                advance: 600,
                lsb: 10,
            },
            GlyphSpec {
                bytes: triangle_glyph(&[]),
                advance: 700,
                lsb: 10,
            },
        ],
        mappings: vec![(0x41, 1), (0x42, 2)],
        extra_tables: vec![],
    });
    let out = subset(&font, &[0x42], SubsetFlags::SUBSET_FLAGS_RETAIN_GIDS);

    let maxp = table(&out, snida::MAXP).unwrap();
    assert_eq!(read_u16(maxp, 4), 3, "numGlyphs is max retained gid + 1");

    let loca = table(&out, snida::LOCA).unwrap();
    // gid 1 was dropped: a zero-length range
    assert_eq!(read_u16(loca, 2), read_u16(loca, 4));
    // gid 2 survives
    assert!(read_u16(loca, 6) > read_u16(loca, 4));
}

#[test]
fn cmap_maps_retained_codepoints() {
    let font = two_glyph_font();
    let out = subset(&font, &[0x41], SubsetFlags::default());
    let cmap = table(&out, snida::CMAP).unwrap();
    let num_records = read_u16(cmap, 2);
    assert!(num_records >= 1);

    // find a format 4 subtable and look up 'A'
    let mut gid = None;
    for i in 0..num_records as usize {
        let offset = u32::from_be_bytes(cmap[4 + i * 8 + 4..4 + i * 8 + 8].try_into().unwrap());
        let sub = &cmap[offset as usize..];
        if read_u16(sub, 0) != 4 {
            continue;
        }
        let seg_count = read_u16(sub, 6) / 2;
        for seg in 0..seg_count as usize {
            let end = read_u16(sub, 14 + seg * 2);
            let start = read_u16(sub, 14 + seg_count as usize * 2 + 2 + seg * 2);
            if start <= 0x41 && 0x41 <= end {
                let delta = read_u16(sub, 14 + seg_count as usize * 4 + 2 + seg * 2);
                gid = Some(0x41u16.wrapping_add(delta));
            }
        }
    }
    assert_eq!(gid, Some(1));
}

#[test]
fn checksum_adjustment_property() {
    let font = two_glyph_font();
    let out = subset(&font, &[0x41], SubsetFlags::default());

    // sum of all 32-bit words of the file plus nothing equals the magic,
    // once checkSumAdjustment is zeroed
    let face = Face::new(&out).unwrap();
    let head_record = face
        .table_records()
        .iter()
        .find(|r| r.tag == snida::HEAD)
        .unwrap();
    let adjustment_pos = head_record.offset as usize + 8;
    let adjustment =
        u32::from_be_bytes(out[adjustment_pos..adjustment_pos + 4].try_into().unwrap());

    let mut zeroed = out.clone();
    zeroed[adjustment_pos..adjustment_pos + 4].fill(0);
    let mut sum = 0u32;
    for chunk in zeroed.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(u32::from_be_bytes(word));
    }
    assert_eq!(sum.wrapping_add(adjustment), 0xB1B0_AFBA);
}

#[test]
fn subsetting_is_idempotent() {
    let font = two_glyph_font();
    let once = subset(&font, &[0x41], SubsetFlags::default());
    let twice = subset(&once, &[0x41], SubsetFlags::default());
    assert_eq!(once, twice);
}

#[test]
fn repeat_flag_streams_decode() {
    // four identical points encoded with a repeat run
    let mut glyph = Vec::new();
    glyph.extend_from_slice(&1i16.to_be_bytes());
    glyph.extend_from_slice(&0i16.to_be_bytes());
    glyph.extend_from_slice(&0i16.to_be_bytes());
    glyph.extend_from_slice(&40i16.to_be_bytes());
    glyph.extend_from_slice(&0i16.to_be_bytes());
    glyph.extend_from_slice(&3u16.to_be_bytes());
    glyph.extend_from_slice(&0u16.to_be_bytes());
    glyph.push(ON_CURVE | X_SHORT | X_SAME_OR_POS | Y_SAME_OR_POS | REPEAT);
    glyph.push(3);
    glyph.extend_from_slice(&[10, 10, 10, 10]);

    let font = build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: glyph,
                advance: 600,
                lsb: 0,
            },
        ],
        mappings: vec![(0x41, 1)],
        extra_tables: vec![],
    });
    let out = subset(&font, &[0x41], SubsetFlags::default());
    let loca = table(&out, snida::LOCA).unwrap();
    assert!(read_u16(loca, 4) > read_u16(loca, 2));
}

mod instancing {
    use super::*;

    fn fvar_one_axis() -> Vec<u8> {
        let mut fvar = Vec::new();
        fvar.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        fvar.extend_from_slice(&16u16.to_be_bytes()); // axesArrayOffset
        fvar.extend_from_slice(&2u16.to_be_bytes()); // reserved
        fvar.extend_from_slice(&1u16.to_be_bytes()); // axisCount
        fvar.extend_from_slice(&20u16.to_be_bytes()); // axisSize
        fvar.extend_from_slice(&0u16.to_be_bytes()); // instanceCount
        fvar.extend_from_slice(&4u16.to_be_bytes()); // instanceSize
        fvar.extend_from_slice(b"wght");
        fvar.extend_from_slice(&(400i32 << 16).to_be_bytes()); // min
        fvar.extend_from_slice(&(400i32 << 16).to_be_bytes()); // default
        fvar.extend_from_slice(&(700i32 << 16).to_be_bytes()); // max
        fvar.extend_from_slice(&0u16.to_be_bytes()); // flags
        fvar.extend_from_slice(&256u16.to_be_bytes()); // nameID
        fvar
    }

    /// One tuple at peak 1.0, +10 x delta on the three contour points.
    fn gvar_one_tuple() -> Vec<u8> {
        let mut glyph_var = Vec::new();
        glyph_var.extend_from_slice(&1u16.to_be_bytes()); // tupleVariationCount
        glyph_var.extend_from_slice(&10u16.to_be_bytes()); // dataOffset
        glyph_var.extend_from_slice(&10u16.to_be_bytes()); // variationDataSize
        // embedded peak | private points
        glyph_var.extend_from_slice(&(0x8000u16 | 0x2000).to_be_bytes());
        glyph_var.extend_from_slice(&0x4000u16.to_be_bytes()); // peak 1.0
        // serialized: points 0,1,2 then x deltas then y deltas
        glyph_var.push(3); // point count
        glyph_var.push(0x02); // run of 3 byte points
        glyph_var.extend_from_slice(&[0, 1, 1]);
        glyph_var.push(0x02); // 3 byte x deltas
        glyph_var.extend_from_slice(&[10, 10, 10]);
        glyph_var.push(0x82); // 3 zero y deltas

        let mut gvar = Vec::new();
        gvar.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        gvar.extend_from_slice(&1u16.to_be_bytes()); // axisCount
        gvar.extend_from_slice(&0u16.to_be_bytes()); // sharedTupleCount
        gvar.extend_from_slice(&0u32.to_be_bytes()); // sharedTuplesOffset
        gvar.extend_from_slice(&2u16.to_be_bytes()); // glyphCount
        gvar.extend_from_slice(&0u16.to_be_bytes()); // flags: short offsets
        gvar.extend_from_slice(&26u32.to_be_bytes()); // arrayOffset
        // offsets (halved): notdef empty, glyph 1 has the data
        gvar.extend_from_slice(&0u16.to_be_bytes());
        gvar.extend_from_slice(&0u16.to_be_bytes());
        gvar.extend_from_slice(&((glyph_var.len() / 2) as u16).to_be_bytes());
        assert_eq!(glyph_var.len() % 2, 0);
        gvar.extend_from_slice(&glyph_var);
        gvar
    }

    #[test]
    fn pinned_axes_apply_deltas_and_drop_variations() {
        let font = build_font(&FontSpec {
            glyphs: vec![
                GlyphSpec {
                    bytes: Vec::new(),
                    advance: 500,
                    lsb: 0,
                },
                GlyphSpec {
                    bytes: triangle_glyph(&[]),
                    advance: 600,
                    lsb: 10,
                },
            ],
            mappings: vec![(0x41, 1)],
            extra_tables: vec![(b"fvar", fvar_one_axis()), (b"gvar", gvar_one_tuple())],
        });

        let face = Face::new(&font).unwrap();
        let unicodes: BTreeSet<u32> = [0x41u32].into_iter().collect();
        let plan = Plan::new(
            &BTreeSet::new(),
            &unicodes,
            &face,
            SubsetFlags::default(),
            &snida::DEFAULT_DROP_TABLES.iter().copied().collect(),
            None,
            None,
            None,
            None,
            &[(font_types::Tag::new(b"wght"), 700.0)],
        );
        let out = subset_font(&face, &plan).unwrap();

        assert!(table(&out, snida::GVAR).is_none());
        assert!(table(&out, snida::FVAR).is_none());

        // the contour moved +10 in x while the phantoms stayed put
        let loca = table(&out, snida::LOCA).unwrap();
        let glyf = table(&out, snida::GLYF).unwrap();
        let start = read_u16(loca, 2) as usize * 2;
        let glyph = &glyf[start..];
        let x_min = read_u16(glyph, 2) as i16;
        assert_eq!(x_min, 20);

        let hmtx = table(&out, snida::HMTX).unwrap();
        assert_eq!(read_u16(hmtx, 4), 600); // advance unchanged
        assert_eq!(read_u16(hmtx, 6) as i16, 20); // lsb follows the outline
    }
}

#[test]
fn unknown_tables_pass_through() {
    let font = build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: triangle_glyph(&[]),
                advance: 600,
                lsb: 10,
            },
        ],
        mappings: vec![(0x41, 1)],
        extra_tables: vec![(b"Zapf", vec![1, 2, 3, 4])],
    });
    let out = subset(&font, &[0x41], SubsetFlags::default());
    assert_eq!(
        table(&out, font_types::Tag::new(b"Zapf")),
        Some(&[1u8, 2, 3, 4][..])
    );
}

#[test]
fn default_drop_set_applies() {
    let font = build_font(&FontSpec {
        glyphs: vec![
            GlyphSpec {
                bytes: Vec::new(),
                advance: 500,
                lsb: 0,
            },
            GlyphSpec {
                bytes: triangle_glyph(&[]),
                advance: 600,
                lsb: 10,
            },
        ],
        mappings: vec![(0x41, 1)],
        extra_tables: vec![(b"kern", vec![0u8; 8]), (b"DSIG", vec![0u8; 8])],
    });
    let out = subset(&font, &[0x41], SubsetFlags::default());
    assert!(table(&out, font_types::Tag::new(b"kern")).is_none());
    assert!(table(&out, font_types::Tag::new(b"DSIG")).is_none());
}
