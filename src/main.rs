//! binary subset tool
//!
//! Takes a font file and a description of the desired subset, and writes a
//! new font file containing only the data specified in the input.

use std::collections::BTreeSet;

use clap::Parser;
use snida::parsing_util::{
    parse_axis_positions, parse_name_ids, parse_name_languages, parse_tag_list, parse_text,
    parse_unicodes, populate_gids,
};
use snida::{subset_font, Face, Plan, SubsetFlags, DEFAULT_DROP_TABLES, DEFAULT_LAYOUT_FEATURES};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The input font file.
    #[arg(short, long)]
    path: std::path::PathBuf,

    /// The output font file.
    #[arg(short, long)]
    output_file: std::path::PathBuf,

    /// The face index to load from a font collection.
    #[arg(long, default_value_t = 0)]
    face_index: u32,

    /// List of glyph ids or ranges, e.g. 0,4,10-20
    #[arg(short, long)]
    gids: Option<String>,

    /// List of unicode codepoints or ranges as hex, e.g. U+0041-005A
    #[arg(short, long)]
    unicodes: Option<String>,

    /// Literal text whose characters are added to the unicode set.
    #[arg(short, long)]
    text: Option<String>,

    /// Comma separated list of tables to drop, added to the default set.
    #[arg(long)]
    drop_tables: Option<String>,

    /// Comma separated list of layout script tags to keep, or '*'.
    #[arg(long)]
    layout_scripts: Option<String>,

    /// Comma separated list of layout feature tags to keep, or '*'.
    #[arg(long)]
    layout_features: Option<String>,

    /// Comma separated list of name IDs to keep, or '*'.
    #[arg(long)]
    name_ids: Option<String>,

    /// Comma separated list of name languages to keep, or '*'.
    #[arg(long)]
    name_languages: Option<String>,

    /// Pin variation axes, e.g. wght=700,wdth=80.
    #[arg(long)]
    variations: Option<String>,

    /// Strip hinting instructions.
    #[arg(long, default_value_t = false)]
    no_hinting: bool,

    /// Keep glyph indices; dropped glyphs become empty.
    #[arg(long, default_value_t = false)]
    retain_gids: bool,

    /// Remove CFF charstring subroutines.
    #[arg(long, default_value_t = false)]
    desubroutinize: bool,

    /// Keep non-unicode name records.
    #[arg(long, default_value_t = false)]
    name_legacy: bool,

    /// Set the overlaps flag on each retained glyph.
    #[arg(long, default_value_t = false)]
    set_overlaps_flag: bool,

    /// Pass unrecognized tables through untouched.
    #[arg(long, default_value_t = false)]
    passthrough_tables: bool,

    /// Keep the notdef glyph outline.
    #[arg(long, default_value_t = false)]
    notdef_outline: bool,

    /// Keep PostScript glyph names.
    #[arg(long, default_value_t = false)]
    glyph_names: bool,

    /// Do not recalculate the OS/2 unicode ranges.
    #[arg(long, default_value_t = false)]
    no_prune_unicode_ranges: bool,

    /// Keep every layout feature rather than the default list.
    #[arg(long, default_value_t = false)]
    retain_all_features: bool,

    /// Skip glyph closure over layout substitution rules.
    #[arg(long, default_value_t = false)]
    no_layout_closure: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let gids = args
        .gids
        .as_deref()
        .map(populate_gids)
        .transpose()
        .unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        })
        .unwrap_or_default();

    let mut unicodes = args
        .unicodes
        .as_deref()
        .map(parse_unicodes)
        .transpose()
        .unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        })
        .unwrap_or_default();
    if let Some(text) = &args.text {
        unicodes.extend(parse_text(text));
    }

    let mut drop_tables: BTreeSet<_> = DEFAULT_DROP_TABLES.iter().copied().collect();
    if let Some(extra) = &args.drop_tables {
        match parse_tag_list(extra) {
            Ok(Some(tags)) => drop_tables.extend(tags),
            Ok(None) => {}
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }

    let layout_scripts = parse_optional(&args.layout_scripts, parse_tag_list, None);
    let layout_features = parse_optional(
        &args.layout_features,
        parse_tag_list,
        Some(DEFAULT_LAYOUT_FEATURES.iter().copied().collect()),
    );
    let name_ids = parse_optional(
        &args.name_ids,
        parse_name_ids,
        Some((0..=6).collect()),
    );
    let name_languages = parse_optional(
        &args.name_languages,
        parse_name_languages,
        Some([0x409u16].into_iter().collect()),
    );

    let axis_coords = args
        .variations
        .as_deref()
        .map(parse_axis_positions)
        .transpose()
        .unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        })
        .unwrap_or_default();

    let mut flags = SubsetFlags::default();
    let flag_args = [
        (args.no_hinting, SubsetFlags::SUBSET_FLAGS_NO_HINTING),
        (args.retain_gids, SubsetFlags::SUBSET_FLAGS_RETAIN_GIDS),
        (args.desubroutinize, SubsetFlags::SUBSET_FLAGS_DESUBROUTINIZE),
        (args.name_legacy, SubsetFlags::SUBSET_FLAGS_NAME_LEGACY),
        (
            args.set_overlaps_flag,
            SubsetFlags::SUBSET_FLAGS_SET_OVERLAPS_FLAG,
        ),
        (
            args.passthrough_tables,
            SubsetFlags::SUBSET_FLAGS_PASSTHROUGH_UNRECOGNIZED,
        ),
        (args.notdef_outline, SubsetFlags::SUBSET_FLAGS_NOTDEF_OUTLINE),
        (args.glyph_names, SubsetFlags::SUBSET_FLAGS_GLYPH_NAMES),
        (
            args.no_prune_unicode_ranges,
            SubsetFlags::SUBSET_FLAGS_NO_PRUNE_UNICODE_RANGES,
        ),
        (
            args.retain_all_features,
            SubsetFlags::SUBSET_FLAGS_RETAIN_ALL_FEATURES,
        ),
        (
            args.no_layout_closure,
            SubsetFlags::SUBSET_FLAGS_NO_LAYOUT_CLOSURE,
        ),
    ];
    for (set, flag) in flag_args {
        if set {
            flags |= flag;
        }
    }

    let font_bytes = std::fs::read(&args.path).unwrap_or_else(|e| {
        eprintln!("cannot read {}: {e}", args.path.display());
        std::process::exit(1);
    });
    let face = Face::from_index(&font_bytes, args.face_index).unwrap_or_else(|e| {
        eprintln!("error reading font: {e}");
        std::process::exit(1);
    });

    let plan = Plan::new(
        &gids,
        &unicodes,
        &face,
        flags,
        &drop_tables,
        layout_scripts,
        layout_features,
        name_ids,
        name_languages,
        &axis_coords,
    );

    match subset_font(&face, &plan) {
        Ok(output) => {
            if let Err(e) = std::fs::write(&args.output_file, output) {
                eprintln!("cannot write {}: {e}", args.output_file.display());
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("subsetting failed: {e}");
            std::process::exit(1);
        }
    }
}

type ParseFn<T> = fn(&str) -> Result<Option<BTreeSet<T>>, snida::SubsetError>;

fn parse_optional<T: Ord>(
    arg: &Option<String>,
    parse: ParseFn<T>,
    default: Option<BTreeSet<T>>,
) -> Option<BTreeSet<T>> {
    match arg {
        Some(raw) => parse(raw).unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        }),
        None => default,
    }
}
