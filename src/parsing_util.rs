//! subsetter input parsing util functions

use std::collections::BTreeSet;

use font_types::{GlyphId, Tag};

use crate::SubsetError;

pub fn populate_gids(gid_str: &str) -> Result<BTreeSet<GlyphId>, SubsetError> {
    let mut result = BTreeSet::new();
    if gid_str.trim().is_empty() {
        return Ok(result);
    }
    for gid in gid_str.split(',').filter(|raw| !raw.is_empty()) {
        if let Some((start, end)) = gid.split_once('-') {
            let start: u32 = start
                .parse::<u32>()
                .map_err(|_| SubsetError::InvalidGid(start.to_owned()))?;
            let end: u32 = end
                .parse::<u32>()
                .map_err(|_| SubsetError::InvalidGid(end.to_owned()))?;
            if start > end {
                return Err(SubsetError::InvalidGidRange { start, end });
            }
            result.extend((start..=end).map(GlyphId::new));
        } else {
            let glyph_id: u32 = gid
                .parse::<u32>()
                .map_err(|_| SubsetError::InvalidGid(gid.to_owned()))?;
            result.insert(GlyphId::new(glyph_id));
        }
    }
    Ok(result)
}

/// Parse an input unicodes string: a comma/whitespace-separated list of
/// Unicode codepoints or ranges as hex numbers, optionally prefixed with
/// 'U+', 'u', etc. For example `--unicodes=41-5a,61-7a` adds ASCII letters,
/// so does the more verbose `--unicodes=U+0041-005A,U+0061-007A`.
pub fn parse_unicodes(unicode_str: &str) -> Result<BTreeSet<u32>, SubsetError> {
    let mut result = BTreeSet::new();
    if unicode_str.trim().is_empty() {
        return Ok(result);
    }
    let re = regex::Regex::new(r"[><\+,;&#}{\\xXuUnNiI\n\t\v\f\r]").unwrap();
    let s = re.replace_all(unicode_str, " ");
    for cp in s.split_whitespace() {
        if let Some((start, end)) = cp.split_once('-') {
            let start: u32 = u32::from_str_radix(start, 16)
                .map_err(|_| SubsetError::InvalidUnicode(start.to_owned()))?;
            let end: u32 = u32::from_str_radix(end, 16)
                .map_err(|_| SubsetError::InvalidUnicode(end.to_owned()))?;
            if start > end {
                return Err(SubsetError::InvalidUnicodeRange { start, end });
            }
            result.extend(start..=end);
        } else {
            let unicode: u32 = u32::from_str_radix(cp, 16)
                .map_err(|_| SubsetError::InvalidUnicode(cp.to_owned()))?;
            result.insert(unicode);
        }
    }
    Ok(result)
}

/// Add every scalar value of a literal text string.
pub fn parse_text(text: &str) -> BTreeSet<u32> {
    text.chars().map(|c| c as u32).collect()
}

/// Parse a comma or whitespace separated list; `*` means "everything".
fn parse_list<T: Ord>(
    input_str: &str,
    parse_one: fn(&str) -> Result<T, SubsetError>,
) -> Result<Option<BTreeSet<T>>, SubsetError> {
    if input_str.trim() == "*" {
        return Ok(None);
    }
    input_str
        .split([',', ' '])
        .filter(|raw| !raw.is_empty())
        .map(parse_one)
        .collect::<Result<BTreeSet<T>, SubsetError>>()
        .map(Some)
}

/// Parse a tag list (layout scripts or features, or table names).
pub fn parse_tag_list(input_str: &str) -> Result<Option<BTreeSet<Tag>>, SubsetError> {
    parse_list(input_str, parse_tag)
}

fn parse_tag(raw: &str) -> Result<Tag, SubsetError> {
    let bytes = raw.as_bytes();
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(SubsetError::InvalidTag(raw.to_owned()));
    }
    let mut padded = [b' '; 4];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(Tag::new(&padded))
}

/// Parse a name-ID list; each retained record's nameID must be listed.
pub fn parse_name_ids(input_str: &str) -> Result<Option<BTreeSet<u16>>, SubsetError> {
    parse_list(input_str, |raw| {
        raw.parse::<u16>()
            .map_err(|_| SubsetError::InvalidId(raw.to_owned()))
    })
}

/// Parse a name-table language-ID list.
pub fn parse_name_languages(input_str: &str) -> Result<Option<BTreeSet<u16>>, SubsetError> {
    parse_list(input_str, |raw| {
        raw.parse::<u16>()
            .map_err(|_| SubsetError::InvalidId(raw.to_owned()))
    })
}

/// Parse axis positions like `wght=700,wdth=80`.
pub fn parse_axis_positions(input_str: &str) -> Result<Vec<(Tag, f32)>, SubsetError> {
    let mut out = Vec::new();
    for part in input_str
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|raw| !raw.is_empty())
    {
        let (raw_axis, raw_value) = part
            .split_once('=')
            .ok_or_else(|| SubsetError::InvalidAxisPosition(part.to_owned()))?;
        let tag = parse_tag(raw_axis)?;
        let value = raw_value
            .parse::<f32>()
            .map_err(|_| SubsetError::InvalidAxisPosition(raw_value.to_owned()))?;
        out.push((tag, value));
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gids_and_ranges() {
        let output = populate_gids("1,5,7-9").unwrap();
        assert_eq!(output.len(), 5);
        assert!(output.contains(&GlyphId::new(1)));
        assert!(output.contains(&GlyphId::new(5)));
        assert!(output.contains(&GlyphId::new(7)));
        assert!(output.contains(&GlyphId::new(9)));
        assert!(populate_gids("9-7").is_err());
    }

    #[test]
    fn unicodes_accept_prefixes() {
        let output = parse_unicodes("61 62,63").unwrap();
        assert_eq!(output.len(), 3);
        assert!(output.contains(&0x61));

        let output = parse_unicodes("u+61,U+65-67").unwrap();
        assert_eq!(output.len(), 4);
        assert!(output.contains(&0x61));
        assert!(output.contains(&0x67));
    }

    #[test]
    fn tag_lists() {
        let output = parse_tag_list("cmap,GSUB OS/2 CFF").unwrap().unwrap();
        assert_eq!(output.len(), 4);
        assert!(output.contains(&Tag::new(b"cmap")));
        assert!(output.contains(&Tag::new(b"OS/2")));
        assert!(output.contains(&Tag::new(b"CFF ")));

        assert!(parse_tag_list("*").unwrap().is_none());
        assert!(parse_tag_list("").unwrap().unwrap().is_empty());
    }

    #[test]
    fn axis_positions() {
        let output = parse_axis_positions("wght=700, wdth=80").unwrap();
        assert_eq!(
            output,
            vec![(Tag::new(b"wght"), 700.0), (Tag::new(b"wdth"), 80.0)]
        );
        assert!(parse_axis_positions("wght").is_err());
    }

    #[test]
    fn text_to_codepoints() {
        let output = parse_text("Ab!");
        assert!(output.contains(&0x41));
        assert!(output.contains(&0x62));
        assert!(output.contains(&0x21));
    }
}
