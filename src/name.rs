//! impl subset() for name

use crate::face::{Face, FontBuilder};
use crate::{
    Plan,
    SubsetError::{self, SubsetTableError},
    SubsetFlags, NAME,
};

// version + count + storageOffset
const HEADER_SIZE: usize = 6;
const NAME_RECORD_SIZE: usize = 12;

#[derive(Clone, Copy)]
struct NameRecord {
    platform_id: u16,
    encoding_id: u16,
    language_id: u16,
    name_id: u16,
    length: u16,
    string_offset: u16,
}

impl NameRecord {
    fn is_unicode(&self) -> bool {
        self.platform_id == 0
            || (self.platform_id == 3
                && (self.encoding_id == 0 || self.encoding_id == 1 || self.encoding_id == 10))
    }
}

// reference: subset() for name in harfbuzz
// https://github.com/harfbuzz/harfbuzz/blob/a070f9ebbe88dc71b248af9731dd49ec93f4e6e6/src/OT/name/name.hh#L387
pub(crate) fn subset_name(
    face: &Face,
    plan: &Plan,
    builder: &mut FontBuilder,
) -> Result<(), SubsetError> {
    let name = face.table_data(NAME).ok_or(SubsetTableError(NAME))?;
    let count: u16 = name.read_at(2).map_err(|_| SubsetTableError(NAME))?;
    let storage_start: u16 = name.read_at(4).map_err(|_| SubsetTableError(NAME))?;

    let mut records = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let start = HEADER_SIZE + i * NAME_RECORD_SIZE;
        let record = NameRecord {
            platform_id: name.read_at(start).map_err(|_| SubsetTableError(NAME))?,
            encoding_id: name
                .read_at(start + 2)
                .map_err(|_| SubsetTableError(NAME))?,
            language_id: name
                .read_at(start + 4)
                .map_err(|_| SubsetTableError(NAME))?,
            name_id: name
                .read_at(start + 6)
                .map_err(|_| SubsetTableError(NAME))?,
            length: name
                .read_at(start + 8)
                .map_err(|_| SubsetTableError(NAME))?,
            string_offset: name
                .read_at(start + 10)
                .map_err(|_| SubsetTableError(NAME))?,
        };
        records.push(record);
    }

    let legacy = plan
        .subset_flags
        .contains(SubsetFlags::SUBSET_FLAGS_NAME_LEGACY);
    let mut retained: Vec<&NameRecord> = records
        .iter()
        .filter(|record| {
            plan.keep_name_id(record.name_id)
                && (legacy || record.is_unicode())
                && plan.keep_name_language(record.language_id)
        })
        .collect();

    retained.sort_by_key(|record| {
        (
            record.platform_id,
            record.encoding_id,
            record.language_id,
            record.name_id,
            record.length,
        )
    });

    let mut out = Vec::with_capacity(name.len());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(retained.len() as u16).to_be_bytes());
    let storage_offset = HEADER_SIZE + retained.len() * NAME_RECORD_SIZE;
    out.extend_from_slice(&(storage_offset as u16).to_be_bytes());

    // string pool rebuilt with recomputed offsets; identical strings shared
    let mut pool: Vec<u8> = Vec::new();
    for record in retained {
        let str_start = storage_start as usize + record.string_offset as usize;
        let string = name
            .slice(str_start..str_start + record.length as usize)
            .ok_or(SubsetTableError(NAME))?;
        let string = string.as_bytes();
        let offset = match pool
            .windows(string.len().max(1))
            .position(|w| w == string)
        {
            Some(pos) if !string.is_empty() => pos,
            _ => {
                let pos = pool.len();
                pool.extend_from_slice(string);
                pos
            }
        };

        out.extend_from_slice(&record.platform_id.to_be_bytes());
        out.extend_from_slice(&record.encoding_id.to_be_bytes());
        out.extend_from_slice(&record.language_id.to_be_bytes());
        out.extend_from_slice(&record.name_id.to_be_bytes());
        out.extend_from_slice(&record.length.to_be_bytes());
        out.extend_from_slice(&(offset as u16).to_be_bytes());
    }
    out.extend_from_slice(&pool);

    builder.add_raw(NAME, out);
    Ok(())
}
