//! Output encodings for grouping results.
//!
//! `Nested` is one `Vec<f32>` per kernel label. `LegacyFlat` is the single
//! buffer some older consumers expect: a header with the length of every
//! flattened record, followed by the records back to back:
//!
//! ```text
//! [len_0, len_1, ..., len_{n-1}, record_0 ..., record_1 ..., ..., record_{n-1} ...]
//! ```

use crate::core_modules::error::GroupingError;
use crate::core_modules::instance::{GroupingResult, InstanceRecord, as_count};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputEncoding {
    #[default]
    Nested,
    LegacyFlat,
}

impl OutputEncoding {
    pub fn from_legacy_flag(legacy_flatten: bool) -> Self {
        if legacy_flatten {
            OutputEncoding::LegacyFlat
        } else {
            OutputEncoding::Nested
        }
    }

    pub fn encode(self, result: &GroupingResult) -> EncodedOutput {
        match self {
            OutputEncoding::Nested => EncodedOutput::Nested(result.to_nested()),
            OutputEncoding::LegacyFlat => EncodedOutput::LegacyFlat(encode_legacy(&result.records)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodedOutput {
    Nested(Vec<Vec<f32>>),
    LegacyFlat(Vec<f32>),
}

impl EncodedOutput {
    /// Converts either encoding into the nested form. A legacy buffer needs the
    /// record count to know where its header ends.
    pub fn into_nested(self, kernel_region_num: usize) -> Result<Vec<Vec<f32>>, GroupingError> {
        match self {
            EncodedOutput::Nested(records) => Ok(records),
            EncodedOutput::LegacyFlat(flat) => decode_legacy(&flat, kernel_region_num),
        }
    }

    pub fn encoding(&self) -> OutputEncoding {
        match self {
            EncodedOutput::Nested(_) => OutputEncoding::Nested,
            EncodedOutput::LegacyFlat(_) => OutputEncoding::LegacyFlat,
        }
    }
}

pub fn encode_legacy(records: &[InstanceRecord]) -> Vec<f32> {
    let flattened: Vec<Vec<f32>> = records.iter().map(InstanceRecord::to_flat).collect();
    let body: usize = flattened.iter().map(Vec::len).sum();

    let mut flat = Vec::with_capacity(flattened.len() + body);
    flat.extend(flattened.iter().map(|record| record.len() as f32));
    for record in flattened {
        flat.extend(record);
    }
    flat
}

pub fn decode_legacy(flat: &[f32], kernel_region_num: usize) -> Result<Vec<Vec<f32>>, GroupingError> {
    if flat.len() < kernel_region_num {
        return Err(GroupingError::MalformedEncoding(format!(
            "header needs {} entries, buffer has {}",
            kernel_region_num,
            flat.len()
        )));
    }
    let (header, body) = flat.split_at(kernel_region_num);

    let mut records = Vec::with_capacity(kernel_region_num);
    let mut offset: usize = 0;
    for (label, &len) in header.iter().enumerate() {
        let len = as_count(len).ok_or_else(|| {
            GroupingError::MalformedEncoding(format!("record {} has invalid length {}", label, len))
        })?;
        let record = offset
            .checked_add(len)
            .and_then(|end| body.get(offset..end))
            .ok_or_else(|| {
                GroupingError::MalformedEncoding(format!(
                    "record {} runs past the end of the buffer ({} + {} > {})",
                    label,
                    offset,
                    len,
                    body.len()
                ))
            })?;
        // Validates the count/pair invariant of every record on the way through.
        InstanceRecord::from_flat(label, record)?;
        records.push(record.to_vec());
        offset += len;
    }

    if offset != body.len() {
        return Err(GroupingError::MalformedEncoding(format!(
            "{} trailing values after the last record",
            body.len() - offset
        )));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::grid::Point;

    fn sample() -> GroupingResult {
        GroupingResult {
            records: vec![
                InstanceRecord::empty(0),
                InstanceRecord {
                    label: 1,
                    score_sum: 1.5,
                    pixels: vec![Point::new(0, 0), Point::new(1, 0)],
                },
                InstanceRecord::empty(2),
            ],
        }
    }

    #[test]
    fn legacy_layout_has_header_then_records() {
        let flat = encode_legacy(&sample().records);
        assert_eq!(
            flat,
            vec![2.0, 6.0, 2.0, 0.0, 0.0, 0.75, 2.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn legacy_decodes_to_nested() {
        let result = sample();
        let decoded = decode_legacy(&encode_legacy(&result.records), 3).unwrap();
        assert_eq!(decoded, result.to_nested());
    }

    #[test]
    fn encoding_follows_flag() {
        let result = sample();
        let nested = OutputEncoding::from_legacy_flag(false).encode(&result);
        let legacy = OutputEncoding::from_legacy_flag(true).encode(&result);
        assert_eq!(nested.encoding(), OutputEncoding::Nested);
        assert_eq!(legacy.encoding(), OutputEncoding::LegacyFlat);
        assert_eq!(legacy.into_nested(3).unwrap(), nested.into_nested(3).unwrap());
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let mut flat = encode_legacy(&sample().records);
        flat.pop();
        assert!(matches!(decode_legacy(&flat, 3), Err(GroupingError::MalformedEncoding(_))));
        assert!(matches!(decode_legacy(&[2.0], 3), Err(GroupingError::MalformedEncoding(_))));
    }

    #[test]
    fn huge_length_in_header_is_rejected() {
        let err = decode_legacy(&[2.0, 1e30, 0.0, 0.0], 2).unwrap_err();
        assert!(matches!(err, GroupingError::MalformedEncoding(_)));
    }

    #[test]
    fn trailing_values_are_rejected() {
        let mut flat = encode_legacy(&sample().records);
        flat.push(0.0);
        assert!(matches!(decode_legacy(&flat, 3), Err(GroupingError::MalformedEncoding(_))));
    }
}
