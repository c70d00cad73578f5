use serde::{Deserialize, Serialize};

/// Binary/delimited frame layout bound to a data source for auto-parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSchema {
    pub name: String,
    pub version: u32,
    pub frame_type: FrameType,
    /// Required for `Fixed` frames; ignored for `Variable`/`Delimited`.
    pub total_length: Option<usize>,
    /// Delimiter byte for `Delimited` frames.
    pub delimiter: Option<u8>,
    pub fields: Vec<FieldSpec>,
    pub checksum: Option<ChecksumSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Fixed,
    Variable,
    Delimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    pub data_type: DataType,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Multiplier applied to numeric fields: `value = raw * scale + offset_value`.
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset_value: f64,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    Bytes,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumSpec {
    #[serde(rename = "type")]
    pub checksum_type: ChecksumType,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecksumType {
    None,
    Crc16,
    Crc32,
    Md5,
    Sha256,
    SimpleSum,
}

impl FrameSchema {
    /// Validate the invariants from the data model: field extents fall
    /// inside the frame, fields don't overlap, and (for fixed frames) the
    /// sum of extents doesn't exceed `total_length`.
    pub fn validate(&self) -> Result<(), String> {
        let mut extents: Vec<(usize, usize)> = self.fields.iter().map(|f| (f.offset, f.offset + f.length)).collect();

        if let Some(total) = self.total_length {
            for (name, end) in self.fields.iter().map(|f| (&f.name, f.offset + f.length)) {
                if end > total {
                    return Err(format!("field '{name}' extends to {end}, beyond total_length {total}"));
                }
            }
        }

        extents.sort_by_key(|(start, _)| *start);
        for pair in extents.windows(2) {
            let (_, prev_end) = pair[0];
            let (next_start, _) = pair[1];
            if next_start < prev_end {
                return Err(format!("overlapping fields: extent ending at {prev_end} overlaps extent starting at {next_start}"));
            }
        }

        if self.frame_type == FrameType::Fixed && self.total_length.is_none() {
            return Err("fixed frame requires total_length".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, offset: usize, length: usize) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            offset,
            length,
            data_type: DataType::Uint8,
            byte_order: ByteOrder::Big,
            scale: 1.0,
            offset_value: 0.0,
        }
    }

    #[test]
    fn rejects_overlapping_fields() {
        let schema = FrameSchema {
            name: "s".into(),
            version: 1,
            frame_type: FrameType::Fixed,
            total_length: Some(4),
            delimiter: None,
            fields: vec![field("a", 0, 3), field("b", 2, 2)],
            checksum: None,
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn rejects_extent_beyond_total_length() {
        let schema = FrameSchema {
            name: "s".into(),
            version: 1,
            frame_type: FrameType::Fixed,
            total_length: Some(4),
            delimiter: None,
            fields: vec![field("a", 2, 4)],
            checksum: None,
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_schema() {
        let schema = FrameSchema {
            name: "s".into(),
            version: 1,
            frame_type: FrameType::Fixed,
            total_length: Some(8),
            delimiter: None,
            fields: vec![field("a", 0, 2), field("b", 2, 2), field("c", 4, 4)],
            checksum: None,
        };
        assert!(schema.validate().is_ok());
    }
}
