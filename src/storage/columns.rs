use std::io::{Read, Write};

use super::parse;

/// Columns whose body is larger than this may be deflated.
pub(crate) const DEFLATE_THRESHOLD: usize = 256;

/// The eight column encodings. The low three bits of a column spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ColumnType {
    GroupCard,
    ActorIdx,
    DeltaInt,
    Boolean,
    StringRle,
    ValueMeta,
    ValueRaw,
    IntRle,
}

impl From<u32> for ColumnType {
    fn from(raw: u32) -> Self {
        match raw & 0x07 {
            0 => Self::GroupCard,
            1 => Self::ActorIdx,
            2 => Self::DeltaInt,
            3 => Self::Boolean,
            4 => Self::StringRle,
            5 => Self::ValueMeta,
            6 => Self::ValueRaw,
            _ => Self::IntRle,
        }
    }
}

impl From<ColumnType> for u32 {
    fn from(t: ColumnType) -> Self {
        match t {
            ColumnType::GroupCard => 0,
            ColumnType::ActorIdx => 1,
            ColumnType::DeltaInt => 2,
            ColumnType::Boolean => 3,
            ColumnType::StringRle => 4,
            ColumnType::ValueMeta => 5,
            ColumnType::ValueRaw => 6,
            ColumnType::IntRle => 7,
        }
    }
}

/// A column label: `(id << 4) | (deflate << 3) | type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ColumnSpec {
    pub id: u32,
    pub col_type: ColumnType,
    pub deflate: bool,
}

impl ColumnSpec {
    pub(crate) const fn new(id: u32, col_type: ColumnType) -> Self {
        Self {
            id,
            col_type,
            deflate: false,
        }
    }

    /// The spec with the deflate bit cleared; the layout ordering of
    /// columns is defined over normalized specs so that compressing a
    /// column does not reorder the table.
    pub(crate) fn normalize(&self) -> u32 {
        ColumnSpec {
            deflate: false,
            ..*self
        }
        .into()
    }
}

impl From<ColumnSpec> for u32 {
    fn from(spec: ColumnSpec) -> Self {
        (spec.id << 4) | ((spec.deflate as u32) << 3) | u32::from(spec.col_type)
    }
}

impl From<u32> for ColumnSpec {
    fn from(raw: u32) -> Self {
        ColumnSpec {
            id: raw >> 4,
            col_type: ColumnType::from(raw),
            deflate: (raw & 0x08) != 0,
        }
    }
}

/// One column: its spec and its body bytes.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RawColumn {
    pub spec: ColumnSpec,
    pub data: Vec<u8>,
}

/// An ordered collection of columns, written as a header table (column
/// count, then `(spec, byte_length)` pairs in ascending spec order)
/// followed by the bodies in the same order.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct RawColumns(pub Vec<RawColumn>);

impl RawColumns {
    /// Append a column unless its body is empty. Empty columns are
    /// omitted from the table entirely.
    pub(crate) fn push(&mut self, spec: ColumnSpec, data: Vec<u8>) {
        if !data.is_empty() {
            self.0.push(RawColumn { spec, data });
        }
    }

    pub(crate) fn get(&self, spec: ColumnSpec) -> &[u8] {
        self.0
            .iter()
            .find(|c| c.spec.id == spec.id && c.spec.col_type == spec.col_type)
            .map(|c| c.data.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        leb128::write::unsigned(out, self.0.len() as u64).unwrap();
        for col in &self.0 {
            leb128::write::unsigned(out, u64::from(u32::from(col.spec))).unwrap();
            leb128::write::unsigned(out, col.data.len() as u64).unwrap();
        }
        for col in &self.0 {
            out.extend(&col.data);
        }
    }

    pub(crate) fn parse(input: &[u8]) -> parse::ParseResult<'_, RawColumns> {
        let (mut i, count) = parse::leb128_u64(input)?;
        let mut headers = Vec::with_capacity(count as usize);
        let mut prev_spec: Option<u32> = None;
        for _ in 0..count {
            let (next, raw_spec) = parse::leb128_u32(i)?;
            let (next, len) = parse::leb128_u64(next)?;
            let spec = ColumnSpec::from(raw_spec);
            // specs must be strictly ascending (over the normalized value)
            if let Some(prev) = prev_spec {
                if spec.normalize() <= prev {
                    return Err(parse::ParseError::Error(
                        parse::ErrorKind::InvalidColumnLayout,
                    ));
                }
            }
            prev_spec = Some(spec.normalize());
            headers.push((spec, len as usize));
            i = next;
        }
        let mut columns = Vec::with_capacity(headers.len());
        for (spec, len) in headers {
            let (next, data) = parse::take_n(len, i)?;
            columns.push(RawColumn {
                spec,
                data: data.to_vec(),
            });
            i = next;
        }
        Ok((i, RawColumns(columns)))
    }

    /// Deflate every column body larger than `threshold`, when the
    /// compressed form is actually smaller. The body becomes the ULEB
    /// uncompressed length followed by the raw-deflate payload.
    pub(crate) fn compress(&mut self, threshold: usize) {
        for col in &mut self.0 {
            if col.spec.deflate || col.data.len() <= threshold {
                continue;
            }
            let compressed = deflate(&col.data);
            let mut body = Vec::with_capacity(compressed.len() + 8);
            leb128::write::unsigned(&mut body, col.data.len() as u64).unwrap();
            body.extend(compressed);
            if body.len() < col.data.len() {
                col.data = body;
                col.spec.deflate = true;
            }
        }
    }

    /// Inflate every deflated column body back to its raw form.
    pub(crate) fn decompress(&mut self) -> Result<(), parse::ParseError<parse::ErrorKind>> {
        for col in &mut self.0 {
            if !col.spec.deflate {
                continue;
            }
            let (compressed, uncompressed_len) =
                parse::leb128_u64(&col.data).map(|(rest, len)| (rest, len as usize))?;
            let mut decoder = flate2::bufread::DeflateDecoder::new(compressed);
            let mut out = Vec::with_capacity(uncompressed_len);
            decoder
                .read_to_end(&mut out)
                .map_err(|_| parse::ParseError::Error(parse::ErrorKind::Deflate))?;
            if out.len() != uncompressed_len {
                return Err(parse::ParseError::Error(parse::ErrorKind::Deflate));
            }
            col.data = out;
            col.spec.deflate = false;
        }
        Ok(())
    }
}

pub(crate) fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: u32, t: ColumnType) -> ColumnSpec {
        ColumnSpec::new(id, t)
    }

    #[test]
    fn spec_bitfield_round_trip() {
        let s = ColumnSpec {
            id: 7,
            col_type: ColumnType::DeltaInt,
            deflate: true,
        };
        assert_eq!(u32::from(s), (7 << 4) | (1 << 3) | 2);
        assert_eq!(ColumnSpec::from(u32::from(s)), s);
    }

    #[test]
    fn header_table_round_trip() {
        let mut cols = RawColumns::default();
        cols.push(spec(0, ColumnType::ActorIdx), vec![1, 2, 3]);
        cols.push(spec(1, ColumnType::StringRle), vec![4]);
        cols.push(spec(4, ColumnType::IntRle), vec![5, 6]);
        cols.push(spec(5, ColumnType::ValueMeta), vec![]);
        let mut out = Vec::new();
        cols.write(&mut out);
        let (rest, parsed) = RawColumns::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cols);
        // the empty column was dropped
        assert_eq!(parsed.0.len(), 3);
    }

    #[test]
    fn non_ascending_specs_are_rejected() {
        let mut out = Vec::new();
        leb128::write::unsigned(&mut out, 2).unwrap();
        // spec 17 then spec 2: out of order
        leb128::write::unsigned(&mut out, 17).unwrap();
        leb128::write::unsigned(&mut out, 0).unwrap();
        leb128::write::unsigned(&mut out, 2).unwrap();
        leb128::write::unsigned(&mut out, 0).unwrap();
        assert!(matches!(
            RawColumns::parse(&out),
            Err(parse::ParseError::Error(
                parse::ErrorKind::InvalidColumnLayout
            ))
        ));
    }

    #[test]
    fn oversized_columns_deflate_and_inflate() {
        let mut cols = RawColumns::default();
        cols.push(spec(0, ColumnType::ActorIdx), vec![7; 4096]);
        let original = cols.clone();
        cols.compress(DEFLATE_THRESHOLD);
        assert!(cols.0[0].spec.deflate);
        assert!(cols.0[0].data.len() < 4096);
        cols.decompress().unwrap();
        assert_eq!(cols, original);
    }

    #[test]
    fn small_columns_stay_raw() {
        let mut cols = RawColumns::default();
        cols.push(spec(0, ColumnType::ActorIdx), vec![7; 16]);
        cols.compress(DEFLATE_THRESHOLD);
        assert!(!cols.0[0].spec.deflate);
    }
}
