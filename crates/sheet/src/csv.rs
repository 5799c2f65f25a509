use crate::cell::CellValue;
use crate::error::Result;
use crate::loader::Metadata;
use crate::sheet::Sheet;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false) // We handle headers ourselves
        .flexible(true)
        .from_reader(bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes))
}

/// Fields keep their source text so `007` stays searchable as written.
fn convert(field: &[u8]) -> CellValue {
    let text = String::from_utf8_lossy(field);
    if text.is_empty() {
        CellValue::Null
    } else {
        CellValue::String(text.into_owned())
    }
}

/// Load CSV bytes as a single sheet with the given name
pub(crate) fn read_sheet(bytes: &[u8], name: &str) -> Result<Sheet> {
    let mut reader = reader(bytes);
    let mut grid: Vec<Vec<CellValue>> = Vec::new();

    for record in reader.byte_records() {
        let record = record?;
        grid.push(record.iter().map(convert).collect());
    }

    Ok(Sheet::from_grid(name, grid))
}

/// Header plus record count without converting any data rows
pub(crate) fn read_metadata(bytes: &[u8], name: &str) -> Result<Metadata> {
    let mut reader = reader(bytes);
    let mut records = reader.byte_records();

    let header: Vec<CellValue> = match records.next() {
        Some(record) => record?.iter().map(convert).collect(),
        None => Vec::new(),
    };

    let mut row_count = 0;
    for record in records {
        record?;
        row_count += 1;
    }

    Ok(Metadata {
        sheet_names: vec![name.to_string()],
        columns: Sheet::from_grid(name, vec![header]).columns().to_vec(),
        row_count,
        error: None,
    })
}
