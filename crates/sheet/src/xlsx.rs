use crate::book::Book;
use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use crate::loader::Metadata;
use crate::sheet::Sheet;
use calamine::{
    open_workbook_auto_from_rs, Data, Dimensions, Range, Reader, Sheets, Xlsx,
};
use chrono::{Datelike, NaiveDate, NaiveDateTime, SubsecRound, TimeDelta, Timelike};
use rust_xlsxwriter::{Format, Workbook};
use std::io::Cursor;

type CalamineBook<'a> = Sheets<Cursor<&'a [u8]>>;

/// Render an elapsed-time cell the way Excel's `[h]:mm:ss` format does
fn duration_text(duration: TimeDelta) -> String {
    let millis = duration.num_milliseconds();
    let sign = if millis < 0 { "-" } else { "" };
    let secs = (millis.unsigned_abs() + 500) / 1000;
    format!("{sign}{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    let raw = s.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Convert calamine Data to CellValue
fn data_to_cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Null,
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) => CellValue::String(s.clone()),
        Data::DateTime(dt) if dt.is_duration() => dt
            .as_duration()
            .map_or(CellValue::Float(dt.as_f64()), |d| {
                CellValue::String(duration_text(d))
            }),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map_or(CellValue::Float(dt.as_f64()), |d| {
                CellValue::DateTime(d.round_subsecs(0))
            }),
        Data::DateTimeIso(s) => {
            parse_iso(s).map_or_else(|| CellValue::String(s.clone()), CellValue::DateTime)
        }
        Data::DurationIso(s) => CellValue::String(s.clone()),
        Data::Error(e) => CellValue::Error(e.to_string()),
    }
}

fn open(bytes: &[u8]) -> Result<CalamineBook<'_>> {
    open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(SheetError::from)
}

fn range_to_sheet(name: &str, range: &Range<Data>) -> Sheet {
    let grid: Vec<Vec<CellValue>> = range
        .rows()
        .map(|row| row.iter().map(data_to_cell_value).collect())
        .collect();
    Sheet::from_grid(name, grid)
}

fn read_range(workbook: &mut CalamineBook<'_>, name: &str) -> Result<Range<Data>> {
    workbook.worksheet_range(name).map_err(SheetError::from)
}

/// Sheet names in workbook order
pub(crate) fn sheet_names(bytes: &[u8]) -> Result<Vec<String>> {
    Ok(open(bytes)?.sheet_names())
}

/// Load one sheet; `None` selects the first sheet
pub(crate) fn read_sheet(bytes: &[u8], sheet_name: Option<&str>) -> Result<Sheet> {
    let mut workbook = open(bytes)?;
    let names = workbook.sheet_names();

    let name = match sheet_name {
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .cloned()
            .ok_or_else(|| SheetError::SheetNotFound {
                name: wanted.to_string(),
            })?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| SheetError::unreadable("workbook has no sheets"))?,
    };

    let range = read_range(&mut workbook, &name)?;
    Ok(range_to_sheet(&name, &range))
}

/// Load every sheet in workbook order
pub(crate) fn read_book(bytes: &[u8]) -> Result<Book> {
    let mut workbook = open(bytes)?;
    let mut book = Book::new();

    for name in workbook.sheet_names() {
        let range = read_range(&mut workbook, &name)?;
        book.add_sheet(&name, range_to_sheet(&name, &range))?;
    }

    Ok(book)
}

/// Sheet names plus the header and data row count of the first sheet.
///
/// For xlsx only the header row's cells are decoded and the row count comes
/// from the sheet's declared dimensions. Other workbook formats have no
/// streaming reader, so their first sheet is decoded in full.
pub(crate) fn read_metadata(bytes: &[u8]) -> Result<Metadata> {
    let mut workbook = open(bytes)?;
    let sheet_names = workbook.sheet_names();

    let Some(first) = sheet_names.first().cloned() else {
        return Ok(Metadata {
            sheet_names,
            ..Metadata::default()
        });
    };

    let (header, row_count) = if let Sheets::Xlsx(xlsx) = &mut workbook {
        stream_header(xlsx, &first)?
    } else {
        let range = read_range(&mut workbook, &first)?;
        let header = range
            .rows()
            .next()
            .map(|row| row.iter().map(data_to_cell_value).collect())
            .unwrap_or_default();
        (header, range.height().saturating_sub(1))
    };
    let columns = Sheet::from_grid(&first, vec![header]).columns().to_vec();

    Ok(Metadata {
        columns,
        row_count,
        sheet_names,
        error: None,
    })
}

/// Read cells of an xlsx sheet until the first populated row is complete.
///
/// Returns that row and the number of rows below it.
fn stream_header(
    xlsx: &mut Xlsx<Cursor<&[u8]>>,
    name: &str,
) -> Result<(Vec<CellValue>, usize)> {
    let mut cells = xlsx
        .worksheet_cells_reader(name)
        .map_err(|e| SheetError::from(calamine::Error::from(e)))?;
    let Dimensions { start, end } = cells.dimensions();
    let width = (end.1.saturating_sub(start.1) + 1) as usize;

    let mut header = vec![CellValue::Null; width];
    let mut header_row = None;
    let mut last_row = end.0;

    while let Some(cell) = cells
        .next_cell()
        .map_err(|e| SheetError::from(calamine::Error::from(e)))?
    {
        let (row, col) = cell.get_position();
        let value = data_to_cell_value(&Data::from(cell.get_value().clone()));
        if matches!(value, CellValue::Null) {
            continue;
        }
        match header_row {
            None => header_row = Some(row),
            Some(first) if row > first => {
                last_row = last_row.max(row);
                break;
            }
            Some(_) => {}
        }
        let Some(offset) = col.checked_sub(start.1).map(|o| o as usize) else {
            continue;
        };
        if offset >= header.len() {
            header.resize(offset + 1, CellValue::Null);
        }
        header[offset] = value;
    }

    let Some(header_row) = header_row else {
        return Ok((Vec::new(), 0));
    };
    Ok((header, last_row.saturating_sub(header_row) as usize))
}

impl Book {
    /// Write all sheets (header row first) into an in-memory xlsx file.
    pub fn to_xlsx_bytes(&self) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let datetime_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

        for (name, sheet) in self.sheets() {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(name)?;

            for (col_idx, column) in sheet.columns().iter().enumerate() {
                let col_num = u16::try_from(col_idx)
                    .map_err(|_| SheetError::Export("Column index overflow".to_string()))?;
                worksheet.write_string(0, col_num, column)?;
            }

            for (row_idx, row) in sheet.rows().enumerate() {
                let row_num = u32::try_from(row_idx + 1)
                    .map_err(|_| SheetError::Export("Row index overflow".to_string()))?;

                for (col_idx, cell) in row.iter().enumerate() {
                    let col_num = u16::try_from(col_idx)
                        .map_err(|_| SheetError::Export("Column index overflow".to_string()))?;

                    match cell {
                        CellValue::Null => {}
                        CellValue::Bool(b) => {
                            worksheet.write_boolean(row_num, col_num, *b)?;
                        }
                        CellValue::Int(i) => {
                            // Note: Excel stores all numbers as f64, so integers > 2^53
                            // may lose precision
                            worksheet.write_number(row_num, col_num, *i as f64)?;
                        }
                        CellValue::Float(f) => {
                            worksheet.write_number(row_num, col_num, *f)?;
                        }
                        CellValue::DateTime(dt) if !is_excel_representable(dt) => {
                            worksheet.write_string(row_num, col_num, &cell.display_text())?;
                        }
                        CellValue::DateTime(dt) => {
                            let format = if dt.num_seconds_from_midnight() == 0 {
                                &date_format
                            } else {
                                &datetime_format
                            };
                            worksheet.write_datetime_with_format(
                                row_num,
                                col_num,
                                &to_excel_datetime(dt)?,
                                format,
                            )?;
                        }
                        CellValue::String(s) | CellValue::Error(s) => {
                            worksheet.write_string(row_num, col_num, s)?;
                        }
                    }
                }
            }
        }

        Ok(workbook.save_to_buffer()?)
    }
}

/// Excel's 1900 date system cannot hold dates outside these years
fn is_excel_representable(dt: &NaiveDateTime) -> bool {
    (1900..=9999).contains(&dt.year())
}

fn to_excel_datetime(dt: &NaiveDateTime) -> Result<rust_xlsxwriter::ExcelDateTime> {
    let out_of_range = |_| SheetError::Export(format!("Date out of range: {dt}"));
    let year = u16::try_from(dt.year()).map_err(out_of_range)?;
    let month = u8::try_from(dt.month()).map_err(out_of_range)?;
    let day = u8::try_from(dt.day()).map_err(out_of_range)?;
    let hour = u16::try_from(dt.hour()).map_err(out_of_range)?;
    let minute = u8::try_from(dt.minute()).map_err(out_of_range)?;

    Ok(rust_xlsxwriter::ExcelDateTime::from_ymd(year, month, day)?
        .and_hms(hour, minute, f64::from(dt.second()))?)
}
