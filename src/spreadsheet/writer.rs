//! ブックの書き出し（rust_xlsxwriter）
//!
//! 値のみ書き出す（書式・数式は保持しない）。日付は日時書式付きのシリアル値。

use super::reader::SheetGrid;
use crate::error::{Result, RosterError};
use roster_sync_common::types::CellValue;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

const DATE_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// 全シートをxlsxのバイト列に変換
pub fn render_workbook(sheets: &[SheetGrid]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format(DATE_FORMAT);

    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;

        for (r, row) in sheet.rows.iter().enumerate() {
            let r = u32::try_from(r)
                .map_err(|_| RosterError::Persistence(format!("行数が多すぎます: {}", r)))?;
            for (c, value) in row.iter().enumerate() {
                let c = u16::try_from(c)
                    .map_err(|_| RosterError::Persistence(format!("列数が多すぎます: {}", c)))?;
                write_cell(worksheet, r, c, value, &date_format)?;
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &CellValue,
    date_format: &Format,
) -> Result<()> {
    match value {
        CellValue::Empty => {}
        CellValue::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        CellValue::Int(i) => {
            worksheet.write_number(row, col, *i as f64)?;
        }
        CellValue::Float(f) => {
            worksheet.write_number(row, col, *f)?;
        }
        CellValue::Date(d) => {
            worksheet.write_number_with_format(row, col, CellValue::excel_serial(d), date_format)?;
        }
        CellValue::Text(s) => {
            worksheet.write_string(row, col, s)?;
        }
    }
    Ok(())
}
