//! Worksheet access by row and column.

use crate::automation::Automation;
use crate::book::Book;
use crate::error::{Error, Result};
use crate::{CellValue, SheetRef};

/// A worksheet of an open workbook. Rows and columns are 1-based.
pub struct Sheet<'b, 'k, A: Automation> {
    book: &'b Book<'k, A>,
    sheet: SheetRef,
}

impl<'b, 'k, A: Automation> Sheet<'b, 'k, A> {
    pub(crate) fn new(book: &'b Book<'k, A>, sheet: SheetRef) -> Self {
        Self { book, sheet }
    }

    pub fn sheet_ref(&self) -> &SheetRef {
        &self.sheet
    }

    pub fn cell(&self, row: u32, col: u32) -> Result<CellValue> {
        check_index(row, col)?;
        self.book.read_cell(&self.sheet, row, col)
    }

    /// Write a cell. The workbook becomes unsaved.
    pub fn set_cell(&self, row: u32, col: u32, value: impl Into<CellValue>) -> Result<()> {
        check_index(row, col)?;
        self.book.write_cell(&self.sheet, row, col, value.into())
    }

    /// Values of `row` in the columns `cols`.
    pub fn row_values(&self, row: u32, cols: std::ops::RangeInclusive<u32>) -> Result<Vec<CellValue>> {
        cols.map(|col| self.cell(row, col)).collect()
    }

    /// Values of `col` in the rows `rows`.
    pub fn column_values(
        &self,
        col: u32,
        rows: std::ops::RangeInclusive<u32>,
    ) -> Result<Vec<CellValue>> {
        rows.map(|row| self.cell(row, col)).collect()
    }
}

fn check_index(row: u32, col: u32) -> Result<()> {
    if row == 0 || col == 0 {
        return Err(Error::InvalidCellIndex { row, col });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use crate::options::AcquireOptions;
    use crate::Keeper;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rows_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.xls");
        MemoryHost::write_workbook_file(
            &path,
            &[
                (1, 1, CellValue::from("name")),
                (1, 2, CellValue::from("qty")),
                (2, 1, CellValue::from("bolts")),
                (2, 2, CellValue::from(12)),
            ],
        )
        .unwrap();
        let keeper = Keeper::new(MemoryHost::new());
        let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
        let sheet = book.sheet(0u32);

        assert_eq!(
            sheet.row_values(1, 1..=3).unwrap(),
            vec![CellValue::from("name"), CellValue::from("qty"), CellValue::Null]
        );
        assert_eq!(
            sheet.column_values(2, 1..=2).unwrap(),
            vec![CellValue::from("qty"), CellValue::Number(12.0)]
        );
        assert!(book.saved().unwrap());
    }

    #[test]
    fn test_zero_index_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.xls");
        MemoryHost::write_workbook_file(&path, &[]).unwrap();
        let keeper = Keeper::new(MemoryHost::new());
        let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();

        assert!(matches!(
            book.get(0, 1),
            Err(Error::InvalidCellIndex { row: 0, col: 1 })
        ));
        assert!(book.set(1, 0, 5).is_err());
        assert!(book.saved().unwrap());
    }

    #[test]
    fn test_named_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.xls");
        MemoryHost::write_workbook_file(&path, &[]).unwrap();
        let keeper = Keeper::new(MemoryHost::new());
        let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();

        book.sheet("sheet1").set_cell(3, 4, true).unwrap();
        assert_eq!(book.get(3, 4).unwrap(), CellValue::Bool(true));
        assert!(!book.saved().unwrap());
        assert!(book.sheet("missing").cell(1, 1).is_err());
    }
}
