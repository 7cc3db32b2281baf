// In: src/dataset/display.rs

//! Plain-text table rendering for `show`.
//!
//! ```text
//! +---+-----+
//! |_1 |_2   |
//! +---+-----+
//! |  1|hello|
//! +---+-----+
//! only showing top 1 row
//! ```

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};

use crate::error::tambakError;

/// Rows printed by `show` when the caller does not choose.
pub const DEFAULT_SHOW_ROWS: usize = 20;

/// Cell width beyond which `show(.., true)` elides a value.
pub const DEFAULT_TRUNCATE_WIDTH: usize = 20;

const MIN_COLUMN_WIDTH: usize = 3;

/// Renders up to `num_rows` rows of `batches` as a bordered table.
///
/// `truncate_width == 0` disables truncation and left-aligns cells; otherwise cells
/// are right-aligned and values longer than `truncate_width` characters are cut.
/// `has_more` appends the `only showing top N rows` footer.
pub(crate) fn render_table(
    schema: &SchemaRef,
    batches: &[RecordBatch],
    num_rows: usize,
    truncate_width: usize,
    has_more: bool,
) -> Result<String, tambakError> {
    let header: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| fit(f.name(), truncate_width))
        .collect();

    let options = FormatOptions::default().with_null("null");
    let mut rows: Vec<Vec<String>> = Vec::new();
    'batches: for batch in batches {
        let formatters = batch
            .columns()
            .iter()
            .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
            .collect::<Result<Vec<_>, _>>()?;
        for row in 0..batch.num_rows() {
            if rows.len() >= num_rows {
                break 'batches;
            }
            rows.push(
                formatters
                    .iter()
                    .map(|fmt| fit(&fmt.value(row).to_string(), truncate_width))
                    .collect(),
            );
        }
    }

    let mut widths: Vec<usize> = header
        .iter()
        .map(|h| h.chars().count().max(MIN_COLUMN_WIDTH))
        .collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let separator = {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(*width));
            line.push('+');
        }
        line
    };

    let right_align = truncate_width > 0;
    let render_row = |cells: &[String]| {
        let mut line = String::from("|");
        for (cell, width) in cells.iter().zip(&widths) {
            let pad = " ".repeat(width - cell.chars().count());
            if right_align {
                line.push_str(&pad);
                line.push_str(cell);
            } else {
                line.push_str(cell);
                line.push_str(&pad);
            }
            line.push('|');
        }
        line
    };

    let mut out = String::new();
    out.push_str(&separator);
    out.push('\n');
    out.push_str(&render_row(&header));
    out.push('\n');
    out.push_str(&separator);
    out.push('\n');
    for row in &rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out.push_str(&separator);
    out.push('\n');
    if has_more {
        out.push_str(&format!(
            "only showing top {} {}\n",
            num_rows,
            if num_rows == 1 { "row" } else { "rows" }
        ));
    }
    Ok(out)
}

fn fit(value: &str, truncate_width: usize) -> String {
    if truncate_width == 0 || value.chars().count() <= truncate_width {
        return value.to_string();
    }
    if truncate_width < 4 {
        return value.chars().take(truncate_width).collect();
    }
    let mut cut: String = value.chars().take(truncate_width - 3).collect();
    cut.push_str("...");
    cut
}
