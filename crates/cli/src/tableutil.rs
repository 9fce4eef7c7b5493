//! Table output helpers shared by the list-style subcommands.

use comfy_table::{presets, CellAlignment, ContentArrangement, Table};

/// A borderless uppercase-header table in the management CLI tradition.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.to_vec());
    for column in table.column_iter_mut() {
        column.set_cell_alignment(CellAlignment::Left);
        column.set_padding((0, 3));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_renders_rows_without_borders() {
        let mut table = new_table(&["NAME", "STATE"]);
        table.add_row(vec!["web-1", "Running"]);
        let rendered = table.to_string();
        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("web-1"));
        assert!(!rendered.contains('|'));
        assert!(!rendered.contains('+'));
    }
}
