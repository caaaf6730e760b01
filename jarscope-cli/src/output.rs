use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Prints `data` as pretty JSON under `--json`, otherwise hands it to `human`.
pub fn print_output<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    human: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        human(data);
    }
    Ok(())
}

#[derive(Clone, Copy)]
pub enum Align {
    Left,
    Right,
}

/// Borderless, whitespace-aligned table for terminal listings.
pub struct TabWriter {
    table: Table,
}

impl TabWriter {
    pub fn new(columns: &[(&str, Align)]) -> Self {
        let mut table = Table::new();
        table
            .load_preset(presets::NOTHING)
            .set_content_arrangement(ContentArrangement::Disabled)
            .set_header(columns.iter().map(|(name, _)| *name));

        // two spaces between columns, none at the edges
        let last = columns.len().saturating_sub(1);
        for (index, (_, align)) in columns.iter().enumerate() {
            if let Some(column) = table.column_mut(index) {
                column.set_cell_alignment(match align {
                    Align::Left => CellAlignment::Left,
                    Align::Right => CellAlignment::Right,
                });
                column.set_padding((u16::from(index != 0), u16::from(index != last)));
            }
        }

        Self { table }
    }

    pub fn row(&mut self, values: Vec<String>) {
        self.table.add_row(values);
    }

    pub fn render(&self) -> String {
        self.table
            .to_string()
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_align() {
        let mut writer = TabWriter::new(&[("Class", Align::Left), ("Methods", Align::Right)]);
        writer.row(vec!["a".to_string(), "3".to_string()]);
        writer.row(vec!["client".to_string(), "120".to_string()]);

        let text = writer.render();
        let lines: Vec<&str> = text.lines().filter(|line| !line.is_empty()).collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Class"));
        assert!(lines[1].starts_with("a "));
        assert!(lines[1].ends_with('3'));
        assert!(lines[2].ends_with("120"));
        assert_eq!(lines[1].len(), lines[2].len());
    }
}
