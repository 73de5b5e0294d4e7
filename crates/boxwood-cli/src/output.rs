//! Formatted output helpers for CLI commands.

/// Renders `rows` under `headers` as left-aligned columns separated by
/// two spaces. The last column is not padded.
#[must_use]
pub fn render_table<S: AsRef<str>>(headers: &[&str], rows: &[Vec<S>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.as_ref().chars().count());
        }
    }

    let mut out = String::new();
    let header_row: Vec<&str> = headers.to_vec();
    push_row(&mut out, &widths, &header_row);
    for row in rows {
        let cells: Vec<&str> = row.iter().map(AsRef::as_ref).collect();
        push_row(&mut out, &widths, &cells);
    }
    out
}

fn push_row(out: &mut String, widths: &[usize], cells: &[&str]) {
    let last = cells.len().saturating_sub(1);
    for (i, cell) in cells.iter().enumerate() {
        if i == last {
            out.push_str(cell);
        } else {
            let pad = widths.get(i).copied().unwrap_or(0);
            out.push_str(&format!("{cell:<pad$}  "));
        }
    }
    out.push('\n');
}

/// Placeholder for an absent value.
#[must_use]
pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_to_widest_cell() {
        let table = render_table(
            &["ID", "NAME"],
            &[vec!["a", "web"], vec!["0123456789", "db"]],
        );
        assert_eq!(table, "ID          NAME\na           web\n0123456789  db\n");
    }

    #[test]
    fn empty_table_has_only_the_header() {
        let rows: Vec<Vec<String>> = Vec::new();
        assert_eq!(render_table(&["NAME", "DRIVER"], &rows), "NAME  DRIVER\n");
    }

    #[test]
    fn missing_values_render_as_dash() {
        assert_eq!(or_dash(None::<i32>), "-");
        assert_eq!(or_dash(Some(42)), "42");
    }
}
