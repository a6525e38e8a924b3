use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Left-aligned columns two spaces apart, a dashed rule under the header.
/// Cells past the header count are printed unpadded.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths = rows.iter().fold(
        headers.iter().map(|h| h.len()).collect::<Vec<_>>(),
        |mut widths, row| {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
            widths
        },
    );
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();

    let mut out = table_line(headers, &widths);
    out += &table_line(&rule, &widths);
    for row in rows {
        out += &table_line(row, &widths);
    }
    out
}

fn table_line<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| match widths.get(i) {
            Some(&width) => format!("{:<width$}", cell.as_ref()),
            None => cell.as_ref().to_string(),
        })
        .collect();
    format!("{}\n", padded.join("  ").trim_end())
}

/// `1234` → `20m 34s`.
pub fn format_secs(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s:02}s"),
        _ => format!("{h}h {m:02}m {s:02}s"),
    }
}
