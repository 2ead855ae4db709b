//! Plain-text layout of render trees for terminal output.
//!
//! Collapsed nodes print as `▸ <label>`. Expanded nodes print `▾ <label>` followed by
//! their body, indented. Table cells always show a one-line summary; composite cells
//! that are expanded are listed underneath the table.

use super::{Body, Disposition, RenderNode, Table};

const INDENT: &str = "  ";

#[derive(Debug, Clone, Copy)]
pub struct TextLayout {
    /// Nesting levels shown expanded even if the node's default is collapsed.
    expand_depth: usize,
    max_cell_width: usize,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            expand_depth: 1,
            max_cell_width: 40,
        }
    }
}

impl TextLayout {
    pub fn new(expand_depth: usize, max_cell_width: usize) -> Self {
        Self {
            expand_depth,
            max_cell_width: max_cell_width.max(4),
        }
    }

    pub fn node_lines(&self, node: &RenderNode) -> Vec<String> {
        let mut out = Vec::new();
        self.push_node(node, 0, &mut out);
        out
    }

    /// Lay out a table whose cells were rendered individually.
    pub fn table_lines(&self, header: Option<&[String]>, rows: &[Vec<RenderNode>]) -> Vec<String> {
        let mut out = Vec::new();
        self.push_table(header, rows, 0, &mut out);
        out
    }

    fn expanded(&self, disposition: Disposition, depth: usize) -> bool {
        disposition == Disposition::Expanded || depth < self.expand_depth
    }

    fn push_node(&self, node: &RenderNode, depth: usize, out: &mut Vec<String>) {
        match node {
            RenderNode::Blank => out.push(String::new()),
            RenderNode::Text(s) => out.extend(s.lines().map(str::to_string)),
            RenderNode::Collapsible(c) if !self.expanded(c.disposition, depth) => {
                out.push(format!("▸ {}", c.label));
            }
            RenderNode::Collapsible(c) => {
                out.push(format!("▾ {}", c.label));
                let mut body = Vec::new();
                match &c.body {
                    Body::Text(t) => body.push(t.clone()),
                    Body::Table(Table { header, rows }) => {
                        self.push_table(header.as_deref(), rows, depth + 1, &mut body)
                    }
                }
                out.extend(body.into_iter().map(|l| format!("{INDENT}{l}")));
            }
        }
    }

    fn push_table(
        &self,
        header: Option<&[String]>,
        rows: &[Vec<RenderNode>],
        depth: usize,
        out: &mut Vec<String>,
    ) {
        let columns = header
            .map(<[String]>::len)
            .unwrap_or(0)
            .max(rows.iter().map(Vec::len).max().unwrap_or(0));
        if columns == 0 {
            return;
        }

        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|row| {
                (0..columns)
                    .map(|c| row.get(c).map_or_else(String::new, |n| self.cell_text(n)))
                    .collect()
            })
            .collect();

        let mut widths = vec![0usize; columns];
        if let Some(header) = header {
            for (w, h) in widths.iter_mut().zip(header) {
                *w = (*w).max(h.chars().count());
            }
        }
        for row in &cells {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }

        if let Some(header) = header {
            let names: Vec<String> = (0..columns)
                .map(|c| header.get(c).map_or_else(String::new, |h| self.fit(h)))
                .collect();
            out.push(join_row(&names, &widths));
            out.push(
                widths
                    .iter()
                    .map(|w| "-".repeat(*w))
                    .collect::<Vec<_>>()
                    .join("-+-"),
            );
        }
        for row in &cells {
            out.push(join_row(row, &widths));
        }

        // Composite cells that should be open are shown below the grid.
        for (r, row) in rows.iter().enumerate() {
            for (c, node) in row.iter().enumerate() {
                let RenderNode::Collapsible(inner) = node else {
                    continue;
                };
                if !self.expanded(inner.disposition, depth) {
                    continue;
                }
                let column = header
                    .and_then(|h| h.get(c))
                    .cloned()
                    .unwrap_or_else(|| format!("#{}", c + 1));
                out.push(format!("[row {}, {}]", r + 1, column));
                let mut nested = Vec::new();
                self.push_node(node, depth, &mut nested);
                out.extend(nested.into_iter().map(|l| format!("{INDENT}{l}")));
            }
        }
    }

    fn cell_text(&self, node: &RenderNode) -> String {
        match node {
            RenderNode::Blank => String::new(),
            RenderNode::Text(s) => self.fit(&s.replace('\n', " ")),
            RenderNode::Collapsible(c) => format!("▸ {}", c.label),
        }
    }

    fn fit(&self, s: &str) -> String {
        if s.chars().count() <= self.max_cell_width {
            return s.to_string();
        }
        let mut cut: String = s.chars().take(self.max_cell_width - 1).collect();
        cut.push('…');
        cut
    }
}

fn join_row(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| format!("{cell:<w$}", w = *w))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}
