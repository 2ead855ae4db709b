//! Text summary builder for CLI output.
//!
//! This module formats a query presentation into human-readable lines for text mode.

use crate::presenter::Presentation;
use crate::render::text::TextLayout;

/// Which result views to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum View {
    Table,
    Json,
    Both,
}

impl View {
    fn table(self) -> bool {
        matches!(self, View::Table | View::Both)
    }

    fn json(self) -> bool {
        matches!(self, View::Json | View::Both)
    }
}

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
    pub failed: bool,
}

/// Build a text summary from a presentation.
pub(crate) fn build_text_summary(
    presentation: &Presentation,
    layout: &TextLayout,
    view: View,
) -> TextSummary {
    let mut lines = Vec::new();

    match presentation {
        Presentation::ParseFailed { text } => {
            lines.push(text.clone());
            return TextSummary {
                lines,
                failed: true,
            };
        }
        Presentation::QueryFailed {
            message,
            dump,
            json,
        } => {
            lines.push(format!("Query failed: {message}"));
            if view.table() {
                lines.push(String::new());
                lines.extend(layout.node_lines(dump));
            }
            if view.json() {
                lines.push(String::new());
                lines.extend(json.lines().map(str::to_string));
            }
            return TextSummary {
                lines,
                failed: true,
            };
        }
        Presentation::Results {
            sql,
            table,
            dump,
            json,
        } => {
            if !sql.trim().is_empty() {
                lines.push(format!("SQL: {}", sql.trim()));
                lines.push(String::new());
            }
            if view.table() {
                match table {
                    Some(t) => {
                        lines.extend(layout.table_lines(Some(t.cols.as_slice()), &t.rows));
                        lines.push(format!(
                            "({} row{})",
                            t.rows.len(),
                            if t.rows.len() == 1 { "" } else { "s" }
                        ));
                    }
                    None => {
                        lines.push("(no results)".to_string());
                        lines.extend(layout.node_lines(dump));
                    }
                }
            }
            if view.json() {
                if view.table() {
                    lines.push(String::new());
                }
                lines.extend(json.lines().map(str::to_string));
            }
        }
    }

    TextSummary {
        lines,
        failed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::ResultPresenter;

    fn summary(raw: &str, view: View) -> TextSummary {
        let presentation = ResultPresenter::default().present(raw);
        build_text_summary(&presentation, &TextLayout::default(), view)
    }

    #[test]
    fn results_print_sql_table_and_row_count() {
        let raw = r#"{"sql":"SELECT id FROM t","cols":["id"],"rows":[{"id":1},{"id":2}],"output":[{"id":1},{"id":2}]}"#;
        let s = summary(raw, View::Table);
        assert!(!s.failed);
        assert_eq!(
            s.lines,
            vec!["SQL: SELECT id FROM t", "", "id", "--", "1", "2", "(2 rows)"]
        );
    }

    #[test]
    fn query_failure_leads_with_error_text() {
        let raw = r#"{"sql":"","cols":[],"rows":[],"output":{"error":"syntax error"}}"#;
        let s = summary(raw, View::Table);
        assert!(s.failed);
        assert_eq!(s.lines[0], "Query failed: syntax error");
        assert!(!s.lines.iter().any(|l| l.starts_with("SQL:")));
    }

    #[test]
    fn parse_failure_prints_only_failure() {
        let s = summary("{not json", View::Both);
        assert!(s.failed);
        assert_eq!(s.lines.len(), 1);
    }

    #[test]
    fn json_view_prints_pretty_output() {
        let raw = r#"{"sql":"SELECT 1","cols":[],"rows":[],"output":[1]}"#;
        let s = summary(raw, View::Json);
        assert_eq!(s.lines, vec!["SQL: SELECT 1", "", "[", "  1", "]"]);
    }
}
