//! Turns a raw envelope into what the console shows: generated SQL, a result table
//! and a structured dump of the output.

use crate::envelope::{self, Envelope};
use crate::render::{RenderNode, Renderer};

#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub cols: Vec<String>,
    pub rows: Vec<Vec<RenderNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Presentation {
    /// The envelope could not be decoded; only the failure text is shown.
    ParseFailed { text: String },
    /// The query reported an error.
    QueryFailed {
        message: String,
        dump: RenderNode,
        json: String,
    },
    Results {
        sql: String,
        /// `None` when there are neither columns nor rows.
        table: Option<ResultTable>,
        dump: RenderNode,
        json: String,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultPresenter {
    renderer: Renderer,
}

impl ResultPresenter {
    pub fn new(renderer: Renderer) -> Self {
        Self { renderer }
    }

    pub fn present(&self, raw: &str) -> Presentation {
        match envelope::parse(raw) {
            Err(failure) => {
                tracing::debug!(error = %failure.error, raw_len = failure.raw.len(), "undecodable envelope");
                Presentation::ParseFailed {
                    text: failure.to_string(),
                }
            }
            Ok(Envelope::QueryFailed(failure)) => Presentation::QueryFailed {
                dump: self.renderer.render_json(&failure.payload),
                json: pretty(&failure.envelope),
                message: failure.message,
            },
            Ok(Envelope::Results(env)) => {
                let table = if env.cols.is_empty() && env.rows.is_empty() {
                    None
                } else {
                    let rows = env
                        .rows
                        .iter()
                        .map(|row| {
                            env.cols
                                .iter()
                                .map(|col| {
                                    row.get(col)
                                        .map_or(RenderNode::Blank, |v| self.renderer.render_json(v))
                                })
                                .collect()
                        })
                        .collect();
                    Some(ResultTable {
                        cols: env.cols.clone(),
                        rows,
                    })
                };

                let dumped = match &env.output {
                    Some(output) => output.clone(),
                    None => serde_json::to_value(&env).unwrap_or(serde_json::Value::Null),
                };
                Presentation::Results {
                    sql: env.sql.clone(),
                    table,
                    dump: self.renderer.render_json(&dumped),
                    json: pretty(&dumped),
                }
            }
        }
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
