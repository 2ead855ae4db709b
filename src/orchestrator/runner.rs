//! Query entrypoint primed into the runtime.
//!
//! `load_db(path)` opens the database and returns the introspected schema as JSON.
//! `run_edgeql(text)` compiles and runs one query and returns the result envelope:
//! `{"sql": str, "cols": [str], "rows": [{col: value}], "output": value | {"error": str}}`.

pub(crate) const LOAD_DB: &str = "load_db";
pub(crate) const RUN_QUERY: &str = "run_edgeql";

pub(crate) const RUNNER_CODE: &str = r#"
import json

from eqlize.adaptors import SQLiteAdaptor, SQLiteDialect
from eqlize.core import SQLCompiler
from eqlize.output import JSONFormatter
from eqlize.parser import EdgeQLParser

_formatter = JSONFormatter()
_parser = EdgeQLParser()
_dialect = SQLiteDialect()
_adaptor = None
_compiler = None


def load_db(path):
    global _adaptor, _compiler
    _adaptor = SQLiteAdaptor(path)
    _adaptor.connect()
    schema = _adaptor.introspect_schema()
    _compiler = SQLCompiler(schema, _dialect)
    return json.dumps(schema.to_dict(), indent=2)


def run_edgeql(text):
    try:
        sql = _compiler.compile(_parser.parse(text))
        print(sql)
        results = _adaptor.execute_query(sql)
        output = _formatter.to_dict(_compiler.restructure_results(results))
        rows = [row for row in output if isinstance(row, dict)] if isinstance(output, list) else []
        cols = []
        for row in rows:
            for key in row:
                if key not in cols:
                    cols.append(key)
    except Exception as exc:
        sql, cols, rows, output = "", [], [], {"error": str(exc)}
    return json.dumps({"sql": sql, "cols": cols, "rows": rows, "output": output}, default=str)
"#;
