use crate::runtime::RuntimeHandle;

/// A bootstrapped runtime: the handle plus what bootstrap learned about the database.
///
/// Created once per successful bootstrap and shared read-only afterwards.
pub struct RuntimeSession {
    handle: Box<dyn RuntimeHandle>,
    db_path: String,
    schema: Option<String>,
}

impl RuntimeSession {
    pub(crate) fn new(handle: Box<dyn RuntimeHandle>, db_path: String, schema: Option<String>) -> Self {
        Self {
            handle,
            db_path,
            schema,
        }
    }

    pub fn handle(&self) -> &dyn RuntimeHandle {
        self.handle.as_ref()
    }

    /// Database path as seen from inside the runtime.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Schema JSON returned by `load_db`.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

impl std::fmt::Debug for RuntimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeSession")
            .field("db_path", &self.db_path)
            .field("schema", &self.schema.as_ref().map(|s| s.len()))
            .finish_non_exhaustive()
    }
}
