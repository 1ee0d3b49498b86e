//! Executor contract (spec §4.8, C8): the one boundary where this crate performs I/O. Everything
//! above this layer — builder, compiler, hydrator, preloader — is pure and synchronous; only
//! `DbExecutor` methods and the `Session` methods built on top of them suspend (spec §5).

use async_trait::async_trait;

use crate::ast::Literal;

/// A raw result set in columnar shape: a column name list plus row-major values (spec §4.8).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Literal>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Literal>>) -> Self {
        ResultSet { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Declared driver capabilities (spec §4.8/§5): whether this executor supports transactions at
/// all, and whether it tolerates concurrent in-flight calls (single-connection drivers, e.g. many
/// MSSQL clients, must report `concurrent: false` so the preloader falls back to sequential fetch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub transactions: bool,
    pub concurrent: bool,
}

/// The one I/O boundary this crate calls through. Implemented by the host application against
/// whichever database driver it uses; this crate ships no concrete implementation.
#[async_trait]
pub trait DbExecutor: Send + Sync {
    async fn execute_sql(&self, sql: &str, params: &[Literal]) -> anyhow::Result<ResultSet>;

    async fn begin_transaction(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn commit_transaction(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rollback_transaction(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The identity value generated by the most recently executed `INSERT`, for dialects/drivers
    /// that report it out of band rather than via `RETURNING`/`OUTPUT` (spec §4.7's "identity-
    /// generated PK is retrieved from the executor's reported last-insert-id").
    async fn last_insert_id(&self) -> anyhow::Result<Option<Literal>> {
        Ok(None)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// An in-memory executor stand-in: scripted responses, no real SQL execution. Used by
    /// `session`/`hydrate`/`preload` unit tests to exercise the flow above the I/O boundary without
    /// a real database driver, the same role the teacher crate's `InMemoryStore` plays in its own
    /// executor-shaped tests.
    pub struct ScriptedExecutor {
        pub responses: Mutex<Vec<ResultSet>>,
        pub calls: Mutex<Vec<(String, Vec<Literal>)>>,
        pub capabilities: Capabilities,
        pub next_identity: Mutex<Option<Literal>>,
    }

    impl ScriptedExecutor {
        pub fn new(responses: Vec<ResultSet>) -> Self {
            ScriptedExecutor {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
                capabilities: Capabilities { transactions: true, concurrent: false },
                next_identity: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl DbExecutor for ScriptedExecutor {
        async fn execute_sql(&self, sql: &str, params: &[Literal]) -> anyhow::Result<ResultSet> {
            self.calls.lock().unwrap().push((sql.to_string(), params.to_vec()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(ResultSet::default());
            }
            Ok(responses.remove(0))
        }

        async fn last_insert_id(&self) -> anyhow::Result<Option<Literal>> {
            Ok(self.next_identity.lock().unwrap().clone())
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }
    }

    #[tokio::test]
    async fn scripted_executor_replays_responses_in_order() {
        let executor = ScriptedExecutor::new(vec![
            ResultSet::new(vec!["id".into()], vec![vec![Literal::Int(1)]]),
            ResultSet::new(vec!["id".into()], vec![vec![Literal::Int(2)]]),
        ]);
        let first = executor.execute_sql("SELECT 1", &[]).await.unwrap();
        let second = executor.execute_sql("SELECT 2", &[]).await.unwrap();
        assert_eq!(first.rows, vec![vec![Literal::Int(1)]]);
        assert_eq!(second.rows, vec![vec![Literal::Int(2)]]);
        assert_eq!(executor.calls.lock().unwrap().len(), 2);
    }
}
