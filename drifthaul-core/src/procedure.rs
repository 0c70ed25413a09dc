//! Repeated stored-procedure calls batched into multi-statement scripts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, instrument, warn};

use crate::driver::WarehouseConnection;
use crate::error::{CoreError, Result};
use crate::script::MultiStatementExecutor;
use crate::statement::ParameterBinder;
use crate::stream::RowStreamer;
use crate::types::{SemanticType, SqlValue};

/// Flush once the accumulated script grows past this many bytes.
pub const MAX_SCRIPT_BYTES: usize = 500_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureParameter {
    pub name: String,
    pub semantic_type: SemanticType,
}

/// A procedure and its declared parameters, in call order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureSignature {
    /// Qualified, quoted procedure name as it appears after `CALL`.
    pub name: String,
    pub parameters: Vec<ProcedureParameter>,
}

impl ProcedureSignature {
    pub fn new(name: impl Into<String>, parameters: Vec<ProcedureParameter>) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

/// Result of one call, attributed to the request it came from.
#[derive(Debug)]
pub struct CallOutcome<R> {
    pub request: R,
    /// JSON text of the statement result.
    pub result: Result<String>,
}

/// Accumulates calls into one script and demultiplexes the results.
pub struct StoredProcedureCallBatcher<R> {
    signature: ProcedureSignature,
    binder: ParameterBinder,
    rows: RowStreamer,
    calls_per_script: usize,
    script: String,
    remaining: usize,
    pending: Vec<R>,
    scripts_run: usize,
}

impl<R> StoredProcedureCallBatcher<R> {
    pub fn new(
        signature: ProcedureSignature,
        binder: ParameterBinder,
        rows: RowStreamer,
        calls_per_script: usize,
    ) -> Self {
        let calls_per_script = calls_per_script.max(1);
        Self {
            signature,
            binder,
            rows,
            calls_per_script,
            script: String::new(),
            remaining: calls_per_script,
            pending: Vec::new(),
            scripts_run: 0,
        }
    }

    /// Append one call. Unexpected argument names fail before anything is
    /// appended; declared parameters without an argument are passed as NULL.
    pub fn add_call(&mut self, args: &Map<String, JsonValue>, request: R) -> Result<()> {
        let unexpected = args
            .keys()
            .filter(|key| {
                !self
                    .signature
                    .parameters
                    .iter()
                    .any(|p| p.name.eq_ignore_ascii_case(key))
            })
            .cloned()
            .collect::<Vec<_>>();
        if !unexpected.is_empty() {
            return Err(CoreError::ArgumentMismatch {
                procedure: self.signature.name.clone(),
                unexpected,
            });
        }

        let dialect = self.binder.dialect();
        let mut rendered = Vec::with_capacity(self.signature.parameters.len());
        for parameter in &self.signature.parameters {
            let argument = args
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(&parameter.name))
                .map(|(_, value)| value);
            let value = match argument {
                Some(value) => self.binder.bind_json(parameter.semantic_type, value)?,
                None => SqlValue::Null,
            };
            rendered.push(dialect.render_literal(&value));
        }

        let call = dialect.build_procedure_query(&self.signature.name, &rendered);
        self.script.push_str(&call);
        self.script.push_str(";\n");
        self.pending.push(request);
        self.remaining = self.remaining.saturating_sub(1);
        Ok(())
    }

    /// Call-count or script-size threshold reached.
    pub fn should_flush(&self) -> bool {
        self.remaining == 0 || self.script.len() > MAX_SCRIPT_BYTES
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn script_len(&self) -> usize {
        self.script.len()
    }

    /// Run the accumulated script and attribute one result per call, in
    /// submission order. A failure that aborts the script fails every call that
    /// has not produced a result yet.
    #[instrument(skip(self, conn), fields(procedure = %self.signature.name, calls = self.pending.len()))]
    pub fn flush(&mut self, conn: &mut dyn WarehouseConnection) -> Vec<CallOutcome<R>> {
        let script = std::mem::take(&mut self.script);
        let requests = std::mem::take(&mut self.pending);
        self.remaining = self.calls_per_script;
        if requests.is_empty() {
            return Vec::new();
        }
        self.scripts_run += 1;
        let script_ordinal = self.scripts_run;

        let executor = match MultiStatementExecutor::execute(conn, &script, requests.len(), self.rows.clone()) {
            Ok(executor) => executor,
            Err(err) => {
                warn!(script_ordinal, error = %err, "procedure script failed");
                return requests
                    .into_iter()
                    .map(|request| CallOutcome {
                        request,
                        result: Err(err.clone()),
                    })
                    .collect();
            }
        };

        let mut outcomes = Vec::with_capacity(requests.len());
        let mut results = executor;
        let mut failure: Option<CoreError> = None;
        for (index, request) in requests.into_iter().enumerate() {
            let result = match &failure {
                Some(err) => Err(err.clone()),
                None => match results.next() {
                    Some(Ok(outcome)) => outcome.result.into_json(),
                    Some(Err(err)) => {
                        failure = Some(err.clone());
                        Err(err)
                    }
                    None => {
                        let err = CoreError::Execution {
                            message: "script returned fewer results than calls".to_string(),
                            sql: String::new(),
                            context: format!("script {script_ordinal} call {}", index + 1),
                        };
                        failure = Some(err.clone());
                        Err(err)
                    }
                },
            };
            outcomes.push(CallOutcome { request, result });
        }

        if let Err(err) = conn.commit() {
            let err = CoreError::Resource(format!("commit after procedure script {script_ordinal} failed: {err}"));
            for outcome in &mut outcomes {
                if outcome.result.is_ok() {
                    outcome.result = Err(err.clone());
                }
            }
        }
        debug!(script_ordinal, calls = outcomes.len(), "flushed procedure script");
        outcomes
    }
}
