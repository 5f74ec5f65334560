//! Wire-level records shared between the pipeline and its consumers.

use serde::Serialize;

/// One unit of program output delivered to the streaming endpoint.
///
/// Exactly one of `output` or `error` is set on records produced from a
/// stream frame; a pure terminator carries neither and has `done == true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub waiting_for_input: bool,
    pub done: bool,
}

impl ProgramOutput {
    /// A stdout frame record.
    pub fn stdout(text: impl Into<String>, waiting_for_input: bool) -> Self {
        Self {
            output: Some(text.into()),
            error: None,
            waiting_for_input,
            done: false,
        }
    }

    /// A stderr frame record. Stderr never signals waiting-for-input.
    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(text.into()),
            waiting_for_input: false,
            done: false,
        }
    }

    /// The end-of-stream terminator.
    pub fn terminator() -> Self {
        Self {
            output: None,
            error: None,
            waiting_for_input: false,
            done: true,
        }
    }

    /// A terminal failure record.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(message.into()),
            waiting_for_input: false,
            done: true,
        }
    }

    /// Whether a consumer should stop reading after this record.
    pub fn is_terminal(&self) -> bool {
        self.done || self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// A stdin-reading call site discovered by the safety gate.
///
/// The catalog is advisory: it only feeds the waiting-for-input heuristic
/// and is not proof that the program reads input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputOperation {
    /// 1-based source line.
    pub line: usize,
    /// Qualified name, e.g. `fmt.Scanln`.
    pub kind: String,
    /// Package component, e.g. `fmt`.
    pub package: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_record_serializes_camel_case_and_omits_empty() {
        let record = ProgramOutput::stdout("hi\n", true);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"output":"hi\n","waitingForInput":true,"done":false}"#);

        let record = ProgramOutput::terminator();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"waitingForInput":false,"done":true}"#);
    }

    #[test]
    fn error_records_are_terminal_for_consumers() {
        assert!(ProgramOutput::stderr("boom").is_terminal());
        assert!(ProgramOutput::terminator().is_terminal());
        assert!(ProgramOutput::fatal("failed").is_terminal());
        assert!(!ProgramOutput::stdout("fine", false).is_terminal());
    }
}
