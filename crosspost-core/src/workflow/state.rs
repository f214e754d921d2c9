use std::fmt;

use serde::Serialize;

/// Workflow states in execution order; `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    FetchAsset,
    Authenticate,
    NavigateToUpload,
    SubmitFile,
    AwaitProcessing,
    FillMetadata,
    SelectCategory,
    EnterTags,
    Publish,
    Verify,
    Done,
    Failed,
}

impl WorkflowState {
    /// The non-terminal states, strictly in the order they run.
    pub const SEQUENCE: [WorkflowState; 10] = [
        WorkflowState::FetchAsset,
        WorkflowState::Authenticate,
        WorkflowState::NavigateToUpload,
        WorkflowState::SubmitFile,
        WorkflowState::AwaitProcessing,
        WorkflowState::FillMetadata,
        WorkflowState::SelectCategory,
        WorkflowState::EnterTags,
        WorkflowState::Publish,
        WorkflowState::Verify,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::FetchAsset => "FETCH_ASSET",
            WorkflowState::Authenticate => "AUTHENTICATE",
            WorkflowState::NavigateToUpload => "NAVIGATE_TO_UPLOAD",
            WorkflowState::SubmitFile => "SUBMIT_FILE",
            WorkflowState::AwaitProcessing => "AWAIT_PROCESSING",
            WorkflowState::FillMetadata => "FILL_METADATA",
            WorkflowState::SelectCategory => "SELECT_CATEGORY",
            WorkflowState::EnterTags => "ENTER_TAGS",
            WorkflowState::Publish => "PUBLISH",
            WorkflowState::Verify => "VERIFY",
            WorkflowState::Done => "DONE",
            WorkflowState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_runs_fetch_to_verify_without_terminals() {
        assert_eq!(WorkflowState::SEQUENCE[0], WorkflowState::FetchAsset);
        assert_eq!(WorkflowState::SEQUENCE[9], WorkflowState::Verify);
        assert!(!WorkflowState::SEQUENCE.contains(&WorkflowState::Done));
        assert!(!WorkflowState::SEQUENCE.contains(&WorkflowState::Failed));
    }

    #[test]
    fn names_match_serialized_form() {
        for state in WorkflowState::SEQUENCE {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }
}
