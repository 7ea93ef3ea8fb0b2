pub mod pipeline;
pub mod state;
pub mod validation;
pub mod wizard;

pub use pipeline::{RetryPolicy, StageModels, WebsiteGenerationWorkflow, WorkflowOptions};
pub use state::{AgentRecord, ProgressObserver, WorkflowMetadata, WorkflowState, WorkflowStatus, WorkflowSummary};
pub use validation::{validate_output, ValidationReport};
pub use wizard::WizardData;
