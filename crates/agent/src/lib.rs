//! Dialogue orchestration for the Eloquence voice-coaching agent: the
//! per-session phase FSM, the interruption arbiter, the scenario engine,
//! emotion tagging, and the dialogue manager that ties them to the LLM
//! Client (spec §4.4, §4.5, §4.8, §4.9).

pub mod dialogue_manager;
pub mod emotion;
pub mod interruption;
pub mod scenario_engine;
pub mod session_fsm;

pub use dialogue_manager::{DialogueManager, DialogueResponse};
pub use emotion::tag;
pub use interruption::{ArbiterDecision, InterruptionArbiter};
pub use scenario_engine::{ScenarioEngine, VariableValue};
pub use session_fsm::{Checkpoint, SessionFsm};
