pub mod engine;
pub mod phases;
pub mod signals;
pub mod states;

pub use engine::{ConversationEngine, ConversationLimits, FlowTransitionError};
pub use phases::{
    behavior_for, ClosePhase, DiscoveryPhase, GreetingPhase, PhaseBehavior, PitchPhase,
};
pub use signals::SignalDetector;
pub use states::{
    CallFlags, CallState, CallerSignal, CallerTurn, DetectedObjection, NextStep, Phase,
    PhaseAction, PlanTrigger, Sentiment, SpokenAction, StateEffect, TurnPlan,
};
