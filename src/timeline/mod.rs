pub mod ticks;
pub mod transition;

pub use ticks::{generate_ticks, PanelCapabilities, Tick, TickInterval, TickPlanner, TICK_LADDER};
pub use transition::{
    ease_in_out_cubic, CompletionReason, RedrawCallback, TransitionAnimator, TransitionCompletion,
    TransitionDirection, TransitionFrame, TransitionState, TransitionTicket,
};
