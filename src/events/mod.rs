// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 火情事件生命周期
pub mod manager;

pub use manager::{
    EventId, EventState, EventStats, EventTransition, FireEvent, FireEventManager, TransitionKind,
};
