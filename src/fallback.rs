//! Engine lifecycle state machine
//!
//! Every state change of an [`crate::Engine`] goes through [`transition`].
//! `ReadyFallback` is only ever left for `Disposed`, and `Disposed` is final.

use crate::backend::Backend;
use crate::error::OcrError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "backend", rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    /// Primary pipeline on the selected numeric backend
    ReadyPrimary(Backend),
    ReadyFallback,
    Disposed,
}

impl EngineState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::ReadyPrimary(_) | Self::ReadyFallback)
    }

    pub fn using_fallback(&self) -> bool {
        matches!(self, Self::ReadyFallback)
    }

    /// Backend serving requests, if any
    pub fn backend(&self) -> Option<Backend> {
        match self {
            Self::ReadyPrimary(backend) => Some(*backend),
            Self::ReadyFallback => Some(Backend::Secondary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// `initialize()` began the work
    InitStarted,
    PrimaryReady(Backend),
    /// The secondary engine is up, either at initialization or after a
    /// primary failure
    FallbackReady,
    /// Neither the primary nor the secondary could start
    InitFailed,
    Dispose,
}

/// Apply `event` to `state`. Pure.
///
/// Any event after disposal yields [`OcrError::EngineDisposed`]; any other
/// event that makes no sense in `state` is an internal error.
pub fn transition(state: EngineState, event: EngineEvent) -> Result<EngineState, OcrError> {
    use EngineEvent as E;
    use EngineState as S;

    match (state, event) {
        (S::Disposed, _) => Err(OcrError::EngineDisposed),
        (_, E::Dispose) => Ok(S::Disposed),

        (S::Uninitialized, E::InitStarted) => Ok(S::Initializing),
        (S::Initializing, E::PrimaryReady(backend)) if backend.is_primary() => {
            Ok(S::ReadyPrimary(backend))
        }
        (S::Initializing, E::FallbackReady) => Ok(S::ReadyFallback),
        (S::Initializing, E::InitFailed) => Ok(S::Uninitialized),
        (S::ReadyPrimary(_), E::FallbackReady) => Ok(S::ReadyFallback),

        (state, event) => Err(OcrError::Internal(format!(
            "invalid engine transition {:?} on {:?}",
            state, event
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_event() -> impl Strategy<Value = EngineEvent> {
        prop_oneof![
            Just(EngineEvent::InitStarted),
            Just(EngineEvent::PrimaryReady(Backend::GpuCompute)),
            Just(EngineEvent::PrimaryReady(Backend::Vectorized)),
            Just(EngineEvent::PrimaryReady(Backend::Secondary)),
            Just(EngineEvent::FallbackReady),
            Just(EngineEvent::InitFailed),
            Just(EngineEvent::Dispose),
        ]
    }

    #[test]
    fn test_primary_lifecycle() {
        let s = transition(EngineState::Uninitialized, EngineEvent::InitStarted).unwrap();
        let s = transition(s, EngineEvent::PrimaryReady(Backend::Vectorized)).unwrap();
        assert_eq!(s, EngineState::ReadyPrimary(Backend::Vectorized));
        assert_eq!(s.backend(), Some(Backend::Vectorized));

        let s = transition(s, EngineEvent::FallbackReady).unwrap();
        assert!(s.using_fallback());
        assert_eq!(s.backend(), Some(Backend::Secondary));
    }

    #[test]
    fn test_failed_init_returns_to_uninitialized() {
        let s = transition(EngineState::Initializing, EngineEvent::InitFailed).unwrap();
        assert_eq!(s, EngineState::Uninitialized);
        assert!(transition(s, EngineEvent::InitStarted).is_ok());
    }

    #[test]
    fn test_secondary_is_not_a_primary_backend() {
        assert!(transition(
            EngineState::Initializing,
            EngineEvent::PrimaryReady(Backend::Secondary)
        )
        .is_err());
    }

    #[test]
    fn test_dispose_from_every_live_state() {
        for state in [
            EngineState::Uninitialized,
            EngineState::Initializing,
            EngineState::ReadyPrimary(Backend::GpuShader),
            EngineState::ReadyFallback,
        ] {
            assert_eq!(
                transition(state, EngineEvent::Dispose).unwrap(),
                EngineState::Disposed
            );
        }
        assert_eq!(
            transition(EngineState::Disposed, EngineEvent::Dispose),
            Err(OcrError::EngineDisposed)
        );
    }

    proptest! {
        #[test]
        fn prop_fallback_is_never_left_except_to_disposed(
            events in proptest::collection::vec(any_event(), 0..32)
        ) {
            let mut state = EngineState::Uninitialized;
            let mut seen_fallback = false;

            for event in events {
                if let Ok(next) = transition(state, event) {
                    state = next;
                }
                if state.using_fallback() {
                    seen_fallback = true;
                }
                if seen_fallback {
                    prop_assert!(matches!(
                        state,
                        EngineState::ReadyFallback | EngineState::Disposed
                    ));
                }
            }
        }

        #[test]
        fn prop_disposed_rejects_everything(event in any_event()) {
            prop_assert_eq!(
                transition(EngineState::Disposed, event),
                Err(OcrError::EngineDisposed)
            );
        }
    }
}
