//! Acknowledgement policy.
//!
//! | failure                      | disposition |
//! |------------------------------|-------------|
//! | decode error                 | acknowledge |
//! | integrity violation on write | acknowledge |
//! | explicit permanent drop      | acknowledge |
//! | transient infrastructure     | redeliver   |
//! | anything unclassified        | redeliver   |
//!
//! Every failure is logged, whatever its disposition.

use courier_core::{ClassifyWriteError, WriteErrorClass};

use crate::worker::WorkerError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    IntegrityViolation,
    Permanent,
    Transient,
    Unclassified,
}

impl FailureKind {
    pub fn classify(err: &WorkerError, store: &dyn ClassifyWriteError) -> Self {
        match err {
            WorkerError::Decode(_) => FailureKind::Decode,
            WorkerError::Store(e) => match store.classify_write_error(e) {
                WriteErrorClass::IntegrityViolation => FailureKind::IntegrityViolation,
                WriteErrorClass::Transient => FailureKind::Transient,
                WriteErrorClass::Unknown => FailureKind::Unclassified,
            },
            WorkerError::Permanent(_) => FailureKind::Permanent,
            WorkerError::Transient(_) => FailureKind::Transient,
            WorkerError::Other(_) => FailureKind::Unclassified,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FailureKind::Decode | FailureKind::IntegrityViolation | FailureKind::Permanent
        )
    }

    pub fn disposition(&self) -> Disposition {
        if self.is_permanent() {
            Disposition::Acknowledge
        } else {
            Disposition::Redeliver
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode_error",
            FailureKind::IntegrityViolation => "integrity_violation",
            FailureKind::Permanent => "permanent",
            FailureKind::Transient => "transient",
            FailureKind::Unclassified => "unclassified",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    Acknowledge,
    Redeliver,
}

/// Lifecycle of one delivery.
///
/// `Received -> Decoding -> Handling -> Acknowledged | RedeliverRequested`;
/// a decode failure goes straight from `Decoding` to `Acknowledged`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Decoding,
    Handling,
    Acknowledged,
    RedeliverRequested,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchState::Acknowledged | DispatchState::RedeliverRequested
        )
    }

    /// Terminal state for a disposition.
    pub fn settle(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Acknowledge => DispatchState::Acknowledged,
            Disposition::Redeliver => DispatchState::RedeliverRequested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{IntegrityKind, StoreError};

    struct DefaultRules;
    impl ClassifyWriteError for DefaultRules {}

    fn kind(err: WorkerError) -> FailureKind {
        FailureKind::classify(&err, &DefaultRules)
    }

    #[test]
    fn permanent_failures_are_acknowledged() {
        let decode = crate::codec::decode_request(b"nope").unwrap_err();
        for err in [
            WorkerError::Decode(decode),
            WorkerError::Store(StoreError::integrity(IntegrityKind::Unique, "dup")),
            WorkerError::permanent("banned"),
        ] {
            assert_eq!(kind(err).disposition(), Disposition::Acknowledge);
        }
    }

    #[test]
    fn everything_else_is_redelivered() {
        for err in [
            WorkerError::Store(StoreError::unavailable("pool timed out")),
            WorkerError::Store(StoreError::other("???")),
            WorkerError::transient("smtp down"),
            WorkerError::Other(anyhow::anyhow!("boom")),
        ] {
            assert_eq!(kind(err).disposition(), Disposition::Redeliver);
        }
    }

    #[test]
    fn store_classifier_is_consulted() {
        struct EverythingTransient;
        impl ClassifyWriteError for EverythingTransient {
            fn classify_write_error(&self, _: &StoreError) -> WriteErrorClass {
                WriteErrorClass::Transient
            }
        }

        let err = WorkerError::Store(StoreError::integrity(IntegrityKind::Unique, "dup"));
        assert_eq!(
            FailureKind::classify(&err, &EverythingTransient),
            FailureKind::Transient
        );
    }

    #[test]
    fn settle_maps_dispositions_to_terminal_states() {
        assert_eq!(
            DispatchState::settle(Disposition::Acknowledge),
            DispatchState::Acknowledged
        );
        assert!(DispatchState::settle(Disposition::Redeliver).is_terminal());
        assert!(!DispatchState::Handling.is_terminal());
    }
}
