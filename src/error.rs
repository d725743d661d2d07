use thiserror::Error;

/// Faults the cell itself raises into the failure channel.
///
/// Any reason type used with [`Deferred`](crate::Deferred) must be
/// constructible from this, which is how panics and chaining cycles turn
/// into ordinary rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("producer panicked: {0}")]
    ProducerPanicked(String),
    #[error("reaction panicked: {0}")]
    ReactionPanicked(String),
    #[error("chaining cycle: a reaction resolved its own downstream cell")]
    ChainCycle,
    /// Every handle to a pending cell was dropped, so it can never settle.
    #[error("producer dropped before settling the cell")]
    ProducerDropped,
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

/// Best effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::{panic_message, Error};

    #[test]
    fn test_panic_message_literal_and_formatted() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");
        let code = 7;
        let payload = std::panic::catch_unwind(move || panic!("code {}", code)).unwrap_err();
        assert_eq!(panic_message(&*payload), "code 7");
    }

    #[test]
    fn test_error_into_string() {
        let reason: String = Error::ChainCycle.into();
        assert!(reason.starts_with("chaining cycle"));
    }
}
