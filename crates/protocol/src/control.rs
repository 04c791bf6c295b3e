//! Control messages fed back from the transport stage to the ingest stage

/// Feedback from the transport stage into the ingest stage's input
///
/// Control messages carry no payload buffer; they exist to close the
/// mode-switch loop (the ingest stage returns to direct delivery once the
/// overflow store has drained through the id that triggered the switch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Highest record id durably handed to the backend in a completed batch
    LastConfirmedSequence(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_is_plain_data() {
        let msg = ControlMessage::LastConfirmedSequence(99);
        let copy = msg;
        assert_eq!(msg, copy);
    }
}
