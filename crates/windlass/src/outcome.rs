/// Result of a forward action.
///
/// Both forms carry compensation data, since a permanent failure may still
/// have partial effects that need undoing. Steps with nothing to hand over
/// use `()` as the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<O, D = ()> {
    /// The forward action committed.
    Success {
        /// Value returned to the handler.
        output: O,
        /// Data the compensation will need.
        compensation: D,
    },
    /// The forward action concluded the operation can never succeed.
    ///
    /// This is a result, not a thrown error: it always carries the
    /// compensation data describing whatever was done before giving up.
    PermanentFailure {
        /// Why the operation is unrecoverable.
        message: String,
        /// Data the compensation will need.
        compensation: D,
    },
}

impl<O, D> StepOutcome<O, D> {
    /// Successful outcome with compensation data.
    #[must_use]
    pub fn success(output: O, compensation: D) -> Self {
        Self::Success {
            output,
            compensation,
        }
    }

    /// Unrecoverable outcome with compensation data.
    #[must_use]
    pub fn permanent_failure(message: impl Into<String>, compensation: D) -> Self {
        Self::PermanentFailure {
            message: message.into(),
            compensation,
        }
    }
}

/// What a compensation receives when it runs.
///
/// Hybrid steps register their compensation before the forward action runs,
/// so the forward action may never get the chance to produce data. The
/// recipient pattern-matches instead of probing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationData<I, D> {
    /// The forward action never settled; the original step input stands in.
    Fallback(I),
    /// Data the forward action produced for this compensation.
    Rich(D),
}

impl<I, D> CompensationData<I, D> {
    /// Whether the forward action produced data before the unwind.
    #[must_use]
    pub fn is_rich(&self) -> bool {
        matches!(self, Self::Rich(_))
    }

    /// The produced data, if the forward action settled.
    #[must_use]
    pub fn rich(self) -> Option<D> {
        match self {
            Self::Rich(data) => Some(data),
            Self::Fallback(_) => None,
        }
    }

    /// The original input, if the forward action never settled.
    #[must_use]
    pub fn fallback(self) -> Option<I> {
        match self {
            Self::Fallback(input) => Some(input),
            Self::Rich(_) => None,
        }
    }
}
