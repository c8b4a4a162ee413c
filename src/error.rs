//! Error and fault definitions for the PCA9482 direct-charging controller.

/// Failure computing the initial adapter request for a session.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PresetError {
    /// Battery voltage is below the absolute floor for direct charging.
    Unsafe,
    /// The source offers no object able to run the requested conversion ratio.
    NoCapableSource,
}

impl core::fmt::Display for PresetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PresetError::Unsafe => write!(f, "battery voltage below direct-charging floor"),
            PresetError::NoCapableSource => write!(f, "no source object supports direct charging"),
        }
    }
}

/// Failure reported by the adapter negotiation channel.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NegotiateError {
    /// Channel is busy with another message; worth one immediate retry.
    Busy,
    /// No source attached or the channel went away.
    Offline,
    /// Source refused the request.
    Rejected,
    /// Source did not answer in time.
    Timeout,
}

impl core::fmt::Display for NegotiateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NegotiateError::Busy => write!(f, "negotiation channel busy"),
            NegotiateError::Offline => write!(f, "source offline"),
            NegotiateError::Rejected => write!(f, "request rejected by source"),
            NegotiateError::Timeout => write!(f, "source did not answer"),
        }
    }
}

/// Why a session was stopped or a fault was raised.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultReason {
    // Input validity.
    VinInvalid,
    VoutMaxOv,
    VinUnplug,
    VinOvp,
    VinOvTracking,
    VinUvTracking,
    // Protection.
    ReverseCurrent,
    SinkRcpTimeout,
    VinOcp,
    WatchdogTimeout,
    SafetyTimeout,
    VbatOvp,
    VbatTooLow,
    // Thermal.
    ThermalNtc,
    ThermalRegulation,
    ThermalShutdown,
    // Physical faults on internal nodes.
    PhaseFault,
    CbstShort,
    CflyShort,
    VinShort,
    OvpOutShort,
    OvpOutErrLo,
    SwitchShort,
    ReverseSoftStartOc,
    /// Device left its active state without any latched reason.
    NotActive,
    /// Register bus failed.
    Bus,
    /// ADC sample could not be taken.
    Adc,
    /// Adapter negotiation failed.
    Negotiation,
    /// Session preset failed.
    Preset(PresetError),
    /// Retryable faults kept coming after the retry budget was spent.
    RetryExhausted,
    /// Controller was asked to act in a state that does not allow it.
    InvalidState,
}

impl core::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FaultReason::Preset(e) => write!(f, "preset failed: {}", e),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Result of classifying the IC status registers.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultOutcome {
    Ok,
    /// Transient condition; recover with reset and re-preset.
    Retryable(FaultReason),
    /// Stop the session.
    Fatal(FaultReason),
    /// Reverse current after the battery passed float voltage: the battery is full.
    ChargingDone,
}

/// Controller error, returned by every step and by the public surface.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// Register transaction failed.
    Bus,
    /// ADC sample failed or came back in the wrong unit.
    Adc,
    /// Negotiation with the adapter failed.
    Negotiation(NegotiateError),
    /// Initial adapter request could not be computed.
    Preset(PresetError),
    /// Hardware fault that ends the session.
    Fault(FaultReason),
    /// Operation not allowed in the current state.
    InvalidState,
    /// Parameter outside the range the hardware supports.
    OutOfRange,
}

impl Error {
    /// Reason reported through the health code when this error stops a session.
    pub fn reason(&self) -> FaultReason {
        match self {
            Error::Bus => FaultReason::Bus,
            Error::Adc => FaultReason::Adc,
            Error::Negotiation(_) => FaultReason::Negotiation,
            Error::Preset(e) => FaultReason::Preset(*e),
            Error::Fault(r) => *r,
            Error::InvalidState | Error::OutOfRange => FaultReason::InvalidState,
        }
    }
}

impl From<PresetError> for Error {
    fn from(e: PresetError) -> Self {
        Error::Preset(e)
    }
}

impl From<NegotiateError> for Error {
    fn from(e: NegotiateError) -> Self {
        Error::Negotiation(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Bus => write!(f, "register bus error"),
            Error::Adc => write!(f, "ADC read error"),
            Error::Negotiation(e) => write!(f, "negotiation error: {}", e),
            Error::Preset(e) => write!(f, "preset error: {}", e),
            Error::Fault(r) => write!(f, "fault: {}", r),
            Error::InvalidState => write!(f, "operation not allowed in current state"),
            Error::OutOfRange => write!(f, "parameter out of range"),
        }
    }
}
