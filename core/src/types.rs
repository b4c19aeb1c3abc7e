//! Shared primitive types used across the entire decision pipeline.

/// A stable, unique identifier for a user.
pub type UserId = String;

/// Identifier of a persona in the persona catalog.
pub type PersonaId = String;

/// Identifier of a content catalog entry.
pub type ItemId = String;

/// Number of days in a lookback window. Only 30 and 180 are valid.
pub type WindowDays = u32;

/// The two supported lookback windows, short first.
pub const SUPPORTED_WINDOWS: [WindowDays; 2] = [30, 180];

/// Minimum history a user needs before any signals are computed.
pub const MIN_HISTORY_DAYS: i64 = 30;
