use crate::error::{AppError, AppResult, ValidationError};

pub(super) fn parse_agent_address(s: &str) -> AppResult<String> {
    let address = s.trim();
    if address.is_empty() {
        return Err(AppError::validation(ValidationError::EmptyAgentAddress));
    }
    Ok(address.to_owned())
}

pub(crate) fn parse_timer_factor(s: &str) -> AppResult<f64> {
    let value: f64 = s.trim().parse().map_err(|err| {
        AppError::validation(ValidationError::InvalidTimerFactorText {
            value: s.to_owned(),
            source: err,
        })
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::validation(ValidationError::InvalidTimerFactor {
            value,
        }));
    }
    Ok(value)
}
